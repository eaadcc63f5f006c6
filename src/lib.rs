//! Token-gated read gateway for stored game assets.
//!
//! Every request path names an object key. Callers presenting a valid
//! HMAC-signed bearer token get the object streamed back with its stored
//! HTTP metadata; see [`services::gateway_service`] for the exact order of
//! checks and [`errors`] for how each outcome maps to a status code.

pub mod config;
pub mod errors;
pub mod handlers;
pub mod models;
pub mod routes;
pub mod services;
