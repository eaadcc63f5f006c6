//! Core data models for the asset gateway.
//!
//! Objects are owned by the backing store; the gateway only reads their
//! metadata and streams their payload.

pub mod object;
