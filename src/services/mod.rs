pub mod gateway_service;
pub mod object_store;
pub mod storage_service;
pub mod token_service;
