pub mod auth_client;
pub mod config;
pub mod error;
pub mod local_storage;
pub mod maps_key;
pub mod session_store;
pub mod tables_client;
