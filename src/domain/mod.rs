pub mod models;
pub mod search;
pub mod timer;
