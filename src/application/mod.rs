pub mod bootstrap;
pub mod commands;
pub mod dual_store;
pub mod identity;
pub mod policy;
pub mod records;
pub mod spot_finder;
pub mod timer_service;
