pub mod bus;
pub mod config;
pub mod errors;
pub mod registry;
pub mod scheduler;
pub mod sensors;
