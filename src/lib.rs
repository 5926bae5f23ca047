pub mod agent;
pub mod chat;
pub mod config;
pub mod error;
pub mod gateway;
pub mod memory;
pub mod prompt;
pub mod registry;
pub mod store;
pub mod types;
pub mod users;
pub mod weather;
