pub mod config;
pub mod error;
pub mod languages;
pub mod redis;
pub mod store;
pub mod submission;
pub mod types;
