pub mod client;
pub mod config;
pub mod console;
pub mod discovery;
pub mod error;
pub mod models;
