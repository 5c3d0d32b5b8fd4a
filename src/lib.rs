pub mod config;
pub mod db;
pub mod gateway;
pub mod http;
mod log_utils;
pub mod profile;
pub mod prompts;
pub mod providers;
pub mod reconcile;
pub mod schema;
pub mod transport;
