pub mod client;
pub mod config;
pub mod core;

pub use self::client::{ApiClient, ApiClientBuilder, Error};
pub use self::config::Config;
