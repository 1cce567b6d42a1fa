pub mod config;
pub mod endpoint;
pub mod error;
pub mod extract;
pub mod handlers;
pub mod health;
pub mod input;
pub mod key_generator;
pub mod middleware;
pub mod rate_limiter;
pub mod response;
pub mod server;
pub mod store;
pub mod stream;
pub mod upstream;

pub use config::Config;
pub use error::{RelayError, Result};
pub use response::RelayOutput;
pub use server::create_app;
