use std::env;

pub mod http;
pub mod settings;

pub use http::with_security_headers;
pub use settings::{ConfigScope, Settings};

pub struct Config {
    pub database_url: String,
    pub bind_port: u16,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            database_url: env::var("DATABASE_URL")
                .unwrap_or_else(|_| "postgres://localhost/boxoffice".to_string()),
            bind_port: env::var("PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(3001),
        }
    }
}
