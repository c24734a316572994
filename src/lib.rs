pub mod config;
pub mod engine;
pub mod external;
pub mod handlers;
pub mod models;
pub mod payment;
pub mod routes;
pub mod utils;
