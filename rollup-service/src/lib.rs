pub mod config;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod queue;
pub mod rollup;
pub mod services;
pub mod startup;
