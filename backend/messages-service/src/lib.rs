pub mod broker;
pub mod cache;
pub mod config;
pub mod consumers;
pub mod db;
pub mod error;
pub mod handlers;
pub mod logging;
pub mod metrics;
pub mod models;
pub mod repository;
pub mod routes;
pub mod services;
pub mod state;
