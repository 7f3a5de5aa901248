pub mod api;
pub mod betting;
pub mod config;
pub mod models;
