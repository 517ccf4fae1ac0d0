pub mod channel_store;
pub mod config;
pub mod fetcher;
pub mod history;
pub mod migrations;
pub mod models;
pub mod rate_limiters;
pub mod session_manager;
pub mod stats;
pub mod telegram;
