pub mod bot;
pub mod config;
pub mod db;
pub mod dedup;
pub mod engine;
pub mod error;
pub mod filters;
pub mod logging;
pub mod matcher;
pub mod models;
pub mod planner;
pub mod schedule;
pub mod stats;
pub mod store;
pub mod transform;
pub mod transport;
