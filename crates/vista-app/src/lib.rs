pub mod backend;
pub mod commands;
pub mod config;
pub mod error;
pub mod metrics;
pub mod prediction;
pub mod retrain;
pub mod serving;
pub mod uploads;
