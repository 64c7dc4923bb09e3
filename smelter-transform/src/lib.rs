pub mod config;
pub mod context;
pub mod error;
pub mod metrics_consts;
pub mod registry;
pub mod scheduler;
pub mod transformers;
pub mod types;
