pub mod config;
pub mod context;
pub mod filter;
pub mod metrics_consts;
pub mod poller;
pub mod source;
