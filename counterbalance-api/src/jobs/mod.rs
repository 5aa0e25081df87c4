//! Background Jobs for the counterbalance API
//!
//! - `abandonment_reaper`: flags (or deletes) assignments whose participant
//!   never finished, so their slots can be handed out again
//!
//! # Usage
//!
//! ```ignore
//! use counterbalance_api::jobs::{reaper_task, ReaperConfig, ReaperMetrics};
//! use tokio::sync::watch;
//!
//! let (shutdown_tx, shutdown_rx) = watch::channel(false);
//! let metrics = Arc::new(ReaperMetrics::new());
//! tokio::spawn(reaper_task(store.clone(), ReaperConfig::from_env()?, metrics, shutdown_rx));
//!
//! // On shutdown
//! let _ = shutdown_tx.send(true);
//! ```

pub mod abandonment_reaper;

pub use abandonment_reaper::{
    reaper_task, sweep_once, ReaperConfig, ReaperMetrics, ReaperPolicy, ReaperSnapshot,
};
