pub mod adapter;
pub mod config;
pub mod cycle;
pub mod error;
pub mod events;
pub mod executor;
pub mod io;
pub mod ledger;
pub mod orchestrator;
pub mod paths;
pub mod router;
pub mod scheduler;
pub mod sequence;
pub mod types;

pub use error::{ImpairError, Result};
pub use orchestrator::{ControlLoop, MetricsSnapshot, Orchestrator};
