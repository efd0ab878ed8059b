//! # Forecast pipeline
//!
//! Channel-driven machinery between update submission and the read caches:
//!
//! 1. Submitters push production and weather updates into two bounded queues
//! 2. One inbound consumer drains both and drives the window scheduler
//! 3. The scheduler trains the model and predicts slots through the executor
//! 4. Predictions and accepted measurements go to the outbound queue
//! 5. The outbound consumer fans them out to the derived caches and listeners
//!
//! ## Module Organization
//!
//! - `window` - slot buffer and retention sweep
//! - `scheduler` - training and inference triggers
//! - `ingestion` - inbound and outbound consumer tasks
//! - `bus` - queue handles, submission and cache wiring

pub mod bus;
pub mod ingestion;
pub mod scheduler;
pub mod window;

pub use bus::UpdateBus;
pub use scheduler::{ScanOutcome, SchedulerSettings, WindowScheduler};
pub use window::{WindowBuffer, WindowEntry};
