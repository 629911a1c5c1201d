//! Background Tasks Module
//!
//! Contains background tasks that run periodically while a cache is live.
//!
//! # Tasks
//! - Tidy: removes expired and disposed entries and enforces soft, age,
//!   idle and memory limits at the configured interval

mod lifecycle;
mod tidy;

pub use lifecycle::{HostedService, ServiceHost};
pub use tidy::{spawn_tidy_task, tidy_once, TidyReport, TidyState, TidyWorker};
