#![forbid(unsafe_code)]

//! Core domain model and scheduling logic for medtrack.
//!
//! This crate provides:
//! - Domain types (schedules, medications, profiles, reports)
//! - Next-dose calculation and ranking
//! - Adherence reporting
//! - Reminder de-duplication and the polling loop
//! - Persistence (profile book, watermarks, config)

pub mod types;
pub mod error;
pub mod config;
pub mod logging;
pub mod schedule;
pub mod adherence;
pub mod gate;
pub mod watermark;
pub mod profiles;
pub mod clock;
pub mod poller;

// Re-export commonly used types
pub use error::{Error, Result};
pub use types::*;
pub use config::Config;
pub use schedule::{next_dose, pending_dose, rank_by_next_dose, GRACE_MINUTES};
pub use adherence::{adherence_report, trailing_report, REPORT_DAYS};
pub use gate::{should_notify, MemoryWatermarkStore, NotificationGate, NotifyDecision, WatermarkKey, WatermarkStore};
pub use watermark::FileWatermarkStore;
pub use profiles::{ProfileBook, ProfileFile};
pub use clock::{Clock, ManualClock, SystemClock};
pub use poller::{LogNotifier, Notifier, Poller, PollerHandle, ProfileSource};
