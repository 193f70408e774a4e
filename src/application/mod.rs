//! Application layer with consumer-facing services.

/// Application services.
pub mod services;

pub use services::DownloadTracker;
