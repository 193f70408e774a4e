pub mod download_tracker;

pub use download_tracker::DownloadTracker;
