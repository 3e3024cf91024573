//! Core library modules for squirrel-dl
//!
//! This module contains the internal implementation details of the squirrel-dl library.

pub mod error;
pub mod files;
pub mod job;
pub mod manager;
pub mod store;
pub mod stream;
pub mod transfer;

// Re-export main types for internal use
pub use job::{DownloadModel, DownloadStatus};
pub use manager::{Downloader, DownloaderBuilder};
