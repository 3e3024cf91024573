//! # squirrel-dl
//!
//! Resumable, persistent HTTP download manager: a table of named download
//! jobs driven through range/resume-capable transfers, persisted across
//! process restarts, with pause/resume and progress reporting.
//!
//! ```no_run
//! use squirrel_dl::Downloader;
//!
//! # #[tokio::main]
//! # async fn main() -> squirrel_dl::Result<()> {
//! let downloader = Downloader::builder().directory("downloads").build()?;
//!
//! downloader
//!     .resume_download("intro", "https://example.com/media/intro.mp4")
//!     .await?;
//!
//! // ...later, possibly after a restart of the whole process:
//! downloader.pause_download("intro").await?;
//! downloader
//!     .resume_download("intro", "https://example.com/media/intro.mp4")
//!     .await?;
//! # Ok(())
//! # }
//! ```
//!
//! Completed files land in the configured directory under
//! `identifier + suggested file name`; partial data and the persisted job
//! table live in a hidden state directory next to them, so an interrupted
//! or paused download picks up where it left off.

pub mod core;

pub use crate::core::error::{Error, Result};
pub use crate::core::files::{FileStore, LocalFileStore};
pub use crate::core::job::{DownloadModel, DownloadStatus};
pub use crate::core::manager::{DownloadObserver, Downloader, DownloaderBuilder, NoopObserver};
pub use crate::core::store::{DiskKeyValueStore, KeyValueStore, MemoryKeyValueStore};
pub use crate::core::transfer::{ResumeToken, TransferEvent};
