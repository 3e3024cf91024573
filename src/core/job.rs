//! Per-download state machine for squirrel-dl
//!
//! A [`Job`] owns the status, progress and persisted file reference of one
//! download, and reacts to transfer events routed to it by the manager. The
//! manager is the only owner of jobs; everything here assumes calls arrive
//! already serialized.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::core::files::FileStore;
use crate::core::store::{resume_token_key, KeyValueStore};
use crate::core::transfer::{ResumeToken, TaskId};

/// File name suffix used when the server suggests nothing.
const DEFAULT_SUFFIX: &str = ".mp4";

/// Lifecycle states of a download.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DownloadStatus {
    /// No download in flight and nothing kept; removal lands here
    None,
    /// A transfer task exists but no bytes have flowed yet
    Waiting,
    /// Bytes are flowing
    Downloading,
    /// Paused away; resume data may be waiting in the store
    Paused,
    /// The file is in the file store. Terminal success state
    Downloaded,
}

/// Read-only snapshot of a job, safe to hand to callers.
#[derive(Debug, Clone)]
pub struct DownloadModel {
    pub identifier: String,
    pub status: DownloadStatus,
    pub progress: f32,
    pub remote_path: String,
    pub local_path: Option<PathBuf>,
}

/// One download: persistent record plus the transient task handle.
///
/// Serialization covers exactly the durable fields (identifier, status,
/// progress, local file name, remote location). The task handle and the last
/// error never survive a restart.
#[derive(Debug, Serialize, Deserialize)]
pub struct Job {
    identifier: String,
    remote_path: String,
    status: DownloadStatus,
    progress: f32,
    local_file_name: Option<String>,
    #[serde(skip)]
    last_error: Option<String>,
    #[serde(skip)]
    active_task: Option<TaskId>,
}

impl Job {
    pub fn new(identifier: &str, remote_path: &str) -> Self {
        Self {
            identifier: identifier.to_string(),
            remote_path: remote_path.to_string(),
            status: DownloadStatus::None,
            progress: 0.0,
            local_file_name: None,
            last_error: None,
            active_task: None,
        }
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn status(&self) -> DownloadStatus {
        self.status
    }

    pub fn progress(&self) -> f32 {
        self.progress
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn active_task(&self) -> Option<TaskId> {
        self.active_task
    }

    /// Binds a freshly created (still suspended) transfer task. Restarting
    /// a downloaded job gives up its file reference; the new transfer will
    /// produce a fresh one.
    pub fn attach_task(&mut self, task: TaskId) {
        self.active_task = Some(task);
        self.status = DownloadStatus::Waiting;
        self.local_file_name = None;
        self.last_error = None;
    }

    /// Marks the job paused and releases the task handle. Optimistic: the
    /// transfer client is told to cancel afterwards.
    pub fn mark_paused(&mut self) -> Option<TaskId> {
        self.status = DownloadStatus::Paused;
        self.active_task.take()
    }

    /// Byte tick. A waiting job becomes downloading on its first tick; an
    /// unknown expected size reads as 0% rather than dividing by zero.
    pub fn bytes_written(&mut self, written: u64, total_expected: u64) {
        self.progress = if total_expected > 0 {
            ((written as f64 / total_expected as f64) * 100.0).min(100.0) as f32
        } else {
            0.0
        };
        if self.status == DownloadStatus::Waiting {
            self.status = DownloadStatus::Downloading;
        }
    }

    /// The transfer's body is complete; place the temp file under a name
    /// derived from the identifier and the server's suggestion. A failed
    /// move leaves the job retryable with the error recorded. The task
    /// handle stays bound: the terminal completed event still has to find
    /// this job.
    pub fn transfer_finished(
        &mut self,
        temp_path: &Path,
        suggested_name: Option<&str>,
        files: &dyn FileStore,
    ) {
        let name = format!(
            "{}{}",
            self.identifier,
            suggested_name.unwrap_or(DEFAULT_SUFFIX)
        );
        match files.move_temp(temp_path, &name) {
            Ok(_) => {
                self.local_file_name = Some(name);
                self.status = DownloadStatus::Downloaded;
                self.last_error = None;
            }
            Err(e) => {
                self.status = DownloadStatus::Waiting;
                self.last_error = Some(e.to_string());
            }
        }
    }

    /// Terminal transfer event; always releases the task handle. Success
    /// leaves the status alone (the finished event already settled it); a
    /// failure without resume data parks the job in `Waiting` with the
    /// error kept for surfacing, so the caller may retry.
    pub fn transfer_completed(&mut self, error: Option<String>) {
        self.active_task = None;
        if let Some(message) = error {
            self.status = DownloadStatus::Waiting;
            self.last_error = Some(message);
        }
    }

    /// Tears the job down. Active states hand their task back to the caller
    /// for cancellation; a paused job drops its stored resume token; a
    /// downloaded job deletes its file and reports `false` if that fails,
    /// leaving the status untouched so the caller can retry.
    pub fn remove(&mut self, store: &dyn KeyValueStore, files: &dyn FileStore) -> bool {
        match self.status {
            DownloadStatus::Downloading | DownloadStatus::Waiting | DownloadStatus::None => {}
            DownloadStatus::Paused => {
                let key = resume_token_key(&self.identifier);
                if let Some(bytes) = store.get(&key) {
                    // Nothing will resume this token; its partial file goes too
                    if let Some(path) =
                        ResumeToken::decode(&bytes).and_then(|token| token.temp_path)
                    {
                        let _ = std::fs::remove_file(path);
                    }
                    store.remove(&key);
                }
            }
            DownloadStatus::Downloaded => {
                let deleted = match &self.local_file_name {
                    Some(name) => files.delete(name),
                    None => false,
                };
                if !deleted {
                    return false;
                }
            }
        }
        self.status = DownloadStatus::None;
        self.active_task = None;
        self.local_file_name = None;
        true
    }

    /// Repairs a job reloaded from the store: a status that claims a live
    /// transfer cannot be true in a fresh process.
    pub fn normalize_loaded(&mut self) {
        if self.status == DownloadStatus::Downloading {
            self.status = DownloadStatus::Waiting;
        }
    }

    pub fn model(&self, files: &dyn FileStore) -> DownloadModel {
        DownloadModel {
            identifier: self.identifier.clone(),
            status: self.status,
            progress: self.progress,
            remote_path: self.remote_path.clone(),
            local_path: self
                .local_file_name
                .as_deref()
                .and_then(|name| files.resolve(name)),
        }
    }
}
