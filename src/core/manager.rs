//! Download manager for squirrel-dl
//!
//! The [`Downloader`] owns the table of all jobs, mediates every command,
//! persists the table on each mutation and fans transfer events out to the
//! matching job and then to the observer. The table sits behind one async
//! mutex; commands and the event router all funnel their
//! read-mutate-persist-notify sequence through it, so concurrent transfers
//! can never interleave partial table updates.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use log::{debug, warn};
use tokio::sync::{mpsc, Mutex};

use crate::core::error::{Error, Result};
use crate::core::files::{FileStore, LocalFileStore};
use crate::core::job::{DownloadModel, DownloadStatus, Job};
use crate::core::store::{resume_token_key, DiskKeyValueStore, KeyValueStore, JOB_TABLE_KEY};
use crate::core::transfer::{HttpTransferClient, TaskId, TransferEvent};

/// Receives every transfer-driven job mutation, with the job's fresh fields.
///
/// All methods have default no-op bodies, so implementors only pick up what
/// they care about.
pub trait DownloadObserver: Send + Sync {
    fn on_status_update(
        &self,
        identifier: &str,
        progress: f32,
        status: DownloadStatus,
        error: Option<&Error>,
    ) {
        let _ = (identifier, progress, status, error);
    }
}

/// Observer that ignores everything.
pub struct NoopObserver;

impl DownloadObserver for NoopObserver {}

/// The job table plus its (de)serialization to the key-value store. The
/// whole table is the unit of persistence.
struct JobTable {
    jobs: HashMap<String, Job>,
}

impl JobTable {
    fn load(store: &dyn KeyValueStore) -> Self {
        let jobs = store
            .get(JOB_TABLE_KEY)
            .and_then(|bytes| {
                match serde_json::from_slice::<HashMap<String, Job>>(&bytes) {
                    Ok(jobs) => Some(jobs),
                    Err(e) => {
                        warn!("persisted job table is unreadable, starting empty: {e}");
                        None
                    }
                }
            })
            .unwrap_or_default();

        let mut table = Self { jobs };
        for job in table.jobs.values_mut() {
            job.normalize_loaded();
        }
        table
    }

    fn persist(&self, store: &dyn KeyValueStore) {
        match serde_json::to_vec(&self.jobs) {
            Ok(bytes) => store.set(JOB_TABLE_KEY, &bytes),
            Err(e) => warn!("could not serialize job table: {e}"),
        }
    }

    fn job_for_task(&mut self, task: TaskId) -> Option<&mut Job> {
        self.jobs
            .values_mut()
            .find(|job| job.active_task() == Some(task))
    }
}

/// Builder for [`Downloader`]. The directory receives completed files and,
/// under a hidden subdirectory, the default state store and partial data.
pub struct DownloaderBuilder {
    directory: PathBuf,
    store: Option<Arc<dyn KeyValueStore>>,
    files: Option<Arc<dyn FileStore>>,
    observer: Arc<dyn DownloadObserver>,
}

impl Default for DownloaderBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl DownloaderBuilder {
    pub fn new() -> Self {
        Self {
            directory: PathBuf::from("."),
            store: None,
            files: None,
            observer: Arc::new(NoopObserver),
        }
    }

    /// Directory completed downloads are placed in.
    pub fn directory(mut self, directory: impl Into<PathBuf>) -> Self {
        self.directory = directory.into();
        self
    }

    /// Replaces the default file-backed key-value store.
    pub fn store(mut self, store: Arc<dyn KeyValueStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Replaces the default local file store.
    pub fn file_store(mut self, files: Arc<dyn FileStore>) -> Self {
        self.files = Some(files);
        self
    }

    pub fn observer(mut self, observer: Arc<dyn DownloadObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Loads the persisted job table (an unreadable table starts empty,
    /// never fails) and spawns the event router.
    pub fn build(self) -> Result<Downloader> {
        let state_dir = self.directory.join(".squirrel-dl");
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(DiskKeyValueStore::new(state_dir.clone())));
        let files = self
            .files
            .unwrap_or_else(|| Arc::new(LocalFileStore::new(self.directory.clone())));

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let client = Arc::new(HttpTransferClient::new(
            state_dir.join("partial"),
            events_tx,
        )?);

        let table = Arc::new(Mutex::new(JobTable::load(store.as_ref())));
        tokio::spawn(route_events(
            events_rx,
            Arc::clone(&table),
            Arc::clone(&store),
            Arc::clone(&files),
            self.observer,
        ));

        Ok(Downloader {
            table,
            store,
            files,
            client,
        })
    }
}

/// Resumable, persistent download manager.
///
/// Cheap to clone; clones share the same job table and transfer client.
#[derive(Clone)]
pub struct Downloader {
    table: Arc<Mutex<JobTable>>,
    store: Arc<dyn KeyValueStore>,
    files: Arc<dyn FileStore>,
    client: Arc<HttpTransferClient>,
}

impl Downloader {
    pub fn builder() -> DownloaderBuilder {
        DownloaderBuilder::new()
    }

    /// Snapshot of every known job, or `None` when there is nothing to show.
    pub async fn list_all(&self) -> Option<Vec<DownloadModel>> {
        let table = self.table.lock().await;
        if table.jobs.is_empty() {
            return None;
        }
        Some(
            table
                .jobs
                .values()
                .map(|job| job.model(self.files.as_ref()))
                .collect(),
        )
    }

    /// Starts or resumes the download for `identifier`. A resume token left
    /// behind by an earlier pause is consumed; otherwise the transfer starts
    /// fresh from `remote_path`. Rejects malformed URLs before touching any
    /// state.
    pub async fn resume_download(
        &self,
        identifier: &str,
        remote_path: &str,
    ) -> Result<DownloadModel> {
        let url = reqwest::Url::parse(remote_path)
            .map_err(|e| Error::InvalidInput(format!("'{remote_path}' is not a URL: {e}")))?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(Error::InvalidInput(format!(
                "unsupported URL scheme '{}'",
                url.scheme()
            )));
        }

        let mut table = self.table.lock().await;
        let job = table
            .jobs
            .entry(identifier.to_string())
            .or_insert_with(|| Job::new(identifier, remote_path));

        match job.active_task() {
            Some(task) => {
                // Already in flight; proceeding again is a no-op
                self.client.proceed(task);
            }
            None => {
                let token_key = resume_token_key(identifier);
                let stored = self.store.get(&token_key);
                let task = self.client.create_task(remote_path, stored.as_deref());
                if stored.is_some() {
                    self.store.remove(&token_key);
                }
                job.attach_task(task);
                self.client.proceed(task);
            }
        }

        let model = job.model(self.files.as_ref());
        table.persist(self.store.as_ref());
        Ok(model)
    }

    /// Pauses the job's transfer and stores its resume data. Completes only
    /// once the resume token (possibly empty) has been persisted.
    pub async fn pause_download(&self, identifier: &str) -> Result<DownloadModel> {
        let mut table = self.table.lock().await;
        let job = table
            .jobs
            .get_mut(identifier)
            .ok_or_else(|| Error::NotFound(identifier.to_string()))?;

        // Nothing to wind down for terminal states
        if matches!(
            job.status(),
            DownloadStatus::Downloaded | DownloadStatus::None
        ) {
            return Ok(job.model(self.files.as_ref()));
        }

        let task = job.mark_paused();
        if let Some(task) = task {
            if let Some(token) = self.client.cancel(task, true).await {
                self.store.set(&resume_token_key(identifier), &token);
            }
        }

        let model = job.model(self.files.as_ref());
        table.persist(self.store.as_ref());
        Ok(model)
    }

    /// Removes the job: cancels any in-flight transfer, drops stored resume
    /// data, deletes a completed file. On success the identifier is gone
    /// from the table; on failure the table is unchanged.
    pub async fn remove_download(&self, identifier: &str) -> Result<()> {
        let mut table = self.table.lock().await;
        let job = table
            .jobs
            .get_mut(identifier)
            .ok_or_else(|| Error::NotFound(identifier.to_string()))?;

        if let Some(task) = job.active_task() {
            let _ = self.client.cancel(task, false).await;
        }
        if !job.remove(self.store.as_ref(), self.files.as_ref()) {
            return Err(Error::RemoveFailed(identifier.to_string()));
        }

        table.jobs.remove(identifier);
        table.persist(self.store.as_ref());
        Ok(())
    }

    /// Snapshot of a finished download, or `None` while it is anything but
    /// downloaded. Unknown identifiers are "not available", not an error.
    pub async fn completed_download(&self, identifier: &str) -> Option<DownloadModel> {
        let table = self.table.lock().await;
        let job = table.jobs.get(identifier)?;
        (job.status() == DownloadStatus::Downloaded).then(|| job.model(self.files.as_ref()))
    }
}

/// The manager's "main context": every transfer event funnels through here,
/// one at a time, into the shared table.
async fn route_events(
    mut events: mpsc::UnboundedReceiver<TransferEvent>,
    table: Arc<Mutex<JobTable>>,
    store: Arc<dyn KeyValueStore>,
    files: Arc<dyn FileStore>,
    observer: Arc<dyn DownloadObserver>,
) {
    while let Some(event) = events.recv().await {
        let mut table = table.lock().await;

        let task = match &event {
            TransferEvent::Progress { task, .. }
            | TransferEvent::Finished { task, .. }
            | TransferEvent::Completed { task, .. } => *task,
        };
        let Some(job) = table.job_for_task(task) else {
            // The job was paused away or removed while this event was in
            // flight; applying it to any other job would corrupt the table.
            // A finished body that lost this race leaves a temp file nothing
            // will ever claim.
            if let TransferEvent::Finished { temp_path, .. } = &event {
                let _ = std::fs::remove_file(temp_path);
            }
            debug!("discarding event for task {task} with no matching job");
            continue;
        };

        match event {
            TransferEvent::Progress {
                written,
                total_expected,
                ..
            } => job.bytes_written(written, total_expected),
            TransferEvent::Finished {
                temp_path,
                suggested_name,
                ..
            } => job.transfer_finished(&temp_path, suggested_name.as_deref(), files.as_ref()),
            TransferEvent::Completed { error, .. } => job.transfer_completed(error),
        }

        let identifier = job.identifier().to_string();
        let progress = job.progress();
        let status = job.status();
        let error = job
            .last_error()
            .map(|message| Error::TransferFailed(message.to_string()));

        table.persist(store.as_ref());
        drop(table);

        observer.on_status_update(&identifier, progress, status, error.as_ref());
    }
}
