//! HTTP transfer client for squirrel-dl
//!
//! Issues cancelable, resumable downloads. Each task streams into a temp
//! file and reports back through a shared event channel; the manager decides
//! what the events mean for its job table. Cancellation comes in two
//! flavors: plain (discard everything) and pause (flush the partial file and
//! hand back an encoded [`ResumeToken`]).

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use log::{debug, warn};
use reqwest::{Client, ClientBuilder};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt, SeekFrom};
use tokio::sync::{mpsc, oneshot};

use crate::core::error::{Error, Result};
use crate::core::stream::{create_transfer_stream, TRANSFER_BUFFER_SIZE};

/// Maximum number of retry attempts for network errors
const MAX_RETRY_ATTEMPTS: u32 = 3;

/// Base delay for exponential backoff (in milliseconds)
const BASE_RETRY_DELAY_MS: u64 = 1000;

/// Handle to one transfer task. Never persisted.
pub type TaskId = u64;

/// Everything a transfer task reports back to the manager.
#[derive(Debug)]
pub enum TransferEvent {
    /// Byte tick. `written` counts all bytes on disk for this transfer,
    /// including bytes recovered from a resume token.
    Progress {
        task: TaskId,
        written: u64,
        total_expected: u64,
    },

    /// The body has been fully streamed into `temp_path`.
    Finished {
        task: TaskId,
        temp_path: PathBuf,
        suggested_name: Option<String>,
    },

    /// The task is over. `error` is `None` on the success path (after
    /// `Finished`) and carries the failure message otherwise.
    Completed {
        task: TaskId,
        error: Option<String>,
    },
}

/// State needed to pick a transfer back up without re-downloading completed
/// bytes. Opaque to the manager; it only moves the encoded blob between the
/// transfer client and the key-value store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResumeToken {
    pub url: String,
    pub temp_path: Option<PathBuf>,
    pub bytes_downloaded: u64,
    pub total_expected: u64,
    pub suggested_name: Option<String>,
}

impl ResumeToken {
    fn fresh(url: &str) -> Self {
        Self {
            url: url.to_string(),
            temp_path: None,
            bytes_downloaded: 0,
            total_expected: 0,
            suggested_name: None,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        serde_json::to_vec(self).unwrap_or_default()
    }

    pub fn decode(bytes: &[u8]) -> Option<Self> {
        serde_json::from_slice(bytes).ok()
    }
}

/// Per-task control block shared with the running transfer loop.
struct TaskControl {
    token: ResumeToken,
    started: bool,
    cancel: Arc<AtomicBool>,
    pause: Arc<AtomicBool>,
    reply: Arc<Mutex<Option<oneshot::Sender<Option<Vec<u8>>>>>>,
}

/// One shared client, many concurrent transfer tasks, one event sink.
pub struct HttpTransferClient {
    client: Client,
    temp_dir: PathBuf,
    events: mpsc::UnboundedSender<TransferEvent>,
    tasks: Arc<Mutex<HashMap<TaskId, TaskControl>>>,
    next_task: AtomicU64,
}

impl HttpTransferClient {
    pub fn new(
        temp_dir: impl Into<PathBuf>,
        events: mpsc::UnboundedSender<TransferEvent>,
    ) -> Result<Self> {
        let client = ClientBuilder::new()
            .tcp_keepalive(Duration::from_secs(60))
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(20)
            .connect_timeout(Duration::from_secs(10))
            .user_agent(concat!("squirrel-dl/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            temp_dir: temp_dir.into(),
            events,
            tasks: Arc::new(Mutex::new(HashMap::new())),
            next_task: AtomicU64::new(1),
        })
    }

    /// Registers a suspended task for `url`, optionally picking up from a
    /// previously stored resume token. An unreadable token falls back to a
    /// fresh start. The task does nothing until [`proceed`](Self::proceed).
    pub fn create_task(&self, url: &str, stored_token: Option<&[u8]>) -> TaskId {
        let token = match stored_token {
            Some(bytes) => match ResumeToken::decode(bytes) {
                Some(token) => token,
                None => {
                    warn!("stored resume token is unreadable, starting over from {url}");
                    ResumeToken::fresh(url)
                }
            },
            None => ResumeToken::fresh(url),
        };

        let task = self.next_task.fetch_add(1, Ordering::Relaxed);
        self.tasks.lock().unwrap().insert(
            task,
            TaskControl {
                token,
                started: false,
                cancel: Arc::new(AtomicBool::new(false)),
                pause: Arc::new(AtomicBool::new(false)),
                reply: Arc::new(Mutex::new(None)),
            },
        );
        task
    }

    /// Starts a suspended task. Calling again on a running task, or on a
    /// task that already completed, does nothing.
    pub fn proceed(&self, task: TaskId) {
        let mut tasks = self.tasks.lock().unwrap();
        let Some(control) = tasks.get_mut(&task) else {
            return;
        };
        if control.started {
            return;
        }
        control.started = true;

        let ctx = TransferContext {
            client: self.client.clone(),
            events: self.events.clone(),
            temp_dir: self.temp_dir.clone(),
            token: control.token.clone(),
            cancel: Arc::clone(&control.cancel),
            pause: Arc::clone(&control.pause),
            task,
        };
        let tasks_ref = Arc::clone(&self.tasks);
        tokio::spawn(async move {
            let resume_data = run_transfer(ctx).await;
            // Deregister and answer any waiting cancel in one step, so a
            // cancel can never slip in between and wait forever.
            let control = tasks_ref.lock().unwrap().remove(&task);
            if let Some(control) = control {
                if let Some(tx) = control.reply.lock().unwrap().take() {
                    let _ = tx.send(resume_data);
                }
            }
        });
    }

    /// Cancels a task. With `want_resume_data` the task flushes its partial
    /// file and the encoded resume token is returned; without, partial data
    /// is discarded. Returns `None` for unknown or already-completed tasks,
    /// and for tasks that ran to completion before noticing the signal.
    pub async fn cancel(&self, task: TaskId, want_resume_data: bool) -> Option<Vec<u8>> {
        let receiver = {
            let mut tasks = self.tasks.lock().unwrap();
            let Some(control) = tasks.get_mut(&task) else {
                return None;
            };
            if !control.started {
                // Never left the gate; its description is its resume data.
                let token = want_resume_data.then(|| control.token.encode());
                tasks.remove(&task);
                return token;
            }
            let (tx, rx) = oneshot::channel();
            *control.reply.lock().unwrap() = Some(tx);
            if want_resume_data {
                control.pause.store(true, Ordering::SeqCst);
            } else {
                control.cancel.store(true, Ordering::SeqCst);
            }
            rx
        };
        receiver.await.ok().flatten()
    }
}

/// Everything the transfer loop needs, detached from the client.
struct TransferContext {
    client: Client,
    events: mpsc::UnboundedSender<TransferEvent>,
    temp_dir: PathBuf,
    token: ResumeToken,
    cancel: Arc<AtomicBool>,
    pause: Arc<AtomicBool>,
    task: TaskId,
}

enum TransferOutcome {
    Done,
    Paused(ResumeToken),
    Cancelled,
}

/// Drives one transfer to its end. Returns the encoded resume token when the
/// transfer was paused away, `None` otherwise.
async fn run_transfer(ctx: TransferContext) -> Option<Vec<u8>> {
    match transfer_loop(&ctx).await {
        Ok(TransferOutcome::Done) => None,
        Ok(TransferOutcome::Paused(token)) => Some(token.encode()),
        Ok(TransferOutcome::Cancelled) => None,
        Err(e) => {
            let _ = ctx.events.send(TransferEvent::Completed {
                task: ctx.task,
                error: Some(e.to_string()),
            });
            None
        }
    }
}

async fn transfer_loop(ctx: &TransferContext) -> Result<TransferOutcome> {
    let temp_path = match &ctx.token.temp_path {
        Some(path) => path.clone(),
        None => {
            let stamp = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_millis())
                .unwrap_or(0);
            ctx.temp_dir
                .join(format!("transfer-{}-{stamp}.part", ctx.task))
        }
    };
    tokio::fs::create_dir_all(&ctx.temp_dir).await?;

    let on_disk = match tokio::fs::metadata(&temp_path).await {
        Ok(meta) => meta.len(),
        Err(_) => 0,
    };

    let response = retry_on_network_error(|| async {
        let mut request = ctx.client.get(&ctx.token.url);
        if on_disk > 0 {
            request = request.header("Range", format!("bytes={on_disk}-"));
        }
        let response = request.send().await?;
        if !response.status().is_success() && response.status().as_u16() != 206 {
            let status = response.status();
            return Err(Error::HttpError(format!("Download failed: {status}")));
        }
        Ok(response)
    })
    .await?;

    // Only trust partial data if the server actually honored the range;
    // a plain 200 means the body restarts from byte zero.
    let resumed_from = if on_disk > 0 && response.status().as_u16() == 206 {
        on_disk
    } else {
        0
    };

    let total_expected = match response.content_length() {
        Some(len) => len + resumed_from,
        None => ctx.token.total_expected,
    };
    let suggested_name = ctx
        .token
        .suggested_name
        .clone()
        .or_else(|| suggest_file_name(response.url()));

    let mut file = if resumed_from > 0 {
        let mut f = tokio::fs::OpenOptions::new()
            .write(true)
            .open(&temp_path)
            .await?;
        f.seek(SeekFrom::End(0)).await?;
        f
    } else {
        tokio::fs::File::create(&temp_path).await?
    };

    let mut downloaded = resumed_from;
    let mut stream = create_transfer_stream(response);
    let mut buffer = vec![0u8; TRANSFER_BUFFER_SIZE];

    loop {
        if ctx.cancel.load(Ordering::SeqCst) {
            drop(file);
            let _ = tokio::fs::remove_file(&temp_path).await;
            return Ok(TransferOutcome::Cancelled);
        }
        if ctx.pause.load(Ordering::SeqCst) {
            file.flush().await?;
            return Ok(TransferOutcome::Paused(ResumeToken {
                url: ctx.token.url.clone(),
                temp_path: Some(temp_path),
                bytes_downloaded: downloaded,
                total_expected,
                suggested_name,
            }));
        }

        let bytes_read = stream
            .read(&mut buffer)
            .await
            .map_err(|e| Error::NetworkError(format!("Stream read error: {e}")))?;
        if bytes_read == 0 {
            break;
        }

        file.write_all(&buffer[..bytes_read]).await?;
        downloaded += bytes_read as u64;
        let _ = ctx.events.send(TransferEvent::Progress {
            task: ctx.task,
            written: downloaded,
            total_expected,
        });
    }

    file.flush().await?;
    drop(file);

    let _ = ctx.events.send(TransferEvent::Finished {
        task: ctx.task,
        temp_path,
        suggested_name,
    });
    let _ = ctx.events.send(TransferEvent::Completed {
        task: ctx.task,
        error: None,
    });
    Ok(TransferOutcome::Done)
}

/// Execute an operation with retry logic for network errors
async fn retry_on_network_error<F, Fut, T>(operation: F) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let mut attempt = 0;

    loop {
        match operation().await {
            Ok(result) => return Ok(result),
            Err(Error::NetworkError(msg)) if attempt < MAX_RETRY_ATTEMPTS => {
                attempt += 1;
                let delay = BASE_RETRY_DELAY_MS * (1 << (attempt - 1));
                debug!("network error (attempt {attempt}): {msg}, retrying in {delay}ms");
                tokio::time::sleep(Duration::from_millis(delay)).await;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Last path segment of the final response URL, the closest thing HTTP gives
/// us to a server-suggested file name.
fn suggest_file_name(url: &reqwest::Url) -> Option<String> {
    url.path_segments()
        .and_then(|mut segments| segments.next_back())
        .filter(|segment| !segment.is_empty())
        .map(|segment| segment.to_string())
}
