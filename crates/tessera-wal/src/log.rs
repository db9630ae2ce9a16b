use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tessera_types::{Level, ObjectInfo, User, Value};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::error::{WalError, WalResult};
use crate::event::Mutation;
use crate::restore::{self, RestoreStats, Restorer};
use crate::segment::ActiveSegment;

/// Durability of a flush.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    /// Hand flushed bytes to the OS page cache.
    #[default]
    OsDefault,
    /// `fsync` the segment after every flush.
    Fsync,
}

/// Configuration for the [`TransactionLog`].
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct WalConfig {
    /// When `false` no log is opened and local mutations are not recorded.
    pub enabled: bool,
    /// Directory holding the numbered segment files.
    pub dir: PathBuf,
    /// Bound of the event queue between producers and the writer task.
    pub queue_capacity: usize,
    /// How often buffered events are flushed to the active segment.
    pub sync_interval_ms: u64,
    /// How often the rotation task checks the active segment.
    pub rotate_interval_ms: u64,
    /// Records per segment before rotation.
    pub max_events_per_segment: u64,
    pub sync_mode: SyncMode,
}

impl Default for WalConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: PathBuf::from("transaction-log"),
            queue_capacity: 60_000,
            sync_interval_ms: 1_000,
            rotate_interval_ms: 1_000,
            max_events_per_segment: 100_000,
            sync_mode: SyncMode::default(),
        }
    }
}

impl WalConfig {
    pub fn in_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            ..Self::default()
        }
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_millis(self.sync_interval_ms.max(1))
    }

    pub fn rotate_interval(&self) -> Duration {
        Duration::from_millis(self.rotate_interval_ms.max(1))
    }
}

/// Capacity of the flush error stream. Errors beyond it are only logged.
const ERROR_STREAM_CAPACITY: usize = 1024;

enum Command {
    Append(Mutation),
    Flush(oneshot::Sender<()>),
}

struct Tasks {
    writer: JoinHandle<()>,
    rotation: JoinHandle<()>,
    shutdown: watch::Sender<bool>,
}

/// Buffered, append-only journal of committed local mutations.
///
/// Producers enqueue records onto a bounded queue and return immediately.
/// A writer task drains the queue into an in-memory buffer and flushes the
/// buffer to the active segment every sync interval. A separate rotation
/// task moves to a new segment once the active one holds enough records.
/// Flush failures do not reach producers; they are delivered on the error
/// stream returned by [`TransactionLog::take_errors`].
pub struct TransactionLog {
    dir: PathBuf,
    sender: Mutex<Option<mpsc::Sender<Command>>>,
    segment: Arc<Mutex<ActiveSegment>>,
    errors: Mutex<Option<mpsc::Receiver<WalError>>>,
    tasks: tokio::sync::Mutex<Option<Tasks>>,
    max_events_per_segment: u64,
}

impl TransactionLog {
    /// Open the log in `config.dir` and start its background tasks.
    ///
    /// Appends resume in the highest-numbered existing segment. Must be
    /// called from within a Tokio runtime.
    pub fn open(config: &WalConfig) -> WalResult<Self> {
        let segment = Arc::new(Mutex::new(ActiveSegment::open_latest(&config.dir)?));
        let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
        let (err_tx, err_rx) = mpsc::channel(ERROR_STREAM_CAPACITY);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let writer = tokio::spawn(run_writer(
            rx,
            Arc::clone(&segment),
            err_tx.clone(),
            config.sync_interval(),
            config.sync_mode,
        ));
        let rotation = tokio::spawn(run_rotation(
            Arc::clone(&segment),
            err_tx,
            config.rotate_interval(),
            config.max_events_per_segment,
            shutdown_rx,
        ));

        let number = segment.lock().expect("segment lock poisoned").number();
        info!(dir = %config.dir.display(), segment = number, "transaction log opened");

        Ok(Self {
            dir: config.dir.clone(),
            sender: Mutex::new(Some(tx)),
            segment,
            errors: Mutex::new(Some(err_rx)),
            tasks: tokio::sync::Mutex::new(Some(Tasks {
                writer,
                rotation,
                shutdown: shutdown_tx,
            })),
            max_events_per_segment: config.max_events_per_segment,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Number of the segment currently receiving appends.
    pub fn current_segment(&self) -> u64 {
        self.segment.lock().expect("segment lock poisoned").number()
    }

    /// Take the flush/rotation error stream. Returns `None` after the first call.
    pub fn take_errors(&self) -> Option<mpsc::Receiver<WalError>> {
        self.errors.lock().expect("errors lock poisoned").take()
    }

    /// Replay every segment into `restorer`. Call before serving writes.
    pub fn restore<R: Restorer + ?Sized>(&self, restorer: &R) -> WalResult<RestoreStats> {
        restore::restore(&self.dir, restorer)
    }

    /// Enqueue a mutation. Waits only for queue capacity.
    pub async fn write(&self, mutation: Mutation) {
        let sender = self.sender.lock().expect("sender lock poisoned").clone();
        match sender {
            Some(tx) => {
                if tx.send(Command::Append(mutation)).await.is_err() {
                    warn!("transaction log writer has exited; record dropped");
                }
            }
            None => warn!(kind = %mutation.kind(), "write after stop; record dropped"),
        }
    }

    pub async fn write_set(&self, key: &str, value: &Value) {
        self.write(Mutation::Set {
            key: key.to_string(),
            value: value.clone(),
        })
        .await
    }

    pub async fn write_delete(&self, key: &str) {
        self.write(Mutation::Delete {
            key: key.to_string(),
        })
        .await
    }

    pub async fn write_set_to_object(&self, path: &str, key: &str, data: &str, read_only: bool) {
        self.write(Mutation::SetToObject {
            path: path.to_string(),
            key: key.to_string(),
            data: data.to_string(),
            read_only,
        })
        .await
    }

    pub async fn write_delete_attr(&self, path: &str, key: &str) {
        self.write(Mutation::DeleteAttr {
            path: path.to_string(),
            key: key.to_string(),
        })
        .await
    }

    pub async fn write_create_object(&self, path: &str, level: Level) {
        self.write(Mutation::CreateObject {
            path: path.to_string(),
            level,
        })
        .await
    }

    pub async fn write_attach(&self, dst: &str, src: &str) {
        self.write(Mutation::Attach {
            dst: dst.to_string(),
            src: src.to_string(),
        })
        .await
    }

    pub async fn write_delete_object(&self, path: &str) {
        self.write(Mutation::DeleteObject {
            path: path.to_string(),
        })
        .await
    }

    pub async fn write_user(&self, user: &User) {
        self.write(Mutation::CreateUser(user.clone())).await
    }

    pub async fn write_delete_user(&self, login: &str) {
        self.write(Mutation::DeleteUser {
            login: login.to_string(),
        })
        .await
    }

    pub async fn write_add_object_info(&self, name: &str, info: ObjectInfo) {
        self.write(Mutation::AddObjectInfo {
            name: name.to_string(),
            info,
        })
        .await
    }

    pub async fn write_delete_object_info(&self, name: &str) {
        self.write(Mutation::DeleteObjectInfo {
            name: name.to_string(),
        })
        .await
    }

    /// Flush everything enqueued so far without waiting for the sync interval.
    pub async fn flush(&self) {
        let sender = self.sender.lock().expect("sender lock poisoned").clone();
        if let Some(tx) = sender {
            let (ack_tx, ack_rx) = oneshot::channel();
            if tx.send(Command::Flush(ack_tx)).await.is_ok() {
                let _ = ack_rx.await;
            }
        }
    }

    /// Rotate when the active segment has reached its record limit.
    ///
    /// The rotation task calls this on its own timer; it is public so the
    /// check can also be driven directly.
    pub fn rotate_if_needed(&self) -> WalResult<Option<u64>> {
        rotate_if_full(&self.segment, self.max_events_per_segment)
    }

    /// Drain the queue, flush, close the active segment and stop both tasks.
    ///
    /// Later calls are no-ops. Writes issued after stopping are dropped.
    pub async fn stop(&self) -> WalResult<()> {
        let Some(tasks) = self.tasks.lock().await.take() else {
            return Ok(());
        };

        // Dropping the last sender lets the writer drain and exit.
        self.sender.lock().expect("sender lock poisoned").take();
        if let Err(e) = tasks.writer.await {
            error!(error = %e, "transaction log writer panicked");
        }

        let _ = tasks.shutdown.send(true);
        if let Err(e) = tasks.rotation.await {
            error!(error = %e, "transaction log rotation task panicked");
        }

        self.segment.lock().expect("segment lock poisoned").sync()?;
        info!(dir = %self.dir.display(), "transaction log stopped");
        Ok(())
    }
}

impl std::fmt::Debug for TransactionLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionLog")
            .field("dir", &self.dir)
            .field("segment", &self.current_segment())
            .finish()
    }
}

fn rotate_if_full(segment: &Mutex<ActiveSegment>, max_events: u64) -> WalResult<Option<u64>> {
    let mut segment = segment.lock().expect("segment lock poisoned");
    if segment.events() < max_events {
        return Ok(None);
    }
    let next = segment.rotate()?;
    info!(segment = next, "transaction log rotated");
    Ok(Some(next))
}

fn report(errors: &mpsc::Sender<WalError>, err: WalError) {
    error!(error = %err, "transaction log failure");
    if errors.try_send(err).is_err() {
        warn!("transaction log error stream full or closed");
    }
}

/// Pending lines not yet flushed to the segment.
#[derive(Default)]
struct Buffer {
    lines: String,
    count: u64,
}

impl Buffer {
    fn push(&mut self, mutation: &Mutation) {
        self.lines.push_str(&mutation.to_event().encode_line());
        self.count += 1;
    }

    fn flush_to(
        &mut self,
        segment: &Mutex<ActiveSegment>,
        errors: &mpsc::Sender<WalError>,
        sync_mode: SyncMode,
    ) {
        if self.count == 0 {
            return;
        }
        let mut active = segment.lock().expect("segment lock poisoned");
        let number = active.number();
        match active.append(&self.lines, self.count, sync_mode == SyncMode::Fsync) {
            Ok(()) => debug!(segment = number, events = self.count, "flushed"),
            Err(source) => {
                drop(active);
                report(errors, WalError::Flush { segment: number, source });
            }
        }
        self.lines.clear();
        self.count = 0;
    }
}

async fn run_writer(
    mut rx: mpsc::Receiver<Command>,
    segment: Arc<Mutex<ActiveSegment>>,
    errors: mpsc::Sender<WalError>,
    sync_interval: Duration,
    sync_mode: SyncMode,
) {
    let mut buffer = Buffer::default();
    let mut ticker = tokio::time::interval(sync_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately.
    ticker.tick().await;

    loop {
        tokio::select! {
            command = rx.recv() => match command {
                Some(Command::Append(mutation)) => buffer.push(&mutation),
                Some(Command::Flush(ack)) => {
                    buffer.flush_to(&segment, &errors, sync_mode);
                    let _ = ack.send(());
                }
                None => {
                    buffer.flush_to(&segment, &errors, sync_mode);
                    break;
                }
            },
            _ = ticker.tick() => buffer.flush_to(&segment, &errors, sync_mode),
        }
    }
    debug!("transaction log writer stopped");
}

async fn run_rotation(
    segment: Arc<Mutex<ActiveSegment>>,
    errors: mpsc::Sender<WalError>,
    interval: Duration,
    max_events: u64,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(e) = rotate_if_full(&segment, max_events) {
                    report(&errors, e);
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
    debug!("transaction log rotation stopped");
}
