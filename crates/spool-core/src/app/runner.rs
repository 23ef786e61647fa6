//! TaskRunner - 1 タスクの実行とステータス遷移
//!
//! # フロー
//! 1. StatusStore に running を書く（すでに terminal なら何もしない）
//! 2. work を別の tokio task で実行（panic は JoinError として捕まえる）
//! 3. 完了 / 失敗 / タイムアウト / キャンセルのどれかを待つ
//! 4. terminal（done / error）を `transition` で書く。書けなかったら結果は破棄
//!
//! work の失敗はすべてここでデータ（error レコード）に変換される。
//! runner から外に漏れることはない。

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{Notify, OwnedSemaphorePermit};
use tokio::task::JoinError;
use tracing::{debug, error, info, instrument, warn};

use crate::domain::{FailureKind, SpoolError, StatusRecord, TaskEvent, TaskId, TaskStatus};
use crate::ports::{Clock, EventSink, StatusStore, WorkFuture};

/// Attempts per status write before giving up on `transition`.
const STORE_WRITE_ATTEMPTS: u32 = 3;
const STORE_RETRY_BACKOFF: Duration = Duration::from_millis(10);

/// A scheduled task: its id, the work to run, and what it holds while queued.
pub struct Job<O> {
    id: TaskId,
    work: WorkFuture<O>,
    cancel: Arc<Notify>,
    permit: Option<OwnedSemaphorePermit>,
}

impl<O> Job<O> {
    pub fn id(&self) -> &TaskId {
        &self.id
    }
}

/// How one execution ended.
enum Outcome<O> {
    Done(O),
    Failed(FailureKind, String),
    /// The caller cancelled; the terminal record is already written.
    Cancelled,
}

pub struct TaskRunner<O> {
    store: Arc<dyn StatusStore<O>>,
    events: Arc<dyn EventSink>,
    clock: Arc<dyn Clock>,
    timeout: Option<Duration>,
    abort_abandoned: bool,
    /// Cancellation handles of tasks that are queued or running.
    in_flight: DashMap<TaskId, Arc<Notify>>,
}

impl<O: Clone + Send + 'static> TaskRunner<O> {
    pub fn new(
        store: Arc<dyn StatusStore<O>>,
        events: Arc<dyn EventSink>,
        clock: Arc<dyn Clock>,
        timeout: Option<Duration>,
        abort_abandoned: bool,
    ) -> Self {
        Self {
            store,
            events,
            clock,
            timeout,
            abort_abandoned,
            in_flight: DashMap::new(),
        }
    }

    /// Wrap `work` into a job and register it for cancellation.
    pub fn prepare(
        &self,
        id: TaskId,
        work: WorkFuture<O>,
        permit: Option<OwnedSemaphorePermit>,
    ) -> Job<O> {
        let cancel = Arc::new(Notify::new());
        self.in_flight.insert(id.clone(), Arc::clone(&cancel));
        Job {
            id,
            work,
            cancel,
            permit,
        }
    }

    /// Forget a job that was prepared but never scheduled.
    pub fn discard(&self, job: Job<O>) {
        self.in_flight.remove(&job.id);
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Execute one job to a terminal status.
    ///
    /// Returns the terminal status this call wrote, or `None` when the task
    /// was already terminal (cancelled) or nothing could be written.
    #[instrument(skip_all, fields(task_id = %job.id))]
    pub async fn run(&self, job: Job<O>) -> Option<TaskStatus> {
        let Job {
            id,
            work,
            cancel,
            permit,
        } = job;

        let running = StatusRecord::running(self.clock.now());
        match self.transition_with_retry(&id, running).await {
            Ok(true) => {}
            Ok(false) => {
                debug!("task already terminal before pickup; skipping work");
                self.in_flight.remove(&id);
                return None;
            }
            Err(err) => {
                // running が書けないまま実行はしない。error で閉じる
                error!(error = %err, "failed to record running status; failing task");
                let record = StatusRecord::failed(
                    FailureKind::Store,
                    format!("could not record running status: {err}"),
                    self.clock.now(),
                );
                let written = self.force_terminal(&id, record).await;
                self.in_flight.remove(&id);
                return written;
            }
        }
        self.events.emit(TaskEvent::Started {
            task_id: id.clone(),
            at: self.clock.now(),
        });
        debug!("task running");

        let outcome = self.execute(work, &cancel).await;
        // 結果待ちが終わった時点で枠を返す
        drop(permit);
        let written = self.finish(&id, outcome).await;

        self.in_flight.remove(&id);
        written
    }

    /// `transition`, retried with a linear backoff while the store errors.
    async fn transition_with_retry(
        &self,
        id: &TaskId,
        record: StatusRecord<O>,
    ) -> Result<bool, SpoolError> {
        let mut attempt = 1;
        loop {
            match self.store.transition(id, record.clone()).await {
                Err(err) if attempt < STORE_WRITE_ATTEMPTS => {
                    warn!(task_id = %id, attempt, error = %err, "status write failed; retrying");
                    tokio::time::sleep(STORE_RETRY_BACKOFF * attempt).await;
                    attempt += 1;
                }
                result => return result,
            }
        }
    }

    /// Last resort once `transition` keeps failing: overwrite with `set`.
    async fn force_terminal(&self, id: &TaskId, record: StatusRecord<O>) -> Option<TaskStatus> {
        // 読めて terminal なら上書きしない（terminal は不変）
        if let Ok(current) = self.store.get(id).await {
            if current.is_terminal() {
                debug!(task_id = %id, "task already terminal; nothing to force");
                return None;
            }
        }
        let event = terminal_event(id, &record);
        let status = record.status();
        match self.store.set(id, record).await {
            Ok(()) => {
                warn!(task_id = %id, status = %status, "terminal status forced with set");
                self.events.emit(event);
                Some(status)
            }
            Err(err) => {
                error!(task_id = %id, error = %err, "failed to record terminal status");
                None
            }
        }
    }

    async fn execute(&self, work: WorkFuture<O>, cancel: &Notify) -> Outcome<O> {
        let mut handle = tokio::spawn(work);
        let deadline = async {
            match self.timeout {
                Some(timeout) => tokio::time::sleep(timeout).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            joined = &mut handle => match joined {
                Ok(Ok(value)) => Outcome::Done(value),
                Ok(Err(err)) => Outcome::Failed(FailureKind::Work, format!("{err:#}")),
                Err(join_err) => {
                    let (kind, message) = describe_join_error(join_err);
                    Outcome::Failed(kind, message)
                }
            },
            _ = deadline => {
                if self.abort_abandoned {
                    handle.abort();
                }
                let ms = self.timeout.map(|t| t.as_millis()).unwrap_or_default();
                Outcome::Failed(FailureKind::Timeout, format!("timeout: work exceeded {ms}ms"))
            }
            _ = cancel.notified() => {
                if self.abort_abandoned {
                    handle.abort();
                }
                Outcome::Cancelled
            }
        }
    }

    async fn finish(&self, id: &TaskId, outcome: Outcome<O>) -> Option<TaskStatus> {
        let now = self.clock.now();
        let record = match outcome {
            Outcome::Done(value) => StatusRecord::done(value, now),
            Outcome::Failed(kind, message) => StatusRecord::failed(kind, message, now),
            Outcome::Cancelled => {
                debug!("task cancelled while running; result will be discarded");
                self.events.emit(TaskEvent::Discarded {
                    task_id: id.clone(),
                    at: now,
                });
                return None;
            }
        };

        let status = record.status();
        match self.transition_with_retry(id, record.clone()).await {
            Ok(true) => {
                match (record.error_kind(), record.error()) {
                    (Some(kind), Some(error)) => warn!(kind = ?kind, error = %error, "task failed"),
                    _ => info!(status = %status, "task finished"),
                }
                self.events.emit(terminal_event(id, &record));
                Some(status)
            }
            Ok(false) => {
                warn!("task already terminal; discarding late outcome");
                self.events.emit(TaskEvent::Discarded {
                    task_id: id.clone(),
                    at: now,
                });
                None
            }
            Err(err) => {
                error!(error = %err, "terminal status write kept failing");
                self.force_terminal(id, record).await
            }
        }
    }

    /// Mark a task cancelled. Returns `false` if it was already terminal.
    ///
    /// A running work unit is not stopped unless `abort_abandoned` is set;
    /// its result is discarded either way.
    pub async fn cancel(&self, id: &TaskId) -> Result<bool, SpoolError> {
        let now = self.clock.now();
        let record = StatusRecord::failed(FailureKind::Cancelled, "cancelled", now);
        if !self.store.transition(id, record).await? {
            return Ok(false);
        }
        info!(task_id = %id, "task cancelled");
        self.events.emit(TaskEvent::Failed {
            task_id: id.clone(),
            kind: FailureKind::Cancelled,
            error: "cancelled".to_string(),
            at: now,
        });
        if let Some((_, cancel)) = self.in_flight.remove(id) {
            // notify_one stores a permit if nobody waits yet
            cancel.notify_one();
        }
        Ok(true)
    }

    /// Terminate a job that will never run (shutdown drain).
    pub async fn abandon(&self, job: Job<O>, reason: &str) {
        let Job { id, permit, .. } = job;
        let now = self.clock.now();
        let record = StatusRecord::failed(FailureKind::Cancelled, reason, now);
        match self.transition_with_retry(&id, record.clone()).await {
            Ok(true) => {
                warn!(task_id = %id, reason, "queued task abandoned");
                self.events.emit(terminal_event(&id, &record));
            }
            Ok(false) => {}
            Err(err) => {
                error!(task_id = %id, error = %err, "failed to record abandoned task");
                self.force_terminal(&id, record).await;
            }
        }
        self.in_flight.remove(&id);
        drop(permit);
    }
}

/// The event announcing a terminal `record`.
fn terminal_event<T>(id: &TaskId, record: &StatusRecord<T>) -> TaskEvent {
    let at = record.updated_at();
    match record.error_kind() {
        Some(kind) => TaskEvent::Failed {
            task_id: id.clone(),
            kind,
            error: record.error().unwrap_or_default().to_string(),
            at,
        },
        None => TaskEvent::Completed {
            task_id: id.clone(),
            at,
        },
    }
}

fn describe_join_error(err: JoinError) -> (FailureKind, String) {
    if !err.is_panic() {
        return (
            FailureKind::Cancelled,
            "work was aborted before completion".to_string(),
        );
    }
    let payload = err.into_panic();
    let message = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "work panicked".to_string());
    (FailureKind::Panic, format!("panic: {message}"))
}
