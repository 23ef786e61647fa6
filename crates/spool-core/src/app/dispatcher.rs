//! Dispatcher - 公開エントリポイント
//!
//! `start` は pending を書いてジョブを渡したらすぐ返る。work の完了は待たない。
//! 同期的に返るエラーは id の検証と受付（Busy / DuplicateId / ShuttingDown）だけで、
//! work の失敗は StatusStore 経由でしか見えない。

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::{Mutex, Semaphore, TryAcquireError, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::runner::{Job, TaskRunner};
use super::worker_loop::{self, JobReceiver, WorkerGroup};
use crate::domain::{SpoolError, StatusRecord, TaskEvent, TaskId};
use crate::ports::{Clock, EventSink, IdGenerator, StatusCounts, StatusStore, Work, WorkFuture};

const SHUTDOWN_REASON: &str = "runner shut down before task started";

/// Where scheduled jobs go.
pub(crate) enum Executor<O> {
    /// One tokio task per job. `None` once shut down.
    Spawn {
        tasks: Mutex<Option<Vec<JoinHandle<()>>>>,
    },

    /// Fixed worker pool fed by a channel.
    Pool {
        size: usize,
        tx: mpsc::UnboundedSender<Job<O>>,
        jobs: JobReceiver<O>,
        workers: Mutex<Option<WorkerGroup>>,
    },
}

impl<O: Clone + Send + 'static> Executor<O> {
    pub(crate) fn spawn() -> Self {
        Executor::Spawn {
            tasks: Mutex::new(Some(Vec::new())),
        }
    }

    /// Must be called inside a tokio runtime.
    pub(crate) fn pool(size: usize, runner: Arc<TaskRunner<O>>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let jobs: JobReceiver<O> = Arc::new(Mutex::new(rx));
        let workers = WorkerGroup::spawn(size, Arc::clone(&jobs), runner);
        Executor::Pool {
            size,
            tx,
            jobs,
            workers: Mutex::new(Some(workers)),
        }
    }

    fn pool_size(&self) -> Option<usize> {
        match self {
            Executor::Spawn { .. } => None,
            Executor::Pool { size, .. } => Some(*size),
        }
    }

    /// Hand a job off. If the executor is closed the job comes back.
    async fn schedule(&self, job: Job<O>, runner: &Arc<TaskRunner<O>>) -> Result<(), Job<O>> {
        match self {
            Executor::Spawn { tasks } => {
                let mut tasks = tasks.lock().await;
                let Some(handles) = tasks.as_mut() else {
                    return Err(job);
                };
                // 終わったタスクのハンドルは捨てる
                handles.retain(|handle| !handle.is_finished());
                let runner = Arc::clone(runner);
                handles.push(tokio::spawn(async move {
                    runner.run(job).await;
                }));
                Ok(())
            }
            Executor::Pool { tx, .. } => tx.send(job).map_err(|err| err.0),
        }
    }

    async fn shutdown(&self, runner: &TaskRunner<O>) {
        match self {
            Executor::Spawn { tasks } => {
                let handles = tasks.lock().await.take().unwrap_or_default();
                for handle in handles {
                    let _ = handle.await;
                }
            }
            Executor::Pool { jobs, workers, .. } => {
                if let Some(group) = workers.lock().await.take() {
                    group.shutdown_and_join().await;
                }
                worker_loop::drain(jobs, runner, SHUTDOWN_REASON).await;
            }
        }
    }
}

/// Public entry point: starts tasks and answers status queries.
///
/// # 使用例
/// ```ignore
/// let dispatcher = DispatcherBuilder::new(|url: String| async move { scan(&url).await })
///     .config(RunnerConfig::default().with_timeout(Duration::from_secs(30)))
///     .build()?;
///
/// dispatcher.start("s1", "http://example.com".to_string()).await?;
/// let record = dispatcher.status("s1").await?;
/// ```
pub struct Dispatcher<I, O> {
    pub(crate) work: Arc<dyn Work<I, Output = O>>,
    pub(crate) runner: Arc<TaskRunner<O>>,
    pub(crate) store: Arc<dyn StatusStore<O>>,
    pub(crate) ids: Arc<dyn IdGenerator>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) events: Arc<dyn EventSink>,
    pub(crate) executor: Executor<O>,
    /// Present only for bounded + fail-fast.
    pub(crate) admission: Option<Arc<Semaphore>>,
    pub(crate) closed: AtomicBool,
}

impl<I, O> Dispatcher<I, O>
where
    I: Send + 'static,
    O: Clone + Send + 'static,
{
    /// Start a task under a caller-chosen id.
    ///
    /// Returns once `pending` is recorded and the job is scheduled.
    pub async fn start(&self, id: impl Into<String>, input: I) -> Result<(), SpoolError> {
        let id = TaskId::new(id)?;
        self.dispatch(id, input).await
    }

    /// Start a task under a generated id.
    pub async fn submit(&self, input: I) -> Result<TaskId, SpoolError> {
        let id = self.ids.generate_task_id();
        self.dispatch(id.clone(), input).await?;
        Ok(id)
    }

    async fn dispatch(&self, id: TaskId, input: I) -> Result<(), SpoolError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(SpoolError::ShuttingDown);
        }

        let permit = match &self.admission {
            Some(semaphore) => match Arc::clone(semaphore).try_acquire_owned() {
                Ok(permit) => Some(permit),
                Err(TryAcquireError::NoPermits) => {
                    debug!(task_id = %id, "rejected: no free slot");
                    return Err(SpoolError::Busy {
                        limit: self.limit().unwrap_or_default(),
                    });
                }
                Err(TryAcquireError::Closed) => return Err(SpoolError::ShuttingDown),
            },
            None => None,
        };

        let now = self.clock.now();
        self.store.create(&id, StatusRecord::pending(now)).await?;
        self.events.emit(TaskEvent::Created {
            task_id: id.clone(),
            at: now,
        });

        let work = Arc::clone(&self.work);
        let future: WorkFuture<O> = Box::pin(async move { work.run(input).await });
        let job = self.runner.prepare(id.clone(), future, permit);

        if let Err(job) = self.executor.schedule(job, &self.runner).await {
            // 受付に失敗したら pending を取り消す
            self.runner.discard(job);
            if let Err(err) = self.store.remove(&id).await {
                warn!(task_id = %id, error = %err, "failed to roll back pending record");
            }
            return Err(SpoolError::ShuttingDown);
        }

        debug!(task_id = %id, "task scheduled");
        Ok(())
    }

    /// Current record for `id`.
    pub async fn status(&self, id: &str) -> Result<StatusRecord<O>, SpoolError> {
        let id = TaskId::new(id)?;
        self.store.get(&id).await
    }

    /// Cancel a pending or running task. Returns `false` if it had already
    /// reached a terminal status.
    pub async fn cancel(&self, id: &str) -> Result<bool, SpoolError> {
        let id = TaskId::new(id)?;
        self.runner.cancel(&id).await
    }

    /// Poll until the task is terminal.
    ///
    /// Without a configured timeout this waits as long as the work runs.
    pub async fn wait(
        &self,
        id: &str,
        poll_interval: Duration,
    ) -> Result<StatusRecord<O>, SpoolError> {
        let id = TaskId::new(id)?;
        loop {
            let record = self.store.get(&id).await?;
            if record.is_terminal() {
                return Ok(record);
            }
            tokio::time::sleep(poll_interval).await;
        }
    }

    pub async fn counts(&self) -> Result<StatusCounts, SpoolError> {
        self.store.counts().await
    }

    /// Worker pool size, or `None` when unbounded.
    pub fn limit(&self) -> Option<usize> {
        self.executor.pool_size()
    }

    pub fn is_shut_down(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Stop accepting tasks and wait for in-flight ones.
    ///
    /// Workers finish the task in hand; tasks still queued are marked
    /// `error` (cancelled). Idempotent.
    pub async fn shutdown(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(semaphore) = &self.admission {
            semaphore.close();
        }
        info!("dispatcher shutting down");
        self.executor.shutdown(&self.runner).await;
        info!("dispatcher stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::{DispatcherBuilder, OverflowPolicy, RunnerConfig};
    use crate::domain::{FailureKind, TaskStatus};
    use crate::impls::BroadcastEventSink;
    use crate::impls::flaky_status::FlakyStatusStore;
    use anyhow::anyhow;
    use rstest::rstest;
    use serde_json::{Value, json};

    const POLL: Duration = Duration::from_millis(5);

    async fn scan(url: String) -> anyhow::Result<Value> {
        tokio::time::sleep(Duration::from_millis(20)).await;
        if url.starts_with("bad://") {
            return Err(anyhow!("connection refused"));
        }
        Ok(json!({ "pages": 3 }))
    }

    fn scanner(config: RunnerConfig) -> Dispatcher<String, Value> {
        DispatcherBuilder::<String, _>::new(scan)
            .config(config)
            .build()
            .unwrap()
    }

    /// Work that blocks until the test adds permits to `gate`.
    fn gated(config: RunnerConfig, gate: Arc<Semaphore>) -> Dispatcher<u32, u32> {
        let work = move |n: u32| {
            let gate = Arc::clone(&gate);
            async move {
                let _open = gate.acquire().await?;
                Ok::<_, anyhow::Error>(n)
            }
        };
        DispatcherBuilder::<u32, _>::new(work)
            .config(config)
            .build()
            .unwrap()
    }

    async fn wait_for_status<I: Send + 'static>(
        dispatcher: &Dispatcher<I, u32>,
        id: &str,
        status: TaskStatus,
    ) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while dispatcher.status(id).await.unwrap().status() != status {
                tokio::time::sleep(POLL).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn start_returns_before_work_completes() {
        let dispatcher = scanner(RunnerConfig::default());
        dispatcher.start("s1", "http://example.com".into()).await.unwrap();

        let record = dispatcher.status("s1").await.unwrap();
        assert!(matches!(
            record.status(),
            TaskStatus::Pending | TaskStatus::Running
        ));
        assert!(record.result().is_none());
    }

    #[tokio::test]
    async fn successful_scan_is_done_with_result() {
        let dispatcher = scanner(RunnerConfig::default());
        dispatcher.start("s1", "http://example.com".into()).await.unwrap();

        let record = dispatcher.wait("s1", POLL).await.unwrap();
        assert_eq!(record.status(), TaskStatus::Done);
        assert_eq!(record.result(), Some(&json!({ "pages": 3 })));
        assert!(record.error().is_none());
    }

    #[tokio::test]
    async fn failed_scan_is_error_with_message() {
        let dispatcher = scanner(RunnerConfig::default());
        dispatcher.start("s2", "bad://host".into()).await.unwrap();

        let record = dispatcher.wait("s2", POLL).await.unwrap();
        assert_eq!(record.status(), TaskStatus::Error);
        assert_eq!(record.error(), Some("connection refused"));
        assert!(record.result().is_none());
    }

    #[tokio::test]
    async fn empty_id_is_rejected_without_a_record() {
        let dispatcher = scanner(RunnerConfig::default());

        for raw in ["", "   "] {
            let err = dispatcher.start(raw, "http://x".into()).await.unwrap_err();
            assert_eq!(err, SpoolError::InvalidId);
        }
        assert_eq!(dispatcher.counts().await.unwrap().total(), 0);
        assert_eq!(dispatcher.status("").await.unwrap_err(), SpoolError::InvalidId);
    }

    #[tokio::test]
    async fn unknown_id_is_not_found() {
        let dispatcher = scanner(RunnerConfig::default());
        let err = dispatcher.status("nope").await.unwrap_err();
        assert!(matches!(err, SpoolError::NotFound(id) if id.as_str() == "nope"));
    }

    #[tokio::test]
    async fn slow_work_times_out() {
        let work = |_: ()| async {
            tokio::time::sleep(Duration::from_millis(500)).await;
            Ok::<_, anyhow::Error>(1u32)
        };
        let dispatcher = DispatcherBuilder::<(), _>::new(work)
            .config(RunnerConfig::default().with_timeout(Duration::from_millis(100)))
            .build()
            .unwrap();

        dispatcher.start("slow", ()).await.unwrap();
        let record = dispatcher.wait("slow", POLL).await.unwrap();

        assert_eq!(record.status(), TaskStatus::Error);
        assert_eq!(record.error_kind(), Some(FailureKind::Timeout));
        assert!(record.error().unwrap().contains("timeout"));
    }

    #[tokio::test]
    async fn terminal_records_are_stable() {
        let dispatcher = scanner(RunnerConfig::default());
        dispatcher.start("s1", "http://example.com".into()).await.unwrap();

        let first = dispatcher.wait("s1", POLL).await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        let second = dispatcher.status("s1").await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_tasks_keep_their_own_results() {
        let work = |n: u32| async move {
            tokio::time::sleep(Duration::from_millis(u64::from(n % 7) * 3)).await;
            if n % 5 == 0 {
                Err(anyhow!("task {n} failed"))
            } else {
                Ok(n * 2)
            }
        };
        let dispatcher = DispatcherBuilder::<u32, _>::new(work).build().unwrap();

        for n in 0..50u32 {
            dispatcher.start(format!("t{n}"), n).await.unwrap();
        }
        for n in 0..50u32 {
            let record = dispatcher.wait(&format!("t{n}"), POLL).await.unwrap();
            if n % 5 == 0 {
                assert_eq!(record.error(), Some(format!("task {n} failed").as_str()));
            } else {
                assert_eq!(record.result(), Some(&(n * 2)));
            }
        }

        let counts = dispatcher.counts().await.unwrap();
        assert_eq!(counts.done, 40);
        assert_eq!(counts.error, 10);
        assert_eq!(counts.in_flight(), 0);
    }

    #[tokio::test]
    async fn duplicate_id_is_rejected() {
        let dispatcher = scanner(RunnerConfig::default());
        dispatcher.start("dup", "http://a".into()).await.unwrap();

        let err = dispatcher.start("dup", "bad://b".into()).await.unwrap_err();
        assert!(matches!(err, SpoolError::DuplicateId(_)));

        let record = dispatcher.wait("dup", POLL).await.unwrap();
        assert_eq!(record.status(), TaskStatus::Done);
    }

    #[tokio::test]
    async fn submit_generates_distinct_ids() {
        let dispatcher = scanner(RunnerConfig::default());
        let a = dispatcher.submit("http://a".into()).await.unwrap();
        let b = dispatcher.submit("http://b".into()).await.unwrap();

        assert_ne!(a, b);
        assert!(a.as_str().starts_with("task-"));
        assert_eq!(
            dispatcher.wait(a.as_str(), POLL).await.unwrap().status(),
            TaskStatus::Done
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn fail_fast_rejects_when_full() {
        let gate = Arc::new(Semaphore::new(0));
        let dispatcher = gated(
            RunnerConfig::default().with_max_concurrent_tasks(1, OverflowPolicy::FailFast),
            gate.clone(),
        );

        dispatcher.start("a", 1).await.unwrap();
        let err = dispatcher.start("b", 2).await.unwrap_err();
        assert_eq!(err, SpoolError::Busy { limit: 1 });
        assert!(matches!(
            dispatcher.status("b").await,
            Err(SpoolError::NotFound(_))
        ));

        gate.add_permits(1);
        dispatcher.wait("a", POLL).await.unwrap();
        dispatcher.start("c", 3).await.unwrap();
        assert_eq!(dispatcher.wait("c", POLL).await.unwrap().result(), Some(&3));
        dispatcher.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn queue_mode_keeps_overflow_pending() {
        let gate = Arc::new(Semaphore::new(0));
        let dispatcher = gated(
            RunnerConfig::default().with_max_concurrent_tasks(1, OverflowPolicy::Queue),
            gate.clone(),
        );

        dispatcher.start("a", 1).await.unwrap();
        dispatcher.start("b", 2).await.unwrap();
        wait_for_status(&dispatcher, "a", TaskStatus::Running).await;
        assert_eq!(
            dispatcher.status("b").await.unwrap().status(),
            TaskStatus::Pending
        );

        gate.add_permits(1);
        assert_eq!(dispatcher.wait("a", POLL).await.unwrap().result(), Some(&1));
        assert_eq!(dispatcher.wait("b", POLL).await.unwrap().result(), Some(&2));
        dispatcher.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn cancel_marks_running_task_and_is_idempotent() {
        let gate = Arc::new(Semaphore::new(0));
        let dispatcher = gated(RunnerConfig::default(), gate.clone());

        dispatcher.start("job", 9).await.unwrap();
        wait_for_status(&dispatcher, "job", TaskStatus::Running).await;

        assert!(dispatcher.cancel("job").await.unwrap());
        assert!(!dispatcher.cancel("job").await.unwrap());

        gate.add_permits(1);
        tokio::time::sleep(Duration::from_millis(30)).await;
        let record = dispatcher.status("job").await.unwrap();
        assert_eq!(record.status(), TaskStatus::Error);
        assert_eq!(record.error_kind(), Some(FailureKind::Cancelled));
        assert!(record.result().is_none());

        assert!(matches!(
            dispatcher.cancel("ghost").await,
            Err(SpoolError::NotFound(_))
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn shutdown_finishes_running_and_cancels_queued() {
        let gate = Arc::new(Semaphore::new(0));
        let dispatcher = gated(
            RunnerConfig::default().with_max_concurrent_tasks(1, OverflowPolicy::Queue),
            gate.clone(),
        );

        dispatcher.start("running", 1).await.unwrap();
        dispatcher.start("queued", 2).await.unwrap();
        wait_for_status(&dispatcher, "running", TaskStatus::Running).await;

        let opener = gate.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            opener.add_permits(2);
        });
        dispatcher.shutdown().await;
        assert!(dispatcher.is_shut_down());

        assert_eq!(
            dispatcher.status("running").await.unwrap().status(),
            TaskStatus::Done
        );
        let queued = dispatcher.status("queued").await.unwrap();
        assert_eq!(queued.status(), TaskStatus::Error);
        assert_eq!(queued.error(), Some(SHUTDOWN_REASON));

        assert_eq!(
            dispatcher.start("late", 3).await.unwrap_err(),
            SpoolError::ShuttingDown
        );
        // 二回目は何もしない
        dispatcher.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_waits_for_spawned_tasks() {
        let dispatcher = scanner(RunnerConfig::default());
        dispatcher.start("s1", "http://example.com".into()).await.unwrap();
        dispatcher.shutdown().await;

        assert_eq!(
            dispatcher.status("s1").await.unwrap().status(),
            TaskStatus::Done
        );
    }

    #[tokio::test]
    async fn events_follow_the_lifecycle() {
        let events = Arc::new(BroadcastEventSink::default());
        let mut rx = events.subscribe();
        let dispatcher = DispatcherBuilder::<String, _>::new(scan)
            .event_sink(events.clone())
            .build()
            .unwrap();

        dispatcher.start("ok", "http://a".into()).await.unwrap();
        dispatcher.wait("ok", POLL).await.unwrap();
        dispatcher.start("ng", "bad://b".into()).await.unwrap();
        dispatcher.wait("ng", POLL).await.unwrap();

        let mut seen = Vec::new();
        while let Ok(event) = rx.try_recv() {
            seen.push((event.task_id().to_string(), event.status()));
        }
        assert_eq!(
            seen,
            vec![
                ("ok".to_string(), Some(TaskStatus::Pending)),
                ("ok".to_string(), Some(TaskStatus::Running)),
                ("ok".to_string(), Some(TaskStatus::Done)),
                ("ng".to_string(), Some(TaskStatus::Pending)),
                ("ng".to_string(), Some(TaskStatus::Running)),
                ("ng".to_string(), Some(TaskStatus::Error)),
            ]
        );
    }

    #[rstest]
    #[case::spawned(RunnerConfig::default())]
    #[case::pooled(RunnerConfig::default().with_max_concurrent_tasks(2, OverflowPolicy::Queue))]
    #[case::fail_fast(RunnerConfig::default().with_max_concurrent_tasks(2, OverflowPolicy::FailFast))]
    #[tokio::test]
    async fn start_after_executor_closed_rolls_back(#[case] config: RunnerConfig) {
        let dispatcher = gated(config, Arc::new(Semaphore::new(0)));
        // closed は立てずに executor だけ閉じる
        dispatcher.executor.shutdown(&dispatcher.runner).await;
        assert!(!dispatcher.is_shut_down());

        assert_eq!(
            dispatcher.start("x", 1).await.unwrap_err(),
            SpoolError::ShuttingDown
        );
        assert!(matches!(
            dispatcher.status("x").await,
            Err(SpoolError::NotFound(_))
        ));
        assert_eq!(dispatcher.runner.in_flight(), 0);
        if let Some(semaphore) = &dispatcher.admission {
            assert_eq!(semaphore.available_permits(), 2);
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn fail_fast_slot_is_released_on_timeout() {
        let gate = Arc::new(Semaphore::new(0));
        let dispatcher = gated(
            RunnerConfig::default()
                .with_timeout(Duration::from_millis(50))
                .with_max_concurrent_tasks(1, OverflowPolicy::FailFast),
            gate.clone(),
        );

        dispatcher.start("a", 1).await.unwrap();
        let record = dispatcher.wait("a", POLL).await.unwrap();
        assert_eq!(record.error_kind(), Some(FailureKind::Timeout));

        // a の work はまだ gate で止まっている
        dispatcher.start("b", 2).await.unwrap();
        gate.add_permits(2);
        assert_eq!(dispatcher.wait("b", POLL).await.unwrap().result(), Some(&2));
        dispatcher.shutdown().await;
    }

    #[tokio::test]
    async fn failing_terminal_write_still_ends_terminal() {
        let store = Arc::new(FlakyStatusStore::<u32>::new(0, usize::MAX));
        let dispatcher = DispatcherBuilder::<u32, _>::new(|n: u32| async move {
            Ok::<_, anyhow::Error>(n * 2)
        })
        .store(store.clone())
        .build()
        .unwrap();

        dispatcher.start("x", 5).await.unwrap();
        dispatcher.shutdown().await;

        let record = dispatcher.status("x").await.unwrap();
        assert_eq!(record.status(), TaskStatus::Done);
        assert_eq!(record.result(), Some(&10));
        assert_eq!(dispatcher.runner.in_flight(), 0);
    }

    #[tokio::test]
    async fn failing_running_write_ends_as_store_error() {
        let store = Arc::new(FlakyStatusStore::<u32>::new(usize::MAX, 0));
        let dispatcher = DispatcherBuilder::<u32, _>::new(|n: u32| async move {
            Ok::<_, anyhow::Error>(n)
        })
        .config(RunnerConfig::default().with_max_concurrent_tasks(1, OverflowPolicy::Queue))
        .store(store.clone())
        .build()
        .unwrap();

        dispatcher.start("x", 5).await.unwrap();
        let record = dispatcher.wait("x", POLL).await.unwrap();
        assert_eq!(record.status(), TaskStatus::Error);
        assert_eq!(record.error_kind(), Some(FailureKind::Store));
        assert!(record.result().is_none());
        dispatcher.shutdown().await;
    }
}
