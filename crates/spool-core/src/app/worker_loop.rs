//! WorkerLoop - 固定数のワーカーでジョブを実行
//!
//! # フロー
//! 1. 共有の mpsc チャネルから Job を 1 件受け取る
//! 2. TaskRunner::run で terminal まで実行
//! 3. shutdown が来たら、実行中のジョブを終えてからループを抜ける
//!
//! チャネルに残ったジョブは `drain` で error（cancelled）にする。
//! pending のまま放置されるタスクを作らないため。

use std::sync::Arc;

use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::debug;

use super::runner::{Job, TaskRunner};

pub(crate) type JobReceiver<O> = Arc<Mutex<mpsc::UnboundedReceiver<Job<O>>>>;

/// Worker group handle.
/// - `request_shutdown()` でワーカー全体が新しいジョブを取らなくなる
/// - `shutdown_and_join()` で全ワーカーの終了を待てる
pub(crate) struct WorkerGroup {
    shutdown_tx: watch::Sender<bool>,
    joins: Vec<JoinHandle<()>>,
}

impl WorkerGroup {
    /// Spawn `n` workers sharing one job receiver.
    pub(crate) fn spawn<O: Clone + Send + 'static>(
        n: usize,
        jobs: JobReceiver<O>,
        runner: Arc<TaskRunner<O>>,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let mut joins = Vec::with_capacity(n);
        for worker_id in 0..n {
            let jobs = Arc::clone(&jobs);
            let runner = Arc::clone(&runner);
            let mut rx = shutdown_rx.clone();

            let join = tokio::spawn(async move {
                worker_loop(worker_id, jobs, runner, &mut rx).await;
            });
            joins.push(join);
        }

        Self { shutdown_tx, joins }
    }

    /// Stop taking new jobs. In-flight jobs run to completion.
    pub(crate) fn request_shutdown(&self) {
        // ignore send error: receivers may already be dropped
        let _ = self.shutdown_tx.send(true);
    }

    pub(crate) async fn shutdown_and_join(self) {
        self.request_shutdown();
        for join in self.joins {
            let _ = join.await;
        }
    }
}

async fn worker_loop<O: Clone + Send + 'static>(
    worker_id: usize,
    jobs: JobReceiver<O>,
    runner: Arc<TaskRunner<O>>,
    shutdown_rx: &mut watch::Receiver<bool>,
) {
    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        // recv は待つ可能性があるので select で shutdown と競合させる。
        // 両方 ready なら shutdown を優先する
        let job = {
            let mut receiver = jobs.lock().await;
            tokio::select! {
                biased;
                _ = shutdown_rx.changed() => {
                    // 次のループで判定
                    continue;
                }
                job = receiver.recv() => job,
            }
        };

        // sender が drop された
        let Some(job) = job else {
            break;
        };

        debug!(worker_id, task_id = %job.id(), "worker picked up task");
        runner.run(job).await;
    }
    debug!(worker_id, "worker stopped");
}

/// Close the channel and abandon every job still waiting in it.
///
/// After this, sends fail and the job is handed back to the sender.
pub(crate) async fn drain<O: Clone + Send + 'static>(
    jobs: &JobReceiver<O>,
    runner: &TaskRunner<O>,
    reason: &str,
) {
    let mut receiver = jobs.lock().await;
    receiver.close();
    while let Ok(job) = receiver.try_recv() {
        runner.abandon(job, reason).await;
    }
}
