//! DispatcherBuilder - Dispatcher の構築とワイヤリング
//!
//! # 学習ポイント
//! - Builder パターンの実装
//! - 起動時検証（Fail-fast 設計）: 不正な RunnerConfig は build() で弾く
//! - 差し替え可能な ports（StatusStore / IdGenerator / Clock / EventSink）

use std::marker::PhantomData;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use tokio::sync::Semaphore;
use tracing::info;

use super::config::{ConfigError, OverflowPolicy, RunnerConfig};
use super::dispatcher::{Dispatcher, Executor};
use super::runner::TaskRunner;
use crate::impls::InMemoryStatusStore;
use crate::ports::{
    Clock, EventSink, IdGenerator, NoopEventSink, StatusStore, SystemClock, UlidGenerator, Work,
};

/// BuildError は Dispatcher 構築時のエラー
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("invalid runner config: {0}")]
    InvalidConfig(#[from] ConfigError),
}

/// DispatcherBuilder は Dispatcher を構築
///
/// # 使用例
/// ```ignore
/// let dispatcher = DispatcherBuilder::new(Scanner)
///     .config(RunnerConfig::from_env()?)
///     .event_sink(events.clone())
///     .build()?;
/// ```
///
/// 何も指定しなければ InMemoryStatusStore / UlidGenerator / SystemClock /
/// NoopEventSink を使う。
///
/// 同時実行数に上限がある場合はワーカーを spawn するので、
/// `build()` は tokio ランタイムの中で呼ぶこと。
pub struct DispatcherBuilder<I, W: Work<I>> {
    work: W,
    config: RunnerConfig,
    store: Option<Arc<dyn StatusStore<W::Output>>>,
    ids: Option<Arc<dyn IdGenerator>>,
    clock: Option<Arc<dyn Clock>>,
    events: Option<Arc<dyn EventSink>>,
    _input: PhantomData<fn(I)>,
}

impl<I, W> DispatcherBuilder<I, W>
where
    I: Send + 'static,
    W: Work<I>,
    W::Output: Clone + Send + Sync + 'static,
{
    pub fn new(work: W) -> Self {
        Self {
            work,
            config: RunnerConfig::default(),
            store: None,
            ids: None,
            clock: None,
            events: None,
            _input: PhantomData,
        }
    }

    pub fn config(mut self, config: RunnerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn store(mut self, store: Arc<dyn StatusStore<W::Output>>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = Some(ids);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn event_sink(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = Some(events);
        self
    }

    /// Validate the config and wire everything together.
    pub fn build(self) -> Result<Dispatcher<I, W::Output>, BuildError> {
        self.config.validate()?;

        let store = self
            .store
            .unwrap_or_else(|| Arc::new(InMemoryStatusStore::new()));
        let ids = self
            .ids
            .unwrap_or_else(|| Arc::new(UlidGenerator::new(SystemClock)));
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let events = self.events.unwrap_or_else(|| Arc::new(NoopEventSink));

        let runner = Arc::new(TaskRunner::new(
            Arc::clone(&store),
            Arc::clone(&events),
            Arc::clone(&clock),
            self.config.timeout(),
            self.config.abort_abandoned,
        ));

        let (executor, admission) = match self.config.max_concurrent_tasks {
            None => (Executor::spawn(), None),
            Some(limit) => {
                let admission = match self.config.overflow {
                    OverflowPolicy::Queue => None,
                    OverflowPolicy::FailFast => Some(Arc::new(Semaphore::new(limit))),
                };
                (Executor::pool(limit, Arc::clone(&runner)), admission)
            }
        };

        info!(
            timeout_ms = ?self.config.timeout_ms,
            max_concurrent_tasks = ?self.config.max_concurrent_tasks,
            overflow = ?self.config.overflow,
            "dispatcher built"
        );

        Ok(Dispatcher {
            work: Arc::new(self.work),
            runner,
            store,
            ids,
            clock,
            events,
            executor,
            admission,
            closed: AtomicBool::new(false),
        })
    }
}
