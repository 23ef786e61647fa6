//! spool-core
//!
//! Background task execution with a pollable status record per task.
//!
//! `Dispatcher::start` records `pending`, hands the work off and returns at
//! once. The work runs in the background; its outcome only ever shows up as
//! a `done` / `error` record in the StatusStore, never as an error from `start`.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, state, record, events, errors）
//! - **ports**: 抽象化レイヤー（StatusStore, Work, Clock, IdGenerator, EventSink）
//! - **app**: アプリケーションロジック（builder, dispatcher, runner, worker_loop, config）
//! - **impls**: 実装（InMemoryStatusStore, BroadcastEventSink）

pub mod app;
pub mod domain;
pub mod impls;
pub mod ports;

pub use app::{BuildError, Dispatcher, DispatcherBuilder, OverflowPolicy, RunnerConfig};
pub use domain::{FailureKind, SpoolError, StatusRecord, TaskEvent, TaskId, TaskStatus};
pub use ports::{StatusStore, Work};
