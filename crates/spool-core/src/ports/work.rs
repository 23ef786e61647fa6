//! Work port - 実際の処理（スキャンなど）を行う外部の協調者
//!
//! core から見ると Work は不透明: 入力を受け取り、結果か失敗を返す。
//! 失敗は `anyhow::Error` で受け取り、TaskRunner が文字列化して記録する。
//!
//! # 使用例
//! ```ignore
//! struct Scanner;
//!
//! #[async_trait]
//! impl Work<String> for Scanner {
//!     type Output = ScanSummary;
//!
//!     async fn run(&self, url: String) -> anyhow::Result<ScanSummary> {
//!         scan(&url).await
//!     }
//! }
//! ```
//!
//! async クロージャもそのまま Work として使える:
//! ```ignore
//! let work = |url: String| async move { Ok::<_, anyhow::Error>(url.len()) };
//! ```

use std::future::Future;
use std::pin::Pin;

use async_trait::async_trait;

/// A zero-argument unit of work, as handed to the TaskRunner.
pub type WorkFuture<O> = Pin<Box<dyn Future<Output = anyhow::Result<O>> + Send + 'static>>;

/// The work unit executed for each dispatched task.
#[async_trait]
pub trait Work<I>: Send + Sync + 'static {
    type Output: Send + 'static;

    async fn run(&self, input: I) -> anyhow::Result<Self::Output>;
}

#[async_trait]
impl<I, O, F, Fut> Work<I> for F
where
    I: Send + 'static,
    O: Send + 'static,
    F: Fn(I) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<O>> + Send + 'static,
{
    type Output = O;

    async fn run(&self, input: I) -> anyhow::Result<O> {
        (self)(input).await
    }
}
