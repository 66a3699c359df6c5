//! 限流重试
//!
//! 只重试 `StoreError::RateLimited`，其余错误立即返回。每次调用独立计数。

use crate::error::StoreResult;
use crate::storage::{ListPage, RemoteEntry, RemoteStore};
use async_trait::async_trait;
use bytes::Bytes;
use rand::Rng;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

/// 重试策略
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// 最大重试次数（不含首次调用）
    pub max_retries: u32,
    pub initial_delay: Duration,
    /// 每次重试延迟的倍数
    pub factor: f64,
    /// 抖动比例，延迟乘以 [1-jitter, 1+jitter] 内的随机数
    pub jitter: f64,
    /// 单次延迟上限
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 8,
            initial_delay: Duration::from_secs(10),
            factor: 2.0,
            jitter: 0.1,
            max_delay: Duration::from_secs(300), // 5 分钟
        }
    }
}

impl RetryPolicy {
    /// 第 `attempt` 次重试（从 0 开始）前的未抖动延迟
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let secs = self.initial_delay.as_secs_f64() * self.factor.powi(attempt as i32);
        Duration::from_secs_f64(secs.min(self.max_delay.as_secs_f64()))
    }

    /// 加入抖动并封顶后的实际延迟
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let jitter = self.jitter.clamp(0.0, 1.0);
        let scale = if jitter > 0.0 {
            rand::thread_rng().gen_range(1.0 - jitter..=1.0 + jitter)
        } else {
            1.0
        };
        let secs = self.base_delay(attempt).as_secs_f64() * scale;
        Duration::from_secs_f64(secs.min(self.max_delay.as_secs_f64()))
    }

    /// 执行操作，遇到限流时按指数退避重试
    pub async fn run<T, F, Fut>(
        &self,
        op_name: &str,
        cancel: Option<&CancellationToken>,
        mut op: F,
    ) -> StoreResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = StoreResult<T>>,
    {
        let mut attempt = 0u32;

        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_rate_limited() && attempt < self.max_retries => {
                    let delay = self.delay_for(attempt);
                    attempt += 1;
                    warn!(
                        "{} 被限流，{:.1}s 后重试 ({}/{}): {}",
                        op_name,
                        delay.as_secs_f64(),
                        attempt,
                        self.max_retries,
                        e
                    );

                    match cancel {
                        Some(token) => {
                            tokio::select! {
                                _ = tokio::time::sleep(delay) => {}
                                _ = token.cancelled() => return Err(e),
                            }
                        }
                        None => tokio::time::sleep(delay).await,
                    }
                }
                Err(e) => {
                    if e.is_rate_limited() {
                        error!("{} 最终失败 (已重试{}次): {}", op_name, self.max_retries, e);
                    }
                    return Err(e);
                }
            }
        }
    }
}

/// 为每个存储调用套上独立重试的装饰器
pub struct RetryStore {
    inner: Arc<dyn RemoteStore>,
    policy: RetryPolicy,
    cancel: Option<CancellationToken>,
}

impl RetryStore {
    pub fn new(inner: Arc<dyn RemoteStore>, policy: RetryPolicy) -> Self {
        Self {
            inner,
            policy,
            cancel: None,
        }
    }

    /// 取消时提前结束等待
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }
}

#[async_trait]
impl RemoteStore for RetryStore {
    async fn list_children(
        &self,
        folder_id: &str,
        page_token: Option<&str>,
    ) -> StoreResult<ListPage> {
        let inner = self.inner.as_ref();
        self.policy
            .run("list_children", self.cancel.as_ref(), move || {
                inner.list_children(folder_id, page_token)
            })
            .await
    }

    async fn create_folder(&self, name: &str, parent_id: &str) -> StoreResult<String> {
        let inner = self.inner.as_ref();
        self.policy
            .run("create_folder", self.cancel.as_ref(), move || {
                inner.create_folder(name, parent_id)
            })
            .await
    }

    async fn copy_file(&self, file_id: &str, new_name: &str, parent_id: &str) -> StoreResult<String> {
        let inner = self.inner.as_ref();
        self.policy
            .run("copy_file", self.cancel.as_ref(), move || {
                inner.copy_file(file_id, new_name, parent_id)
            })
            .await
    }

    async fn delete_file(&self, id: &str) -> StoreResult<()> {
        let inner = self.inner.as_ref();
        self.policy
            .run("delete_file", self.cancel.as_ref(), move || inner.delete_file(id))
            .await
    }

    async fn download_file(&self, id: &str) -> StoreResult<Bytes> {
        let inner = self.inner.as_ref();
        self.policy
            .run("download_file", self.cancel.as_ref(), move || {
                inner.download_file(id)
            })
            .await
    }

    async fn upload_file(
        &self,
        name: &str,
        parent_id: &str,
        data: Bytes,
        mime_type: &str,
    ) -> StoreResult<String> {
        let inner = self.inner.as_ref();
        self.policy
            .run("upload_file", self.cancel.as_ref(), move || {
                inner.upload_file(name, parent_id, data.clone(), mime_type)
            })
            .await
    }

    async fn get_metadata(&self, id: &str) -> StoreResult<RemoteEntry> {
        let inner = self.inner.as_ref();
        self.policy
            .run("get_metadata", self.cancel.as_ref(), move || {
                inner.get_metadata(id)
            })
            .await
    }

    fn name(&self) -> &str {
        self.inner.name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{FaultKind, MemoryStore, StoreOp};
    use tokio::time::Instant;

    fn policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            initial_delay: Duration::from_secs(10),
            factor: 2.0,
            jitter: 0.1,
            max_delay: Duration::from_secs(300),
        }
    }

    #[test]
    fn test_base_delay_is_geometric_and_capped() {
        let p = policy(8);
        assert_eq!(p.base_delay(0), Duration::from_secs(10));
        assert_eq!(p.base_delay(1), Duration::from_secs(20));
        assert_eq!(p.base_delay(3), Duration::from_secs(80));
        assert_eq!(p.base_delay(10), Duration::from_secs(300));

        for attempt in 0..8 {
            let d = p.delay_for(attempt).as_secs_f64();
            let base = p.base_delay(attempt).as_secs_f64();
            assert!(d >= base * 0.9 - 1e-6 && d <= (base * 1.1).min(300.0) + 1e-6);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_always_rate_limited_retries_then_propagates() {
        let store = Arc::new(MemoryStore::new());
        store.inject(StoreOp::List, FaultKind::RateLimited, 100);
        let retry = RetryStore::new(store.clone(), policy(3));

        let started = Instant::now();
        let result = retry.list_children(store.root(), None).await;
        let elapsed = started.elapsed().as_secs_f64();

        assert!(result.unwrap_err().is_rate_limited());
        // 首次调用 + 3 次重试
        assert_eq!(store.calls(StoreOp::List), 4);
        // 10 + 20 + 40 秒，各自 ±10%
        assert!(elapsed >= 63.0 - 0.01, "elapsed {}", elapsed);
        assert!(elapsed <= 77.0 + 0.01, "elapsed {}", elapsed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovers_after_transient_rate_limit() {
        let store = Arc::new(MemoryStore::new());
        store.add_file(store.root(), "a.txt", "abc");
        store.inject(StoreOp::List, FaultKind::RateLimited, 2);
        let retry = RetryStore::new(store.clone(), policy(3));

        let page = retry.list_children(store.root(), None).await.unwrap();
        assert_eq!(page.entries.len(), 1);
        assert_eq!(store.calls(StoreOp::List), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_rate_limit_errors_are_not_retried() {
        let store = Arc::new(MemoryStore::new());
        store.inject(StoreOp::Metadata, FaultKind::PermissionDenied, 5);
        let retry = RetryStore::new(store.clone(), policy(3));

        let started = Instant::now();
        let err = retry.get_metadata("whatever").await.unwrap_err();
        assert!(err.is_permission_denied());
        assert_eq!(store.calls(StoreOp::Metadata), 1);
        assert_eq!(started.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_each_call_counts_attempts_from_zero() {
        let store = Arc::new(MemoryStore::new());
        let retry = RetryStore::new(store.clone(), policy(1));

        store.inject(StoreOp::List, FaultKind::RateLimited, 1);
        assert!(retry.list_children(store.root(), None).await.is_ok());
        store.inject(StoreOp::List, FaultKind::RateLimited, 1);
        assert!(retry.list_children(store.root(), None).await.is_ok());
        assert_eq!(store.calls(StoreOp::List), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_cuts_backoff_short() {
        let store = Arc::new(MemoryStore::new());
        store.inject(StoreOp::List, FaultKind::RateLimited, 100);
        let token = CancellationToken::new();
        let retry = RetryStore::new(store.clone(), policy(5)).with_cancel(token.clone());

        token.cancel();
        let err = retry.list_children(store.root(), None).await.unwrap_err();
        assert!(err.is_rate_limited());
        assert_eq!(store.calls(StoreOp::List), 1);
    }
}
