//! Idle reaper: periodic trimming and validation of the idle cache

use std::sync::Arc;
use std::time::Duration;

use super::pool::{PoolInner, discard};

impl PoolInner {
    /// Start the repeating sweep task, cancelling any previous one.
    ///
    /// The task only holds a weak reference and ends when the pool is closed
    /// or dropped.
    pub(super) fn arm_reaper(self: &Arc<Self>, interval: Duration) {
        let token = self.shutdown.child_token();
        if let Some(previous) = self.reaper.lock().replace(token.clone()) {
            previous.cancel();
        }

        let weak = Arc::downgrade(self);
        let name = self.config.name().to_string();
        tracing::debug!(pool = %name, interval = ?interval, "idle reaper armed");

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {}
                }
                let Some(pool) = weak.upgrade() else {
                    break;
                };
                pool.sweep().await;
            }
            tracing::debug!(pool = %name, "idle reaper stopped");
        });
    }

    /// Run one sweep on its own task so a panic cannot end the reaper
    pub(super) async fn sweep(self: Arc<Self>) -> bool {
        let name = self.config.name().to_string();
        match tokio::spawn(async move { self.check_idle().await }).await {
            Ok(clean) => clean,
            Err(e) => {
                tracing::error!(pool = %name, error = %e, "idle sweep failed");
                false
            }
        }
    }

    /// Trim, validate and refill the idle cache.
    ///
    /// 1. Close the newest idle connections above `mincached` (no trimming
    ///    when `mincached` is 0).
    /// 2. Validate each remaining connection oldest first; valid ones go
    ///    back as newest, invalid ones are closed without recounting.
    /// 3. Open new connections until the cache is back at the smaller of
    ///    `mincached` and its size before the sweep.
    async fn check_idle(&self) -> bool {
        let mincached = self.config.mincached();
        let (before, excess) = {
            let mut state = self.state.lock();
            if state.closed {
                return true;
            }
            let before = state.idle.len();
            let mut excess = Vec::new();
            if mincached > 0 {
                while state.idle.len() > mincached {
                    match state.idle.take_newest() {
                        Some(con) => excess.push(con),
                        None => break,
                    }
                }
            }
            (before, excess)
        };

        for con in &excess {
            discard(con).await;
        }

        let remaining = before - excess.len();
        let mut evicted = 0;
        for _ in 0..remaining {
            let oldest = self.state.lock().idle.take_oldest();
            let Some(con) = oldest else {
                break;
            };

            let result = self.validator.validate(&con, None).await;
            if result.is_valid() {
                let leftover = {
                    let mut state = self.state.lock();
                    if state.closed {
                        Some(con)
                    } else {
                        state.idle.push(con);
                        None
                    }
                };
                if let Some(con) = leftover {
                    discard(&con).await;
                }
            } else {
                tracing::warn!(
                    pool = %self.config.name(),
                    connection_id = %con.id(),
                    error = ?result.error(),
                    "idle connection failed validation, closing it"
                );
                discard(&con).await;
                evicted += 1;
            }
        }

        let refilled = self.refill(before.min(mincached)).await;
        tracing::debug!(
            pool = %self.config.name(),
            trimmed = excess.len(),
            evicted,
            idle = self.state.lock().idle.len(),
            "idle sweep finished"
        );
        refilled
    }

    /// Open idle connections until the cache holds `target`
    async fn refill(&self, target: usize) -> bool {
        loop {
            {
                let state = self.state.lock();
                if state.closed || state.idle.len() >= target {
                    return true;
                }
            }

            let con = match self.open().await {
                Ok(con) => con,
                Err(e) => {
                    tracing::warn!(pool = %self.config.name(), error = %e, "could not refill idle cache");
                    return false;
                }
            };
            let leftover = {
                let mut state = self.state.lock();
                if self.can_cache(&state, &con) {
                    state.idle.push(con);
                    None
                } else {
                    Some(con)
                }
            };
            if let Some(con) = leftover {
                discard(&con).await;
                return true;
            }
        }
    }
}
