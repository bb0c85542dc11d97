//! Timer-driven key rotation.

use std::sync::Arc;
use tokio::time::MissedTickBehavior;

use crate::JwtKeyManager;

impl JwtKeyManager {
    /// Spawn the background task that calls
    /// [`rotate_keys`](Self::rotate_keys) every check interval.
    ///
    /// Failed rotations are logged and retried on the next tick. The task
    /// only holds a weak reference, so it ends when the manager is dropped
    /// or [`destroy`](Self::destroy)ed. Calling this twice is a no-op.
    ///
    /// # Panics
    ///
    /// Must be called within a Tokio runtime context.
    pub fn start_rotation(self: &Arc<Self>) {
        let mut scheduler = self.scheduler.lock();
        if scheduler.is_some() || self.cancellation.is_cancelled() {
            return;
        }

        let interval = self.config.effective_check_interval();
        let manager = Arc::downgrade(self);
        let token = self.cancellation.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick fires immediately; consume it so we start
            // with a full interval wait.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = token.cancelled() => {
                        tracing::info!("Key rotation task shutting down");
                        break;
                    }
                    _ = ticker.tick() => {
                        let Some(manager) = manager.upgrade() else {
                            break;
                        };
                        match manager.rotate_keys().await {
                            Ok(report) if report.skipped => {
                                tracing::debug!("Scheduled rotation skipped");
                            }
                            Ok(_) => {}
                            Err(error) => {
                                tracing::warn!(%error, "Scheduled key rotation failed; retrying next tick");
                            }
                        }
                    }
                }
            }
        });

        tracing::info!(interval_ms = interval.as_millis() as u64, "Started key rotation task");
        *scheduler = Some(handle);
    }

    /// Whether the rotation task is running.
    pub fn is_rotating(&self) -> bool {
        self.scheduler
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }
}

impl Drop for JwtKeyManager {
    fn drop(&mut self) {
        self.cancellation.cancel();
    }
}
