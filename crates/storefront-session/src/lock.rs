//! Scoped ownership of a lock slot.

use std::time::Duration;

use storefront_cache::{CacheError, CacheResult, DynStore};

/// A held lock slot.
///
/// Release it with [`LockGuard::release`]. A guard dropped without an explicit
/// release (early return, `?`, panic unwinding, an abandoned request future)
/// schedules the delete on the current Tokio runtime instead.
///
/// Release goes straight to the store and ignores the request's cancellation
/// token, so a canceled request still frees the slot. It only removes the
/// slot while it still holds this guard's ticket: a slot that expired and was
/// taken by someone else is left alone.
#[must_use = "dropping the guard releases the lock"]
pub struct LockGuard {
    store: DynStore,
    key: String,
    ticket: String,
    release_timeout: Duration,
    released: bool,
}

impl std::fmt::Debug for LockGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockGuard")
            .field("key", &self.key)
            .field("released", &self.released)
            .finish()
    }
}

impl LockGuard {
    pub(crate) fn new(
        store: DynStore,
        key: String,
        ticket: String,
        release_timeout: Duration,
    ) -> Self {
        Self {
            store,
            key,
            ticket,
            release_timeout,
            released: false,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Owner ticket written into the slot.
    pub fn ticket(&self) -> &str {
        &self.ticket
    }

    /// Deletes the slot, making the lock free again.
    ///
    /// Returns `false` when the slot no longer held this guard's ticket.
    pub async fn release(mut self) -> CacheResult<bool> {
        self.released = true;
        let release = self
            .store
            .delete_if_equals(&self.key, self.ticket.as_bytes());
        let result = tokio::time::timeout(self.release_timeout, release)
            .await
            .unwrap_or_else(|_| {
                Err(CacheError::DeadlineExceeded {
                    operation: "release_lock",
                    key: self.key.clone(),
                })
            });
        match &result {
            Ok(true) => tracing::debug!(key = %self.key, "lock released"),
            Ok(false) => tracing::warn!(key = %self.key, "lock slot no longer held by this guard"),
            Err(e) => tracing::warn!(key = %self.key, error = %e, "failed to release lock"),
        }
        result
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }

        let store = self.store.clone();
        let key = std::mem::take(&mut self.key);
        let ticket = std::mem::take(&mut self.ticket);
        let release_timeout = self.release_timeout;
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    let release = store.delete_if_equals(&key, ticket.as_bytes());
                    match tokio::time::timeout(release_timeout, release).await {
                        Ok(Ok(removed)) => tracing::debug!(key = %key, removed, "lock released on drop"),
                        Ok(Err(e)) => {
                            tracing::warn!(key = %key, error = %e, "failed to release lock on drop")
                        }
                        Err(_) => tracing::warn!(key = %key, "timed out releasing lock on drop"),
                    }
                });
            }
            Err(_) => {
                tracing::error!(key = %key, "no runtime available, lock slot left held");
            }
        }
    }
}
