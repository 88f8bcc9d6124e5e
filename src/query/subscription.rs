use std::fmt;
use std::sync::Weak;

use tracing::trace;

/// Something a [`Subscription`] can detach itself from
pub(crate) trait Unsubscribe: Send + Sync {
    fn unsubscribe(
        &self,
        id: u64,
    );
}

struct SubscriptionCleanup {
    id: u64,
    key: String,
    target: Weak<dyn Unsubscribe>,
}

/// Handle for a registered listener
///
/// When dropped (or passed to [`Subscription::unsubscribe`]), the listener is
/// removed from the query. If the query itself is already gone this is a
/// no-op.
#[must_use = "dropping a Subscription immediately unsubscribes the listener"]
pub struct Subscription {
    cleanup: Option<SubscriptionCleanup>,
}

impl Subscription {
    pub(crate) fn new(
        id: u64,
        key: String,
        target: Weak<dyn Unsubscribe>,
    ) -> Self {
        Self {
            cleanup: Some(SubscriptionCleanup { id, key, target }),
        }
    }

    /// Unique (per query) identifier of this listener
    pub fn id(&self) -> u64 {
        self.cleanup.as_ref().map_or(0, |c| c.id)
    }

    /// Key of the query this listener is attached to
    pub fn key(&self) -> &str {
        self.cleanup.as_ref().map_or("", |c| c.key.as_str())
    }

    /// Remove the listener now
    pub fn unsubscribe(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if let Some(cleanup) = self.cleanup.take() {
            if let Some(target) = cleanup.target.upgrade() {
                target.unsubscribe(cleanup.id);
            }
            trace!(subscriber_id = cleanup.id, key = %cleanup.key, "listener unsubscribed");
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id())
            .field("key", &self.key())
            .finish()
    }
}
