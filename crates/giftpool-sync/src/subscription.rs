use crate::item_state::{ItemTotals, WishlistLedger};
use crate::reconciler::{apply_snapshot, PushEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    Pending,
    Subscribed,
    Closed,
}

impl SubscriptionState {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Subscribed => "subscribed",
            Self::Closed => "closed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ApplyOutcome {
    Applied(ItemTotals),
    Dropped,
}

/// Lifecycle handle for one wishlist's private channel. After `close()` the
/// subscription refuses further events; at-least-once delivery plus the
/// idempotent snapshot overwrite makes a replay buffer unnecessary.
#[derive(Debug, Clone)]
pub struct ChannelSubscription {
    channel_name: String,
    state: SubscriptionState,
}

impl ChannelSubscription {
    #[must_use]
    pub fn for_wishlist(wishlist_id: &str) -> Self {
        Self {
            channel_name: format!("private-wishlist-{}", wishlist_id.trim()),
            state: SubscriptionState::Pending,
        }
    }

    #[must_use]
    pub fn channel_name(&self) -> &str {
        &self.channel_name
    }

    #[must_use]
    pub fn state(&self) -> SubscriptionState {
        self.state
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state == SubscriptionState::Closed
    }

    /// Closed is terminal; a reconnect builds a fresh subscription for the
    /// same channel name instead of reviving this one.
    pub fn mark_subscribed(&mut self) {
        if self.state == SubscriptionState::Pending {
            self.state = SubscriptionState::Subscribed;
        }
    }

    pub fn close(&mut self) {
        self.state = SubscriptionState::Closed;
    }

    /// Routes an event into the ledger unless the subscription is closed.
    pub fn apply(&self, ledger: &mut WishlistLedger, event: &PushEvent) -> ApplyOutcome {
        if self.is_closed() {
            tracing::debug!(
                channel = self.channel_name.as_str(),
                event = event.kind(),
                "dropping event on closed subscription"
            );
            return ApplyOutcome::Dropped;
        }
        ApplyOutcome::Applied(apply_snapshot(ledger, event))
    }
}
