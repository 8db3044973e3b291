//! Client-side synchronization layer for Giftpool wishlists.
//!
//! Holds the per-item totals ledger, the snapshot reconciler that merges push
//! events into it, the reservation client that submits contributions and full
//! reservations with optimistic local updates, and the channel subscription
//! lifecycle. Push events carry absolute post-write totals, so the merge is a
//! plain overwrite: applying an event twice is a no-op and events for distinct
//! items commute.

mod item_state;
mod reconciler;
mod reservation;
mod subscription;

pub use item_state::{round_to_cents, ItemTotals, WishlistLedger};
pub use reconciler::{apply_snapshot, PushEvent};
pub use reservation::{parse_amount, ReservationClient, ReservationError};
pub use subscription::{ApplyOutcome, ChannelSubscription, SubscriptionState};
