use serde::{Deserialize, Serialize};

use crate::item_state::{ItemTotals, WishlistLedger};

/// Broker push events for a wishlist channel. Both variants carry the
/// absolute post-write totals for one item, never a delta, so a lost or
/// repeated delivery cannot skew the ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PushEvent {
    ItemReserved {
        item_id: String,
        reserved_total: f64,
        contributors_count: f64,
    },
    ContributionAdded {
        item_id: String,
        reserved_total: f64,
        contributors_count: f64,
    },
}

impl PushEvent {
    #[must_use]
    pub fn item_id(&self) -> &str {
        match self {
            Self::ItemReserved { item_id, .. } | Self::ContributionAdded { item_id, .. } => item_id,
        }
    }

    /// Totals after wire coercion.
    #[must_use]
    pub fn totals(&self) -> ItemTotals {
        match self {
            Self::ItemReserved {
                reserved_total,
                contributors_count,
                ..
            }
            | Self::ContributionAdded {
                reserved_total,
                contributors_count,
                ..
            } => ItemTotals::from_wire(*reserved_total, *contributors_count),
        }
    }

    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ItemReserved { .. } => "item_reserved",
            Self::ContributionAdded { .. } => "contribution_added",
        }
    }
}

/// Overwrites the item's ledger entry with the event's snapshot and returns
/// the stored totals. Last writer wins by backend write order.
pub fn apply_snapshot(ledger: &mut WishlistLedger, event: &PushEvent) -> ItemTotals {
    let totals = event.totals();
    ledger.overwrite(event.item_id(), totals);
    tracing::debug!(
        event = event.kind(),
        item_id = event.item_id(),
        reserved_total = totals.reserved_total,
        contributors_count = totals.contributors_count,
        "applied snapshot"
    );
    totals
}
