use std::collections::HashMap;

use giftpool_backend_client::Item;

/// Rounds to two decimal places; the backend stores amounts in cents.
#[must_use]
pub fn round_to_cents(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Authoritative per-item totals as last reported by the backend (or by our
/// own optimistic write, until the matching push event lands).
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ItemTotals {
    pub reserved_total: f64,
    pub contributors_count: u32,
}

impl ItemTotals {
    /// Builds totals from untrusted wire values. Non-finite or negative
    /// amounts collapse to zero; counts are floored and clamped at zero.
    #[must_use]
    pub fn from_wire(reserved_total: f64, contributors_count: f64) -> Self {
        let reserved = if reserved_total.is_finite() && reserved_total > 0.0 {
            round_to_cents(reserved_total)
        } else {
            0.0
        };
        let count = if contributors_count.is_finite() && contributors_count > 0.0 {
            let floored = contributors_count.floor();
            if floored >= f64::from(u32::MAX) {
                u32::MAX
            } else {
                floored as u32
            }
        } else {
            0
        };
        Self {
            reserved_total: reserved,
            contributors_count: count,
        }
    }

    /// Amount still open for contributions, never negative. Unpriced and
    /// zero-priced items have nothing to contribute toward.
    #[must_use]
    pub fn remaining(&self, price: Option<f64>) -> f64 {
        match price {
            Some(price) if price > 0.0 => round_to_cents((price - self.reserved_total).max(0.0)),
            _ => 0.0,
        }
    }

    #[must_use]
    pub fn is_fully_reserved(&self, price: Option<f64>) -> bool {
        match price {
            Some(price) if price > 0.0 => self.reserved_total >= price,
            _ => false,
        }
    }
}

/// Per-wishlist totals keyed by item id. Seeded from the fetched wishlist,
/// then overwritten snapshot by snapshot as events arrive.
#[derive(Debug, Clone, Default)]
pub struct WishlistLedger {
    items: HashMap<String, ItemTotals>,
}

impl WishlistLedger {
    #[must_use]
    pub fn seed_from_items<'a, I>(items: I) -> Self
    where
        I: IntoIterator<Item = &'a Item>,
    {
        let mut ledger = Self::default();
        for item in items {
            ledger.seed_item(
                &item.id,
                item.reserved_total,
                f64::from(item.contributors_count),
            );
        }
        ledger
    }

    /// Seed values pass through the same coercion as push events.
    pub fn seed_item(&mut self, item_id: &str, reserved_total: f64, contributors_count: f64) {
        self.overwrite(item_id, ItemTotals::from_wire(reserved_total, contributors_count));
    }

    pub fn overwrite(&mut self, item_id: &str, totals: ItemTotals) {
        self.items.insert(item_id.to_string(), totals);
    }

    /// Unknown items read as zero totals rather than an error; a push event
    /// can legitimately arrive for an item added after the initial fetch.
    #[must_use]
    pub fn totals(&self, item_id: &str) -> ItemTotals {
        self.items.get(item_id).copied().unwrap_or_default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
