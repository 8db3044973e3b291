use giftpool_backend_client::{BackendClient, BackendError, Item, ReservationRequest};
use thiserror::Error;

use crate::item_state::{round_to_cents, ItemTotals, WishlistLedger};
use crate::reconciler::{apply_snapshot, PushEvent};

#[derive(Debug, Error)]
pub enum ReservationError {
    #[error("Enter a valid amount.")]
    InvalidAmount,
    #[error("Only {remaining:.2} is left on this item.")]
    ExceedsRemaining { remaining: f64 },
    #[error("This item does not accept reservations.")]
    NotReservable,
    #[error("This item is already fully reserved.")]
    AlreadyReserved,
    #[error(transparent)]
    Backend(#[from] BackendError),
}

/// Parses a user-entered amount. Decimal commas and embedded whitespace are
/// accepted ("1 234,50" reads as 1234.50); the result is rounded to cents.
pub fn parse_amount(raw: &str) -> Result<f64, ReservationError> {
    let normalized: String = raw
        .replace(',', ".")
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect();
    let parsed: f64 = normalized
        .parse()
        .map_err(|_| ReservationError::InvalidAmount)?;
    let amount = round_to_cents(parsed);
    if !amount.is_finite() || amount <= 0.0 {
        return Err(ReservationError::InvalidAmount);
    }
    Ok(amount)
}

/// Submits reservation and contribution writes and applies the optimistic
/// local update on success. The optimistic update goes through the same
/// snapshot entry point as push events, so the broker's echo of the same
/// write converges instead of double-counting.
#[derive(Debug, Clone)]
pub struct ReservationClient {
    backend: BackendClient,
}

impl ReservationClient {
    #[must_use]
    pub fn new(backend: BackendClient) -> Self {
        Self { backend }
    }

    #[must_use]
    pub fn backend(&self) -> &BackendClient {
        &self.backend
    }

    /// Contributes `raw_amount` toward the item. Validation happens against
    /// the last-known ledger state before the backend is contacted.
    pub async fn contribute(
        &self,
        ledger: &mut WishlistLedger,
        item: &Item,
        raw_amount: &str,
        guest_name: Option<String>,
    ) -> Result<ItemTotals, ReservationError> {
        let amount = parse_amount(raw_amount)?;
        if !item.allow_contributions {
            return Err(ReservationError::NotReservable);
        }
        let price = reservable_price(item)?;
        let current = ledger.totals(&item.id);
        if current.is_fully_reserved(Some(price)) {
            return Err(ReservationError::AlreadyReserved);
        }
        let remaining = current.remaining(Some(price));
        if amount > remaining {
            return Err(ReservationError::ExceedsRemaining { remaining });
        }

        self.backend
            .create_reservation(
                &item.wishlist_id,
                &item.id,
                &ReservationRequest {
                    amount,
                    is_full_reservation: false,
                    guest_name,
                },
            )
            .await?;

        let optimistic = PushEvent::ContributionAdded {
            item_id: item.id.clone(),
            reserved_total: current.reserved_total + amount,
            contributors_count: f64::from(current.contributors_count) + 1.0,
        };
        Ok(apply_snapshot(ledger, &optimistic))
    }

    /// Reserves the item outright at its full price.
    pub async fn reserve_full(
        &self,
        ledger: &mut WishlistLedger,
        item: &Item,
        guest_name: Option<String>,
    ) -> Result<ItemTotals, ReservationError> {
        let price = reservable_price(item)?;
        let current = ledger.totals(&item.id);
        if current.is_fully_reserved(Some(price)) {
            return Err(ReservationError::AlreadyReserved);
        }

        self.backend
            .create_reservation(
                &item.wishlist_id,
                &item.id,
                &ReservationRequest {
                    amount: price,
                    is_full_reservation: true,
                    guest_name,
                },
            )
            .await?;

        let optimistic = PushEvent::ItemReserved {
            item_id: item.id.clone(),
            reserved_total: price,
            contributors_count: f64::from(current.contributors_count) + 1.0,
        };
        Ok(apply_snapshot(ledger, &optimistic))
    }
}

fn reservable_price(item: &Item) -> Result<f64, ReservationError> {
    match item.price {
        Some(price) if price > 0.0 => Ok(price),
        _ => Err(ReservationError::NotReservable),
    }
}
