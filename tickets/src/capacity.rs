//! Capacity guard.
//!
//! Tickets in `pending`, `paid` or `free` hold a slot; `failed` and `expired`
//! release it. The check here is the fast pre-check done before an invoice is
//! issued. The binding check is repeated inside
//! [`TicketStore::create_purchase`](crate::store::TicketStore::create_purchase),
//! atomically with the insert.

use crate::store::{StoreError, StoreResult, TicketStore};
use crate::types::Event;
use std::sync::Arc;

/// Slots left given `held` tickets holding one
#[must_use]
pub const fn remaining(event: &Event, held: u32) -> u32 {
    event.capacity.saturating_sub(held)
}

/// Whether one more ticket fits
#[must_use]
pub const fn has_room(event: &Event, held: u32) -> bool {
    remaining(event, held) > 0
}

/// Computes remaining capacity from the store
#[derive(Clone)]
pub struct CapacityGuard {
    store: Arc<dyn TicketStore>,
}

impl CapacityGuard {
    /// Create a guard over `store`
    #[must_use]
    pub fn new(store: Arc<dyn TicketStore>) -> Self {
        Self { store }
    }

    /// Remaining slots for `event`
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the held count cannot be read.
    pub async fn remaining(&self, event: &Event) -> StoreResult<u32> {
        let held = self.store.held_count(event.id).await?;
        Ok(remaining(event, held))
    }

    /// Fail fast when `event` is full or not on sale
    ///
    /// # Errors
    ///
    /// - [`StoreError::EventInactive`] if the event is not on sale
    /// - [`StoreError::SoldOut`] if no slot is left
    pub async fn ensure_available(&self, event: &Event) -> StoreResult<u32> {
        if !event.active {
            return Err(StoreError::EventInactive(event.id));
        }
        match self.remaining(event).await? {
            0 => Err(StoreError::SoldOut(event.id)),
            left => Ok(left),
        }
    }
}
