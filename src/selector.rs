//! Decides which fetched bookings have not been notified yet.

use crate::model::Booking;

/// A booking that passed selection, with its identifier resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct NewBooking {
    pub id: i64,
    pub booking: Booking,
}

/// Keep bookings whose id is strictly greater than `last_id`, oldest first.
///
/// Records without a usable id are dropped. Upstream order is ignored and
/// a repeated id is only kept once (its first occurrence).
pub fn select_new(bookings: Vec<Booking>, last_id: i64) -> Vec<NewBooking> {
    let mut selected: Vec<NewBooking> = bookings
        .into_iter()
        .filter_map(|booking| {
            let id = booking.id?;
            (id > last_id).then_some(NewBooking { id, booking })
        })
        .collect();
    // Stable sort keeps the first occurrence ahead of later duplicates.
    selected.sort_by_key(|b| b.id);
    selected.dedup_by_key(|b| b.id);
    selected
}
