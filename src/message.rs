use crate::model::Booking;

/// A push notification ready to send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub title: String,
    pub body: String,
}

/// Render one booking as a short five-line push message.
/// Missing attributes render as empty text; the amount line is omitted
/// when neither the paid amount nor the agreed price is known.
pub fn format_booking(booking: &Booking, title: &str) -> Message {
    let event = booking.event.clone().unwrap_or_default();
    let participant = booking.participant.clone().unwrap_or_default();
    let payment = booking.payment.clone().unwrap_or_default();

    let paid_txt = if payment.paid.unwrap_or(false) {
        "Betald"
    } else {
        "Ej betald"
    };
    let amount_txt = payment
        .amount()
        .map(|a| format!("{} SEK", a))
        .unwrap_or_default();
    let id = booking.id.map(|id| id.to_string()).unwrap_or_default();

    let body = format!(
        "{}\n{} ({})\nStart: {}\n{} {}\nSkapad: {} (ID {})",
        participant.name.unwrap_or_default(),
        event.name.unwrap_or_default(),
        event.code.unwrap_or_default(),
        event.start_date_time.unwrap_or_default(),
        paid_txt,
        amount_txt,
        booking.created.as_deref().unwrap_or_default(),
        id,
    );

    Message {
        title: title.to_string(),
        body,
    }
}
