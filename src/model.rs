use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::fmt;

/// One booking as returned by the public bookings endpoint.
///
/// Every field is optional: the upstream payload varies between events and
/// only `id` matters for deciding what is new.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Booking {
    #[serde(default, deserialize_with = "de_booking_id")]
    pub id: Option<i64>,
    #[serde(default)]
    pub created: Option<String>,
    #[serde(default)]
    pub event: Option<Event>,
    #[serde(default)]
    pub participant: Option<Participant>,
    #[serde(default)]
    pub payment: Option<Payment>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub start_date_time: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Participant {
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Payment {
    #[serde(default)]
    pub paid: Option<bool>,
    #[serde(default)]
    pub amount_paid: Option<Amount>,
    #[serde(default)]
    pub price_agreed: Option<Amount>,
}

/// Money as sent by the API, either a JSON number or a string.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum Amount {
    Number(serde_json::Number),
    Text(String),
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Amount::Number(n) => write!(f, "{}", n),
            Amount::Text(s) => f.write_str(s),
        }
    }
}

impl Payment {
    /// Amount actually paid, falling back to the agreed price.
    pub fn amount(&self) -> Option<&Amount> {
        self.amount_paid.as_ref().or(self.price_agreed.as_ref())
    }
}

impl Booking {
    /// Decode one raw record. When the nested attributes have an unexpected
    /// shape only the identifier is kept, so a single odd row never fails a
    /// whole page and never hides a valid id.
    pub fn from_value(value: Value) -> Self {
        let id = value.get("id").and_then(parse_booking_id);
        match serde_json::from_value::<Booking>(value) {
            Ok(booking) => booking,
            Err(err) => {
                tracing::debug!(?id, %err, "booking attributes did not decode; keeping id only");
                Booking {
                    id,
                    ..Default::default()
                }
            }
        }
    }
}

/// Parse a booking identifier from a number or a numeric string.
/// Anything else (null, floats, words, objects) is treated as missing.
pub fn parse_booking_id(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    }
}

fn de_booking_id<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<Value>::deserialize(deserializer)?;
    Ok(raw.as_ref().and_then(parse_booking_id))
}
