//! Booking data models.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

/// Tour offering a booking refers to.
///
/// Any truthy value is accepted on create; the three known tours get their
/// own variants and everything else is carried through verbatim as `Other`.
#[derive(Debug, Clone, PartialEq)]
pub enum TourType {
    Tour1,
    Tour2,
    Tour3,
    Other(Value),
}

impl TourType {
    pub fn is_known(&self) -> bool {
        !matches!(self, TourType::Other(_))
    }
}

impl From<&str> for TourType {
    fn from(s: &str) -> Self {
        match s {
            "tour1" => TourType::Tour1,
            "tour2" => TourType::Tour2,
            "tour3" => TourType::Tour3,
            other => TourType::Other(Value::String(other.to_string())),
        }
    }
}

impl From<Value> for TourType {
    fn from(value: Value) -> Self {
        match value {
            Value::String(s) => TourType::from(s.as_str()),
            other => TourType::Other(other),
        }
    }
}

impl fmt::Display for TourType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TourType::Tour1 => f.write_str("tour1"),
            TourType::Tour2 => f.write_str("tour2"),
            TourType::Tour3 => f.write_str("tour3"),
            TourType::Other(Value::String(s)) => f.write_str(s),
            TourType::Other(other) => write!(f, "{}", other),
        }
    }
}

impl Serialize for TourType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            TourType::Other(value) => value.serialize(serializer),
            known => serializer.collect_str(known),
        }
    }
}

impl<'de> Deserialize<'de> for TourType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(TourType::from(Value::deserialize(deserializer)?))
    }
}

/// User a booking belongs to. The fields are stored as received.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NatoursUser {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<Value>,
}

/// A persisted booking. `id` is assigned on creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Booking {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub tour_type: TourType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<NatoursUser>,
}

/// Create booking request payload.
///
/// Only `selected_tour` decides validity; the user fields are passed through.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CreateBookingRequest {
    pub selected_tour: Option<Value>,
    pub user_id: Option<Value>,
    pub name: Option<Value>,
    pub email: Option<Value>,
}

impl CreateBookingRequest {
    /// Decode from an arbitrary JSON body without type-checking any field.
    ///
    /// A non-object body decodes to an empty request.
    pub fn from_json(body: &Value) -> Self {
        let field = |name: &str| body.get(name).filter(|v| !v.is_null()).cloned();
        Self {
            selected_tour: field("selectedTour"),
            user_id: field("userId"),
            name: field("name"),
            email: field("email"),
        }
    }

    /// Build the booking to persist, or `None` when no tour was selected.
    pub fn into_booking(self) -> Option<Booking> {
        let tour = self.selected_tour.filter(is_truthy)?;
        Some(Booking {
            id: None,
            tour_type: TourType::from(tour),
            user: Some(NatoursUser {
                id: self.user_id,
                name: self.name,
                email: self.email,
            }),
        })
    }
}

/// Create booking response payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreatedBooking {
    pub id: String,
}

/// Flat row projected by the bookings-by-user query.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingRow {
    #[serde(default)]
    pub booking_id: Option<String>,
    pub tour_type: TourType,
    #[serde(default)]
    pub user_id: Option<Value>,
    #[serde(default)]
    pub name: Option<Value>,
    #[serde(default)]
    pub email: Option<Value>,
}

impl From<BookingRow> for Booking {
    fn from(row: BookingRow) -> Self {
        Booking {
            id: row.booking_id,
            tour_type: row.tour_type,
            user: Some(NatoursUser {
                id: row.user_id,
                name: row.name,
                email: row.email,
            }),
        }
    }
}

/// Config function response payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function_key: Option<String>,
}

/// JavaScript truthiness of a JSON value.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}
