//! Booking create and query logic shared by the booking functions.

use std::collections::BTreeMap;
use std::sync::Arc;

use lambda_http::http::Method;
use serde_json::{json, Value};
use tracing::{debug, error, info, warn};

use crate::http::{FunctionRequest, Reply};
use crate::models::{Booking, BookingRow, CreateBookingRequest, CreatedBooking};
use crate::store::{ContainerHandle, SqlQuerySpec, StoreAccessor};
use crate::telemetry::Telemetry;
use crate::{Error, Result};

pub const POST_RECEIVED_EVENT: &str = "POST Request Received";
pub const GET_RECEIVED_EVENT: &str = "GET Request Received";
pub const QUERY_RESULT_EVENT: &str = "COSMOS DB Result";

const BOOKINGS_BY_USER_QUERY: &str = "select b.id as bookingId, \
     b.tourType as tourType, \
     b.user.id as userId, \
     b.user.name as name, \
     b.user.email as email \
     from bookings b where b.user.id = @userId";

/// Handles booking requests against the bookings container.
pub struct BookingHandler {
    store: Arc<StoreAccessor>,
    telemetry: Arc<dyn Telemetry>,
}

impl BookingHandler {
    pub fn new(store: Arc<StoreAccessor>, telemetry: Arc<dyn Telemetry>) -> Self {
        Self { store, telemetry }
    }

    /// Combined endpoint: POST creates, any other method lists by user.
    pub async fn handle(&self, request: FunctionRequest) -> Reply {
        if request.method == Method::POST {
            self.create(request.body.as_ref()).await
        } else {
            self.list_for_user(&request.query).await
        }
    }

    /// Validate and persist a new booking. Answers 201 with `{id}`.
    pub async fn create(&self, body: Option<&Value>) -> Reply {
        let result = self.try_create(body).await;
        self.respond(result.map(|created| Reply::json(201, &created)))
    }

    /// List bookings for the `userid` query parameter.
    ///
    /// Found bookings are returned wrapped in an outer single-element array.
    pub async fn list_for_user(&self, query: &BTreeMap<String, String>) -> Reply {
        let result = self.try_list_for_user(query).await;
        self.respond(result.map(|bookings| Reply::json(200, &[bookings])))
    }

    async fn try_create(&self, body: Option<&Value>) -> Result<CreatedBooking> {
        let container = self.store.ensure_container_ready().await?;

        self.telemetry
            .track_event(POST_RECEIVED_EVENT, json!({ "body": body }));

        let booking = body
            .map(CreateBookingRequest::from_json)
            .and_then(CreateBookingRequest::into_booking)
            .ok_or_else(|| Error::Validation("selectedTour is required".to_string()))?;

        if !booking.tour_type.is_known() {
            warn!(tour = %booking.tour_type, "Accepting booking for unknown tour");
        }

        let id = create_booking(&container, &booking).await?;
        info!(booking_id = %id, tour = %booking.tour_type, "Created booking");
        Ok(CreatedBooking { id })
    }

    async fn try_list_for_user(&self, query: &BTreeMap<String, String>) -> Result<Vec<Booking>> {
        let container = self.store.ensure_container_ready().await?;

        self.telemetry
            .track_event(GET_RECEIVED_EVENT, json!({ "query": query }));

        let user_id = query
            .get("userid")
            .filter(|id| !id.is_empty())
            .ok_or_else(|| Error::Validation("userid is required".to_string()))?;

        let bookings = bookings_for_user(&container, user_id).await?;
        self.telemetry
            .track_event(QUERY_RESULT_EVENT, json!({ "resource": bookings }));

        if bookings.is_empty() {
            return Err(Error::NotFound(format!("No bookings for user {}", user_id)));
        }
        info!(user_id = %user_id, count = bookings.len(), "Found bookings");
        Ok(bookings)
    }

    /// Map a handler outcome to a bodiless status on error. Only server
    /// errors are reported to telemetry.
    fn respond(&self, result: Result<Reply>) -> Reply {
        match result {
            Ok(reply) => reply,
            Err(err) => {
                let status = err.status_code();
                if status >= 500 {
                    error!("Booking store operation failed: {}", err);
                    self.telemetry.track_exception(&err);
                } else {
                    debug!("Rejected booking request: {}", err);
                }
                Reply::empty(status)
            }
        }
    }
}

async fn create_booking(container: &ContainerHandle, booking: &Booking) -> Result<String> {
    let created = container.create_item(booking).await?;
    created
        .get("id")
        .and_then(Value::as_str)
        .map(String::from)
        .ok_or_else(|| Error::Internal("Created booking has no id".to_string()))
}

async fn bookings_for_user(container: &ContainerHandle, user_id: &str) -> Result<Vec<Booking>> {
    let query = SqlQuerySpec::new(BOOKINGS_BY_USER_QUERY).with_parameter("@userId", user_id);
    let rows: Vec<BookingRow> = container.query_all(&query).await?;
    Ok(rows.into_iter().map(Booking::from).collect())
}
