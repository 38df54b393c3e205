//! Bookings Function - Handles /api/bookings.
//!
//! Endpoints:
//! - POST /api/bookings - Create a booking
//! - GET /api/bookings?userid={id} - List a user's bookings (any non-POST method)

use anyhow::Context;
use lambda_http::{run, service_fn, Body, Error, Request, Response};
use shared::{AppInsights, BookingHandler, Config, CosmosClient, FunctionRequest, StoreAccessor};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Application state shared across requests.
struct AppState {
    bookings: BookingHandler,
}

impl AppState {
    fn new() -> anyhow::Result<Self> {
        let config = Config::from_env().context("Failed to load configuration")?;
        let client = CosmosClient::new(&config.cosmos_endpoint, &config.cosmos_key)
            .context("Failed to create document database client")?;
        let telemetry =
            AppInsights::from_connection_string(config.telemetry_connection_string.as_deref());

        let store = StoreAccessor::new(Arc::new(client), config.database_id, config.container_id);

        Ok(Self {
            bookings: BookingHandler::new(Arc::new(store), Arc::new(telemetry)),
        })
    }
}

async fn handler(state: Arc<AppState>, event: Request) -> Result<Response<Body>, Error> {
    let request = FunctionRequest::from_request(&event);
    info!("Processing {} {}", request.method, event.uri().path());

    state.bookings.handle(request).await.into_response()
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .json()
        .init();

    let state = Arc::new(AppState::new()?);

    run(service_fn(move |event| {
        let state = Arc::clone(&state);
        async move { handler(state, event).await }
    }))
    .await
}
