//! Config Function - Handles GET /api/config.
//!
//! Exposes the booking function key to the front end.

use lambda_http::{run, service_fn, Body, Error, Request, Response};
use shared::config::function_key_response;
use shared::Reply;
use tracing_subscriber::EnvFilter;

async fn handler(_event: Request) -> Result<Response<Body>, Error> {
    Reply::json(200, &function_key_response()).into_response()
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .json()
        .init();

    run(service_fn(handler)).await
}
