//! Configuration management for the booking functions.

use std::env;

use crate::models::ConfigResponse;
use crate::{Error, Result};

/// Environment variable holding the key exposed by the config function.
pub const FUNCTION_KEY_VAR: &str = "NWA_API_BOOKING_POST_KEY";

const DEFAULT_DATABASE_ID: &str = "NWA-DB";
const DEFAULT_CONTAINER_ID: &str = "Booking Container";

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Document database account endpoint
    pub cosmos_endpoint: String,
    /// Document database master key (base64)
    pub cosmos_key: String,
    /// Logical database holding the bookings
    pub database_id: String,
    /// Collection holding the bookings
    pub container_id: String,
    /// Telemetry collector connection string, if telemetry is enabled
    pub telemetry_connection_string: Option<String>,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            cosmos_endpoint: required("NWA_COSMOS_DB_ENDPOINT")?,
            cosmos_key: required("NWA_COSMOS_DB_KEY")?,
            database_id: env::var("NWA_COSMOS_DB_DATABASE")
                .unwrap_or_else(|_| DEFAULT_DATABASE_ID.to_string()),
            container_id: env::var("NWA_COSMOS_DB_CONTAINER")
                .unwrap_or_else(|_| DEFAULT_CONTAINER_ID.to_string()),
            telemetry_connection_string: env::var("APPLICATIONINSIGHTS_CONNECTION_STRING")
                .ok()
                .filter(|s| !s.trim().is_empty()),
        })
    }
}

/// Read the function key at invocation time. Unset yields `None`.
pub fn function_key() -> Option<String> {
    env::var(FUNCTION_KEY_VAR).ok()
}

fn required(name: &str) -> Result<String> {
    env::var(name).map_err(|_| Error::Config(format!("{} not set", name)))
}

/// Body of the config function, read at invocation time.
pub fn function_key_response() -> ConfigResponse {
    ConfigResponse {
        function_key: function_key(),
    }
}
