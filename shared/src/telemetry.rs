//! Fire-and-forget telemetry to Application Insights.
//!
//! Reporting never blocks a request and never fails one: envelopes are posted
//! on a spawned task and delivery errors are only logged.

use std::sync::Arc;

use serde::Serialize;
use serde_json::{json, Map, Value};
use tracing::{error, info, warn};

use crate::{Error, Result};

const DEFAULT_INGESTION_ENDPOINT: &str = "https://dc.services.visualstudio.com";

/// Sink for diagnostic events and exception reports.
pub trait Telemetry: Send + Sync {
    fn track_event(&self, name: &str, properties: Value);

    fn track_exception(&self, error: &Error);
}

/// Parsed `Key=Value;...` connection string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionString {
    pub instrumentation_key: String,
    pub ingestion_endpoint: String,
}

impl ConnectionString {
    pub fn parse(raw: &str) -> Result<Self> {
        let mut instrumentation_key = None;
        let mut ingestion_endpoint = None;

        for pair in raw.split(';').map(str::trim).filter(|p| !p.is_empty()) {
            let Some((key, value)) = pair.split_once('=') else {
                return Err(Error::Config(format!("Malformed connection string segment: {}", pair)));
            };
            match key.trim().to_ascii_lowercase().as_str() {
                "instrumentationkey" => instrumentation_key = Some(value.trim().to_string()),
                "ingestionendpoint" => {
                    ingestion_endpoint = Some(value.trim().trim_end_matches('/').to_string())
                }
                _ => {}
            }
        }

        Ok(Self {
            instrumentation_key: instrumentation_key
                .filter(|k| !k.is_empty())
                .ok_or_else(|| Error::Config("Connection string has no InstrumentationKey".to_string()))?,
            ingestion_endpoint: ingestion_endpoint
                .unwrap_or_else(|| DEFAULT_INGESTION_ENDPOINT.to_string()),
        })
    }

    fn track_url(&self) -> String {
        format!("{}/v2/track", self.ingestion_endpoint)
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Envelope {
    name: &'static str,
    time: String,
    #[serde(rename = "iKey")]
    i_key: String,
    data: EnvelopeData,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct EnvelopeData {
    base_type: &'static str,
    base_data: Value,
}

impl Envelope {
    fn event(ikey: &str, name: &str, properties: &Value) -> Self {
        Self {
            name: "Microsoft.ApplicationInsights.Event",
            time: now(),
            i_key: ikey.to_string(),
            data: EnvelopeData {
                base_type: "EventData",
                base_data: json!({
                    "ver": 2,
                    "name": name,
                    "properties": flatten_properties(properties),
                }),
            },
        }
    }

    fn exception(ikey: &str, error: &Error) -> Self {
        Self {
            name: "Microsoft.ApplicationInsights.Exception",
            time: now(),
            i_key: ikey.to_string(),
            data: EnvelopeData {
                base_type: "ExceptionData",
                base_data: json!({
                    "ver": 2,
                    "exceptions": [{
                        "typeName": error.kind(),
                        "message": error.to_string(),
                        "hasFullStack": false,
                    }],
                }),
            },
        }
    }
}

struct Collector {
    http: reqwest::Client,
    connection: ConnectionString,
}

/// Application Insights client. Disabled clients only log.
#[derive(Clone)]
pub struct AppInsights {
    collector: Option<Arc<Collector>>,
}

impl AppInsights {
    pub fn new(connection: ConnectionString) -> Self {
        Self {
            collector: Some(Arc::new(Collector {
                http: reqwest::Client::new(),
                connection,
            })),
        }
    }

    pub fn disabled() -> Self {
        Self { collector: None }
    }

    /// Build from an optional connection string; a missing or malformed one
    /// disables delivery.
    pub fn from_connection_string(raw: Option<&str>) -> Self {
        match raw.map(ConnectionString::parse) {
            Some(Ok(connection)) => Self::new(connection),
            Some(Err(e)) => {
                warn!("Telemetry disabled: {}", e);
                Self::disabled()
            }
            None => Self::disabled(),
        }
    }

    fn dispatch(&self, build: impl FnOnce(&str) -> Envelope) {
        let Some(collector) = &self.collector else {
            return;
        };
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!("No async runtime; dropping telemetry envelope");
            return;
        };

        let envelope = build(&collector.connection.instrumentation_key);
        let collector = Arc::clone(collector);
        runtime.spawn(async move {
            let result = collector
                .http
                .post(collector.connection.track_url())
                .json(&[envelope])
                .send()
                .await
                .and_then(|response| response.error_for_status());
            if let Err(e) = result {
                warn!("Failed to deliver telemetry: {}", e);
            }
        });
    }
}

impl Telemetry for AppInsights {
    fn track_event(&self, name: &str, properties: Value) {
        info!(event = name, properties = %properties, "Telemetry event");
        self.dispatch(|ikey| Envelope::event(ikey, name, &properties));
    }

    fn track_exception(&self, err: &Error) {
        error!(kind = err.kind(), "Telemetry exception: {}", err);
        self.dispatch(|ikey| Envelope::exception(ikey, err));
    }
}

/// Custom properties must be a string map: strings verbatim, any other value
/// as its JSON text.
fn flatten_properties(properties: &Value) -> Map<String, Value> {
    let text = |value: &Value| match value {
        Value::String(s) => Value::String(s.clone()),
        other => Value::String(other.to_string()),
    };

    match properties {
        Value::Object(map) => map.iter().map(|(k, v)| (k.clone(), text(v))).collect(),
        Value::Null => Map::new(),
        other => Map::from_iter([("value".to_string(), text(other))]),
    }
}

fn now() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}
