//! Test doubles for the document database and the telemetry sink.

use std::collections::HashSet;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use uuid::Uuid;

use crate::store::{DocumentStore, SqlQuerySpec};
use crate::telemetry::Telemetry;
use crate::{Error, Result};

#[derive(Default)]
struct StoreState {
    databases: HashSet<String>,
    containers: HashSet<(String, String)>,
    items: Vec<Value>,
    database_creates: usize,
    container_creates: usize,
    item_creates: usize,
    queries: usize,
    fail_next_database_create: bool,
    fail_creates: bool,
    fail_queries: bool,
}

/// In-memory document store.
///
/// Queries are answered as the bookings-by-user query would be: rows whose
/// `user.id` equals `@userId`, projected to flat columns.
#[derive(Default)]
pub struct InMemoryStore {
    state: Mutex<StoreState>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, item: Value) {
        self.state.lock().unwrap().items.push(item);
    }

    pub fn items(&self) -> Vec<Value> {
        self.state.lock().unwrap().items.clone()
    }

    pub fn database_creates(&self) -> usize {
        self.state.lock().unwrap().database_creates
    }

    pub fn container_creates(&self) -> usize {
        self.state.lock().unwrap().container_creates
    }

    pub fn item_creates(&self) -> usize {
        self.state.lock().unwrap().item_creates
    }

    pub fn queries(&self) -> usize {
        self.state.lock().unwrap().queries
    }

    pub fn fail_next_database_create(&self) {
        self.state.lock().unwrap().fail_next_database_create = true;
    }

    pub fn fail_creates(&self) {
        self.state.lock().unwrap().fail_creates = true;
    }

    pub fn fail_queries(&self) {
        self.state.lock().unwrap().fail_queries = true;
    }
}

fn unavailable() -> Error {
    Error::Store {
        status: 503,
        message: "Service Unavailable".to_string(),
    }
}

#[async_trait]
impl DocumentStore for InMemoryStore {
    async fn create_database_if_not_exists(&self, database_id: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.database_creates += 1;
        if std::mem::take(&mut state.fail_next_database_create) {
            return Err(unavailable());
        }
        state.databases.insert(database_id.to_string());
        Ok(())
    }

    async fn create_container_if_not_exists(&self, database_id: &str, container_id: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.container_creates += 1;
        state
            .containers
            .insert((database_id.to_string(), container_id.to_string()));
        Ok(())
    }

    async fn create_item(&self, _database_id: &str, _container_id: &str, mut item: Value) -> Result<Value> {
        let mut state = self.state.lock().unwrap();
        state.item_creates += 1;
        if state.fail_creates {
            return Err(unavailable());
        }
        if item.get("id").is_none() {
            item["id"] = json!(Uuid::new_v4().to_string());
        }
        state.items.push(item.clone());
        Ok(item)
    }

    async fn query_items(
        &self,
        _database_id: &str,
        _container_id: &str,
        query: &SqlQuerySpec,
    ) -> Result<Vec<Value>> {
        let mut state = self.state.lock().unwrap();
        state.queries += 1;
        if state.fail_queries {
            return Err(unavailable());
        }

        let user_id = query
            .parameters
            .iter()
            .find(|p| p.name == "@userId")
            .map(|p| p.value.clone())
            .unwrap_or(Value::Null);
        let rows = state
            .items
            .iter()
            .filter(|item| item.pointer("/user/id") == Some(&user_id))
            .map(|item| {
                let mut row = Map::new();
                for (column, pointer) in [
                    ("bookingId", "/id"),
                    ("tourType", "/tourType"),
                    ("userId", "/user/id"),
                    ("name", "/user/name"),
                    ("email", "/user/email"),
                ] {
                    if let Some(value) = item.pointer(pointer) {
                        row.insert(column.to_string(), value.clone());
                    }
                }
                Value::Object(row)
            })
            .collect();

        Ok(rows)
    }
}

/// Telemetry sink recording every call.
#[derive(Default)]
pub struct RecordingTelemetry {
    events: Mutex<Vec<(String, Value)>>,
    exceptions: Mutex<Vec<String>>,
}

impl RecordingTelemetry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<(String, Value)> {
        self.events.lock().unwrap().clone()
    }

    pub fn event_names(&self) -> Vec<String> {
        self.events().into_iter().map(|(name, _)| name).collect()
    }

    pub fn exceptions(&self) -> Vec<String> {
        self.exceptions.lock().unwrap().clone()
    }
}

impl Telemetry for RecordingTelemetry {
    fn track_event(&self, name: &str, properties: Value) {
        self.events.lock().unwrap().push((name.to_string(), properties));
    }

    fn track_exception(&self, error: &Error) {
        self.exceptions.lock().unwrap().push(error.to_string());
    }
}
