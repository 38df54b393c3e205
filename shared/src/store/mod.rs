//! Store accessor for the bookings container.
//!
//! The document database is reached through the [`DocumentStore`] seam. The
//! [`StoreAccessor`] resolves the database and container once per process and
//! hands out the cached [`ContainerHandle`] afterwards.

pub mod cosmos;

use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;
use tracing::debug;

use crate::Result;

pub use cosmos::CosmosClient;

/// Named parameter of a parameterized query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SqlParameter {
    pub name: String,
    pub value: serde_json::Value,
}

/// Parameterized query against a container.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SqlQuerySpec {
    pub query: String,
    #[serde(default)]
    pub parameters: Vec<SqlParameter>,
}

impl SqlQuerySpec {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            parameters: Vec::new(),
        }
    }

    pub fn with_parameter(mut self, name: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.parameters.push(SqlParameter {
            name: name.into(),
            value: value.into(),
        });
        self
    }
}

/// Operations the functions need from the document database.
///
/// Both `create_*_if_not_exists` calls must treat an already existing
/// resource as success.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn create_database_if_not_exists(&self, database_id: &str) -> Result<()>;

    async fn create_container_if_not_exists(&self, database_id: &str, container_id: &str) -> Result<()>;

    /// Store a new item and return it as persisted, including its `id`.
    async fn create_item(
        &self,
        database_id: &str,
        container_id: &str,
        item: serde_json::Value,
    ) -> Result<serde_json::Value>;

    /// Run a query and return every matching row.
    async fn query_items(
        &self,
        database_id: &str,
        container_id: &str,
        query: &SqlQuerySpec,
    ) -> Result<Vec<serde_json::Value>>;
}

/// Resolved container, usable for create and query operations.
pub struct ContainerHandle {
    store: Arc<dyn DocumentStore>,
    database_id: String,
    container_id: String,
}

impl ContainerHandle {
    /// Create an item, returning the stored document.
    pub async fn create_item<T: Serialize + Sync>(&self, item: &T) -> Result<serde_json::Value> {
        let item = serde_json::to_value(item)?;
        self.store
            .create_item(&self.database_id, &self.container_id, item)
            .await
    }

    /// Run a query and decode every row.
    pub async fn query_all<T: DeserializeOwned>(&self, query: &SqlQuerySpec) -> Result<Vec<T>> {
        self.store
            .query_items(&self.database_id, &self.container_id, query)
            .await?
            .into_iter()
            .map(|row| serde_json::from_value(row).map_err(Into::into))
            .collect()
    }
}

/// Lazily resolves the bookings container, once per process.
pub struct StoreAccessor {
    store: Arc<dyn DocumentStore>,
    database_id: String,
    container_id: String,
    handle: OnceCell<Arc<ContainerHandle>>,
}

impl StoreAccessor {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        database_id: impl Into<String>,
        container_id: impl Into<String>,
    ) -> Self {
        Self {
            store,
            database_id: database_id.into(),
            container_id: container_id.into(),
            handle: OnceCell::new(),
        }
    }

    /// Return the container handle, creating the database and container on
    /// first use.
    ///
    /// A failed resolution is not cached, so the next invocation tries again.
    pub async fn ensure_container_ready(&self) -> Result<Arc<ContainerHandle>> {
        let handle = self
            .handle
            .get_or_try_init(|| async {
                self.store
                    .create_database_if_not_exists(&self.database_id)
                    .await?;
                debug!(database = %self.database_id, "Database ready");

                self.store
                    .create_container_if_not_exists(&self.database_id, &self.container_id)
                    .await?;
                debug!(container = %self.container_id, "Container ready");

                Ok::<_, crate::Error>(Arc::new(ContainerHandle {
                    store: Arc::clone(&self.store),
                    database_id: self.database_id.clone(),
                    container_id: self.container_id.clone(),
                }))
            })
            .await?;

        Ok(Arc::clone(handle))
    }
}
