//! REST client for the managed document database (Azure Cosmos DB SQL API).

use std::collections::HashMap;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use hmac::{Hmac, Mac};
use reqwest::{Method, StatusCode};
use serde::Deserialize;
use serde_json::json;
use sha2::Sha256;
use tokio::sync::RwLock;
use tracing::{debug, warn};
use uuid::Uuid;

use super::{DocumentStore, SqlQuerySpec};
use crate::{Error, Result};

type HmacSha256 = Hmac<Sha256>;

const API_VERSION: &str = "2018-12-31";
const PARTITION_KEY_PATH: &str = "/id";
const CONTINUATION_HEADER: &str = "x-ms-continuation";

/// One page of query results.
#[derive(Debug, Deserialize)]
struct QueryPage {
    #[serde(rename = "Documents", default)]
    documents: Vec<serde_json::Value>,
}

/// Container metadata; only the partition key definition is needed.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ContainerProperties {
    #[serde(default)]
    partition_key: Option<PartitionKeyDefinition>,
}

#[derive(Debug, Deserialize)]
struct PartitionKeyDefinition {
    #[serde(default)]
    paths: Vec<String>,
}

/// Document database client authenticated with the account master key.
pub struct CosmosClient {
    http: reqwest::Client,
    endpoint: String,
    key: Vec<u8>,
    /// Partition key path per container link, learned on creation or read
    /// from the existing container.
    partition_keys: RwLock<HashMap<String, String>>,
}

impl CosmosClient {
    /// Create a client for `endpoint` using the base64 master `key`.
    pub fn new(endpoint: &str, key: &str) -> Result<Self> {
        let key = STANDARD
            .decode(key.trim())
            .map_err(|e| Error::Config(format!("Invalid document database key: {}", e)))?;

        Ok(Self {
            http: reqwest::Client::new(),
            endpoint: endpoint.trim_end_matches('/').to_string(),
            key,
            partition_keys: RwLock::new(HashMap::new()),
        })
    }

    /// Build a signed request against the feed of `resource_type` under
    /// `resource_link`.
    fn request(
        &self,
        method: Method,
        resource_type: &str,
        resource_link: &str,
    ) -> Result<reqwest::RequestBuilder> {
        let path = resource_path(resource_type, resource_link);
        self.signed(method, resource_type, resource_link, &path)
    }

    /// Build a signed request against the resource at `resource_link` itself.
    fn read(&self, resource_type: &str, resource_link: &str) -> Result<reqwest::RequestBuilder> {
        let path = encode_link(resource_link).join("/");
        self.signed(Method::GET, resource_type, resource_link, &path)
    }

    fn signed(
        &self,
        method: Method,
        resource_type: &str,
        resource_link: &str,
        path: &str,
    ) -> Result<reqwest::RequestBuilder> {
        let date = rfc1123_now();
        let token = authorization_token(&self.key, method.as_str(), resource_type, resource_link, &date)?;
        let url = format!("{}/{}", self.endpoint, path);

        Ok(self
            .http
            .request(method, url)
            .header("authorization", token)
            .header("x-ms-date", date)
            .header("x-ms-version", API_VERSION))
    }

    /// POST a create request, treating 409 Conflict as "already exists".
    ///
    /// Returns `true` when the resource was created by this call.
    async fn create_if_not_exists(
        &self,
        resource_type: &str,
        resource_link: &str,
        body: serde_json::Value,
    ) -> Result<bool> {
        let response = self
            .request(Method::POST, resource_type, resource_link)?
            .json(&body)
            .send()
            .await?;

        if response.status() == StatusCode::CONFLICT {
            debug!(resource_type, id = %body["id"], "Resource already exists");
            return Ok(false);
        }
        check(response).await?;
        Ok(true)
    }

    /// Partition key path of a container, reading the container on first use
    /// when it was not created by this client.
    async fn partition_key_path(&self, link: &str) -> Result<String> {
        if let Some(path) = self.partition_keys.read().await.get(link) {
            return Ok(path.clone());
        }

        let response = self.read("colls", link)?.send().await?;
        let properties: ContainerProperties = check(response).await?.json().await?;
        let path = properties
            .partition_key
            .and_then(|pk| pk.paths.into_iter().next())
            .unwrap_or_else(|| PARTITION_KEY_PATH.to_string());
        if path != PARTITION_KEY_PATH {
            warn!(container = link, path = %path, "Container uses a non-default partition key");
        }

        self.partition_keys
            .write()
            .await
            .insert(link.to_string(), path.clone());
        Ok(path)
    }
}

#[async_trait]
impl DocumentStore for CosmosClient {
    async fn create_database_if_not_exists(&self, database_id: &str) -> Result<()> {
        self.create_if_not_exists("dbs", "", json!({ "id": database_id }))
            .await?;
        Ok(())
    }

    async fn create_container_if_not_exists(&self, database_id: &str, container_id: &str) -> Result<()> {
        let body = json!({
            "id": container_id,
            "partitionKey": { "paths": [PARTITION_KEY_PATH], "kind": "Hash" },
        });
        let created = self
            .create_if_not_exists("colls", &format!("dbs/{}", database_id), body)
            .await?;
        if created {
            self.partition_keys.write().await.insert(
                format!("dbs/{}/colls/{}", database_id, container_id),
                PARTITION_KEY_PATH.to_string(),
            );
        }
        Ok(())
    }

    async fn create_item(
        &self,
        database_id: &str,
        container_id: &str,
        mut item: serde_json::Value,
    ) -> Result<serde_json::Value> {
        assign_id(&mut item)?;
        let link = format!("dbs/{}/colls/{}", database_id, container_id);
        let partition_key = partition_key_header(&item, &self.partition_key_path(&link).await?)?;

        let response = self
            .request(Method::POST, "docs", &link)?
            .header("x-ms-documentdb-partitionkey", partition_key)
            .json(&item)
            .send()
            .await?;

        Ok(check(response).await?.json().await?)
    }

    async fn query_items(
        &self,
        database_id: &str,
        container_id: &str,
        query: &SqlQuerySpec,
    ) -> Result<Vec<serde_json::Value>> {
        let link = format!("dbs/{}/colls/{}", database_id, container_id);
        let body = serde_json::to_vec(query)?;
        let mut rows = Vec::new();
        let mut continuation: Option<String> = None;

        loop {
            let mut request = self
                .request(Method::POST, "docs", &link)?
                .header("content-type", "application/query+json")
                .header("x-ms-documentdb-isquery", "True")
                .header("x-ms-documentdb-query-enablecrosspartition", "True")
                .body(body.clone());
            if let Some(token) = &continuation {
                request = request.header(CONTINUATION_HEADER, token);
            }

            let response = check(request.send().await?).await?;
            continuation = response
                .headers()
                .get(CONTINUATION_HEADER)
                .and_then(|v| v.to_str().ok())
                .filter(|v| !v.is_empty())
                .map(String::from);

            let page: QueryPage = response.json().await?;
            rows.extend(page.documents);

            if continuation.is_none() {
                break;
            }
        }

        Ok(rows)
    }
}

/// Compute the master-key `authorization` header value.
fn authorization_token(
    key: &[u8],
    verb: &str,
    resource_type: &str,
    resource_link: &str,
    date: &str,
) -> Result<String> {
    let payload = format!(
        "{}\n{}\n{}\n{}\n\n",
        verb.to_lowercase(),
        resource_type.to_lowercase(),
        resource_link,
        date.to_lowercase()
    );

    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|e| Error::Internal(format!("Failed to initialise signer: {}", e)))?;
    mac.update(payload.as_bytes());
    let signature = STANDARD.encode(mac.finalize().into_bytes());

    Ok(urlencoding::encode(&format!("type=master&ver=1.0&sig={}", signature)).into_owned())
}

/// URL path for a feed of `resource_type` under `resource_link`, with every
/// id segment percent-encoded.
fn resource_path(resource_type: &str, resource_link: &str) -> String {
    let mut segments = encode_link(resource_link);
    segments.push(resource_type.to_string());
    segments.join("/")
}

fn encode_link(resource_link: &str) -> Vec<String> {
    resource_link
        .split('/')
        .filter(|segment| !segment.is_empty())
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect()
}

/// `x-ms-documentdb-partitionkey` value for `item` under the partition key
/// `path`. An item without the key goes to the undefined partition (`[{}]`).
fn partition_key_header(item: &serde_json::Value, path: &str) -> Result<String> {
    match item.pointer(path).filter(|v| !v.is_null()) {
        Some(value) => Ok(serde_json::to_string(&[value])?),
        None => Ok("[{}]".to_string()),
    }
}

/// Give the item a fresh UUID `id` unless it already carries one.
fn assign_id(item: &mut serde_json::Value) -> Result<String> {
    let object = item
        .as_object_mut()
        .ok_or_else(|| Error::Internal("Document must be a JSON object".to_string()))?;

    match object.get("id").and_then(|v| v.as_str()) {
        Some(id) => Ok(id.to_string()),
        None => {
            let id = Uuid::new_v4().to_string();
            object.insert("id".to_string(), json!(id));
            Ok(id)
        }
    }
}

fn rfc1123_now() -> String {
    chrono::Utc::now()
        .format("%a, %d %b %Y %H:%M:%S GMT")
        .to_string()
}

async fn check(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let message = response.text().await.unwrap_or_default();
    Err(Error::Store {
        status: status.as_u16(),
        message,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const TEST_KEY: &str = "bmF0b3Vycw==";

    #[test]
    fn test_authorization_token_matches_master_key_scheme() {
        let key = STANDARD.decode("bmF0b3Vycy10ZXN0LW1hc3Rlci1rZXk=").unwrap();
        let token = authorization_token(
            &key,
            "POST",
            "docs",
            "dbs/NWA-DB/colls/Booking Container",
            "Tue, 01 Nov 1994 08:12:31 GMT",
        )
        .unwrap();

        assert_eq!(
            token,
            "type%3Dmaster%26ver%3D1.0%26sig%3DFH0LZHNb1f4yDKFXsn05d7XWQF7LiG3T5PHbwKKgMk4%3D"
        );
    }

    #[test]
    fn test_resource_path_encodes_ids() {
        assert_eq!(resource_path("dbs", ""), "dbs");
        assert_eq!(resource_path("colls", "dbs/NWA-DB"), "dbs/NWA-DB/colls");
        assert_eq!(
            resource_path("docs", "dbs/NWA-DB/colls/Booking Container"),
            "dbs/NWA-DB/colls/Booking%20Container/docs"
        );
    }

    #[test]
    fn test_assign_id_keeps_existing_id() {
        let mut item = json!({"id": "b-1", "tourType": "tour1"});
        assert_eq!(assign_id(&mut item).unwrap(), "b-1");

        let mut item = json!({"tourType": "tour1"});
        let id = assign_id(&mut item).unwrap();
        assert!(Uuid::parse_str(&id).is_ok());
        assert_eq!(item["id"], json!(id));

        assert!(assign_id(&mut json!("not an object")).is_err());
    }

    #[test]
    fn test_invalid_key_is_a_config_error() {
        let err = CosmosClient::new("https://account.documents.azure.com:443/", "%%%").err().unwrap();
        assert!(matches!(err, Error::Config(_)));

        let client = CosmosClient::new("https://account.documents.azure.com:443/", "bmF0b3Vycw==").unwrap();
        assert_eq!(client.endpoint, "https://account.documents.azure.com:443");
    }

    #[test]
    fn test_rfc1123_date_shape() {
        let date = rfc1123_now();
        assert!(date.ends_with(" GMT"));
        assert!(chrono::DateTime::parse_from_rfc2822(&date.replace("GMT", "+0000")).is_ok());
    }

    // HTTP tests against a mock account endpoint

    #[tokio::test]
    async fn test_conflict_means_already_exists() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/dbs"))
            .respond_with(ResponseTemplate::new(409).set_body_json(json!({"code": "Conflict"})))
            .expect(1)
            .mount(&mock_server)
            .await;
        Mock::given(method("POST"))
            .and(path("/dbs/db/colls"))
            .respond_with(ResponseTemplate::new(409).set_body_json(json!({"code": "Conflict"})))
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = CosmosClient::new(&mock_server.uri(), TEST_KEY).unwrap();
        client.create_database_if_not_exists("db").await.unwrap();
        client
            .create_container_if_not_exists("db", "bookings")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_query_fetches_every_page() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/dbs/db/colls/bookings/docs"))
            .and(header("x-ms-continuation", "page-2"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"Documents": [{"bookingId": "b-2"}], "_count": 1})),
            )
            .with_priority(1)
            .expect(1)
            .mount(&mock_server)
            .await;
        Mock::given(method("POST"))
            .and(path("/dbs/db/colls/bookings/docs"))
            .and(header("x-ms-documentdb-isquery", "True"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("x-ms-continuation", "page-2")
                    .set_body_json(json!({"Documents": [{"bookingId": "b-1"}], "_count": 1})),
            )
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = CosmosClient::new(&mock_server.uri(), TEST_KEY).unwrap();
        let query = SqlQuerySpec::new("select * from b").with_parameter("@userId", "u-1");
        let rows = client.query_items("db", "bookings", &query).await.unwrap();

        assert_eq!(rows, vec![json!({"bookingId": "b-1"}), json!({"bookingId": "b-2"})]);
    }

    #[tokio::test]
    async fn test_error_status_becomes_store_error() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/dbs/db/colls/bookings/docs"))
            .respond_with(ResponseTemplate::new(503).set_body_string("Service Unavailable"))
            .mount(&mock_server)
            .await;

        let client = CosmosClient::new(&mock_server.uri(), TEST_KEY).unwrap();
        let err = client
            .query_items("db", "bookings", &SqlQuerySpec::new("select * from b"))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Store { status: 503, ref message } if message == "Service Unavailable"));
    }

    #[tokio::test]
    async fn test_created_container_partitions_on_id() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/dbs/db/colls"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({"id": "bookings"})))
            .mount(&mock_server)
            .await;
        Mock::given(method("POST"))
            .and(path("/dbs/db/colls/bookings/docs"))
            .and(header("x-ms-documentdb-partitionkey", r#"["b-1"]"#))
            .respond_with(
                ResponseTemplate::new(201).set_body_json(json!({"id": "b-1", "tourType": "tour1"})),
            )
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = CosmosClient::new(&mock_server.uri(), TEST_KEY).unwrap();
        client
            .create_container_if_not_exists("db", "bookings")
            .await
            .unwrap();
        let created = client
            .create_item("db", "bookings", json!({"id": "b-1", "tourType": "tour1"}))
            .await
            .unwrap();

        assert_eq!(created["id"], "b-1");
    }

    #[tokio::test]
    async fn test_existing_container_partition_key_is_read_once() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/dbs/db/colls"))
            .respond_with(ResponseTemplate::new(409))
            .mount(&mock_server)
            .await;
        Mock::given(method("GET"))
            .and(path("/dbs/db/colls/bookings"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "bookings",
                "partitionKey": {"paths": ["/user/id"], "kind": "Hash"},
            })))
            .expect(1)
            .mount(&mock_server)
            .await;
        Mock::given(method("POST"))
            .and(path("/dbs/db/colls/bookings/docs"))
            .and(header("x-ms-documentdb-partitionkey", r#"["u-1"]"#))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({"id": "b-1"})))
            .expect(2)
            .mount(&mock_server)
            .await;

        let client = CosmosClient::new(&mock_server.uri(), TEST_KEY).unwrap();
        client
            .create_container_if_not_exists("db", "bookings")
            .await
            .unwrap();
        for _ in 0..2 {
            client
                .create_item("db", "bookings", json!({"tourType": "tour1", "user": {"id": "u-1"}}))
                .await
                .unwrap();
        }
    }

    #[test]
    fn test_partition_key_header_for_missing_value() {
        let item = json!({"id": "b-1", "user": {}});
        assert_eq!(partition_key_header(&item, "/id").unwrap(), r#"["b-1"]"#);
        assert_eq!(partition_key_header(&item, "/user/id").unwrap(), "[{}]");
    }
}
