//! Document database client boundary
//!
//! The review core talks to the metadata gateway through the
//! `DocumentStore` trait; `DocDbClient` is the HTTP implementation. Tests
//! substitute an in-memory store.

use futures::future::BoxFuture;
use serde_json::json;
use tracing::{debug, info};

use qcv_common::{Document, QualityControl, Result, ReviewConfig};

/// Outcome of an upsert write
///
/// A non-success response is data, not a transport error: the caller maps
/// it to a submit failure and keeps the ledger for retry.
#[derive(Debug, Clone)]
pub struct UpsertResponse {
    pub success: bool,
    pub status: Option<u16>,
    pub message: Option<String>,
}

impl UpsertResponse {
    pub fn ok() -> Self {
        UpsertResponse {
            success: true,
            status: Some(200),
            message: None,
        }
    }
}

/// Backing-store boundary for QC documents
pub trait DocumentStore: Send + Sync {
    /// Fetch a reviewable document by its record id
    fn fetch_by_id<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<Option<Document>>>;

    /// Fetch a reviewable document by its asset name
    fn fetch_by_name<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<Option<Document>>>;

    /// Upsert the QC aggregate for one record id; exactly one write per call
    fn upsert_quality_control<'a>(
        &'a self,
        id: &'a str,
        qc: &'a QualityControl,
    ) -> BoxFuture<'a, Result<UpsertResponse>>;
}

/// HTTP client for the metadata gateway
pub struct DocDbClient {
    http: reqwest::Client,
    base: String,
}

impl DocDbClient {
    pub fn new(config: &ReviewConfig) -> Self {
        DocDbClient {
            http: reqwest::Client::new(),
            base: format!(
                "https://{}/v1/{}/{}",
                config.api_host, config.database, config.collection
            ),
        }
    }

    /// Fields the review core needs; everything else stays server-side
    fn projection() -> serde_json::Value {
        json!({
            "_id": 1,
            "quality_control": 1,
            "name": 1,
            "location": 1,
            "data_description.project_name": 1,
        })
    }

    async fn retrieve_one(&self, filter: serde_json::Value) -> Result<Option<Document>> {
        debug!("retrieving record with filter {}", filter);
        let response = self
            .http
            .post(format!("{}/retrieve_docdb_records", self.base))
            .json(&json!({
                "filter_query": filter,
                "projection": Self::projection(),
                "limit": 1,
            }))
            .send()
            .await?
            .error_for_status()?;

        let records: Vec<serde_json::Value> = response.json().await?;
        match records.first() {
            Some(record) => Document::from_record(record).map(Some),
            None => Ok(None),
        }
    }
}

impl DocumentStore for DocDbClient {
    fn fetch_by_id<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<Option<Document>>> {
        Box::pin(self.retrieve_one(json!({ "_id": id })))
    }

    fn fetch_by_name<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<Option<Document>>> {
        Box::pin(self.retrieve_one(json!({ "name": name })))
    }

    fn upsert_quality_control<'a>(
        &'a self,
        id: &'a str,
        qc: &'a QualityControl,
    ) -> BoxFuture<'a, Result<UpsertResponse>> {
        Box::pin(async move {
            info!("upserting quality_control for {}", id);
            let response = self
                .http
                .post(format!("{}/upsert_one_docdb_record", self.base))
                .json(&json!({
                    "record": {
                        "_id": id,
                        "quality_control": qc,
                    }
                }))
                .send()
                .await?;

            let status = response.status();
            if status.is_success() {
                Ok(UpsertResponse::ok())
            } else {
                let message = response.text().await.unwrap_or_default();
                Ok(UpsertResponse {
                    success: false,
                    status: Some(status.as_u16()),
                    message: Some(message),
                })
            }
        })
    }
}
