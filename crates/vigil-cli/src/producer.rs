//! Aggregation producer backed by an HTTP aggregation service.
//!
//! The service pages its results; every page becomes one chunk of the build:
//!
//! ```text
//! GET {base}/aggregations/{cache}?entityType=heat_map_cache&unit=2025-07&page=0
//! -> { "rows": [...], "nextPage": 1 }
//! ```

use async_trait::async_trait;
use futures::stream;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;
use vigil_core::ports::{AggregationProducer, ChunkStream};
use vigil_core::{AggregateRow, EntityType, Error, Result, UnitSpec};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AggregatePage {
    #[serde(default)]
    rows: Vec<AggregateRow>,
    next_page: Option<u32>,
}

pub struct HttpAggregationProducer {
    client: Client,
    base_url: String,
}

impl HttpAggregationProducer {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Network(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

async fn fetch_page(
    client: &Client,
    url: &str,
    entity_type: EntityType,
    unit: &str,
    page: u32,
) -> Result<AggregatePage> {
    let response = client
        .get(url)
        .query(&[
            ("entityType", entity_type.as_str().to_string()),
            ("unit", unit.to_string()),
            ("page", page.to_string()),
        ])
        .send()
        .await
        .map_err(|e| Error::Network(e.to_string()))?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(Error::ProducerFailure(format!(
            "aggregation service returned {} for unit {}: {}",
            status, unit, body
        )));
    }

    response
        .json::<AggregatePage>()
        .await
        .map_err(|e| Error::Serialization(e.to_string()))
}

#[async_trait]
impl AggregationProducer for HttpAggregationProducer {
    async fn produce(
        &self,
        cache_name: &str,
        entity_type: EntityType,
        unit: UnitSpec,
    ) -> Result<ChunkStream> {
        let client = self.client.clone();
        let url = format!("{}/aggregations/{}", self.base_url, cache_name);
        let unit = unit.key();
        debug!(cache = %cache_name, unit = %unit, "Requesting aggregation");

        let pages = stream::try_unfold(Some(0u32), move |page| {
            let client = client.clone();
            let url = url.clone();
            let unit = unit.clone();
            async move {
                let Some(page) = page else {
                    return Ok(None);
                };
                let fetched = fetch_page(&client, &url, entity_type, &unit, page).await?;
                Ok(Some((fetched.rows, fetched.next_page)))
            }
        });

        Ok(Box::pin(pages))
    }
}
