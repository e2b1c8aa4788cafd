//! REST implementation of the repository traits

use super::retry::{RetryConfig, RetryPolicy};
use super::{CafeRepository, ResourceFetcher};
use crate::config::{ApiConfig, ClientConfig};
use crate::envelope::ResultEnvelope;
use crate::error::{SyncError, SyncResult};
use crate::model::{
    CafeDetail, CafeId, CafeUsage, ResourceKey, SeatDraft, SeatRecord, ServerSeatId, SessionInfo,
};
use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use tracing::debug;
use url::Url;

/// Talks JSON over HTTP to the study-cafe service.
///
/// Reads are retried on transient failures; writes are sent once. Every
/// request, body download included, is bounded by the configured timeout.
#[derive(Clone)]
pub struct HttpCafeRepository {
    client: Client,
    base_url: Url,
    timeout: Duration,
    retry: RetryPolicy,
}

impl HttpCafeRepository {
    pub fn new(api: &ApiConfig, retry: RetryConfig) -> SyncResult<Self> {
        let mut base = api.base_url.clone();
        if !base.ends_with('/') {
            base.push('/');
        }
        let base_url = Url::parse(&base)?;

        let client = Client::builder()
            .user_agent(api.user_agent.clone())
            .build()
            .map_err(|e| SyncError::config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url,
            timeout: api.request_timeout(),
            retry: RetryPolicy::new(retry),
        })
    }

    pub fn from_config(config: &ClientConfig) -> SyncResult<Self> {
        Self::new(&config.api, config.retry.clone())
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> SyncResult<Url> {
        Ok(self.base_url.join(path)?)
    }

    /// Absolute URLs are used as-is; anything else is relative to the base URL
    fn resource_url(&self, key: &ResourceKey) -> SyncResult<Url> {
        match Url::parse(key.as_str()) {
            Ok(url) => Ok(url),
            Err(_) => self.endpoint(key.as_str().trim_start_matches('/')),
        }
    }

    /// Send a request and read the whole body, under one timeout
    async fn execute(&self, request: RequestBuilder) -> SyncResult<Vec<u8>> {
        let exchange = async {
            let response = request.send().await?;
            let status = response.status();
            let body = response.bytes().await?;

            if !status.is_success() {
                let text = String::from_utf8_lossy(&body).into_owned();
                return Err(SyncError::status(status.as_u16(), text));
            }
            Ok(body.to_vec())
        };

        tokio::time::timeout(self.timeout, exchange)
            .await
            .map_err(|_| SyncError::timeout(self.timeout))?
    }

    async fn get_bytes(&self, url: Url) -> SyncResult<Vec<u8>> {
        let label = format!("GET {}", url.path());
        self.retry
            .execute_with_retry(&label, || {
                debug!("{}", label);
                self.execute(self.client.get(url.clone()))
            })
            .await
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> SyncResult<T> {
        let body = self.get_bytes(self.endpoint(path)?).await?;
        Ok(serde_json::from_slice(&body)?)
    }

    async fn send_json<B, T>(&self, method: Method, path: &str, body: &B) -> SyncResult<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let url = self.endpoint(path)?;
        debug!("{} {}", method, url.path());
        let body = self
            .execute(self.client.request(method, url).json(body))
            .await?;
        Ok(serde_json::from_slice(&body)?)
    }

    async fn send_empty(&self, method: Method, path: &str) -> SyncResult<()> {
        let url = self.endpoint(path)?;
        debug!("{} {}", method, url.path());
        self.execute(self.client.request(method, url)).await?;
        Ok(())
    }
}

/// Reject seats the server returned without an id
fn require_server_ids(seats: Vec<SeatRecord>) -> SyncResult<Vec<SeatRecord>> {
    if let Some(seat) = seats.iter().find(|seat| seat.id.is_new()) {
        return Err(SyncError::invalid_response(format!(
            "seat '{}' has no server id",
            seat.label
        )));
    }
    Ok(seats)
}

#[async_trait]
impl CafeRepository for HttpCafeRepository {
    async fn cafe_detail(&self, cafe_id: CafeId) -> ResultEnvelope<CafeDetail> {
        self.get_json::<CafeDetail>(&format!("cafes/{}", cafe_id)).await.into()
    }

    async fn cafe_usage(&self, cafe_id: CafeId) -> ResultEnvelope<CafeUsage> {
        self.get_json::<CafeUsage>(&format!("cafes/{}/usage", cafe_id)).await.into()
    }

    async fn seats(&self, cafe_id: CafeId) -> ResultEnvelope<Vec<SeatRecord>> {
        self.get_json(&format!("cafes/{}/seats", cafe_id))
            .await
            .and_then(require_server_ids)
            .into()
    }

    async fn sessions(&self, cafe_id: CafeId) -> ResultEnvelope<Vec<SessionInfo>> {
        self.get_json::<Vec<SessionInfo>>(&format!("cafes/{}/sessions", cafe_id)).await.into()
    }

    async fn create_seats(
        &self,
        cafe_id: CafeId,
        drafts: Vec<SeatDraft>,
    ) -> ResultEnvelope<Vec<SeatRecord>> {
        self.send_json(Method::POST, &format!("cafes/{}/seats/batch", cafe_id), &drafts)
            .await
            .and_then(require_server_ids)
            .into()
    }

    async fn update_seats(
        &self,
        cafe_id: CafeId,
        seats: Vec<SeatRecord>,
    ) -> ResultEnvelope<Vec<SeatRecord>> {
        self.send_json(Method::PUT, &format!("cafes/{}/seats/batch", cafe_id), &seats)
            .await
            .and_then(require_server_ids)
            .into()
    }

    async fn delete_seat(&self, cafe_id: CafeId, seat_id: ServerSeatId) -> ResultEnvelope<()> {
        self.send_empty(Method::DELETE, &format!("cafes/{}/seats/{}", cafe_id, seat_id))
            .await
            .into()
    }
}

#[async_trait]
impl ResourceFetcher for HttpCafeRepository {
    async fn fetch_resource(&self, key: &ResourceKey) -> ResultEnvelope<Vec<u8>> {
        match self.resource_url(key) {
            Ok(url) => self.get_bytes(url).await.into(),
            Err(e) => ResultEnvelope::failure(e),
        }
    }
}
