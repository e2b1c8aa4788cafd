//! Boundary to the remote REST service
//!
//! Everything in the sync layer talks to the server through these traits.
//! Every call resolves to a [`ResultEnvelope`]; transport errors never cross
//! this boundary as `Err` values.

pub mod http;
pub mod retry;

pub use http::HttpCafeRepository;
pub use retry::{RetryConfig, RetryPolicy};

use crate::envelope::ResultEnvelope;
use crate::model::{
    CafeDetail, CafeId, CafeUsage, ResourceKey, SeatDraft, SeatRecord, ServerSeatId, SessionInfo,
};
use async_trait::async_trait;
use std::sync::Arc;

/// Source of raw bytes for remotely addressable resources
#[async_trait]
pub trait ResourceFetcher: Send + Sync {
    async fn fetch_resource(&self, key: &ResourceKey) -> ResultEnvelope<Vec<u8>>;
}

/// Cafe, seat and session operations of the REST service
#[async_trait]
pub trait CafeRepository: Send + Sync {
    async fn cafe_detail(&self, cafe_id: CafeId) -> ResultEnvelope<CafeDetail>;

    async fn cafe_usage(&self, cafe_id: CafeId) -> ResultEnvelope<CafeUsage>;

    /// Authoritative seat layout; every record carries a server id
    async fn seats(&self, cafe_id: CafeId) -> ResultEnvelope<Vec<SeatRecord>>;

    async fn sessions(&self, cafe_id: CafeId) -> ResultEnvelope<Vec<SessionInfo>>;

    /// Create several seats in one request
    async fn create_seats(
        &self,
        cafe_id: CafeId,
        drafts: Vec<SeatDraft>,
    ) -> ResultEnvelope<Vec<SeatRecord>>;

    /// Update several existing seats in one request
    async fn update_seats(
        &self,
        cafe_id: CafeId,
        seats: Vec<SeatRecord>,
    ) -> ResultEnvelope<Vec<SeatRecord>>;

    async fn delete_seat(&self, cafe_id: CafeId, seat_id: ServerSeatId) -> ResultEnvelope<()>;
}

pub type DynCafeRepository = Arc<dyn CafeRepository>;
pub type DynResourceFetcher = Arc<dyn ResourceFetcher>;
