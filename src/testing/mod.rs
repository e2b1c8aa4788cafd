//! In-memory test doubles for the repository and image traits
//!
//! Used by this crate's own tests and available to downstream crates that
//! drive screens without a server.

use crate::cache::{DecodedImage, ImageDecoder};
use crate::envelope::ResultEnvelope;
use crate::error::{SyncError, SyncResult};
use crate::model::{
    CafeDetail, CafeId, CafeUsage, ResourceKey, SeatDraft, SeatId, SeatRecord, ServerSeatId,
    SessionInfo,
};
use crate::repository::{CafeRepository, ResourceFetcher};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::watch;

/// First id handed out to seats created through the mock
const FIRST_CREATED_ID: ServerSeatId = 1000;

/// Repository operations that can be delayed or made to fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MockOp {
    CafeDetail,
    CafeUsage,
    Seats,
    Sessions,
    CreateSeats,
    UpdateSeats,
    DeleteSeat,
}

/// Record of a call made to the mock repository
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RepoCall {
    CafeDetail,
    CafeUsage,
    Seats,
    Sessions,
    /// Labels of the seats to create
    CreateSeats(Vec<String>),
    /// Ids of the seats to update
    UpdateSeats(Vec<ServerSeatId>),
    DeleteSeat(ServerSeatId),
}

#[derive(Default)]
struct RepoState {
    cafe: Option<CafeDetail>,
    usage: Option<CafeUsage>,
    seats: Vec<SeatRecord>,
    sessions: Vec<SessionInfo>,
    next_id: ServerSeatId,
    calls: Vec<RepoCall>,
    failures: HashMap<MockOp, String>,
    delete_failures: HashMap<ServerSeatId, String>,
    delays: HashMap<MockOp, Duration>,
    /// Seat-list reads a deleted seat stays visible for
    delete_lag: u32,
    lingering: Vec<(SeatRecord, u32)>,
}

/// Stateful stand-in for the REST service.
///
/// Keeps a server-side seat list that creates, updates and deletes really
/// modify, and records every call in order.
pub struct MockCafeRepository {
    state: Mutex<RepoState>,
}

impl MockCafeRepository {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(RepoState {
                next_id: FIRST_CREATED_ID,
                ..RepoState::default()
            }),
        }
    }

    pub fn with_cafe(self, cafe: CafeDetail) -> Self {
        self.lock().cafe = Some(cafe);
        self
    }

    pub fn with_usage(self, usage: CafeUsage) -> Self {
        self.lock().usage = Some(usage);
        self
    }

    pub fn with_seats(self, seats: Vec<SeatRecord>) -> Self {
        self.lock().seats = seats;
        self
    }

    pub fn with_sessions(self, sessions: Vec<SessionInfo>) -> Self {
        self.lock().sessions = sessions;
        self
    }

    /// Make every call of `op` fail with `message` until `recover`
    pub fn fail(&self, op: MockOp, message: impl Into<String>) {
        self.lock().failures.insert(op, message.into());
    }

    pub fn recover(&self, op: MockOp) {
        self.lock().failures.remove(&op);
    }

    /// Make deleting one seat fail
    pub fn fail_delete(&self, seat_id: ServerSeatId, message: impl Into<String>) {
        self.lock().delete_failures.insert(seat_id, message.into());
    }

    /// Keep deleted seats in the seat list for the next `reads` reads
    pub fn lag_deletes(&self, reads: u32) {
        self.lock().delete_lag = reads;
    }

    /// Delay every call of `op`
    pub fn delay(&self, op: MockOp, latency: Duration) {
        self.lock().delays.insert(op, latency);
    }

    /// Calls made so far, oldest first
    pub fn calls(&self) -> Vec<RepoCall> {
        self.lock().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    /// Current server-side seat list, ignoring delete lag
    pub fn server_seats(&self) -> Vec<SeatRecord> {
        self.lock().seats.clone()
    }

    fn lock(&self) -> MutexGuard<'_, RepoState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Log the call, wait out any configured delay and report an injected failure
    async fn enter(&self, op: MockOp, call: RepoCall) -> Option<String> {
        let delay = {
            let mut state = self.lock();
            state.calls.push(call);
            state.delays.get(&op).copied()
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.lock().failures.get(&op).cloned()
    }
}

impl Default for MockCafeRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CafeRepository for MockCafeRepository {
    async fn cafe_detail(&self, cafe_id: CafeId) -> ResultEnvelope<CafeDetail> {
        if let Some(message) = self.enter(MockOp::CafeDetail, RepoCall::CafeDetail).await {
            return ResultEnvelope::Failure(message);
        }
        match self.lock().cafe.clone() {
            Some(cafe) => ResultEnvelope::Success(cafe),
            None => ResultEnvelope::failure(format!("cafe {} not found", cafe_id)),
        }
    }

    async fn cafe_usage(&self, cafe_id: CafeId) -> ResultEnvelope<CafeUsage> {
        if let Some(message) = self.enter(MockOp::CafeUsage, RepoCall::CafeUsage).await {
            return ResultEnvelope::Failure(message);
        }
        match self.lock().usage {
            Some(usage) => ResultEnvelope::Success(usage),
            None => ResultEnvelope::failure(format!("no usage for cafe {}", cafe_id)),
        }
    }

    async fn seats(&self, _cafe_id: CafeId) -> ResultEnvelope<Vec<SeatRecord>> {
        if let Some(message) = self.enter(MockOp::Seats, RepoCall::Seats).await {
            return ResultEnvelope::Failure(message);
        }

        let mut state = self.lock();
        let mut listing = state.seats.clone();
        for (seat, reads_left) in state.lingering.iter_mut() {
            listing.push(seat.clone());
            *reads_left -= 1;
        }
        state.lingering.retain(|(_, reads_left)| *reads_left > 0);
        ResultEnvelope::Success(listing)
    }

    async fn sessions(&self, _cafe_id: CafeId) -> ResultEnvelope<Vec<SessionInfo>> {
        if let Some(message) = self.enter(MockOp::Sessions, RepoCall::Sessions).await {
            return ResultEnvelope::Failure(message);
        }
        ResultEnvelope::Success(self.lock().sessions.clone())
    }

    async fn create_seats(
        &self,
        _cafe_id: CafeId,
        drafts: Vec<SeatDraft>,
    ) -> ResultEnvelope<Vec<SeatRecord>> {
        let labels = drafts.iter().map(|draft| draft.label.clone()).collect();
        if let Some(message) = self.enter(MockOp::CreateSeats, RepoCall::CreateSeats(labels)).await {
            return ResultEnvelope::Failure(message);
        }

        let mut state = self.lock();
        let mut created = Vec::with_capacity(drafts.len());
        for draft in drafts {
            let id = state.next_id;
            state.next_id += 1;
            created.push(SeatRecord::new(SeatId::Existing(id), draft.label, draft.position));
        }
        state.seats.extend(created.iter().cloned());
        ResultEnvelope::Success(created)
    }

    async fn update_seats(
        &self,
        _cafe_id: CafeId,
        seats: Vec<SeatRecord>,
    ) -> ResultEnvelope<Vec<SeatRecord>> {
        let ids = seats.iter().filter_map(|seat| seat.id.server_id()).collect();
        if let Some(message) = self.enter(MockOp::UpdateSeats, RepoCall::UpdateSeats(ids)).await {
            return ResultEnvelope::Failure(message);
        }

        let mut state = self.lock();
        let mut positions = Vec::with_capacity(seats.len());
        for seat in &seats {
            match state.seats.iter().position(|current| current.id == seat.id) {
                Some(index) => positions.push(index),
                None => return ResultEnvelope::failure(format!("seat {} not found", seat.id)),
            }
        }
        for (index, seat) in positions.into_iter().zip(seats.iter()) {
            state.seats[index] = seat.clone();
        }
        ResultEnvelope::Success(seats)
    }

    async fn delete_seat(&self, _cafe_id: CafeId, seat_id: ServerSeatId) -> ResultEnvelope<()> {
        if let Some(message) = self.enter(MockOp::DeleteSeat, RepoCall::DeleteSeat(seat_id)).await {
            return ResultEnvelope::Failure(message);
        }

        let mut state = self.lock();
        if let Some(message) = state.delete_failures.get(&seat_id) {
            return ResultEnvelope::Failure(message.clone());
        }

        let Some(index) = state.seats.iter().position(|seat| seat.id.server_id() == Some(seat_id))
        else {
            return ResultEnvelope::failure(format!("seat {} not found", seat_id));
        };

        let removed = state.seats.remove(index);
        if state.delete_lag > 0 {
            let lag = state.delete_lag;
            state.lingering.push((removed, lag));
        }
        ResultEnvelope::Success(())
    }
}

/// Serves image bytes from memory.
///
/// Unless told otherwise every key resolves to `b"image:<key>"`. `hold`
/// parks every fetch until `release`.
pub struct MockImageSource {
    responses: Mutex<HashMap<ResourceKey, VecDeque<ResultEnvelope<Vec<u8>>>>>,
    fetches: Mutex<HashMap<ResourceKey, usize>>,
    gate: watch::Sender<bool>,
}

impl MockImageSource {
    pub fn new() -> Self {
        let (gate, _) = watch::channel(false);
        Self {
            responses: Mutex::new(HashMap::new()),
            fetches: Mutex::new(HashMap::new()),
            gate,
        }
    }

    /// Queue a one-off response for `key`
    pub fn respond(&self, key: &ResourceKey, response: ResultEnvelope<Vec<u8>>) {
        self.responses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(key.clone())
            .or_default()
            .push_back(response);
    }

    pub fn hold(&self) {
        self.gate.send_replace(true);
    }

    pub fn release(&self) {
        self.gate.send_replace(false);
    }

    /// How many fetches for `key` have started
    pub fn fetch_count(&self, key: &ResourceKey) -> usize {
        self.fetches
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .copied()
            .unwrap_or(0)
    }
}

impl Default for MockImageSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ResourceFetcher for MockImageSource {
    async fn fetch_resource(&self, key: &ResourceKey) -> ResultEnvelope<Vec<u8>> {
        *self
            .fetches
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(key.clone())
            .or_default() += 1;

        let mut gate = self.gate.subscribe();
        if gate.wait_for(|held| !*held).await.is_err() {
            return ResultEnvelope::failure("image source dropped");
        }

        self.responses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get_mut(key)
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(|| ResultEnvelope::Success(format!("image:{}", key).into_bytes()))
    }
}

/// Decoder that turns bytes into a one-row image, one pixel per byte.
///
/// Bytes starting with `corrupt` fail to decode.
#[derive(Debug, Clone, Copy, Default)]
pub struct BytesDecoder;

impl ImageDecoder for BytesDecoder {
    fn decode(&self, bytes: &[u8]) -> SyncResult<DecodedImage> {
        if bytes.starts_with(b"corrupt") {
            return Err(SyncError::decode("corrupt image data"));
        }
        let pixels = bytes.iter().flat_map(|&b| [b, b, b, 255]).collect();
        Ok(DecodedImage::new(bytes.len() as u32, 1, pixels))
    }
}
