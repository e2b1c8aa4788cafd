//! Domain records exchanged with the repository

pub mod cafe;
pub mod seat;

pub use cafe::{CafeDetail, CafeId, CafeUsage, ResourceKey, SessionInfo};
pub use seat::{LocalSeatKey, Rect, SeatDraft, SeatId, SeatRecord, ServerSeatId};
