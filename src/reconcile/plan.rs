//! Diffing an edited seat layout against the server's

use crate::model::{SeatId, SeatRecord, ServerSeatId};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use tracing::warn;

/// The writes needed to turn the server layout into the local one.
///
/// Computed once from two snapshots and consumed by a single execution.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReconciliationPlan {
    to_create: Vec<SeatRecord>,
    to_update: Vec<SeatRecord>,
    to_delete: Vec<ServerSeatId>,
    orphaned: Vec<ServerSeatId>,
}

impl ReconciliationPlan {
    /// Classify every seat of both layouts.
    ///
    /// * local seats with a `New` id are created;
    /// * local seats whose server id is in `server` are updated, unless
    ///   label and position are unchanged;
    /// * server seats with no local counterpart are deleted.
    ///
    /// Local seats carrying a server id the server no longer lists are
    /// reported as orphaned and left out of every phase.
    pub fn compute(server: &[SeatRecord], local: &[SeatRecord]) -> Self {
        let server_by_id: HashMap<ServerSeatId, &SeatRecord> = server
            .iter()
            .filter_map(|seat| seat.id.server_id().map(|id| (id, seat)))
            .collect();

        let mut plan = Self::default();
        let mut kept: HashSet<ServerSeatId> = HashSet::new();

        for seat in local {
            match &seat.id {
                SeatId::New(_) => plan.to_create.push(seat.clone()),
                SeatId::Existing(id) => {
                    if !kept.insert(*id) {
                        warn!("Seat {} appears twice in the local layout, keeping the first", id);
                        continue;
                    }
                    match server_by_id.get(id) {
                        Some(current) if current.same_content(seat) => {}
                        Some(_) => plan.to_update.push(seat.clone()),
                        None => plan.orphaned.push(*id),
                    }
                }
            }
        }

        plan.to_delete = server
            .iter()
            .filter_map(|seat| seat.id.server_id())
            .filter(|id| !kept.contains(id))
            .collect();

        if !plan.orphaned.is_empty() {
            warn!(
                "Ignoring {} local seats unknown to the server: {:?}",
                plan.orphaned.len(),
                plan.orphaned
            );
        }

        plan
    }

    pub fn to_create(&self) -> &[SeatRecord] {
        &self.to_create
    }

    pub fn to_update(&self) -> &[SeatRecord] {
        &self.to_update
    }

    pub fn to_delete(&self) -> &[ServerSeatId] {
        &self.to_delete
    }

    /// Local seats whose server id is missing from the server layout
    pub fn orphaned(&self) -> &[ServerSeatId] {
        &self.orphaned
    }

    /// No write is needed
    pub fn is_empty(&self) -> bool {
        self.to_create.is_empty() && self.to_update.is_empty() && self.to_delete.is_empty()
    }

    pub(crate) fn into_parts(self) -> (Vec<ServerSeatId>, Vec<SeatRecord>, Vec<SeatRecord>) {
        (self.to_delete, self.to_update, self.to_create)
    }
}
