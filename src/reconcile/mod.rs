//! Saving an edited seat layout
//!
//! Writes run in a fixed order: every delete on its own, a settle barrier,
//! the update batch, then the create batch. A failed delete is recorded and
//! skipped; a failed batch stops the run. After any run that got through its
//! batches the seat section is re-read from the server.

pub mod plan;

pub use plan::ReconciliationPlan;

use crate::envelope::ResultEnvelope;
use crate::loader::{AggregateLoader, NamedFetch, Section};
use crate::model::{CafeId, SeatDraft, SeatRecord, ServerSeatId};
use crate::repository::DynCafeRepository;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// What to wait for between the delete phase and the batches
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettlePolicy {
    /// Pause for a fixed time
    Delay(Duration),
    /// Re-read the seat list until the deleted seats are gone, at most
    /// `max_polls` times
    ConfirmDeletes {
        poll_interval: Duration,
        max_polls: u32,
    },
}

impl Default for SettlePolicy {
    fn default() -> Self {
        SettlePolicy::Delay(Duration::from_millis(500))
    }
}

/// Which batch stopped a run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchFailure {
    Update(String),
    Create(String),
}

/// Everything that happened while executing a plan
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecutionReport {
    pub deleted: Vec<ServerSeatId>,
    pub failed_deletes: Vec<(ServerSeatId, String)>,
    pub updated: Vec<SeatRecord>,
    pub created: Vec<SeatRecord>,
    pub failure: Option<BatchFailure>,
    pub cancelled: bool,
}

impl ExecutionReport {
    /// Batches went through; some deletes may still have failed
    pub fn completed(&self) -> bool {
        self.failure.is_none() && !self.cancelled
    }
}

/// Result of saving a layout, as reported to the user
#[derive(Debug, Clone, PartialEq)]
pub enum SaveOutcome {
    NoChanges,
    Saved,
    PartiallySaved { failed_deletes: Vec<ServerSeatId> },
    UpdateFailed(String),
    CreateFailed(String),
    /// There is no confirmed server layout to diff against yet
    NotLoaded,
    Cancelled,
}

impl SaveOutcome {
    pub fn message(&self) -> String {
        match self {
            SaveOutcome::NoChanges => "변경된 내용이 없습니다".to_string(),
            SaveOutcome::Saved => "좌석 정보가 저장되었습니다".to_string(),
            SaveOutcome::PartiallySaved { failed_deletes } => format!(
                "좌석 정보가 일부만 저장되었습니다 (삭제 실패: {}개)",
                failed_deletes.len()
            ),
            SaveOutcome::UpdateFailed(message) => format!("좌석 수정에 실패했습니다: {}", message),
            SaveOutcome::CreateFailed(message) => format!("좌석 추가에 실패했습니다: {}", message),
            SaveOutcome::NotLoaded => "좌석 정보를 먼저 불러와 주세요".to_string(),
            SaveOutcome::Cancelled => "좌석 저장이 취소되었습니다".to_string(),
        }
    }

    /// Whether the server layout may have changed
    pub fn wrote_anything(&self) -> bool {
        matches!(self, SaveOutcome::Saved | SaveOutcome::PartiallySaved { .. })
    }
}

/// Run `future` unless `token` is cancelled first
async fn unless_cancelled<F: Future>(token: &CancellationToken, future: F) -> Option<F::Output> {
    tokio::select! {
        biased;
        _ = token.cancelled() => None,
        output = future => Some(output),
    }
}

/// Executes seat layout plans against the repository
#[derive(Clone)]
pub struct SeatReconciler {
    repository: DynCafeRepository,
    settle: SettlePolicy,
    loader: AggregateLoader,
}

impl SeatReconciler {
    pub fn new(repository: DynCafeRepository, settle: SettlePolicy) -> Self {
        Self {
            repository,
            settle,
            loader: AggregateLoader::new("seat-save"),
        }
    }

    /// Use `loader` for the resync pass
    pub fn with_loader(mut self, loader: AggregateLoader) -> Self {
        self.loader = loader;
        self
    }

    pub fn settle_policy(&self) -> SettlePolicy {
        self.settle
    }

    /// Diff `edited` against the section's confirmed layout, write the
    /// difference and re-read the seat list.
    ///
    /// The section stays loading for the whole sequence. When a batch fails
    /// the section keeps its last confirmed layout and nothing is re-read.
    pub async fn save_seat_config(
        &self,
        cafe_id: CafeId,
        seats: &Section<Vec<SeatRecord>>,
        edited: &[SeatRecord],
        token: &CancellationToken,
    ) -> SaveOutcome {
        if token.is_cancelled() {
            return SaveOutcome::Cancelled;
        }

        let Some(server) = seats.data() else {
            return SaveOutcome::NotLoaded;
        };

        let plan = ReconciliationPlan::compute(&server, edited);
        if plan.is_empty() {
            debug!("Cafe {}: seat layout unchanged", cafe_id);
            return SaveOutcome::NoChanges;
        }

        seats.begin();
        let report = self.execute(cafe_id, plan, token).await;

        if report.cancelled {
            seats.settle();
            return SaveOutcome::Cancelled;
        }

        match report.failure {
            Some(BatchFailure::Update(message)) => {
                seats.settle();
                return SaveOutcome::UpdateFailed(message);
            }
            Some(BatchFailure::Create(message)) => {
                seats.settle();
                return SaveOutcome::CreateFailed(message);
            }
            None => {}
        }

        let repository = self.repository.clone();
        let resync = NamedFetch::new(seats, async move { repository.seats(cafe_id).await });
        let summary = self.loader.load_all(vec![resync], token).await;
        if summary.is_cancelled() {
            seats.settle();
            info!("Cafe {}: seat writes done but the re-read was cancelled", cafe_id);
            return SaveOutcome::Cancelled;
        }
        if let Some(message) = summary.failure(seats.name()) {
            warn!("Cafe {}: seats saved but re-reading them failed: {}", cafe_id, message);
        }

        if report.failed_deletes.is_empty() {
            info!(
                "Cafe {}: seat layout saved ({} deleted, {} updated, {} created)",
                cafe_id,
                report.deleted.len(),
                report.updated.len(),
                report.created.len()
            );
            SaveOutcome::Saved
        } else {
            SaveOutcome::PartiallySaved {
                failed_deletes: report.failed_deletes.into_iter().map(|(id, _)| id).collect(),
            }
        }
    }

    /// Run the phases of `plan` in order
    pub async fn execute(
        &self,
        cafe_id: CafeId,
        plan: ReconciliationPlan,
        token: &CancellationToken,
    ) -> ExecutionReport {
        let (to_delete, to_update, to_create) = plan.into_parts();
        let mut report = ExecutionReport::default();

        for seat_id in &to_delete {
            let Some(outcome) = unless_cancelled(token, self.repository.delete_seat(cafe_id, *seat_id)).await
            else {
                report.cancelled = true;
                return report;
            };

            match outcome {
                ResultEnvelope::Success(()) => report.deleted.push(*seat_id),
                ResultEnvelope::Failure(message) => {
                    warn!("Cafe {}: deleting seat {} failed: {}", cafe_id, seat_id, message);
                    report.failed_deletes.push((*seat_id, message));
                }
                ResultEnvelope::Loading => {
                    warn!("Cafe {}: delete of seat {} was not confirmed", cafe_id, seat_id);
                    report
                        .failed_deletes
                        .push((*seat_id, "delete was not confirmed".to_string()));
                }
            }
        }

        if !to_delete.is_empty() && !self.settle(cafe_id, &report.deleted, token).await {
            report.cancelled = true;
            return report;
        }

        if !to_update.is_empty() {
            let Some(outcome) = unless_cancelled(token, self.repository.update_seats(cafe_id, to_update)).await
            else {
                report.cancelled = true;
                return report;
            };

            match outcome {
                ResultEnvelope::Success(updated) => report.updated = updated,
                other => {
                    let message = batch_error(other);
                    warn!("Cafe {}: seat update batch failed: {}", cafe_id, message);
                    report.failure = Some(BatchFailure::Update(message));
                    return report;
                }
            }
        }

        if !to_create.is_empty() {
            let drafts: Vec<SeatDraft> = to_create.iter().map(SeatRecord::draft).collect();
            let Some(outcome) = unless_cancelled(token, self.repository.create_seats(cafe_id, drafts)).await
            else {
                report.cancelled = true;
                return report;
            };

            match outcome {
                ResultEnvelope::Success(created) => report.created = created,
                other => {
                    let message = batch_error(other);
                    warn!("Cafe {}: seat create batch failed: {}", cafe_id, message);
                    report.failure = Some(BatchFailure::Create(message));
                    return report;
                }
            }
        }

        report
    }

    /// Wait between deletes and batches. Returns `false` if cancelled.
    async fn settle(&self, cafe_id: CafeId, deleted: &[ServerSeatId], token: &CancellationToken) -> bool {
        match self.settle {
            SettlePolicy::Delay(delay) => unless_cancelled(token, tokio::time::sleep(delay)).await.is_some(),
            SettlePolicy::ConfirmDeletes {
                poll_interval,
                max_polls,
            } => {
                if deleted.is_empty() {
                    return true;
                }

                for poll in 1..=max_polls {
                    let Some(listing) = unless_cancelled(token, self.repository.seats(cafe_id)).await else {
                        return false;
                    };

                    if let ResultEnvelope::Success(seats) = listing {
                        let lingering = seats
                            .iter()
                            .filter_map(|seat| seat.id.server_id())
                            .any(|id| deleted.contains(&id));
                        if !lingering {
                            debug!("Cafe {}: deletes confirmed after {} polls", cafe_id, poll);
                            return true;
                        }
                    }

                    if poll < max_polls
                        && unless_cancelled(token, tokio::time::sleep(poll_interval))
                            .await
                            .is_none()
                    {
                        return false;
                    }
                }

                warn!(
                    "Cafe {}: deleted seats still listed after {} polls, continuing",
                    cafe_id, max_polls
                );
                true
            }
        }
    }
}

fn batch_error<T>(outcome: ResultEnvelope<T>) -> String {
    match outcome {
        ResultEnvelope::Failure(message) => message,
        _ => "incomplete response".to_string(),
    }
}
