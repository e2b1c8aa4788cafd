//! Per-screen view state and view-model for the cafe management screen

pub mod editor;

pub use editor::SeatLayoutEditor;

use crate::cache::{DecodedImage, ResourceCache};
use crate::config::SeatSyncConfig;
use crate::loader::{AggregateLoader, LoadSummary, LoadingTracker, NamedFetch, Section};
use crate::model::{CafeDetail, CafeId, CafeUsage, ResourceKey, SeatRecord, SessionInfo};
use crate::reconcile::{SaveOutcome, SeatReconciler};
use crate::repository::DynCafeRepository;
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

pub const CAFE_INFO: &str = "cafe_info";
pub const USAGE: &str = "usage";
pub const SEATS: &str = "seats";
pub const SESSIONS: &str = "sessions";

/// Everything the cafe screen renders.
///
/// Sections are written only by the loader and the reconciler; the screen
/// reads them through snapshots or `watch` receivers.
#[derive(Clone)]
pub struct CafeViewState {
    pub cafe_info: Section<CafeDetail>,
    pub usage: Section<CafeUsage>,
    pub seats: Section<Vec<SeatRecord>>,
    pub sessions: Section<Vec<SessionInfo>>,
    loading: LoadingTracker,
    images: ResourceCache,
}

impl CafeViewState {
    pub fn new(images: ResourceCache) -> Self {
        let loading = LoadingTracker::new();
        Self {
            cafe_info: Section::new(CAFE_INFO, &loading),
            usage: Section::new(USAGE, &loading),
            seats: Section::new(SEATS, &loading),
            sessions: Section::new(SESSIONS, &loading),
            loading,
            images,
        }
    }

    /// Any section loading
    pub fn is_loading(&self) -> bool {
        self.loading.is_loading()
    }

    pub fn subscribe_loading(&self) -> watch::Receiver<bool> {
        self.loading.subscribe()
    }

    pub fn loading_sections(&self) -> Vec<&'static str> {
        self.loading.loading_sections()
    }

    pub fn images(&self) -> &ResourceCache {
        &self.images
    }

    /// Cafe images in display order, `None` where not fetched yet
    pub fn cafe_images(&self) -> Vec<(ResourceKey, Option<Arc<DecodedImage>>)> {
        self.cafe_info
            .data()
            .map(|cafe| {
                cafe.image_keys
                    .into_iter()
                    .map(|key| {
                        let image = self.images.get(&key);
                        (key, image)
                    })
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// View-model of one attached cafe screen.
///
/// Loads and saves are tied to the screen: once it is detached (or
/// dropped) running passes stop writing. Image fetches are not affected.
///
/// The seat section has one writer at a time: a save holds it from the
/// first delete through the re-read, and seat reloads wait for or skip it.
pub struct CafeScreen {
    cafe_id: CafeId,
    repository: DynCafeRepository,
    state: CafeViewState,
    loader: AggregateLoader,
    reconciler: SeatReconciler,
    token: CancellationToken,
    status: mpsc::UnboundedSender<String>,
    seat_writer: Mutex<()>,
}

impl CafeScreen {
    /// Create the screen and the receiver for its status messages
    pub fn attach(
        cafe_id: CafeId,
        repository: DynCafeRepository,
        images: ResourceCache,
        config: &SeatSyncConfig,
    ) -> (Self, mpsc::UnboundedReceiver<String>) {
        let (status, messages) = mpsc::unbounded_channel();
        let loader = AggregateLoader::new(format!("cafe-{}", cafe_id));
        let reconciler =
            SeatReconciler::new(repository.clone(), config.settle_policy()).with_loader(loader.clone());

        debug!("Attached screen for cafe {}", cafe_id);
        let screen = Self {
            cafe_id,
            repository,
            state: CafeViewState::new(images),
            loader,
            reconciler,
            token: CancellationToken::new(),
            status,
            seat_writer: Mutex::new(()),
        };
        (screen, messages)
    }

    pub fn cafe_id(&self) -> CafeId {
        self.cafe_id
    }

    pub fn state(&self) -> &CafeViewState {
        &self.state
    }

    pub fn is_attached(&self) -> bool {
        !self.token.is_cancelled()
    }

    /// Load every section at once. Cafe images are queued on the image
    /// cache as soon as the cafe detail arrives.
    ///
    /// While a seat save is running the seat section is left to the save,
    /// whose re-read brings it up to date.
    pub async fn refresh(&self) -> LoadSummary {
        let id = self.cafe_id;
        let images = self.state.images.clone();

        let repo = self.repository.clone();
        let cafe_info = NamedFetch::with_hook(
            &self.state.cafe_info,
            async move { repo.cafe_detail(id).await },
            move |cafe: &CafeDetail| {
                let started = images.request_all(cafe.image_keys.iter().cloned());
                debug!("Cafe {}: requested {} images", id, started);
            },
        );

        let repo = self.repository.clone();
        let usage = NamedFetch::new(&self.state.usage, async move { repo.cafe_usage(id).await });

        let repo = self.repository.clone();
        let sessions = NamedFetch::new(&self.state.sessions, async move { repo.sessions(id).await });

        let mut fetches = vec![cafe_info, usage, sessions];
        let writer = self.seat_writer.try_lock();
        match &writer {
            Ok(_) => fetches.push(self.seat_fetch()),
            Err(_) => debug!("Cafe {}: seat save running, not reloading seats", id),
        }

        let summary = self.loader.load_all(fetches, &self.token).await;
        drop(writer);
        self.report_failures(&summary);
        summary
    }

    /// Reload only the seat layout, after any running save
    pub async fn refresh_seats(&self) -> LoadSummary {
        let _writer = self.seat_writer.lock().await;
        let summary = self.loader.load_all(vec![self.seat_fetch()], &self.token).await;
        self.report_failures(&summary);
        summary
    }

    /// Editor seeded with the last confirmed seat layout
    pub fn editor(&self) -> Option<SeatLayoutEditor> {
        self.state.seats.data().map(SeatLayoutEditor::from_snapshot)
    }

    /// Save an edited layout and post the result on the status channel.
    ///
    /// Waits for a seat reload or an earlier save to finish first, so the
    /// diff is taken against the latest confirmed layout.
    pub async fn save_seat_config(&self, edited: &[SeatRecord]) -> SaveOutcome {
        let _writer = self.seat_writer.lock().await;
        let outcome = self
            .reconciler
            .save_seat_config(self.cafe_id, &self.state.seats, edited, &self.token)
            .await;
        info!("Cafe {}: {}", self.cafe_id, outcome.message());
        self.notify(outcome.message());
        outcome
    }

    /// Stop every load and save of this screen
    pub fn detach(&self) {
        if !self.token.is_cancelled() {
            debug!("Detaching screen for cafe {}", self.cafe_id);
            self.token.cancel();
        }
    }

    fn seat_fetch(&self) -> NamedFetch {
        let repo = self.repository.clone();
        let id = self.cafe_id;
        NamedFetch::new(&self.state.seats, async move { repo.seats(id).await })
    }

    fn report_failures(&self, summary: &LoadSummary) {
        for (section, message) in &summary.failed {
            self.notify(format!("{} 정보를 불러오지 못했습니다: {}", section, message));
        }
    }

    fn notify(&self, message: String) {
        // Nobody listening is fine
        let _ = self.status.send(message);
    }
}

impl Drop for CafeScreen {
    fn drop(&mut self) {
        self.token.cancel();
    }
}
