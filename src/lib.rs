pub mod cache;
pub mod cli;
pub mod config;
pub mod envelope;
pub mod error;
pub mod loader;
pub mod model;
pub mod reconcile;
pub mod repository;
pub mod screen;
pub mod testing;

pub use cache::ResourceCache;
pub use config::ClientConfig;
pub use envelope::ResultEnvelope;
pub use error::{SyncError, SyncResult};
pub use loader::{AggregateLoader, NamedFetch, Section, SectionState};
pub use reconcile::{ReconciliationPlan, SaveOutcome, SeatReconciler};
pub use screen::{CafeScreen, CafeViewState, SeatLayoutEditor};
