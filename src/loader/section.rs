//! Observable per-section state

use crate::envelope::ResultEnvelope;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::watch;

/// State of one independently loadable slice of a screen
#[derive(Debug, Clone, PartialEq)]
pub struct SectionState<T> {
    pub data: Option<T>,
    pub is_loading: bool,
    pub error: Option<String>,
}

impl<T> Default for SectionState<T> {
    fn default() -> Self {
        Self {
            data: None,
            is_loading: false,
            error: None,
        }
    }
}

impl<T> SectionState<T> {
    /// A fetch started. Previous data stays visible until replaced.
    pub fn begin(&mut self) {
        self.is_loading = true;
        self.error = None;
    }

    /// Fold an outcome into the state. Returns `true` if it was terminal.
    pub fn apply(&mut self, envelope: ResultEnvelope<T>) -> bool {
        match envelope {
            ResultEnvelope::Success(value) => {
                self.data = Some(value);
                self.error = None;
                self.is_loading = false;
                true
            }
            ResultEnvelope::Failure(message) => {
                // Stale data survives a failed refetch
                self.error = Some(message);
                self.is_loading = false;
                true
            }
            ResultEnvelope::Loading => {
                self.is_loading = true;
                false
            }
        }
    }

    /// Stop loading without touching data or error
    pub fn settle(&mut self) {
        self.is_loading = false;
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn has_data(&self) -> bool {
        self.data.is_some()
    }
}

/// Tracks which sections of a screen are loading.
///
/// `any` is the OR of every section's `is_loading` flag and is republished
/// only when it flips. Sections are tracked by identity, so two sections
/// sharing a name still count separately.
#[derive(Clone)]
pub struct LoadingTracker {
    inner: Arc<TrackerInner>,
}

struct TrackerInner {
    /// Section id to name, for sections currently loading
    loading: Mutex<BTreeMap<u64, &'static str>>,
    next_id: AtomicU64,
    any: watch::Sender<bool>,
}

impl LoadingTracker {
    pub fn new() -> Self {
        let (any, _) = watch::channel(false);
        Self {
            inner: Arc::new(TrackerInner {
                loading: Mutex::new(BTreeMap::new()),
                next_id: AtomicU64::new(0),
                any,
            }),
        }
    }

    pub fn is_loading(&self) -> bool {
        *self.inner.any.borrow()
    }

    /// Names of the sections currently loading, sorted
    pub fn loading_sections(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self
            .inner
            .loading
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .copied()
            .collect();
        names.sort_unstable();
        names
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.inner.any.subscribe()
    }

    fn register(&self) -> u64 {
        self.inner.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn set(&self, id: u64, name: &'static str, loading: bool) {
        let mut sections = self
            .inner
            .loading
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if loading {
            sections.insert(id, name);
        } else {
            sections.remove(&id);
        }
        let any = !sections.is_empty();
        self.inner.any.send_if_modified(|current| {
            if *current == any {
                false
            } else {
                *current = any;
                true
            }
        });
    }
}

impl Default for LoadingTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Single-writer handle to one section's state.
///
/// Readers subscribe to a `watch` receiver; writes go through the crate's
/// loader and reconciler only.
pub struct Section<T> {
    id: u64,
    name: &'static str,
    state: Arc<watch::Sender<SectionState<T>>>,
    tracker: LoadingTracker,
}

impl<T> Clone for Section<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            name: self.name,
            state: self.state.clone(),
            tracker: self.tracker.clone(),
        }
    }
}

impl<T> Section<T> {
    pub fn new(name: &'static str, tracker: &LoadingTracker) -> Self {
        let (state, _) = watch::channel(SectionState::default());
        Self {
            id: tracker.register(),
            name,
            state: Arc::new(state),
            tracker: tracker.clone(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn subscribe(&self) -> watch::Receiver<SectionState<T>> {
        self.state.subscribe()
    }

    pub fn is_loading(&self) -> bool {
        self.state.borrow().is_loading
    }

    pub fn error(&self) -> Option<String> {
        self.state.borrow().error.clone()
    }

    pub(crate) fn begin(&self) {
        self.state.send_modify(SectionState::begin);
        self.tracker.set(self.id, self.name, true);
    }

    pub(crate) fn apply(&self, envelope: ResultEnvelope<T>) -> bool {
        let mut terminal = false;
        self.state.send_modify(|state| terminal = state.apply(envelope));
        self.tracker.set(self.id, self.name, !terminal);
        terminal
    }

    /// Lower the loading flag; watchers are only notified if it was up
    pub(crate) fn settle(&self) {
        self.state.send_if_modified(|state| {
            let was_loading = state.is_loading;
            state.settle();
            was_loading
        });
        self.tracker.set(self.id, self.name, false);
    }
}

impl<T: Clone> Section<T> {
    pub fn snapshot(&self) -> SectionState<T> {
        self.state.borrow().clone()
    }

    pub fn data(&self) -> Option<T> {
        self.state.borrow().data.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_keeps_stale_data() {
        let mut state = SectionState::default();
        state.begin();
        assert!(state.apply(ResultEnvelope::Success(1)));
        state.begin();
        assert!(state.is_loading);
        assert!(state.apply(ResultEnvelope::failure("network error")));

        assert_eq!(state.data, Some(1));
        assert_eq!(state.error.as_deref(), Some("network error"));
        assert!(!state.is_loading);
    }

    #[test]
    fn test_success_clears_error() {
        let mut state: SectionState<u8> = SectionState::default();
        state.apply(ResultEnvelope::failure("boom"));
        state.begin();
        assert!(state.error.is_none());
        state.apply(ResultEnvelope::Success(3));
        assert_eq!(state, SectionState {
            data: Some(3),
            is_loading: false,
            error: None,
        });
    }

    #[test]
    fn test_loading_envelope_is_not_terminal() {
        let mut state: SectionState<u8> = SectionState::default();
        assert!(!state.apply(ResultEnvelope::Loading));
        assert!(state.is_loading);
        assert!(state.error.is_none());
    }

    #[test]
    fn test_tracker_is_or_of_sections() {
        let tracker = LoadingTracker::new();
        let a: Section<u8> = Section::new("a", &tracker);
        let b: Section<u8> = Section::new("b", &tracker);
        let any = tracker.subscribe();

        a.begin();
        b.begin();
        assert!(tracker.is_loading());
        assert_eq!(tracker.loading_sections(), vec!["a", "b"]);

        a.apply(ResultEnvelope::Success(1));
        assert!(*any.borrow());

        b.apply(ResultEnvelope::failure("x"));
        assert!(!*any.borrow());
        assert!(tracker.loading_sections().is_empty());
    }

    #[test]
    fn test_same_name_sections_do_not_mask_each_other() {
        let tracker = LoadingTracker::new();
        let first: Section<u8> = Section::new("seats", &tracker);
        let second: Section<u8> = Section::new("seats", &tracker);

        first.begin();
        second.begin();
        assert_eq!(tracker.loading_sections(), vec!["seats", "seats"]);

        first.apply(ResultEnvelope::Success(1));
        assert!(tracker.is_loading());
        assert!(second.is_loading());
        assert_eq!(tracker.loading_sections(), vec!["seats"]);

        second.settle();
        assert!(!tracker.is_loading());
    }

    #[test]
    fn test_settle_when_idle_does_not_notify() {
        let tracker = LoadingTracker::new();
        let section: Section<u8> = Section::new("usage", &tracker);
        let rx = section.subscribe();

        section.settle();
        assert!(!rx.has_changed().unwrap());
    }

    #[test]
    fn test_section_snapshot() {
        let tracker = LoadingTracker::new();
        let section: Section<Vec<u8>> = Section::new("seats", &tracker);
        let mut rx = section.subscribe();

        section.begin();
        section.apply(ResultEnvelope::Success(vec![1, 2]));
        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow_and_update().data, Some(vec![1, 2]));
        assert_eq!(section.data(), Some(vec![1, 2]));

        section.begin();
        section.settle();
        let snapshot = section.snapshot();
        assert_eq!(snapshot.data, Some(vec![1, 2]));
        assert!(!snapshot.is_loading);
    }
}
