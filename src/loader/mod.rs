//! Concurrent loading of a screen's independent sections
//!
//! A pass marks every section loading, runs all fetches at once on the
//! worker pool and lets each one write only its own [`Section`]. One
//! section failing never keeps another from landing.

pub mod section;

pub use section::{LoadingTracker, Section, SectionState};

use crate::envelope::ResultEnvelope;
use futures::future::{join_all, BoxFuture};
use futures::{FutureExt, Stream, StreamExt};
use std::future::Future;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// How a single section's fetch ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SectionOutcome {
    Succeeded,
    Failed(String),
    /// The operation ended without a terminal result; data and error untouched
    Unchanged,
    /// The pass was cancelled before this section finished
    Cancelled,
}

/// Per-section results of one `load_all` pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadSummary {
    pub succeeded: Vec<&'static str>,
    pub failed: Vec<(&'static str, String)>,
    pub unchanged: Vec<&'static str>,
    pub cancelled: Vec<&'static str>,
}

impl LoadSummary {
    pub fn all_succeeded(&self) -> bool {
        self.failed.is_empty() && self.cancelled.is_empty() && self.unchanged.is_empty()
    }

    pub fn is_cancelled(&self) -> bool {
        !self.cancelled.is_empty()
    }

    /// Error message recorded for `section`, if it failed
    pub fn failure(&self, section: &str) -> Option<&str> {
        self.failed
            .iter()
            .find(|(name, _)| *name == section)
            .map(|(_, message)| message.as_str())
    }

    fn record(&mut self, name: &'static str, outcome: SectionOutcome) {
        match outcome {
            SectionOutcome::Succeeded => self.succeeded.push(name),
            SectionOutcome::Failed(message) => self.failed.push((name, message)),
            SectionOutcome::Unchanged => self.unchanged.push(name),
            SectionOutcome::Cancelled => self.cancelled.push(name),
        }
    }
}

/// Loading-flag control over a section of any data type
trait SectionControl: Send + Sync {
    fn name(&self) -> &'static str;
    fn begin(&self);
    fn settle(&self);
}

impl<T: Send + Sync + 'static> SectionControl for Section<T> {
    fn name(&self) -> &'static str {
        Section::name(self)
    }

    fn begin(&self) {
        Section::begin(self)
    }

    fn settle(&self) {
        Section::settle(self)
    }
}

/// One section to load: where the result goes and how to get it
pub struct NamedFetch {
    section: Box<dyn SectionControl>,
    run: BoxFuture<'static, SectionOutcome>,
}

impl NamedFetch {
    /// Load `section` from a one-shot operation
    pub fn new<T, F>(section: &Section<T>, operation: F) -> Self
    where
        T: Send + Sync + 'static,
        F: Future<Output = ResultEnvelope<T>> + Send + 'static,
    {
        Self::with_hook(section, operation, |_: &T| {})
    }

    /// Like `new`, calling `on_success` with the value before it is stored
    pub fn with_hook<T, F, H>(section: &Section<T>, operation: F, on_success: H) -> Self
    where
        T: Send + Sync + 'static,
        F: Future<Output = ResultEnvelope<T>> + Send + 'static,
        H: FnOnce(&T) + Send + 'static,
    {
        let target = section.clone();
        let run = async move {
            let envelope = operation.await;
            if let ResultEnvelope::Success(value) = &envelope {
                on_success(value);
            }
            finish(&target, envelope)
        }
        .boxed();

        Self {
            section: Box::new(section.clone()),
            run,
        }
    }

    /// Load `section` from a stream of envelopes.
    ///
    /// `Loading` items keep the section loading; the first terminal item
    /// ends it. A stream that ends without one leaves data and error alone.
    pub fn streamed<T, S>(section: &Section<T>, stream: S) -> Self
    where
        T: Send + Sync + 'static,
        S: Stream<Item = ResultEnvelope<T>> + Send + 'static,
    {
        let target = section.clone();
        let run = async move {
            let mut stream = Box::pin(stream);
            while let Some(envelope) = stream.next().await {
                if envelope.is_terminal() {
                    return finish(&target, envelope);
                }
                target.apply(envelope);
            }
            target.settle();
            SectionOutcome::Unchanged
        }
        .boxed();

        Self {
            section: Box::new(section.clone()),
            run,
        }
    }

    pub fn name(&self) -> &'static str {
        self.section.name()
    }
}

fn finish<T>(section: &Section<T>, envelope: ResultEnvelope<T>) -> SectionOutcome {
    match envelope {
        ResultEnvelope::Success(value) => {
            section.apply(ResultEnvelope::Success(value));
            SectionOutcome::Succeeded
        }
        ResultEnvelope::Failure(message) => {
            section.apply(ResultEnvelope::Failure(message.clone()));
            SectionOutcome::Failed(message)
        }
        ResultEnvelope::Loading => {
            section.settle();
            SectionOutcome::Unchanged
        }
    }
}

/// Runs the sections of one screen concurrently
#[derive(Debug, Clone, Default)]
pub struct AggregateLoader {
    screen: String,
}

impl AggregateLoader {
    pub fn new(screen: impl Into<String>) -> Self {
        Self {
            screen: screen.into(),
        }
    }

    /// Run every fetch concurrently and wait until each one has ended.
    ///
    /// Every section is marked loading before any task starts. Once `token`
    /// is cancelled, unfinished sections stop writing data or errors and only
    /// have their loading flag lowered.
    pub async fn load_all(&self, fetches: Vec<NamedFetch>, token: &CancellationToken) -> LoadSummary {
        let mut summary = LoadSummary::default();
        if fetches.is_empty() {
            return summary;
        }

        if token.is_cancelled() {
            // A caller may have raised the flag already
            for fetch in &fetches {
                fetch.section.settle();
                summary.record(fetch.name(), SectionOutcome::Cancelled);
            }
            return summary;
        }

        debug!("{}: loading {} sections", self.screen, fetches.len());
        for fetch in &fetches {
            fetch.section.begin();
        }

        let (sections, tasks): (Vec<_>, Vec<_>) = fetches
            .into_iter()
            .map(|NamedFetch { section, run }| {
                let token = token.clone();
                let task = tokio::spawn(async move {
                    tokio::select! {
                        biased;
                        _ = token.cancelled() => SectionOutcome::Cancelled,
                        outcome = run => outcome,
                    }
                });
                (section, task)
            })
            .unzip();

        for (section, joined) in sections.into_iter().zip(join_all(tasks).await) {
            let outcome = match joined {
                Ok(SectionOutcome::Cancelled) => {
                    section.settle();
                    SectionOutcome::Cancelled
                }
                Ok(outcome) => outcome,
                Err(e) => {
                    section.settle();
                    SectionOutcome::Failed(format!("load task failed: {}", e))
                }
            };

            match &outcome {
                SectionOutcome::Failed(message) => {
                    warn!("{}: section '{}' failed: {}", self.screen, section.name(), message)
                }
                other => debug!("{}: section '{}' {:?}", self.screen, section.name(), other),
            }
            summary.record(section.name(), outcome);
        }

        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::Notify;

    #[tokio::test]
    async fn test_failing_section_does_not_block_others() {
        let tracker = LoadingTracker::new();
        let cafe_info: Section<String> = Section::new("cafe_info", &tracker);
        let sessions: Section<Vec<u32>> = Section::new("sessions", &tracker);

        let summary = AggregateLoader::new("cafe")
            .load_all(
                vec![
                    NamedFetch::new(&cafe_info, async {
                        ResultEnvelope::Success("Test Cafe".to_string())
                    }),
                    NamedFetch::new(&sessions, async { ResultEnvelope::failure("network error") }),
                ],
                &CancellationToken::new(),
            )
            .await;

        assert_eq!(summary.succeeded, vec!["cafe_info"]);
        assert_eq!(summary.failure("sessions"), Some("network error"));

        let info = cafe_info.snapshot();
        assert_eq!(info.data.as_deref(), Some("Test Cafe"));
        assert!(!info.is_loading);
        assert!(info.error.is_none());

        let sessions = sessions.snapshot();
        assert!(sessions.data.is_none());
        assert_eq!(sessions.error.as_deref(), Some("network error"));
        assert!(!sessions.is_loading);

        assert!(!tracker.is_loading());
    }

    #[tokio::test]
    async fn test_empty_pass_changes_nothing() {
        let tracker = LoadingTracker::new();
        let any = tracker.subscribe();

        let summary = AggregateLoader::default()
            .load_all(Vec::new(), &CancellationToken::new())
            .await;

        assert_eq!(summary, LoadSummary::default());
        assert!(!any.has_changed().unwrap());
    }

    #[tokio::test]
    async fn test_any_loading_while_a_section_is_pending() {
        let tracker = LoadingTracker::new();
        let fast: Section<u8> = Section::new("fast", &tracker);
        let slow: Section<u8> = Section::new("slow", &tracker);
        let gate = Arc::new(Notify::new());

        let loader = AggregateLoader::new("test");
        let pass = {
            let fast = fast.clone();
            let slow = slow.clone();
            let gate = gate.clone();
            tokio::spawn(async move {
                loader
                    .load_all(
                        vec![
                            NamedFetch::new(&fast, async { ResultEnvelope::Success(1) }),
                            NamedFetch::new(&slow, async move {
                                gate.notified().await;
                                ResultEnvelope::Success(2)
                            }),
                        ],
                        &CancellationToken::new(),
                    )
                    .await
            })
        };

        let mut fast_rx = fast.subscribe();
        fast_rx.wait_for(|state| state.data.is_some()).await.unwrap();
        assert!(slow.is_loading());
        assert!(tracker.is_loading());
        assert_eq!(tracker.loading_sections(), vec!["slow"]);

        gate.notify_one();
        let summary = pass.await.unwrap();
        assert!(summary.all_succeeded());
        assert!(!tracker.is_loading());
    }

    #[tokio::test]
    async fn test_cancelled_section_writes_nothing() {
        let tracker = LoadingTracker::new();
        let section: Section<u8> = Section::new("seats", &tracker);
        let token = CancellationToken::new();
        let wrote = Arc::new(AtomicBool::new(false));

        let pass = {
            let section = section.clone();
            let token = token.clone();
            let wrote = wrote.clone();
            tokio::spawn(async move {
                AggregateLoader::new("test")
                    .load_all(
                        vec![NamedFetch::with_hook(
                            &section,
                            async {
                                tokio::time::sleep(Duration::from_secs(30)).await;
                                ResultEnvelope::Success(9)
                            },
                            move |_| wrote.store(true, Ordering::SeqCst),
                        )],
                        &token,
                    )
                    .await
            })
        };

        let mut rx = section.subscribe();
        rx.wait_for(|state| state.is_loading).await.unwrap();
        token.cancel();

        let summary = pass.await.unwrap();
        assert_eq!(summary.cancelled, vec!["seats"]);
        assert!(!wrote.load(Ordering::SeqCst));
        assert!(section.data().is_none());
        assert!(!section.is_loading());
    }

    #[tokio::test]
    async fn test_pre_cancelled_token_skips_sections() {
        let tracker = LoadingTracker::new();
        let section: Section<u8> = Section::new("usage", &tracker);
        let token = CancellationToken::new();
        token.cancel();

        let summary = AggregateLoader::default()
            .load_all(
                vec![NamedFetch::new(&section, async { ResultEnvelope::Success(1) })],
                &token,
            )
            .await;

        assert!(summary.is_cancelled());
        assert!(!section.is_loading());
        assert!(section.data().is_none());
    }

    #[tokio::test]
    async fn test_pre_cancelled_pass_lowers_raised_flag() {
        let tracker = LoadingTracker::new();
        let section: Section<u8> = Section::new("seats", &tracker);
        section.begin();
        let token = CancellationToken::new();
        token.cancel();

        let summary = AggregateLoader::default()
            .load_all(
                vec![NamedFetch::new(&section, async { ResultEnvelope::Success(1) })],
                &token,
            )
            .await;

        assert_eq!(summary.cancelled, vec!["seats"]);
        assert!(!section.is_loading());
        assert!(!tracker.is_loading());
        assert!(section.data().is_none());
    }

    #[tokio::test]
    async fn test_streamed_section_stays_loading_until_terminal() {
        let tracker = LoadingTracker::new();
        let section: Section<u8> = Section::new("usage", &tracker);
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let stream = futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        });

        let pass = {
            let section = section.clone();
            tokio::spawn(async move {
                AggregateLoader::default()
                    .load_all(
                        vec![NamedFetch::streamed(&section, stream)],
                        &CancellationToken::new(),
                    )
                    .await
            })
        };

        let mut state = section.subscribe();
        tx.send(ResultEnvelope::Loading).unwrap();
        state.wait_for(|s| s.is_loading).await.unwrap();
        assert!(tracker.is_loading());

        tx.send(ResultEnvelope::Success(42)).unwrap();
        let _ = tx.send(ResultEnvelope::Success(7));
        let summary = pass.await.unwrap();

        assert_eq!(summary.succeeded, vec!["usage"]);
        assert_eq!(section.data(), Some(42));
        assert!(!tracker.is_loading());
    }

    #[tokio::test]
    async fn test_one_shot_loading_result_leaves_state_alone() {
        let tracker = LoadingTracker::new();
        let section: Section<u8> = Section::new("usage", &tracker);

        let summary = AggregateLoader::default()
            .load_all(
                vec![NamedFetch::new(&section, async { ResultEnvelope::Loading })],
                &CancellationToken::new(),
            )
            .await;

        assert_eq!(summary.unchanged, vec!["usage"]);
        let state = section.snapshot();
        assert!(!state.is_loading);
        assert!(state.data.is_none());
        assert!(state.error.is_none());
    }
}
