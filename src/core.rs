use crate::clock::Clock;
use crate::export;
use crate::host::{HostPlayer, PlayerEvent};
use crate::model::AggregateState;
use crate::persist::StatsBackend;
use crate::summary::{self, StatsSummary, SummaryQuery};
use crate::tracker::{ClosedSegment, SessionTracker};
use anyhow::Result;
use std::path::{Path, PathBuf};

/// Interval between periodic saves.
pub const SAVE_INTERVAL_MS: i64 = 30_000;
/// How long to wait after a track-changed or resume signal before asking the
/// host what is playing. Signals inside the window push it out.
pub const SETTLE_DELAY_MS: i64 = 500;
/// First look at the host after start-up.
pub const STARTUP_SETTLE_DELAY_MS: i64 = 1_000;

/// Owns the aggregate and everything that feeds or persists it.
///
/// Every method runs to completion before the next one starts; timers are
/// deadlines that [`StatsCore::tick`] checks against the clock.
pub struct StatsCore<B, H, C> {
    state: AggregateState,
    tracker: SessionTracker,
    backend: B,
    host: H,
    clock: C,
    settle_at: Option<i64>,
    next_save_at: i64,
    /// Set when the stored state could not be read. Saving would replace it.
    writes_suspended: bool,
}

impl<B: StatsBackend, H: HostPlayer, C: Clock> StatsCore<B, H, C> {
    pub fn start(mut backend: B, host: H, clock: C) -> Self {
        let now = clock.now_millis();
        let (state, writes_suspended) = match backend.load(now) {
            Ok(state) => (state, false),
            Err(err) => {
                tracing::error!(
                    backend = backend.name(),
                    error = %format!("{err:#}"),
                    "failed to load stats, tracking in memory only until stats are cleared"
                );
                (AggregateState::new(now), true)
            }
        };
        tracing::info!(
            backend = backend.name(),
            tracks = state.tracks.len(),
            plays = state.metadata.total_track_plays,
            "stats tracking started"
        );

        Self {
            state,
            tracker: SessionTracker::new(),
            backend,
            host,
            clock,
            settle_at: Some(now.saturating_add(STARTUP_SETTLE_DELAY_MS)),
            next_save_at: now.saturating_add(SAVE_INTERVAL_MS),
            writes_suspended,
        }
    }

    pub fn state(&self) -> &AggregateState {
        &self.state
    }

    pub fn tracker(&self) -> &SessionTracker {
        &self.tracker
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    /// Whether saves are held back because the stored state was unreadable.
    pub fn writes_suspended(&self) -> bool {
        self.writes_suspended
    }

    pub fn into_backend(self) -> B {
        self.backend
    }

    pub fn pending_settle(&self) -> Option<i64> {
        self.settle_at
    }

    /// Earliest instant at which [`StatsCore::tick`] has work to do.
    pub fn next_deadline(&self) -> i64 {
        self.settle_at
            .map_or(self.next_save_at, |settle_at| settle_at.min(self.next_save_at))
    }

    pub fn handle(&mut self, event: PlayerEvent) {
        let now = self.clock.now_millis();
        match event {
            PlayerEvent::TrackChanged | PlayerEvent::PlayPause { paused: false } => {
                self.settle_at = Some(now.saturating_add(SETTLE_DELAY_MS));
            }
            PlayerEvent::PlayPause { paused: true } => {
                if let Some(segment) = self.tracker.pause(now) {
                    self.commit(segment, now);
                }
            }
            PlayerEvent::Shutdown => self.shutdown(),
        }
    }

    /// Run any timer that is due.
    pub fn tick(&mut self) {
        let now = self.clock.now_millis();
        if self.settle_at.is_some_and(|settle_at| settle_at <= now) {
            self.settle_at = None;
            self.sync_now_playing();
        }
        if now >= self.next_save_at {
            self.next_save_at = now.saturating_add(SAVE_INTERVAL_MS);
            self.save_now();
        }
    }

    /// Ask the host what is playing and feed the answer to the tracker.
    pub fn sync_now_playing(&mut self) {
        let now = self.clock.now_millis();
        let current = match self.host.now_playing() {
            Ok(current) => current,
            Err(err) => {
                tracing::warn!(error = %format!("{err:#}"), "host player unavailable");
                return;
            }
        };
        if let Some(segment) = self.tracker.observe_now_playing(current, now) {
            self.commit(segment, now);
        }
    }

    /// Close the current segment and flush everything to storage.
    pub fn shutdown(&mut self) {
        let now = self.clock.now_millis();
        self.settle_at = None;
        if let Some(segment) = self.tracker.shutdown(now) {
            self.commit(segment, now);
        }
        self.save_now();
    }

    /// Persist the aggregate. Failures are logged; the in-memory state stays
    /// authoritative and the next periodic save retries.
    pub fn save_now(&mut self) -> bool {
        if self.writes_suspended {
            tracing::warn!(
                backend = self.backend.name(),
                "stored stats were unreadable, not overwriting them"
            );
            return false;
        }
        let now = self.clock.now_millis();
        match self.backend.save(&mut self.state, now) {
            Ok(()) => {
                tracing::debug!(backend = self.backend.name(), "saved stats");
                true
            }
            Err(err) => {
                tracing::error!(
                    backend = self.backend.name(),
                    error = %format!("{err:#}"),
                    "failed to save stats"
                );
                false
            }
        }
    }

    /// Reset every statistic and persist the empty state. The in-memory reset
    /// stands even when the write fails; the next periodic save retries it.
    pub fn clear(&mut self) -> Result<()> {
        let now = self.clock.now_millis();
        self.writes_suspended = false;
        self.backend.clear(&mut self.state, now)
    }

    pub fn export_to_dir(&self, dir: &Path) -> Result<PathBuf> {
        export::export_to_dir(&self.state, dir, self.clock.now_millis())
    }

    pub fn summary(&self, query: &SummaryQuery) -> StatsSummary {
        summary::summarize(&self.state, query)
    }

    fn commit(&mut self, segment: ClosedSegment, now: i64) {
        if self
            .state
            .record_listen(&segment.track, segment.counted_minutes, now)
        {
            tracing::debug!(
                track = %segment.track.id,
                elapsed_ms = segment.elapsed_ms,
                minutes = segment.counted_minutes,
                "recorded listen"
            );
        }
    }
}
