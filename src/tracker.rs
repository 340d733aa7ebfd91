use crate::clock::millis_to_minutes;
use crate::model::TrackInfo;

/// Segments shorter than this are not counted.
pub const MIN_COUNTED_LISTEN_MS: i64 = 20_000;

#[derive(Debug, Clone, PartialEq)]
pub struct ActiveTrack {
    pub track: TrackInfo,
    pub segment_started_at: i64,
}

/// A segment that met the threshold and should be handed to the aggregate.
#[derive(Debug, Clone, PartialEq)]
pub struct ClosedSegment {
    pub track: TrackInfo,
    pub elapsed_ms: i64,
    pub counted_minutes: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CloseMode {
    /// The active track is being replaced or stopped.
    Reset,
    /// Keep the active track and restart its origin.
    Continue,
}

#[derive(Debug, Default)]
pub struct SessionTracker {
    active: Option<ActiveTrack>,
}

impl SessionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn active(&self) -> Option<&ActiveTrack> {
        self.active.as_ref()
    }

    pub fn is_tracking(&self) -> bool {
        self.active.is_some()
    }

    /// Handle a settled track-changed or resume signal.
    pub fn observe_now_playing(
        &mut self,
        current: Option<TrackInfo>,
        now: i64,
    ) -> Option<ClosedSegment> {
        let current = current?;

        let switching = self
            .active
            .as_ref()
            .is_some_and(|active| active.track.id != current.id);
        let closed = if switching {
            self.close_segment(now, CloseMode::Reset)
        } else {
            None
        };

        self.active = Some(ActiveTrack {
            track: current,
            segment_started_at: now,
        });
        closed
    }

    pub fn pause(&mut self, now: i64) -> Option<ClosedSegment> {
        self.close_segment(now, CloseMode::Continue)
    }

    pub fn shutdown(&mut self, now: i64) -> Option<ClosedSegment> {
        self.close_segment(now, CloseMode::Continue)
    }

    pub fn stop(&mut self, now: i64) -> Option<ClosedSegment> {
        let closed = self.close_segment(now, CloseMode::Reset);
        self.active = None;
        closed
    }

    fn close_segment(&mut self, now: i64, mode: CloseMode) -> Option<ClosedSegment> {
        let active = self.active.as_mut()?;
        let elapsed_ms = now - active.segment_started_at;

        let Some(counted_minutes) = counted_minutes(elapsed_ms, active.track.duration_ms) else {
            tracing::debug!(
                track = %active.track.id,
                elapsed_ms,
                "discarding short listening segment"
            );
            if mode == CloseMode::Reset {
                self.active = None;
            }
            return None;
        };

        let segment = ClosedSegment {
            track: active.track.clone(),
            elapsed_ms,
            counted_minutes,
        };
        match mode {
            CloseMode::Reset => self.active = None,
            CloseMode::Continue => active.segment_started_at = now,
        }
        Some(segment)
    }
}

/// Minutes credited for a segment, capped at the nominal track length.
///
/// `None` when the segment is below the counting threshold. A zero nominal
/// duration caps the credit at zero minutes.
pub fn counted_minutes(elapsed_ms: i64, nominal_duration_ms: u64) -> Option<f64> {
    if elapsed_ms < MIN_COUNTED_LISTEN_MS {
        return None;
    }
    let cap = i64::try_from(nominal_duration_ms).unwrap_or(i64::MAX);
    Some(millis_to_minutes(elapsed_ms.min(cap)))
}
