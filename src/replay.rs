//! Feeding a core from a serial stream of JSON-lines playback signals.
//!
//! ```text
//! {"event":"trackChanged","at":1710072000000,"nowPlaying":{"id":"t1","name":"One","durationMs":180000}}
//! {"event":"playPause","at":1710072090000,"paused":true}
//! {"event":"shutdown","at":1710072100000}
//! ```

use crate::clock::{Clock, ManualClock, now_epoch_millis};
use crate::core::StatsCore;
use crate::host::{PlayerEvent, ScriptedHost};
use crate::model::TrackInfo;
use crate::persist::StatsBackend;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::io::BufRead;

/// Latest accepted signal time, 9999-12-31T23:59:59.999Z.
pub const MAX_SIGNAL_AT: i64 = 253_402_300_799_999;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ReplayEvent {
    TrackChanged {
        #[serde(default)]
        at: Option<i64>,
        #[serde(default)]
        now_playing: Option<TrackInfo>,
    },
    PlayPause {
        #[serde(default)]
        at: Option<i64>,
        paused: bool,
        #[serde(default)]
        now_playing: Option<TrackInfo>,
    },
    Shutdown {
        #[serde(default)]
        at: Option<i64>,
    },
}

impl ReplayEvent {
    pub fn at(&self) -> Option<i64> {
        match self {
            Self::TrackChanged { at, .. } | Self::PlayPause { at, .. } | Self::Shutdown { at } => {
                *at
            }
        }
    }

    pub fn player_event(&self) -> PlayerEvent {
        match self {
            Self::TrackChanged { .. } => PlayerEvent::TrackChanged,
            Self::PlayPause { paused, .. } => PlayerEvent::PlayPause { paused: *paused },
            Self::Shutdown { .. } => PlayerEvent::Shutdown,
        }
    }

    /// A track change always replaces the host's item (absent means nothing
    /// is playing); play/pause only replaces it when one is given.
    pub fn apply_to_host(&self, host: &ScriptedHost) {
        match self {
            Self::TrackChanged { now_playing, .. } => host.set_now_playing(now_playing.clone()),
            Self::PlayPause {
                now_playing: Some(track),
                ..
            } => host.set_now_playing(Some(track.clone())),
            _ => {}
        }
    }
}

/// `None` for blank lines and `#` comments.
pub fn parse_line(line: &str) -> Result<Option<ReplayEvent>> {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return Ok(None);
    }
    let event = serde_json::from_str(trimmed).context("malformed playback signal")?;
    Ok(Some(event))
}

pub fn read_events<R: BufRead>(reader: R) -> Result<Vec<ReplayEvent>> {
    let mut events = Vec::new();
    for (index, line) in reader.lines().enumerate() {
        let line = line.with_context(|| format!("failed to read line {}", index + 1))?;
        if let Some(event) = parse_line(&line).with_context(|| format!("line {}", index + 1))? {
            events.push(event);
        }
    }
    Ok(events)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReplayReport {
    pub events: usize,
    pub counted_plays: u64,
    pub first_at: i64,
    pub last_at: i64,
}

/// A core whose clock only moves as recorded signals arrive.
pub struct ReplaySession<B: StatsBackend> {
    core: StatsCore<B, ScriptedHost, ManualClock>,
    host: ScriptedHost,
    clock: ManualClock,
    report: ReplayReport,
    plays_at_start: u64,
    shut_down: bool,
}

impl<B: StatsBackend> ReplaySession<B> {
    pub fn start(backend: B, start_at: i64) -> Self {
        let host = ScriptedHost::new();
        let clock = ManualClock::new(start_at);
        let core = StatsCore::start(backend, host.clone(), clock.clone());
        let plays_at_start = core.state().metadata.total_track_plays;
        Self {
            core,
            host,
            clock,
            report: ReplayReport {
                first_at: start_at,
                last_at: start_at,
                ..ReplayReport::default()
            },
            plays_at_start,
            shut_down: false,
        }
    }

    pub fn core(&self) -> &StatsCore<B, ScriptedHost, ManualClock> {
        &self.core
    }

    /// Move time forward, running the timers that fall due on the way.
    ///
    /// Once no settle is pending nothing can change until the next signal, so
    /// a gap costs at most one periodic save; an overdue save runs at the
    /// next tick.
    pub fn advance_to(&mut self, at: i64) {
        loop {
            let now = self.clock.now_millis();
            let deadline = self.core.next_deadline();
            if deadline > at {
                break;
            }
            self.clock.set(deadline.max(now));
            self.core.tick();
            if self.core.pending_settle().is_none() {
                break;
            }
        }
        if at > self.clock.now_millis() {
            self.clock.set(at);
        }
    }

    pub fn apply(&mut self, event: &ReplayEvent) {
        let now = self.clock.now_millis();
        let at = match event.at() {
            Some(at) if at < now => {
                tracing::warn!(at, now, "playback signal is older than the previous one");
                now
            }
            Some(at) if at > MAX_SIGNAL_AT => {
                tracing::warn!(at, "playback signal is too far in the future");
                MAX_SIGNAL_AT.max(now)
            }
            Some(at) => at,
            None => now,
        };
        self.advance_to(at);

        event.apply_to_host(&self.host);
        let player_event = event.player_event();
        self.core.handle(player_event);
        self.shut_down = player_event == PlayerEvent::Shutdown;

        self.report.events += 1;
        self.report.last_at = at;
    }

    /// Shut down if the stream did not, and hand back the core.
    pub fn finish(mut self) -> (StatsCore<B, ScriptedHost, ManualClock>, ReplayReport) {
        if !self.shut_down {
            self.core.shutdown();
        }
        self.report.counted_plays = self
            .core
            .state()
            .metadata
            .total_track_plays
            .saturating_sub(self.plays_at_start);
        (self.core, self.report)
    }
}

/// Replay a whole recorded stream against `backend`.
pub fn replay<B: StatsBackend, R: BufRead>(
    backend: B,
    reader: R,
) -> Result<(StatsCore<B, ScriptedHost, ManualClock>, ReplayReport)> {
    let events = read_events(reader)?;
    let start_at = events
        .iter()
        .find_map(ReplayEvent::at)
        .unwrap_or_else(now_epoch_millis)
        .min(MAX_SIGNAL_AT);

    let mut session = ReplaySession::start(backend, start_at);
    for event in &events {
        session.apply(event);
    }
    Ok(session.finish())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persist::DocumentBackend;
    use crate::store::MemoryStore;

    #[test]
    fn parses_each_signal_kind() {
        let changed = parse_line(
            r#"{"event":"trackChanged","at":5,"nowPlaying":{"id":"t","durationMs":1000}}"#,
        )
        .expect("parse")
        .expect("event");
        assert_eq!(changed.at(), Some(5));
        assert_eq!(changed.player_event(), PlayerEvent::TrackChanged);

        let paused = parse_line(r#"{"event":"playPause","paused":true}"#)
            .expect("parse")
            .expect("event");
        assert_eq!(paused.at(), None);
        assert_eq!(paused.player_event(), PlayerEvent::PlayPause { paused: true });

        let shutdown = parse_line(r#"{"event":"shutdown","at":9}"#)
            .expect("parse")
            .expect("event");
        assert_eq!(shutdown.player_event(), PlayerEvent::Shutdown);
    }

    #[test]
    fn skips_blank_and_comment_lines() {
        assert_eq!(parse_line("   ").expect("parse"), None);
        assert_eq!(parse_line("# header").expect("parse"), None);
        assert!(parse_line("{\"event\":\"bogus\"}").is_err());
    }

    #[test]
    fn far_future_signal_is_clamped() {
        let start = 1_710_072_000_000;
        let mut session = ReplaySession::start(DocumentBackend::new(MemoryStore::new()), start);
        session.apply(&ReplayEvent::TrackChanged {
            at: Some(start),
            now_playing: Some(TrackInfo {
                id: String::from("t"),
                name: String::from("T"),
                artists: Vec::new(),
                album: None,
                duration_ms: 180_000,
            }),
        });
        session.apply(&ReplayEvent::PlayPause {
            at: Some(i64::MAX),
            paused: true,
            now_playing: None,
        });

        let (core, report) = session.finish();
        assert_eq!(report.last_at, MAX_SIGNAL_AT);
        let track = &core.state().tracks["t"];
        assert_eq!(track.counters.play_count, 1);
        assert!((track.counters.total_minutes - 3.0).abs() < 1e-9);
    }

    #[test]
    fn track_change_without_item_clears_host() {
        use crate::host::HostPlayer;

        let host = ScriptedHost::new();
        host.set_now_playing(Some(TrackInfo {
            id: String::from("t"),
            name: String::new(),
            artists: Vec::new(),
            album: None,
            duration_ms: 0,
        }));

        let pause = parse_line(r#"{"event":"playPause","paused":false}"#)
            .expect("parse")
            .expect("event");
        pause.apply_to_host(&host);
        assert!(host.now_playing().expect("host").is_some());

        let changed = parse_line(r#"{"event":"trackChanged"}"#)
            .expect("parse")
            .expect("event");
        changed.apply_to_host(&host);
        assert!(host.now_playing().expect("host").is_none());
    }
}
