#![no_main]

use libfuzzer_sys::fuzz_target;
use spinstats::model::{AggregateState, ArtistRef, MAX_SESSION_LOG, TrackInfo};
use spinstats::tracker::{MIN_COUNTED_LISTEN_MS, SessionTracker};

fuzz_target!(|data: &[u8]| {
    let mut tracker = SessionTracker::new();
    let mut state = AggregateState::new(0);
    let mut now: i64 = 0;

    for chunk in data.chunks(2) {
        let op = chunk[0];
        let arg = chunk.get(1).copied().unwrap_or(0);
        now += i64::from(arg) * 1_000;

        let closed = match op % 5 {
            0 | 1 => {
                let id = format!("t{}", op % 7);
                tracker.observe_now_playing(
                    Some(TrackInfo {
                        id: id.clone(),
                        name: id,
                        artists: vec![ArtistRef {
                            id: format!("a{}", op % 3),
                            name: String::new(),
                        }],
                        album: None,
                        duration_ms: u64::from(op) * 2_000,
                    }),
                    now,
                )
            }
            2 => tracker.observe_now_playing(None, now),
            3 => tracker.pause(now),
            _ => tracker.stop(now),
        };

        if let Some(segment) = closed {
            assert!(segment.elapsed_ms >= MIN_COUNTED_LISTEN_MS);
            let cap = segment.track.duration_ms as f64 / 60_000.0;
            assert!(segment.counted_minutes >= 0.0 && segment.counted_minutes <= cap);
            state.record_listen(&segment.track, segment.counted_minutes, now);
        }
    }

    let plays: u64 = state.tracks.values().map(|t| t.counters.play_count).sum();
    assert_eq!(plays, state.metadata.total_track_plays);
    assert!(state.sessions.len() <= MAX_SESSION_LOG);
    for record in state.tracks.values() {
        assert!(record.counters.first_played_at <= record.counters.last_played_at);
    }
});
