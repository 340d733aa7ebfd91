use spinstats::core::{SAVE_INTERVAL_MS, SETTLE_DELAY_MS};
use spinstats::model::{AggregateState, AlbumRef, ArtistRef, MAX_SESSION_LOG, TrackInfo};
use spinstats::persist::DocumentBackend;
use spinstats::replay::{self, ReplayEvent, ReplaySession};
use spinstats::store::MemoryStore;

const T: i64 = 1_710_072_000_000;

fn song(id: &str, duration_ms: u64) -> TrackInfo {
    TrackInfo {
        id: id.to_string(),
        name: format!("Song {id}"),
        artists: vec![
            ArtistRef {
                id: String::from("ar1"),
                name: String::from("First Artist"),
            },
            ArtistRef {
                id: String::from("ar2"),
                name: String::from("Second Artist"),
            },
        ],
        album: Some(AlbumRef {
            id: String::from("al1"),
            name: String::from("Album"),
        }),
        duration_ms,
    }
}

fn changed(at: i64, track: TrackInfo) -> ReplayEvent {
    ReplayEvent::TrackChanged {
        at: Some(at),
        now_playing: Some(track),
    }
}

fn paused(at: i64, paused: bool) -> ReplayEvent {
    ReplayEvent::PlayPause {
        at: Some(at),
        paused,
        now_playing: None,
    }
}

fn session() -> ReplaySession<DocumentBackend<MemoryStore>> {
    ReplaySession::start(DocumentBackend::new(MemoryStore::new()), T)
}

#[test]
fn ninety_seconds_then_pause_counts_one_and_a_half_minutes() {
    let mut session = session();
    let origin = T + SETTLE_DELAY_MS;

    session.apply(&changed(T, song("t1", 180_000)));
    session.apply(&paused(origin + 90_000, true));

    let (core, report) = session.finish();
    let state = core.state();
    let track = &state.tracks["t1"];
    assert_eq!(track.counters.play_count, 1);
    assert!((track.counters.total_minutes - 1.5).abs() < 1e-9);
    assert_eq!(track.duration_ms, 180_000);

    assert_eq!(state.artists["ar1"].counters.play_count, 1);
    assert_eq!(state.artists["ar2"].counters.play_count, 1);
    assert_eq!(state.albums["al1"].counters.play_count, 1);

    let day = &state.daily_stats["2024-03-10"];
    assert_eq!(day.track_count, 1);
    assert!((day.total_minutes - 1.5).abs() < 1e-9);
    assert_eq!(day.unique_artist_ids.len(), 1);

    let entry = state.sessions.back().expect("session entry");
    assert_eq!(entry.primary_artist_name, "First Artist");
    assert_eq!(report.counted_plays, 1);
}

#[test]
fn short_listen_records_nothing() {
    let mut session = session();

    session.apply(&changed(T, song("t1", 180_000)));
    session.apply(&paused(T + SETTLE_DELAY_MS + 10_000, true));

    let (core, report) = session.finish();
    assert!(core.state().tracks.is_empty());
    assert!(core.state().sessions.is_empty());
    assert_eq!(report.counted_plays, 0);
}

#[test]
fn pause_and_resume_count_two_segments() {
    let mut session = session();
    let origin = T + SETTLE_DELAY_MS;

    session.apply(&changed(T, song("t1", 180_000)));
    session.apply(&paused(origin + 60_000, true));
    session.apply(&paused(origin + 120_000, false));
    session.apply(&paused(origin + 120_000 + SETTLE_DELAY_MS + 60_000, true));

    let (core, _report) = session.finish();
    let track = &core.state().tracks["t1"];
    assert_eq!(track.counters.play_count, 2);
    assert!((track.counters.total_minutes - 2.0).abs() < 1e-9);
    assert_eq!(core.state().sessions.len(), 2);
}

#[test]
fn switching_tracks_closes_the_previous_one_capped_at_its_length() {
    let mut session = session();
    let origin = T + SETTLE_DELAY_MS;

    session.apply(&changed(T, song("short", 60_000)));
    session.apply(&changed(origin + 100_000, song("next", 240_000)));
    session.apply(&ReplayEvent::Shutdown {
        at: Some(origin + 100_000 + SETTLE_DELAY_MS + 30_000),
    });

    let (core, _report) = session.finish();
    let state = core.state();
    assert!((state.tracks["short"].counters.total_minutes - 1.0).abs() < 1e-9);
    assert!((state.tracks["next"].counters.total_minutes - 0.5).abs() < 1e-9);
    assert_eq!(state.metadata.total_track_plays, 2);
    assert!((state.metadata.total_playtime_minutes - 1.5).abs() < 1e-9);
}

#[test]
fn stream_without_shutdown_is_flushed_on_finish() {
    let input = format!(
        "# recorded session\n\
         {{\"event\":\"trackChanged\",\"at\":{T},\"nowPlaying\":{{\"id\":\"t1\",\"name\":\"One\",\"durationMs\":600000}}}}\n\
         \n\
         {{\"event\":\"playPause\",\"at\":{},\"paused\":false}}\n",
        T + 2 * SAVE_INTERVAL_MS
    );

    let (core, report) = replay::replay(
        DocumentBackend::new(MemoryStore::new()),
        input.as_bytes(),
    )
    .expect("replay");

    assert_eq!(report.events, 2);
    assert_eq!(report.first_at, T);
    assert_eq!(report.last_at, T + 2 * SAVE_INTERVAL_MS);
    assert_eq!(core.state().tracks["t1"].counters.play_count, 1);
}

#[test]
fn malformed_line_fails_the_replay() {
    let input = "{\"event\":\"trackChanged\"}\nnot json\n";
    let err = replay::replay(DocumentBackend::new(MemoryStore::new()), input.as_bytes())
        .err()
        .expect("malformed input");
    assert!(format!("{err:#}").contains("line 2"));
}

#[test]
fn session_log_keeps_only_the_newest_entries() {
    let mut state = AggregateState::new(T);
    for index in 0..(MAX_SESSION_LOG + 5) {
        let at = T + i64::try_from(index).expect("index") * 30_000;
        assert!(state.record_listen(&song(&format!("t{index}"), 60_000), 0.5, at));
    }

    let sessions = &state.sessions;
    assert_eq!(sessions.len(), MAX_SESSION_LOG);
    assert_eq!(
        sessions.front().map(|entry| entry.track_id.as_str()),
        Some("t5")
    );
    let newest = format!("t{}", MAX_SESSION_LOG + 4);
    assert_eq!(
        sessions.back().map(|entry| entry.track_id.as_str()),
        Some(newest.as_str())
    );
    assert_eq!(state.metadata.total_track_plays, (MAX_SESSION_LOG + 5) as u64);
}
