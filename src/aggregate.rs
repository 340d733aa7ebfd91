use crate::clock;
use crate::model::{
    AggregateState, DailyBucket, EntityRecord, MAX_SESSION_LOG, PlayCounters, SessionLogEntry,
    TrackInfo, TrackRecord, UNKNOWN_ARTIST, sanitize_minutes,
};
use std::collections::HashMap;

impl AggregateState {
    /// Apply one counted listening segment to every derived record.
    ///
    /// Returns `false` when the track has no id and nothing was recorded.
    pub fn record_listen(&mut self, track: &TrackInfo, minutes: f64, at: i64) -> bool {
        if track.id.trim().is_empty() {
            tracing::debug!("ignoring listen without a track id");
            return false;
        }
        let minutes = sanitize_minutes(minutes);
        let date = clock::date_key(at);

        let record = self
            .tracks
            .entry(track.id.clone())
            .or_insert_with(|| TrackRecord {
                id: track.id.clone(),
                name: track.name.clone(),
                counters: PlayCounters::starting_at(at),
                duration_ms: 0,
            });
        record.counters.credit(minutes, at);
        record.name.clone_from(&track.name);
        if track.duration_ms > 0 {
            record.duration_ms = track.duration_ms;
        }

        for artist in &track.artists {
            credit_entity(&mut self.artists, &artist.id, &artist.name, minutes, at);
        }
        if let Some(album) = &track.album {
            credit_entity(&mut self.albums, &album.id, &album.name, minutes, at);
        }

        let bucket = self
            .daily_stats
            .entry(date.clone())
            .or_insert_with(|| DailyBucket::new(date.clone()));
        bucket.track_count = bucket.track_count.saturating_add(1);
        bucket.total_minutes += minutes;
        bucket.unique_track_ids.insert(track.id.clone());
        if let Some(artist) = track.primary_artist().filter(|artist| !artist.id.is_empty()) {
            bucket.unique_artist_ids.insert(artist.id.clone());
        }

        self.metadata.total_playtime_minutes += minutes;
        self.metadata.total_track_plays = self.metadata.total_track_plays.saturating_add(1);

        self.sessions.push_back(SessionLogEntry {
            timestamp: at,
            track_id: track.id.clone(),
            track_name: track.name.clone(),
            primary_artist_name: track
                .primary_artist()
                .map(|artist| artist.name.clone())
                .filter(|name| !name.is_empty())
                .unwrap_or_else(|| UNKNOWN_ARTIST.to_string()),
            minutes_listened: minutes,
            date,
        });
        if self.sessions.len() > MAX_SESSION_LOG {
            let drop_count = self.sessions.len() - MAX_SESSION_LOG;
            self.sessions.drain(..drop_count);
        }

        true
    }

    /// Recompute metadata totals from the track records.
    pub fn recount_totals(&mut self) {
        let (plays, minutes) = self
            .tracks
            .values()
            .fold((0_u64, 0.0_f64), |(plays, minutes), record| {
                (
                    plays.saturating_add(record.counters.play_count),
                    minutes + record.counters.total_minutes,
                )
            });
        self.metadata.total_track_plays = plays;
        self.metadata.total_playtime_minutes = minutes;
    }
}

fn credit_entity(
    records: &mut HashMap<String, EntityRecord>,
    id: &str,
    name: &str,
    minutes: f64,
    at: i64,
) {
    if id.is_empty() {
        return;
    }
    let record = records
        .entry(id.to_string())
        .or_insert_with(|| EntityRecord {
            id: id.to_string(),
            name: name.to_string(),
            counters: PlayCounters::starting_at(at),
        });
    record.counters.credit(minutes, at);
    if !name.is_empty() {
        record.name = name.to_string();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AlbumRef, ArtistRef};

    const NOON: i64 = 1_710_072_000_000; // 2024-03-10T12:00:00Z

    fn track(id: &str, artists: &[(&str, &str)], album: Option<(&str, &str)>) -> TrackInfo {
        TrackInfo {
            id: id.to_string(),
            name: format!("Track {id}"),
            artists: artists
                .iter()
                .map(|(id, name)| ArtistRef {
                    id: id.to_string(),
                    name: name.to_string(),
                })
                .collect(),
            album: album.map(|(id, name)| AlbumRef {
                id: id.to_string(),
                name: name.to_string(),
            }),
            duration_ms: 180_000,
        }
    }

    #[test]
    fn first_listen_creates_every_record() {
        let mut state = AggregateState::new(NOON);
        let a = track("a", &[("x", "Artist X")], Some(("m", "Album M")));

        assert!(state.record_listen(&a, 1.5, NOON));

        let record = &state.tracks["a"];
        assert_eq!(record.counters.play_count, 1);
        assert!((record.counters.total_minutes - 1.5).abs() < 1e-9);
        assert_eq!(record.counters.first_played_at, NOON);
        assert_eq!(record.duration_ms, 180_000);
        assert_eq!(state.artists["x"].counters.play_count, 1);
        assert_eq!(state.albums["m"].counters.play_count, 1);
        let bucket = &state.daily_stats["2024-03-10"];
        assert_eq!(bucket.track_count, 1);
        assert_eq!(state.metadata.total_track_plays, 1);
        assert_eq!(state.sessions.len(), 1);
        assert_eq!(state.sessions[0].primary_artist_name, "Artist X");
    }

    #[test]
    fn co_artists_each_receive_full_minutes() {
        let mut state = AggregateState::new(NOON);
        let duet = track("d", &[("x", "X"), ("y", "Y")], None);

        state.record_listen(&duet, 2.0, NOON);

        assert!((state.artists["x"].counters.total_minutes - 2.0).abs() < 1e-9);
        assert!((state.artists["y"].counters.total_minutes - 2.0).abs() < 1e-9);
        assert!(state.albums.is_empty());
        let bucket = &state.daily_stats["2024-03-10"];
        assert_eq!(bucket.unique_artist_ids.len(), 1);
        assert!(bucket.unique_artist_ids.contains("x"));
    }

    #[test]
    fn repeated_listens_do_not_duplicate_daily_sets() {
        let mut state = AggregateState::new(NOON);
        let a = track("a", &[("x", "X")], None);

        for offset in 0..5 {
            state.record_listen(&a, 1.0, NOON + offset * 60_000);
        }

        let bucket = &state.daily_stats["2024-03-10"];
        assert_eq!(bucket.track_count, 5);
        assert_eq!(bucket.unique_track_ids.len(), 1);
        assert_eq!(bucket.unique_artist_ids.len(), 1);
        assert_eq!(state.tracks["a"].counters.last_played_at, NOON + 4 * 60_000);
    }

    #[test]
    fn track_without_artists_logs_unknown() {
        let mut state = AggregateState::new(NOON);
        let bare = track("bare", &[], None);

        state.record_listen(&bare, 0.5, NOON);

        assert!(state.artists.is_empty());
        assert!(state.daily_stats["2024-03-10"].unique_artist_ids.is_empty());
        assert_eq!(state.sessions[0].primary_artist_name, UNKNOWN_ARTIST);
    }

    #[test]
    fn empty_track_id_is_ignored() {
        let mut state = AggregateState::new(NOON);
        let nameless = track("", &[("x", "X")], None);

        assert!(!state.record_listen(&nameless, 1.0, NOON));
        assert!(state.is_empty());
        assert_eq!(state.metadata.total_track_plays, 0);
    }

    #[test]
    fn backwards_clock_keeps_first_before_last() {
        let mut state = AggregateState::new(NOON);
        let a = track("a", &[], None);

        state.record_listen(&a, 1.0, NOON);
        state.record_listen(&a, 1.0, NOON - 3_600_000);

        let counters = state.tracks["a"].counters;
        assert!(counters.first_played_at <= counters.last_played_at);
        assert_eq!(counters.play_count, 2);
    }

    #[test]
    fn non_finite_minutes_count_as_zero() {
        let mut state = AggregateState::new(NOON);
        let a = track("a", &[], None);

        state.record_listen(&a, f64::NAN, NOON);
        state.record_listen(&a, -3.0, NOON);

        assert_eq!(state.tracks["a"].counters.play_count, 2);
        assert_eq!(state.tracks["a"].counters.total_minutes, 0.0);
    }

    #[test]
    fn session_log_keeps_most_recent_thousand() {
        let mut state = AggregateState::new(NOON);
        for index in 0..=MAX_SESSION_LOG {
            let t = track(&format!("t{index}"), &[], None);
            state.record_listen(&t, 1.0, NOON + index as i64);
        }

        assert_eq!(state.sessions.len(), MAX_SESSION_LOG);
        assert_eq!(state.sessions.front().map(|entry| entry.track_id.as_str()), Some("t1"));
        assert_eq!(
            state.sessions.back().map(|entry| entry.track_id.as_str()),
            Some("t1000")
        );
    }

    #[test]
    fn recount_matches_track_records() {
        let mut state = AggregateState::new(NOON);
        state.record_listen(&track("a", &[], None), 1.0, NOON);
        state.record_listen(&track("b", &[], None), 2.0, NOON);
        state.metadata.total_track_plays = 99;

        state.recount_totals();

        assert_eq!(state.metadata.total_track_plays, 2);
        assert!((state.metadata.total_playtime_minutes - 3.0).abs() < 1e-9);
    }

    proptest::proptest! {
        #[test]
        fn totals_track_record_sums(listens in proptest::collection::vec((0u8..6, 0.0f64..10.0), 1..120)) {
            let mut state = AggregateState::new(NOON);
            for (index, (id, minutes)) in listens.iter().enumerate() {
                let t = track(&format!("t{id}"), &[("x", "X")], Some(("m", "M")));
                state.record_listen(&t, *minutes, NOON + index as i64 * 1_000);
            }

            let plays: u64 = state.tracks.values().map(|r| r.counters.play_count).sum();
            proptest::prop_assert_eq!(plays, state.metadata.total_track_plays);
            proptest::prop_assert_eq!(plays, listens.len() as u64);
            proptest::prop_assert_eq!(state.artists["x"].counters.play_count, plays);
            for record in state.tracks.values() {
                proptest::prop_assert!(record.counters.first_played_at <= record.counters.last_played_at);
            }
            let bucket_tracks: usize = state.daily_stats.values().map(|b| b.unique_track_ids.len()).sum();
            proptest::prop_assert_eq!(bucket_tracks, state.tracks.len());
        }
    }
}
