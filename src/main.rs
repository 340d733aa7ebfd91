use anyhow::{Context, Result, bail};
use spinstats::clock::{self, SystemClock};
use spinstats::config;
use spinstats::core::StatsCore;
use spinstats::host::{PlayerEvent, ScriptedHost};
use spinstats::logging;
use spinstats::persist::{BackendKind, DocumentBackend, EntityBackend, StatsBackend};
use spinstats::replay;
use spinstats::store::FileStore;
use spinstats::summary::{StatsSummary, SummaryQuery, SummarySort, TopItem};
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::PathBuf;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::Duration;

const MAX_IDLE_MS: i64 = 250;

#[derive(Debug)]
enum Command {
    Summary {
        top: Option<usize>,
        sort: SummarySort,
    },
    Export {
        out: Option<PathBuf>,
    },
    Clear {
        confirmed: bool,
    },
    Replay {
        source: String,
    },
    Watch,
}

#[derive(Debug, Default)]
struct CliArgs {
    backend: Option<BackendKind>,
    data_dir: Option<PathBuf>,
    command: Option<Command>,
}

fn main() -> Result<()> {
    let args = parse_args(std::env::args().skip(1).collect())?;
    let mut settings = config::load_settings()?;
    if let Some(backend) = args.backend {
        settings.backend = backend;
    }
    if let Some(dir) = args.data_dir {
        settings.data_dir = Some(dir);
    }
    logging::init(settings.log_filter.as_deref());

    let store = FileStore::open(settings.resolved_data_dir()?)
        .context("failed to open the stats store")?;
    let backend: Box<dyn StatsBackend> = match settings.backend {
        BackendKind::Document => Box::new(DocumentBackend::new(store)),
        BackendKind::Entity => Box::new(EntityBackend::new(store)),
    };

    let command = args.command.unwrap_or(Command::Summary {
        top: None,
        sort: SummarySort::Plays,
    });
    match command {
        Command::Summary { top, sort } => {
            let core = StatsCore::start(backend, ScriptedHost::new(), SystemClock);
            let query = SummaryQuery {
                sort,
                top: top.unwrap_or(usize::from(settings.summary_top_count)),
                day: Some(clock::date_key(clock::now_epoch_millis())),
                ..SummaryQuery::default()
            };
            print_summary(&core.summary(&query), sort);
        }
        Command::Export { out } => {
            let core = StatsCore::start(backend, ScriptedHost::new(), SystemClock);
            let dir = match out {
                Some(dir) => dir,
                None => settings.resolved_export_dir()?,
            };
            let path = core.export_to_dir(&dir).context("Error exporting stats")?;
            println!("Stats exported to {}", path.display());
        }
        Command::Clear { confirmed } => {
            if !confirmed {
                bail!("clear removes every statistic; re-run with --yes to confirm");
            }
            let mut core = StatsCore::start(backend, ScriptedHost::new(), SystemClock);
            core.clear().context("Error clearing stats")?;
            println!("All stats cleared");
        }
        Command::Replay { source } => {
            let reader: Box<dyn BufRead> = if source == "-" {
                Box::new(BufReader::new(io::stdin()))
            } else {
                let file =
                    File::open(&source).with_context(|| format!("failed to open {source}"))?;
                Box::new(BufReader::new(file))
            };
            let (core, report) = replay::replay(backend, reader)?;
            println!(
                "Replayed {} signals, {} counted plays ({} tracks known)",
                report.events,
                report.counted_plays,
                core.state().tracks.len()
            );
        }
        Command::Watch => watch(backend),
    }
    Ok(())
}

/// Follow live signals on stdin until EOF or a shutdown signal.
fn watch(backend: Box<dyn StatsBackend>) {
    let host = ScriptedHost::new();
    let mut core = StatsCore::start(backend, host.clone(), SystemClock);

    let (tx, rx) = mpsc::channel::<String>();
    thread::spawn(move || {
        for line in io::stdin().lock().lines() {
            let Ok(line) = line else {
                break;
            };
            if tx.send(line).is_err() {
                break;
            }
        }
    });

    loop {
        let wait = (core.next_deadline() - clock::now_epoch_millis()).clamp(0, MAX_IDLE_MS);
        match rx.recv_timeout(Duration::from_millis(wait as u64)) {
            Ok(line) => match replay::parse_line(&line) {
                Ok(Some(event)) => {
                    event.apply_to_host(&host);
                    let player_event = event.player_event();
                    core.handle(player_event);
                    if player_event == PlayerEvent::Shutdown {
                        return;
                    }
                }
                Ok(None) => {}
                Err(err) => tracing::warn!(error = %format!("{err:#}"), "ignoring signal"),
            },
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => {
                core.shutdown();
                return;
            }
        }
        core.tick();
    }
}

fn print_summary(summary: &StatsSummary, sort: SummarySort) {
    println!("Your Listening Stats");
    println!(
        "  {} tracks  {} artists  {} albums  {} plays  {}h listened",
        summary.track_count,
        summary.artist_count,
        summary.album_count,
        summary.total_plays,
        summary.total_hours
    );
    if let Some(day) = &summary.day {
        println!(
            "  Today: {} plays, {} minutes, {} unique tracks",
            day.track_count,
            day.total_minutes.round(),
            day.unique_track_ids.len()
        );
    }
    print_top("Top Tracks", &summary.top_tracks, sort);
    print_top("Top Artists", &summary.top_artists, sort);
    print_top("Top Albums", &summary.top_albums, sort);

    if !summary.recent.is_empty() {
        println!();
        println!("Recent");
        for entry in &summary.recent {
            println!(
                "  {}  {} - {} ({:.1} min)",
                entry.date, entry.primary_artist_name, entry.track_name, entry.minutes_listened
            );
        }
    }
}

fn print_top(title: &str, items: &[TopItem], sort: SummarySort) {
    println!();
    println!("{title} (by {})", sort.label());
    if items.is_empty() {
        println!("  No data available yet. Start playing some music!");
        return;
    }
    for (index, item) in items.iter().enumerate() {
        println!(
            "  #{:<3} {}  {} plays, {} minutes, last played {}",
            index + 1,
            item.name,
            item.play_count,
            item.total_minutes.round(),
            clock::iso_timestamp(item.last_played_at)
        );
    }
}

fn parse_args(args: Vec<String>) -> Result<CliArgs> {
    let mut out = CliArgs::default();
    let mut index = 0;
    while index < args.len() {
        match args[index].as_str() {
            "--backend" => {
                index += 1;
                let Some(value) = args.get(index) else {
                    bail!("--backend requires document or entity");
                };
                let Some(backend) = BackendKind::parse(value) else {
                    bail!("unknown backend {value}");
                };
                out.backend = Some(backend);
            }
            "--data-dir" => {
                index += 1;
                let Some(value) = args.get(index) else {
                    bail!("--data-dir requires a directory");
                };
                if value.trim().is_empty() {
                    bail!("--data-dir cannot be empty");
                }
                out.data_dir = Some(PathBuf::from(value.trim()));
            }
            "-h" | "--help" => {
                print_help();
                std::process::exit(0);
            }
            "summary" => {
                let (top, sort) = parse_summary_flags(&args, &mut index)?;
                out.command = Some(Command::Summary { top, sort });
            }
            "export" => {
                let mut dir = None;
                if args.get(index + 1).map(String::as_str) == Some("--out") {
                    let Some(value) = args.get(index + 2) else {
                        bail!("--out requires a directory");
                    };
                    dir = Some(PathBuf::from(value));
                    index += 2;
                }
                out.command = Some(Command::Export { out: dir });
            }
            "clear" => {
                let confirmed = args.get(index + 1).map(String::as_str) == Some("--yes");
                if confirmed {
                    index += 1;
                }
                out.command = Some(Command::Clear { confirmed });
            }
            "replay" => {
                index += 1;
                let Some(source) = args.get(index) else {
                    bail!("replay requires a file path or -");
                };
                out.command = Some(Command::Replay {
                    source: source.clone(),
                });
            }
            "watch" => out.command = Some(Command::Watch),
            other => bail!("unknown argument {other}"),
        }
        index += 1;
    }
    Ok(out)
}

fn parse_summary_flags(args: &[String], index: &mut usize) -> Result<(Option<usize>, SummarySort)> {
    let mut top = None;
    let mut sort = SummarySort::Plays;
    while let Some(flag) = args.get(*index + 1) {
        match flag.as_str() {
            "--top" => {
                let Some(value) = args.get(*index + 2) else {
                    bail!("--top requires a number");
                };
                top = Some(
                    value
                        .parse::<usize>()
                        .with_context(|| format!("invalid --top value {value}"))?,
                );
            }
            "--sort" => {
                let Some(value) = args.get(*index + 2) else {
                    bail!("--sort requires plays or minutes");
                };
                let Some(parsed) = SummarySort::parse(value) else {
                    bail!("unknown sort {value}");
                };
                sort = parsed;
            }
            _ => break,
        }
        *index += 2;
    }
    Ok((top, sort))
}

fn print_help() {
    println!("spinstats");
    println!("  [--backend document|entity] [--data-dir DIR] <command>");
    println!();
    println!("  summary [--top N] [--sort plays|minutes]   Show listening stats (default)");
    println!("  export [--out DIR]                          Write a JSON export file");
    println!("  clear --yes                                 Reset all stats");
    println!("  replay <FILE|->                             Feed recorded JSON-lines signals");
    println!("  watch                                       Follow live JSON-lines signals on stdin");
}
