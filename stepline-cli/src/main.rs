mod clock;
mod demo;

use std::fs::File;
use std::io::BufRead;
use std::sync::Arc;
use std::time::Duration;

use stepline_core::{
    Config, MidiTransport, MidirTransport, PlaybackError, PlaybackFeedback, PlaybackHandle,
};
use stepline_types::{Cursor, LoopMode, PlayState};

use clock::{spawn_clock, Timing};

fn init_logging(verbose: bool) {
    use simplelog::{LevelFilter, WriteLogger};

    let log_level = if verbose { LevelFilter::Debug } else { LevelFilter::Warn };

    let log_path = dirs::config_dir()
        .unwrap_or_else(|| std::path::PathBuf::from("."))
        .join("stepline")
        .join("stepline.log");

    if let Some(parent) = log_path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }

    let log_file = match File::create(&log_path) {
        Ok(file) => file,
        Err(_) => match File::create(std::env::temp_dir().join("stepline.log")) {
            Ok(file) => file,
            Err(e) => {
                eprintln!("logging disabled: {}", e);
                return;
            }
        },
    };

    if WriteLogger::init(log_level, simplelog::Config::default(), log_file).is_err() {
        eprintln!("logging disabled: logger already set");
        return;
    }

    log::info!("stepline starting (log level: {:?})", log_level);
}

struct Args {
    verbose: bool,
    list_ports: bool,
    port: Option<String>,
    bpm: Option<u16>,
    loop_mode: LoopMode,
}

fn parse_args(args: &[String]) -> Args {
    let value_of = |flag: &str| {
        args.iter()
            .position(|a| a == flag)
            .and_then(|i| args.get(i + 1).cloned())
    };
    let has = |flag: &str| args.iter().any(|a| a == flag);

    let loop_mode = if has("--loop") {
        LoopMode::LoopPart
    } else if has("--loop-all") {
        LoopMode::LoopWholeSequence
    } else {
        LoopMode::OneShot
    };

    Args {
        verbose: has("--verbose") || has("-v"),
        list_ports: has("--list-ports"),
        port: value_of("--port"),
        bpm: value_of("--bpm").and_then(|b| b.parse().ok()),
        loop_mode,
    }
}

fn main() {
    let args: Vec<String> = std::env::args().collect();
    let args = parse_args(&args);
    init_logging(args.verbose);

    if let Err(e) = run(args) {
        log::error!("{}", e);
        eprintln!("stepline: {}", e);
        std::process::exit(1);
    }
}

fn run(args: Args) -> Result<(), PlaybackError> {
    let config = Config::load();

    if args.list_ports {
        for port in MidirTransport::list_ports(config.client_name())? {
            println!("{}: {}", port.index, port.name);
        }
        return Ok(());
    }

    let port = args.port.as_deref().or(config.port());
    let transport = MidirTransport::connect(config.client_name(), port)?;
    println!("Playing to {}", transport.name());
    let handle = PlaybackHandle::new(Box::new(transport), config.dispatch_tables())?;

    let song = demo::demo_song();
    let cursor = Cursor::first_section(&song.arrangement);
    let play_state = PlayState::new(song.lines.len());
    handle.update_state(Arc::new(song), play_state, cursor);
    handle.start(args.loop_mode);
    // The clock starts only once the run has begun.
    let started = (0..5).any(|_| {
        matches!(
            handle.recv_feedback_timeout(Duration::from_secs(1)),
            Some(PlaybackFeedback::StateChanged { .. })
        )
    });
    if !started {
        return Err(PlaybackError::Disconnected);
    }

    let bpm = args.bpm.unwrap_or(config.bpm()).clamp(20, 300);
    let (stop_tx, stop_rx) = crossbeam_channel::bounded(1);
    let clock = spawn_clock(Timing::new(bpm, config.subdivisions()), handle.tick_sender(), stop_rx)?;
    println!("{} bpm, press Enter to stop", bpm);

    let (enter_tx, enter_rx) = crossbeam_channel::bounded(1);
    std::thread::Builder::new()
        .name("stepline-stdin".into())
        .spawn(move || {
            let _ = std::io::stdin().lock().lines().next();
            let _ = enter_tx.send(());
        })
        .map_err(|e| PlaybackError::Init(e.to_string()))?;

    loop {
        if enter_rx.try_recv().is_ok() {
            handle.stop();
        }
        let Some(feedback) = handle.recv_feedback_timeout(Duration::from_millis(50)) else {
            continue;
        };
        match feedback {
            PlaybackFeedback::StateChanged { cursor, .. } => {
                log::trace!("at {:?}", cursor.current());
            }
            PlaybackFeedback::AnticipatedStop => println!("Last beat"),
            PlaybackFeedback::DuplicateNote { channel, note } => {
                log::debug!("retriggered ch{} note {}", channel + 1, note);
            }
            PlaybackFeedback::TransportError(e) => eprintln!("MIDI error: {}", e),
            PlaybackFeedback::Telemetry(summary) => {
                if summary.overruns > 0 {
                    log::warn!("{} beats overran their interval", summary.overruns);
                }
            }
            PlaybackFeedback::Stopped { .. } => {
                println!("Stopped");
                break;
            }
        }
    }

    let _ = stop_tx.send(());
    let _ = clock.join();
    // Dropping the handle silences anything still sounding.
    drop(handle);
    Ok(())
}
