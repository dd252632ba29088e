use chord_improv::chord_classifier::ChordClassifier;
use chord_improv::chord_table::ChordTable;
use chord_improv::config::EngineConfig;
use chord_improv::coordinator::{forward_input, Coordinator};
use chord_improv::corpus::sample_corpus;
use chord_improv::note_tracker::{HoldPolicy, NoteTracker};
use chord_improv::pattern_store::PatternStore;
use chord_improv::player::{Player, PlayerCommand};
use chord_improv::preferences::{PreferenceTable, SharedPreferences};
use chord_improv::simulator::{Demo, Simulator};
use chord_improv::sink::{LogSink, OutputSink};
use chord_improv::soloist::Soloist;
use chord_improv::types::*;
#[cfg(feature = "hardware")]
use chord_improv::midi_input;
#[cfg(feature = "hardware")]
use chord_improv::sink::{output_port_names, MidirSink};

use clap::{Parser, ValueEnum};
use crossbeam_channel::{bounded, unbounded};
use log::{error, info, warn};
use std::error::Error;
use std::path::PathBuf;
use std::thread;

#[derive(Clone, Copy, ValueEnum)]
enum HoldArg {
    PitchClass,
    RefCounted,
}

impl From<HoldArg> for HoldPolicy {
    fn from(arg: HoldArg) -> Self {
        match arg {
            HoldArg::PitchClass => HoldPolicy::PitchClass,
            HoldArg::RefCounted => HoldPolicy::RefCounted,
        }
    }
}

#[derive(Parser)]
#[command(name = "chord-improv")]
#[command(about = "Live chord recognition with pattern-retrieval solos")]
struct Cli {
    /// Engine config file (JSON)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Pattern corpus file (JSON). The built-in corpus is used otherwise.
    #[arg(long)]
    corpus: Option<PathBuf>,

    /// Style preference weights (JSON object of style → 0.0–1.0)
    #[arg(long)]
    preferences: Option<PathBuf>,

    /// Write the effective engine config (file plus flags) here and exit
    #[arg(long)]
    write_config: Option<PathBuf>,

    /// Write the corpus back, usage counts included, on exit
    #[arg(long)]
    save_corpus: bool,

    /// Minimum hold before a note counts toward a chord (ms)
    #[arg(long)]
    debounce_ms: Option<u64>,

    /// Playback tempo (BPM)
    #[arg(long)]
    tempo: Option<f64>,

    #[arg(long, value_enum)]
    hold_policy: Option<HoldArg>,

    /// Run the simulator even when a MIDI input is given
    #[arg(long)]
    simulate: bool,

    /// Simulator progression: "basic" (default), "jazz", or "blues"
    #[arg(long, default_value = "basic")]
    demo: String,

    /// How long the simulator holds each chord (ms)
    #[arg(long, default_value_t = 2000)]
    chord_ms: u32,

    /// Run the simulator as fast as possible instead of in real time
    #[arg(long)]
    no_pace: bool,

    /// MIDI input port (substring match). Enables live mode.
    #[arg(long)]
    midi_in: Option<String>,

    /// MIDI output port (substring match). Without it a loopback/DAW port is
    /// preferred in hardware builds.
    #[arg(long)]
    midi_out: Option<String>,

    /// MIDI output channel (1-16)
    #[arg(long, default_value_t = 1)]
    midi_channel: u8,

    /// Print the available MIDI ports and exit
    #[arg(long)]
    list_ports: bool,
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let cli = Cli::parse();

    if cli.list_ports {
        return list_ports();
    }

    // ─── Configuration ──────────────────────────────────────────────
    let mut config = cli
        .config
        .as_deref()
        .and_then(EngineConfig::load)
        .unwrap_or_default();
    if let Some(ms) = cli.debounce_ms {
        config.debounce_ms = ms;
    }
    if let Some(bpm) = cli.tempo {
        config.tempo_bpm = bpm;
    }
    if let Some(policy) = cli.hold_policy {
        config.hold_policy = policy.into();
    }
    if let Some(path) = &cli.write_config {
        config.save(path)?;
        return Ok(());
    }

    let store = match &cli.corpus {
        Some(path) => PatternStore::load(path)?,
        None => sample_corpus(),
    };
    let prefs = SharedPreferences::new(
        cli.preferences
            .as_deref()
            .and_then(PreferenceTable::load)
            .unwrap_or_default(),
    );

    let live = cli.midi_in.is_some() && !cli.simulate;
    let demo = match Demo::from_name(&cli.demo) {
        Some(d) => d,
        None => {
            warn!("Unknown demo {:?}; using basic", cli.demo);
            Demo::Basic
        }
    };

    info!("═══════════════════════════════════════════════");
    info!("  CHORD IMPROV v{}", env!("CARGO_PKG_VERSION"));
    info!("  Mode: {}", if live { "LIVE MIDI" } else { "SIMULATOR" });
    info!(
        "  Corpus: {} patterns, {} progressions",
        store.patterns().len(),
        store.progressions().len()
    );
    info!(
        "  Debounce {}ms · {} BPM · hold policy {:?}",
        config.debounce_ms, config.tempo_bpm, config.hold_policy
    );
    info!(
        "  Favourite style: {}",
        prefs.snapshot().favourite().unwrap_or("none")
    );
    info!("═══════════════════════════════════════════════");

    // Channels: input → coordinator → soloist → player
    let (input_tx, input_rx) = bounded::<InputEvent>(4096);
    let (chord_tx, chord_rx) = unbounded::<ChordEvent>();
    let (player_tx, player_rx) = unbounded::<PlayerCommand>();

    let mut handles = Vec::new();

    // ─── Player ─────────────────────────────────────────────────────
    let sink = open_sink(&cli);
    handles.push(
        thread::Builder::new()
            .name("player".into())
            .spawn(move || Player::new(player_rx, sink).run())?,
    );

    // ─── Soloist ────────────────────────────────────────────────────
    let selector = config.selector_for(store);
    let window = config.progression_window;
    let soloist = thread::Builder::new().name("soloist".into()).spawn(move || {
        let mut soloist =
            Soloist::new(chord_rx, player_tx, selector, prefs).with_progression_window(window);
        soloist.run();
        soloist
    })?;

    // ─── Coordinator ────────────────────────────────────────────────
    let clock = SessionClock::new();
    let tracker = NoteTracker::with_policy(config.hold_policy);
    let classifier = ChordClassifier::new(ChordTable::standard().clone(), config.debounce());
    let ticker = live.then(|| (clock.clone(), config.poll_interval()));
    handles.push(thread::Builder::new().name("coordinator".into()).spawn(move || {
        let mut coord = Coordinator::new(input_rx, chord_tx, tracker, classifier);
        if let Some((clock, interval)) = ticker {
            coord = coord.with_ticker(clock, interval);
        }
        coord.run();
    })?);

    // ─── Input source ───────────────────────────────────────────────
    // Sources feed a relay so Ctrl+C can stop the transport before the
    // pipeline drains and the player sends its final all-notes-off.
    let (shutdown_tx, shutdown_rx) = bounded::<()>(1);
    ctrlc::set_handler(move || {
        let _ = shutdown_tx.try_send(());
    })?;
    let (source_tx, source_rx) = bounded::<InputEvent>(4096);

    #[cfg(feature = "hardware")]
    let bridge = if live {
        let bridge = midi_input::MidiInputBridge::connect(
            cli.midi_in.as_deref(),
            clock.clone(),
            source_tx.clone(),
        )?;
        info!("Listening on {}. Press Ctrl+C to stop.", bridge.port_name());
        Some(bridge)
    } else {
        None
    };
    #[cfg(not(feature = "hardware"))]
    if live {
        error!("Live MIDI input requires the 'hardware' feature. Falling back to simulator.");
    }

    if !live || cfg!(not(feature = "hardware")) {
        let sim_tx = source_tx.clone();
        let pace = !cli.no_pace;
        let chord_ms = cli.chord_ms;
        handles.push(thread::Builder::new().name("simulator".into()).spawn(move || {
            Simulator::new(sim_tx).with_pace(pace).run(demo, chord_ms);
        })?);
    }
    drop(source_tx);

    if forward_input(&source_rx, &input_tx, &shutdown_rx) {
        info!("Interrupted; draining the pipeline");
    }
    #[cfg(feature = "hardware")]
    drop(bridge);
    // The simulator's next send fails once the relay is gone
    drop(source_rx);
    drop(input_tx);

    for h in handles {
        let _ = h.join();
    }
    let soloist = soloist.join().map_err(|_| "soloist thread panicked")?;

    if cli.save_corpus {
        if let Some(path) = &cli.corpus {
            soloist.selector().store().save(path)?;
        } else {
            warn!("--save-corpus needs --corpus; nothing written");
        }
    }
    Ok(())
}

fn open_sink(cli: &Cli) -> Option<Box<dyn OutputSink>> {
    #[cfg(feature = "hardware")]
    {
        let channel = cli.midi_channel.clamp(1, 16) - 1;
        match MidirSink::connect(cli.midi_out.as_deref(), channel) {
            Ok(sink) => return Some(Box::new(sink)),
            Err(e) => warn!("MIDI output unavailable ({}); logging notes instead", e),
        }
    }
    #[cfg(not(feature = "hardware"))]
    if cli.midi_out.is_some() {
        warn!(
            "MIDI output requires the 'hardware' feature; logging notes (channel {}) instead",
            cli.midi_channel
        );
    }
    Some(Box::new(LogSink))
}

#[cfg(feature = "hardware")]
fn list_ports() -> Result<(), Box<dyn Error>> {
    println!("MIDI inputs:");
    for (i, name) in midi_input::input_port_names()?.iter().enumerate() {
        println!("  {}: {}", i, name);
    }
    println!("MIDI outputs:");
    for (i, name) in output_port_names()?.iter().enumerate() {
        println!("  {}: {}", i, name);
    }
    Ok(())
}

#[cfg(not(feature = "hardware"))]
fn list_ports() -> Result<(), Box<dyn Error>> {
    error!("Listing MIDI ports requires the 'hardware' feature");
    Ok(())
}
