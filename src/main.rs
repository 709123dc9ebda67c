use crossterm::event::{self, Event, KeyCode, KeyEventKind};
use crossterm::terminal;
use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use midiplay::audio::{AudioBackend, CpalBackend, SilentBackend};
use midiplay::{
    EngineCommand, EngineHandle, EngineUpdate, PlaybackSnapshot, PlaybackState, PlayerConfig,
    probe, spawn_engine_with,
};

const SEEK_STEP: f64 = 5.0;
const VOLUME_STEP: f32 = 0.1;

struct Args {
    file: PathBuf,
    config: Option<PathBuf>,
    probe: bool,
    silent: bool,
}

fn usage() -> String {
    "usage: midiplay <file.mid> [--config <file.ron>] [--probe] [--silent]".to_string()
}

fn parse_args() -> Result<Args, String> {
    let mut file = None;
    let mut config = None;
    let mut probe = false;
    let mut silent = false;

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--probe" => probe = true,
            "--silent" => silent = true,
            "--config" => {
                let path = args.next().ok_or_else(usage)?;
                config = Some(PathBuf::from(path));
            }
            "-h" | "--help" => return Err(usage()),
            other if other.starts_with('-') => {
                return Err(format!("unknown option {}\n{}", other, usage()));
            }
            other => file = Some(PathBuf::from(other)),
        }
    }

    Ok(Args {
        file: file.ok_or_else(usage)?,
        config,
        probe,
        silent,
    })
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("midiplay=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = match parse_args() {
        Ok(args) => args,
        Err(message) => {
            eprintln!("{}", message);
            return ExitCode::FAILURE;
        }
    };

    if args.probe {
        return match probe(&args.file) {
            Ok(summary) => {
                println!("name:     {}", summary.name);
                println!("duration: {:.2}s", summary.duration);
                println!("tracks:   {}", summary.track_count);
                println!("notes:    {}", summary.note_count);
                ExitCode::SUCCESS
            }
            Err(e) => {
                tracing::error!(error = %e, "probe failed");
                ExitCode::FAILURE
            }
        };
    }

    let config = match &args.config {
        Some(path) => match PlayerConfig::load(path) {
            Ok(config) => config,
            Err(e) => {
                tracing::error!(error = %e, "bad config");
                return ExitCode::FAILURE;
            }
        },
        None => PlayerConfig::default(),
    };

    let silent = args.silent;
    let engine = spawn_engine_with(config, move || -> Box<dyn AudioBackend> {
        if silent {
            Box::new(SilentBackend::default())
        } else {
            Box::new(CpalBackend::new())
        }
    });

    if engine
        .command_tx
        .send(EngineCommand::Load(args.file.clone()))
        .is_err()
    {
        tracing::error!("engine thread is not running");
        return ExitCode::FAILURE;
    }

    let result = run(&engine);
    engine.shutdown();
    println!();

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "terminal error");
            ExitCode::FAILURE
        }
    }
}

/// Key loop. Raw mode is only held for its duration.
fn run(engine: &EngineHandle) -> std::io::Result<()> {
    println!("space play/pause  s stop  <-/-> seek  +/- volume  m mute  q quit");
    terminal::enable_raw_mode()?;
    let result = key_loop(engine);
    terminal::disable_raw_mode()?;
    result
}

fn key_loop(engine: &EngineHandle) -> std::io::Result<()> {
    let mut status = PlaybackSnapshot::default();

    loop {
        for update in engine.update_rx.try_iter() {
            match update {
                EngineUpdate::Snapshot(snapshot) => status = snapshot,
                EngineUpdate::Loaded(summary) => {
                    print!(
                        "\r\nloaded {} ({} tracks, {:.1}s{})\r\n",
                        summary.name,
                        summary.track_count,
                        summary.duration,
                        if summary.truncated { ", truncated" } else { "" }
                    );
                }
                EngineUpdate::Error { message } => print!("\r\nerror: {}\r\n", message),
            }
        }
        draw_status(&status)?;

        if !event::poll(Duration::from_millis(50))? {
            continue;
        }
        let Event::Key(key) = event::read()? else {
            continue;
        };
        if key.kind != KeyEventKind::Press {
            continue;
        }

        let command = match key.code {
            KeyCode::Char(' ') => {
                if status.state == PlaybackState::Playing {
                    EngineCommand::Pause
                } else {
                    EngineCommand::Play
                }
            }
            KeyCode::Char('s') => EngineCommand::Stop,
            KeyCode::Left => EngineCommand::Seek((status.position - SEEK_STEP).max(0.0)),
            KeyCode::Right => EngineCommand::Seek(status.position + SEEK_STEP),
            KeyCode::Char('+') | KeyCode::Char('=') => {
                EngineCommand::SetVolume((status.volume + VOLUME_STEP).min(1.0))
            }
            KeyCode::Char('-') => EngineCommand::SetVolume((status.volume - VOLUME_STEP).max(0.0)),
            KeyCode::Char('m') => EngineCommand::SetMuted(!status.muted),
            KeyCode::Char('q') | KeyCode::Esc => return Ok(()),
            _ => continue,
        };

        if engine.command_tx.send(command).is_err() {
            return Ok(());
        }
    }
}

fn draw_status(status: &PlaybackSnapshot) -> std::io::Result<()> {
    let mut stdout = std::io::stdout();
    write!(
        stdout,
        "\r[{:<12}] {:>6.1}s / {:>6.1}s  vol {:>3.0}%{}  ",
        status.state,
        status.position,
        status.duration,
        status.volume * 100.0,
        if status.muted { " (muted)" } else { "" }
    )?;
    stdout.flush()
}
