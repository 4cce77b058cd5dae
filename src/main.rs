use std::io::BufRead;
use std::path::PathBuf;
use std::sync::mpsc;
use std::time::Duration;
use std::{panic, process, thread};

use anyhow::Context;
use clap::{Arg, ArgAction, Command};
use log::{info, warn};

use crate::engine::StreamDecoder;
use crate::engine::ffmpeg::{FfmpegSource, MediaPacket};
use crate::output::video::StatsSink;
use crate::pipeline::coordinator::Player;

pub mod engine;
pub mod output;
pub mod pipeline;

/// Commands posted to the main loop from signal and stdin handlers.
enum ControlEvent {
    Quit,
    TogglePause,
    SeekBy(f64),
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let matches = Command::new("cineflow")
        .version(env!("CARGO_PKG_VERSION"))
        .about(env!("CARGO_PKG_DESCRIPTION"))
        .arg(
            Arg::new("input")
                .value_name("FILE")
                .help("Media file to play.")
                .required(true),
        )
        .arg(
            Arg::new("no-audio")
                .long("no-audio")
                .help("Disable the audio stream.")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("seek-step")
                .long("seek-step")
                .value_name("SECONDS")
                .help("Seconds jumped by the seek commands.")
                .default_value("10"),
        )
        .get_matches();

    let input = PathBuf::from(
        matches
            .get_one::<String>("input")
            .context("missing input path")?,
    );
    let no_audio = matches.get_flag("no-audio");
    let seek_step: f64 = matches
        .get_one::<String>("seek-step")
        .context("missing seek step")?
        .parse()
        .context("seek-step must be a number")?;

    // kill the main thread as soon as a secondary thread panics
    let orig_hook = panic::take_hook();
    panic::set_hook(Box::new(move |panic_info| {
        orig_hook(panic_info);
        process::exit(105);
    }));

    let (events_tx, events_rx) = mpsc::channel::<ControlEvent>();

    let ctrlc_tx = events_tx.clone();
    ctrlc::set_handler(move || {
        let _ = ctrlc_tx.send(ControlEvent::Quit);
    })
    .context("failed to set Ctrl-C handler")?;

    spawn_command_reader(events_tx, seek_step)?;

    let source = FfmpegSource::open(&input)?;
    let video_decoder: Option<Box<dyn StreamDecoder<Unit = MediaPacket>>> = if source.has_video()
    {
        Some(Box::new(source.video_decoder()?))
    } else {
        None
    };
    let audio_decoder: Option<Box<dyn StreamDecoder<Unit = MediaPacket>>> =
        if source.has_audio() && !no_audio {
            Some(Box::new(source.audio_decoder()?))
        } else {
            None
        };
    let audio_params = source.audio_output_params().unwrap_or_default();

    let mut player = Player::new(source, video_decoder, audio_decoder, audio_params)?;
    player.start()?;
    info!("playing {} (commands: p=pause, s/S=seek, q=quit)", input.display());

    let mut sink = StatsSink::new();
    loop {
        match events_rx.try_recv() {
            Ok(ControlEvent::Quit) => break,
            Ok(ControlEvent::TogglePause) => player.toggle_pause(),
            Ok(ControlEvent::SeekBy(delta)) => player.seek_by(delta),
            Err(mpsc::TryRecvError::Empty) => {}
            Err(mpsc::TryRecvError::Disconnected) => break,
        }
        if !player.refresh(&mut sink)? {
            thread::sleep(Duration::from_millis(5));
        }
    }

    player.shutdown();
    info!("stopped");
    Ok(())
}

/// Read single-letter commands from stdin, one per line.
fn spawn_command_reader(
    events: mpsc::Sender<ControlEvent>,
    seek_step: f64,
) -> anyhow::Result<()> {
    thread::Builder::new()
        .name("stdin-commands".into())
        .spawn(move || {
            let stdin = std::io::stdin();
            for line in stdin.lock().lines() {
                let Ok(line) = line else { break };
                let event = match line.trim() {
                    "q" | "quit" => ControlEvent::Quit,
                    "p" | "pause" => ControlEvent::TogglePause,
                    "s" => ControlEvent::SeekBy(seek_step),
                    "S" => ControlEvent::SeekBy(-seek_step),
                    "" => continue,
                    other => {
                        warn!("unknown command: {other:?}");
                        continue;
                    }
                };
                let quit = matches!(event, ControlEvent::Quit);
                if events.send(event).is_err() || quit {
                    break;
                }
            }
        })
        .context("failed to spawn stdin reader")?;
    Ok(())
}
