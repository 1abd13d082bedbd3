use std::future::Future;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use beacon_stream::api::ApiServerBuilder;
use beacon_stream::config::CaptureStrategy;
use beacon_stream::peer::{Negotiator, RtcConnector};
use beacon_stream::transport::{ReadyState, TextEvent};
use beacon_stream::voice::{FrameSource, PcmFrameSource, PlaybackSink, SpeakerSink, pcm, wav};
use beacon_stream::{Config, PeerSessionController, SessionController, SessionObserver};

/// beacon-stream - stream your microphone to a realtime voice agent
#[derive(Parser)]
#[command(name = "beacon-stream", version, about)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Stream the microphone over the PCM socket
    Stream {
        /// Stop after this many seconds (default: until Ctrl-C)
        #[arg(short, long)]
        duration: Option<u64>,
        /// Send one-second chunks instead of per-callback frames
        #[arg(long)]
        chunked: bool,
    },
    /// Talk to the realtime API over a peer connection
    Converse {
        /// Stop after this many seconds (default: until Ctrl-C)
        #[arg(short, long)]
        duration: Option<u64>,
    },
    /// Serve the ephemeral credential endpoint
    Serve {
        /// Port to listen on
        #[arg(long)]
        port: Option<u16>,
    },
    /// Test microphone input
    TestMic {
        /// Duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
    },
    /// Test speaker output
    TestSpeaker,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "info,beacon_stream=info",
        1 => "info,beacon_stream=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Command::Stream { duration, chunked } => stream(duration, chunked).await,
        Command::Converse { duration } => converse(duration).await,
        Command::Serve { port } => serve(port).await,
        Command::TestMic { duration } => test_mic(duration).await,
        Command::TestSpeaker => test_speaker().await,
    }
}

/// Prints transcripts and connection status to the terminal
struct ConsoleObserver;

impl SessionObserver for ConsoleObserver {
    fn on_transcript(&self, event: &TextEvent) {
        println!("{}: {}", event.sender.label(), event.transcript);
    }

    fn on_status(&self, state: ReadyState) {
        println!("[{}]", state.describe());
    }
}

/// Resolve on Ctrl-C or after `duration` seconds
fn stop_signal(duration: Option<u64>) -> impl Future<Output = ()> {
    async move {
        let elapsed = async {
            match duration {
                Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    tracing::warn!(error = %e, "failed to listen for ctrl-c");
                }
            }
            () = elapsed => {}
        }
    }
}

async fn stream(duration: Option<u64>, chunked: bool) -> anyhow::Result<()> {
    let mut config = Config::load()?;
    if chunked {
        config.capture.strategy = CaptureStrategy::Chunked;
    }
    tracing::debug!(?config, "loaded configuration");

    let sink = Arc::new(SpeakerSink::new()?);
    let controller = SessionController::new(
        config.session_settings(),
        config.capture.frame_source(),
        sink,
        Arc::new(ConsoleObserver),
    );

    if !controller.start().await? {
        return Ok(());
    }
    println!(
        "Streaming to {} - press Ctrl-C to stop\n",
        controller.settings().url
    );

    stop_signal(duration).await;

    controller.stop().await;
    println!("Waiting for final responses...");
    controller.drain().await;

    Ok(())
}

async fn converse(duration: Option<u64>) -> anyhow::Result<()> {
    let config = Config::load()?;
    tracing::debug!(?config, "loaded configuration");

    let negotiator = Negotiator::new(
        config.peer.session_url.clone(),
        config.peer.realtime_url.clone(),
        config.peer.model.clone(),
    );
    let controller = PeerSessionController::new(
        negotiator,
        Arc::new(RtcConnector::new(config.peer.ice_servers.clone())),
        config.capture.peer_frame_source(),
        Arc::new(SpeakerSink::new()?),
    );

    controller.start().await?;
    println!("Connected to {} - press Ctrl-C to stop\n", config.peer.model);

    stop_signal(duration).await;

    controller.stop().await;
    Ok(())
}

async fn serve(port: Option<u16>) -> anyhow::Result<()> {
    let config = Config::load()?;

    let server = ApiServerBuilder::new()
        .api_key(config.api_key)
        .upstream_url(config.server.upstream_url)
        .model(config.peer.model)
        .voice(config.server.voice)
        .port(port.unwrap_or(config.server.port))
        .build();

    server.run().await?;
    Ok(())
}

/// Test microphone input
async fn test_mic(duration: u64) -> anyhow::Result<()> {
    println!("Testing microphone for {duration} seconds...");
    println!("Speak into your microphone!\n");

    let source = PcmFrameSource::default();
    let (frames_tx, mut frames) = mpsc::unbounded_channel();
    let mut capture = source.start(frames_tx).await?;

    println!("Sample rate: {} Hz", source.sample_rate());
    println!("---");

    for i in 0..duration {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(1);
        let mut samples = Vec::new();
        while let Ok(Some(frame)) = tokio::time::timeout_at(deadline, frames.recv()).await {
            samples.extend(frame.into_samples());
        }

        let energy = calculate_rms(&samples);
        let peak = samples.iter().map(|s| s.abs()).fold(0.0f32, f32::max);

        // Visual meter
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let meter_len = (energy * 100.0).min(50.0) as usize;
        let meter: String = "█".repeat(meter_len) + &" ".repeat(50 - meter_len);

        println!(
            "[{:2}s] RMS: {:.4} | Peak: {:.4} | [{}]",
            i + 1,
            energy,
            peak,
            meter
        );
    }

    capture.stop();

    println!("\n---");
    println!("If you saw movement in the meter, your mic is working!");
    println!("If RMS stayed near 0, check:");
    println!("  1. Is your mic plugged in?");
    println!("  2. Run: pactl info | grep 'Default Source'");
    println!("  3. Try: pavucontrol (to check input levels)");

    Ok(())
}

/// Test speaker output through the WAV path used for response audio
async fn test_speaker() -> anyhow::Result<()> {
    println!("Testing speaker output...");
    println!("You should hear a 440Hz tone for 2 seconds\n");

    let sink = SpeakerSink::new()?;

    let sample_rate = wav::WAV_SAMPLE_RATE;
    let frequency = 440.0_f32;
    let num_samples = usize::try_from(sample_rate * 2)?;

    #[allow(clippy::cast_precision_loss)]
    let samples: Vec<f32> = (0..num_samples)
        .map(|i| {
            let t = i as f32 / sample_rate as f32;
            (2.0 * std::f32::consts::PI * frequency * t).sin() * 0.3 // 30% volume
        })
        .collect();

    let clip = wav::wrap(&pcm::encode(&samples).to_le_bytes());
    println!("Playing {} samples at {} Hz...", samples.len(), sample_rate);

    let length = Duration::from_millis(clip.duration_ms());
    sink.play(clip);
    tokio::time::sleep(length + Duration::from_millis(300)).await;
    sink.stop();

    println!("\n---");
    println!("If you heard the tone, your speakers are working!");
    println!("If you didn't hear anything, check:");
    println!("  1. Run: pactl info | grep 'Default Sink'");
    println!("  2. Run: pactl list sinks short");
    println!("  3. Try: pavucontrol (to check output levels)");

    Ok(())
}

/// Calculate RMS energy of audio samples
#[allow(clippy::cast_precision_loss)]
fn calculate_rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f32 = samples.iter().map(|s| s * s).sum();
    (sum / samples.len() as f32).sqrt()
}
