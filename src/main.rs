use std::f32::consts::TAU;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use pitwall::api::ApiServer;
use pitwall::client::{self, ClientOptions};
use pitwall::llm::create_chat_model;
use pitwall::session::SessionDeps;
use pitwall::telemetry::TelemetryFeed;
use pitwall::voice::{
    ConfiguredTts, DeviceOutput, MicCapture, PlaybackEvent, PlaybackScheduler,
    create_stt_connector, pcm, vad,
};
use pitwall::Config;

/// Pitwall - voice race engineer for sim racing
#[derive(Parser)]
#[command(name = "pitwall", version, about)]
struct Cli {
    /// Port to listen on (overrides config)
    #[arg(long, env = "PITWALL_PORT")]
    port: Option<u16>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the voice gateway (default)
    Serve,
    /// Connect a driver client with local mic and speakers
    Client {
        /// Gateway WebSocket URL
        #[arg(long, env = "PITWALL_URL", default_value = "ws://127.0.0.1:8765/ws")]
        url: String,
        /// Push-to-talk: Enter toggles the mic
        #[arg(long)]
        ptt: bool,
    },
    /// Test speaker output through the playback scheduler
    TestSpeaker,
    /// Test microphone input
    TestMic {
        /// Duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "info,pitwall=info",
        1 => "info,pitwall=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
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
    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(cli.port).await,
        Command::Client { url, ptt } => {
            let config = Config::load()?;
            client::run(ClientOptions {
                url,
                ptt,
                client_id: format!("pitwall-cli/{}", env!("CARGO_PKG_VERSION")),
                playback: config.playback,
            })
            .await?;
            Ok(())
        }
        Command::TestSpeaker => test_speaker().await,
        Command::TestMic { duration } => test_mic(duration).await,
    }
}

async fn serve(port: Option<u16>) -> anyhow::Result<()> {
    let mut config = Config::load()?;
    if let Some(port) = port {
        config.server.port = port;
    }
    tracing::debug!(?config, "loaded configuration");

    let stt = create_stt_connector(&config.stt)?;
    let tts = Arc::new(ConfiguredTts::new(config.tts.clone())?);
    let model = create_chat_model(&config.llm);
    let telemetry = TelemetryFeed::spawn(&config.telemetry);

    tracing::info!(
        stt = %config.stt.provider,
        tts = %config.tts.provider,
        model = %config.llm.model,
        proactive = config.proactive.enabled,
        "starting pitwall"
    );

    let server = ApiServer::new(
        SessionDeps {
            config: Arc::new(config.clone()),
            telemetry,
            stt,
            tts,
            model,
        },
        &config.server,
    );

    tokio::select! {
        result = server.run() => result?,
        _ = tokio::signal::ctrl_c() => tracing::info!("shutting down"),
    }
    Ok(())
}

/// Play a short tone through the scheduler, cues included
async fn test_speaker() -> anyhow::Result<()> {
    const RATE: u32 = 24_000;

    println!("Playing a 440 Hz tone...");
    let config = Config::load()?;
    let mut scheduler = PlaybackScheduler::new(DeviceOutput::open()?, &config.playback);

    let tone = pcm::encode(&sine(440.0, RATE, Duration::from_secs(1)));
    for (id, chunk) in (1u64..).zip(tone.chunks(4_800)) {
        scheduler.enqueue(id, chunk, RATE)?;
    }

    let mut poll = tokio::time::interval(Duration::from_millis(20));
    loop {
        poll.tick().await;
        if scheduler.poll() == Some(PlaybackEvent::Drained) {
            break;
        }
    }
    // let the close cue ring out
    tokio::time::sleep(Duration::from_millis(400)).await;
    println!("Done.");
    Ok(())
}

#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
fn sine(freq: f32, rate: u32, length: Duration) -> Vec<f32> {
    let n = (rate as f32 * length.as_secs_f32()) as usize;
    (0..n)
        .map(|i| (TAU * freq * i as f32 / rate as f32).sin() * 0.3)
        .collect()
}

/// Print a level meter from the capture path once a second
async fn test_mic(duration: u64) -> anyhow::Result<()> {
    println!("Testing microphone for {duration} seconds...");
    println!("Speak into your microphone!\n");

    let (tx, mut rx) = mpsc::unbounded_channel();
    let capture = MicCapture::start(tx)?;
    println!("Device rate: {} Hz, streaming 16 kHz mono", capture.device_rate());
    println!("---");

    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    ticker.tick().await;
    let mut samples = Vec::new();
    let mut second = 0;

    while second < duration {
        tokio::select! {
            Some(frame) = rx.recv() => samples.extend(pcm::decode(&frame)),
            _ = ticker.tick() => {
                second += 1;
                let energy = vad::rms(&samples);
                let peak = samples.iter().map(|s| s.abs()).fold(0.0f32, f32::max);

                #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
                let meter_len = (energy * 100.0).min(50.0) as usize;
                let meter = "#".repeat(meter_len) + &" ".repeat(50 - meter_len);
                println!("[{second:2}s] RMS: {energy:.4} | Peak: {peak:.4} | [{meter}]");
                samples.clear();
            }
        }
    }

    println!("---");
    println!("Done.");
    Ok(())
}
