use std::path::PathBuf;
use std::time::Duration;

use anyhow::anyhow;
use bytes::Bytes;
use clap::{Parser, Subcommand};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use waav_converse::core::audio::{AudioFormat, AudioSource, ScriptedAudioSource};
use waav_converse::core::player::{AudioSink, MemorySink};
use waav_converse::core::transport::{
    BoxedTransport, InboundEvent, MockTransport, MockTransportHandle, TranscriptRole,
};
use waav_converse::{ControllerEvent, ControllerHandle, ConversationController, ConverseConfig};

/// WaaV Converse - Hands-free voice conversation client
#[derive(Parser, Debug)]
#[command(name = "waav-converse")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short = 'c', long = "config", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Subcommand to run (defaults to `run`)
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start a conversation
    Run {
        /// Use a scripted microphone, an in-process endpoint and no speakers
        #[arg(long)]
        dry_run: bool,
    },

    /// Print the effective configuration with secrets masked
    CheckConfig,

    /// List audio input devices
    Devices,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if it exists (must be done before config loading)
    let _ = dotenvy::dotenv();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // Initialize crypto provider for TLS connections
    // This must be done before any TLS connections are attempted
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow!("Failed to install default crypto provider"))?;

    // Parse CLI arguments
    let cli = Cli::parse();

    // Load configuration from file or environment
    let config = if let Some(config_path) = cli.config.as_ref() {
        info!("Loading configuration from {}", config_path.display());
        ConverseConfig::from_file(config_path).map_err(|e| anyhow!(e.to_string()))?
    } else {
        ConverseConfig::from_env().map_err(|e| anyhow!(e.to_string()))?
    };

    match cli.command.unwrap_or(Commands::Run { dry_run: false }) {
        Commands::Run { dry_run } => run(config, dry_run).await,
        Commands::CheckConfig => {
            let yaml = config.to_masked_yaml().map_err(|e| anyhow!(e.to_string()))?;
            println!("{yaml}");
            Ok(())
        }
        Commands::Devices => list_devices(),
    }
}

#[cfg(feature = "audio-io")]
fn list_devices() -> anyhow::Result<()> {
    let devices = waav_converse::core::audio::list_input_devices()?;
    if devices.is_empty() {
        println!("No input devices found");
    }
    for device in devices {
        println!("{device}");
    }
    Ok(())
}

#[cfg(not(feature = "audio-io"))]
fn list_devices() -> anyhow::Result<()> {
    anyhow::bail!("Listing devices requires the `audio-io` feature")
}

type Components = (Box<dyn AudioSource>, BoxedTransport, Box<dyn AudioSink>);

#[cfg(feature = "audio-io")]
fn live_components(config: &ConverseConfig) -> anyhow::Result<Components> {
    use waav_converse::core::audio::CpalAudioSource;
    use waav_converse::core::player::CpalAudioSink;
    use waav_converse::core::transport::WebSocketTransport;

    if !config.has_endpoint() {
        anyhow::bail!("No endpoint configured (set CONVERSE_ENDPOINT_URL or endpoint.url)");
    }

    let format = AudioFormat::new(config.audio.sample_rate, config.audio.channels);
    let source = CpalAudioSource::new(config.audio.input_device.clone());
    let sink = CpalAudioSink::new(format)?;
    let transport = WebSocketTransport::new(config.websocket_config());
    Ok((Box::new(source), Box::new(transport), Box::new(sink)))
}

#[cfg(not(feature = "audio-io"))]
fn live_components(_config: &ConverseConfig) -> anyhow::Result<Components> {
    anyhow::bail!("Live conversations require the `audio-io` feature (or use `run --dry-run`)")
}

/// Scripted components: a short utterance, an endpoint that answers every
/// committed turn, and an in-memory speaker.
fn dry_run_components(
    config: &ConverseConfig,
) -> (Components, MockTransportHandle, Duration) {
    let format = AudioFormat::new(config.audio.sample_rate, config.audio.channels);
    let frame_ms = config.audio.frame_ms;
    let silence_ms = config.turn_detection.silence_threshold_ms + 1000;

    let source = ScriptedAudioSource::from_levels(
        format,
        frame_ms,
        &[(0.0, 500), (0.3, 1500), (0.0, silence_ms)],
    )
    .paced(Duration::from_millis(frame_ms as u64));
    let script = Duration::from_millis(source.duration_ms());

    let transport = MockTransport::new();
    let handle = transport.handle();
    let sink = MemorySink::new(format);

    (
        (Box::new(source), Box::new(transport), Box::new(sink)),
        handle,
        script,
    )
}

/// Answer each `turn.commit` with a transcript, half a second of audio and
/// `response.done`.
fn spawn_dry_run_endpoint(handle: MockTransportHandle, format: AudioFormat) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut answered = 0;
        let chunk = Bytes::from(vec![0u8; format.samples_for_ms(100) * 2]);

        loop {
            tokio::time::sleep(Duration::from_millis(50)).await;
            let commits = handle.count("turn.commit");
            while answered < commits {
                answered += 1;
                let response_id = Some(format!("dry-run-{answered}"));
                handle.inject(InboundEvent::Transcript {
                    role: TranscriptRole::User,
                    text: "(scripted speech)".to_string(),
                });
                handle.inject(InboundEvent::Transcript {
                    role: TranscriptRole::Assistant,
                    text: "This is a dry run reply.".to_string(),
                });
                for _ in 0..5 {
                    handle.inject(InboundEvent::ResponseAudioChunk {
                        data: chunk.clone(),
                        response_id: response_id.clone(),
                    });
                }
                handle.inject(InboundEvent::ResponseDone { response_id });
            }
        }
    })
}

fn spawn_event_printer(mut events: broadcast::Receiver<ControllerEvent>) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => match serde_json::to_string(&event) {
                    Ok(json) => println!("{json}"),
                    Err(e) => warn!("Failed to serialize event: {}", e),
                },
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("Event printer lagged, skipped {} events", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

async fn run(config: ConverseConfig, dry_run: bool) -> anyhow::Result<()> {
    let format = AudioFormat::new(config.audio.sample_rate, config.audio.channels);

    let (components, dry_run_state) = if dry_run {
        info!("Dry run: scripted microphone, in-process endpoint, no speaker output");
        let (components, handle, script) = dry_run_components(&config);
        let endpoint = spawn_dry_run_endpoint(handle, format);
        (components, Some((endpoint, script)))
    } else {
        (live_components(&config)?, None)
    };
    let (source, transport, sink) = components;

    let controller = ConversationController::new(config.controller_config(), source, transport, sink);
    let printer = spawn_event_printer(controller.subscribe());

    let (handle, commands) = ControllerHandle::channel();
    let mut session = tokio::spawn(controller.run(commands));
    handle.start().await?;

    // Dry runs end shortly after the script does
    let script_end = async {
        match dry_run_state.as_ref() {
            Some((_, script)) => tokio::time::sleep(*script + Duration::from_secs(2)).await,
            None => std::future::pending::<()>().await,
        }
    };

    let stats = tokio::select! {
        result = &mut session => result?,
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl-C, ending conversation");
            handle.stop().await?;
            session.await?
        }
        _ = script_end => {
            handle.stop().await?;
            session.await?
        }
    };

    if let Some((endpoint, _)) = dry_run_state {
        endpoint.abort();
    }
    printer.abort();

    info!("Conversation finished: {}", stats);
    Ok(())
}
