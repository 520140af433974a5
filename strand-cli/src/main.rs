//! strand CLI entrypoint.
//!
//! ```bash
//! strand synth --output capture.264 --frames 300 --codec h264
//! strand synth --output capture.264 --json
//! strand probe --json
//! ```
//!
//! `synth` drives the full pipeline against the built-in mock device and
//! encoder, persisting a deterministic bitstream through the overlapped
//! file writer — hardware-free smoke coverage for the whole submit/drain
//! path.  `probe` reports encoder capabilities.

use std::io::IsTerminal;
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use serde_json::json;

use strand_core::config::Codec;
use strand_core::error::{Result, StrandError};
use strand_core::session::EncoderSession;
use strand_core::types::ResourceState;
use strand_encode::coordinator::{FrameCoordinator, PipelineConfig};
use strand_encode::mock::{MockDevice, MockSession};
use strand_io::BitstreamWriter;

const JSON_SCHEMA_VERSION: u32 = 1;

#[derive(Parser, Debug)]
#[command(
    name = "strand",
    version,
    about = "Cross-device encode pipeline",
    arg_required_else_help = true,
    after_help = "Examples:\n  strand probe --json\n  strand synth --output capture.264 --frames 300\n  strand synth --output capture.264 --codec hevc --json"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the pipeline end to end on the synthetic encoder backend.
    Synth(SynthArgs),
    /// Probe encoder capabilities and print a report.
    Probe(ProbeArgs),
}

#[derive(Args, Debug, Clone)]
struct SynthArgs {
    /// Output bitstream file (raw elementary stream).
    #[arg(short = 'o', long = "output")]
    output: PathBuf,

    /// Number of frames to render and encode.
    #[arg(short = 'n', long = "frames", default_value_t = 120)]
    frames: u32,

    /// Frame width in pixels.
    #[arg(long = "width", default_value_t = 1280)]
    width: u32,

    /// Frame height in pixels.
    #[arg(long = "height", default_value_t = 720)]
    height: u32,

    /// Target codec.
    #[arg(long = "codec", value_enum, default_value_t = CodecArg::H264)]
    codec: CodecArg,

    /// Frames per second.
    #[arg(long = "fps", default_value_t = 60)]
    fps: u32,

    /// Average bitrate in kbps.
    #[arg(long = "bitrate", default_value_t = 8000)]
    bitrate_kbps: u32,

    /// Shared texture / ring slot count (frames in flight).
    #[arg(long = "buffers", default_value_t = 3)]
    buffers: usize,

    /// Emit structured JSON output to stdout.
    #[arg(long = "json", default_value_t = false)]
    json: bool,
}

#[derive(Args, Debug, Clone)]
struct ProbeArgs {
    /// Emit structured JSON output to stdout.
    #[arg(long = "json", default_value_t = false)]
    json: bool,
}

#[derive(ValueEnum, Debug, Clone, Copy)]
enum CodecArg {
    H264,
    Hevc,
    Av1,
}

impl From<CodecArg> for Codec {
    fn from(arg: CodecArg) -> Self {
        match arg {
            CodecArg::H264 => Codec::H264,
            CodecArg::Hevc => Codec::Hevc,
            CodecArg::Av1 => Codec::Av1,
        }
    }
}

fn main() {
    init_tracing();

    let cli = Cli::parse();
    let json_error_command = match &cli.command {
        Commands::Synth(args) if args.json => Some("synth"),
        Commands::Probe(args) if args.json => Some("probe"),
        _ => None,
    };

    let result = match cli.command {
        Commands::Synth(args) => run_synth(&args),
        Commands::Probe(args) => run_probe(&args),
    };

    match result {
        Ok(()) => std::process::exit(0),
        Err(err) => {
            if let Some(command) = json_error_command {
                println!("{}", command_error_json(command, &err.to_string()));
            } else {
                tracing::error!(error = %err, code = err.error_code(), "Command failed");
            }
            std::process::exit(err.error_code() as i32);
        }
    }
}

fn init_tracing() {
    let ansi_enabled = std::env::var_os("NO_COLOR").is_none() && std::io::stderr().is_terminal();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_ansi(ansi_enabled)
        .init();
}

fn command_error_json(command: &str, error: &str) -> String {
    json!({
        "schema_version": JSON_SCHEMA_VERSION,
        "command": command,
        "ok": false,
        "error": error,
    })
    .to_string()
}

fn run_synth(args: &SynthArgs) -> Result<()> {
    if args.frames == 0 {
        return Err(StrandError::Unsupported(
            "--frames must be at least 1".into(),
        ));
    }

    let writer = BitstreamWriter::create(&args.output)?;
    let device = MockDevice::new();
    let session = MockSession::auto_completing();
    let config = PipelineConfig {
        width: args.width,
        height: args.height,
        frame_rate: args.fps,
        bitrate: args.bitrate_kbps.saturating_mul(1000),
        codec: args.codec.into(),
        buffer_count: args.buffers,
        ..PipelineConfig::default()
    };
    let mut coordinator = FrameCoordinator::new(&device, session, writer, config)?;

    for _ in 0..args.frames {
        // Stand-in render loop: barrier to render target, "draw", barrier
        // back for the encoder copy, then signal frame readiness.
        let texture = coordinator.current_texture_index();
        coordinator.transition_texture(texture, ResourceState::RenderTarget)?;
        coordinator.transition_texture(texture, ResourceState::Common)?;
        let ready = coordinator.next_ready_value();
        coordinator.current_ready_fence().signal(ready);

        coordinator.encode_frame()?;
        coordinator.sink_mut().drain_completed()?;
    }
    coordinator.finish()?;

    let stats = coordinator.stats();
    let writer_stats = coordinator.sink_mut().stats();
    if args.json {
        println!(
            "{}",
            json!({
                "schema_version": JSON_SCHEMA_VERSION,
                "command": "synth",
                "ok": true,
                "output": args.output.display().to_string(),
                "frames": args.frames,
                "width": args.width,
                "height": args.height,
                "codec": format!("{:?}", Codec::from(args.codec)),
                "pipeline": stats,
                "writer": writer_stats,
            })
        );
    } else {
        tracing::info!(
            output = %args.output.display(),
            frames = args.frames,
            submitted = stats.submitted_frames,
            completed = stats.completed_frames,
            waits = stats.wait_count,
            bytes = writer_stats.bytes_written,
            "Synthetic encode complete"
        );
        println!(
            "synth: command=synth frames={} bytes={} waits={}",
            stats.completed_frames, writer_stats.bytes_written, stats.wait_count
        );
    }
    Ok(())
}

fn run_probe(args: &ProbeArgs) -> Result<()> {
    let mut session = MockSession::new();
    let caps = session.capabilities()?;

    if args.json {
        println!(
            "{}",
            json!({
                "schema_version": JSON_SCHEMA_VERSION,
                "command": "probe",
                "ok": true,
                "capabilities": caps,
            })
        );
    } else {
        println!(
            "probe: h264={} hevc={} av1={} max={}x{} async={} 10bit={}",
            caps.supports_h264,
            caps.supports_hevc,
            caps.supports_av1,
            caps.max_width,
            caps.max_height,
            caps.supports_async_encode,
            caps.supports_10bit
        );
    }
    Ok(())
}
