use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use rcsp_core::{
    BleTransport, CancelHandle, Connection, LogLevel, MediaKind, UploadConfig, UploadEvent,
    UploadObserver,
};

#[derive(Parser, Debug)]
#[command(
    name = "rcsp",
    author,
    version,
    about = "Media uploader for RCSP LED badges (Pure Rust)",
    long_about = "Uploads JPEG stills and MJPG/AVI animations to Jieli RCSP badge \
                  peripherals over BLE, and exposes the auxiliary query surface."
)]
struct Args {
    /// Device name or address substring to connect to
    #[arg(long, global = true)]
    device: Option<String>,

    /// BLE scan duration in seconds
    #[arg(long, global = true)]
    scan_timeout: Option<u64>,

    /// Path to a TOML config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Upload a media file to the badge
    Upload {
        /// Path to the payload (JPEG still or MJPG/AVI animation)
        file: PathBuf,

        /// Treat the payload as an animation (default: still)
        #[arg(long)]
        animation: bool,
    },
    /// Read the battery level
    Battery,
    /// Read display properties
    ScreenInfo,
    /// Browse a device directory
    Browse {
        /// Directory path on the device
        #[arg(long, default_value = "/")]
        path: String,
    },
}

/// CLI observer that prints progress to stderr.
struct CliObserver {
    verbose: bool,
}

impl UploadObserver for CliObserver {
    fn on_event(&self, event: &UploadEvent) {
        match event {
            UploadEvent::PhaseChanged { from, to } => {
                if self.verbose {
                    eprintln!("→ Phase: {from} → {to}");
                }
            }
            UploadEvent::Progress { sent, total } => {
                let pct = if *total > 0 { sent * 100 / total } else { 0 };
                eprint!("\r[{pct:>3}%] {sent}/{total} bytes");
                if sent == total {
                    eprintln!();
                }
            }
            UploadEvent::WindowGranted {
                win_size,
                next_offset,
            } => {
                if self.verbose {
                    eprintln!("← Window: {win_size} bytes at offset {next_offset}");
                }
            }
            UploadEvent::Log { level, message } => match level {
                LogLevel::Error => eprintln!("ERROR: {message}"),
                LogLevel::Warn => eprintln!("WARN: {message}"),
                _ if self.verbose => eprintln!("INFO: {message}"),
                _ => {}
            },
            UploadEvent::DeviceStatus { phase, status } => {
                eprintln!("! Device status 0x{status:02X} during {phase}");
            }
            UploadEvent::Complete => {
                eprintln!("✓ Upload complete!");
            }
        }
    }
}

fn main() {
    let args = Args::parse();

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(if args.verbose {
                    tracing::Level::DEBUG.into()
                } else {
                    tracing::Level::WARN.into()
                })
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    if let Err(e) = run(args) {
        eprintln!("✗ FAILED: {e:#}");
        std::process::exit(1);
    }
}

fn run(args: Args) -> Result<()> {
    let mut config = match &args.config {
        Some(path) => UploadConfig::load_from_file(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => UploadConfig::default(),
    };
    if args.device.is_some() {
        config.device = args.device.clone();
    }
    if let Some(secs) = args.scan_timeout {
        config.scan_timeout_secs = secs;
    }

    info!("Scanning for badge...");
    let transport = BleTransport::connect(
        config.device.as_deref(),
        Duration::from_secs(config.scan_timeout_secs),
    )
    .context("connecting to badge")?;
    let connection = Connection::open(Arc::new(transport)).context("opening connection")?;
    eprintln!("✓ Badge connected");

    match args.command {
        Command::Upload { file, animation } => {
            let payload = std::fs::read(&file)
                .with_context(|| format!("reading {}", file.display()))?;
            let kind = if animation {
                MediaKind::Animation
            } else {
                MediaKind::Still
            };
            let observer = CliObserver {
                verbose: args.verbose,
            };
            let cancel = CancelHandle::new();
            connection
                .upload_with(&payload, kind, &observer, &cancel)
                .context("upload failed")?;
        }
        Command::Battery => {
            connection.authenticate().context("authentication failed")?;
            let battery = connection.client().battery().context("battery read")?;
            println!("Battery: {}% (status 0x{:02X})", battery.level, battery.status);
        }
        Command::ScreenInfo => {
            connection.authenticate().context("authentication failed")?;
            let info = connection.client().screen_info().context("screen info read")?;
            println!(
                "Screen: {}x{}  picture: {}x{}  memory: {} bytes",
                info.width, info.height, info.pic_width, info.pic_height, info.memory
            );
        }
        Command::Browse { path } => {
            connection.authenticate().context("authentication failed")?;
            let client = connection.client();
            let entries = client
                .start_file_browse(0x00, 16, 0, 0, path.as_bytes())
                .context("file browse")?;
            for entry in &entries {
                println!("type 0x{:02X}  {} bytes", entry.ty, entry.data.len());
            }
            client.stop_file_browse().context("stopping browse")?;
            println!("{} entries", entries.len());
        }
    }
    Ok(())
}
