//! devmirror CLI: mirror and control a device through the host bridge.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use devmirror_bridge::AdbBridge;
use devmirror_clipboard::SystemClipboard;
use devmirror_record::RecordFormat;
use devmirror_session::setup::load_config;
use devmirror_session::{Config, Mirror, MirrorReport};
use devmirror_types::PortRange;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "devmirror",
    about = "Mirror and control a device over a bridged tunnel",
    version,
    propagate_version = true
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect to the device and mirror it until interrupted.
    Mirror(MirrorArgs),

    /// Print the effective configuration as TOML.
    Config {
        /// Path to configuration file.
        #[arg(short, long)]
        config: Option<String>,
    },
}

#[derive(Args)]
struct MirrorArgs {
    /// Path to configuration file.
    #[arg(short, long)]
    config: Option<String>,

    /// Serial of the device to use when several are attached.
    #[arg(short, long)]
    serial: Option<String>,

    /// Local ports to try, as `first:last` or a single port.
    #[arg(long, value_name = "A:B")]
    port_range: Option<PortRange>,

    /// Skip the reverse tunnel and connect to the device directly.
    #[arg(long)]
    force_forward: bool,

    /// Record the video stream to this file.
    #[arg(short, long, value_name = "FILE")]
    record: Option<PathBuf>,

    /// Container for the recording; inferred from the extension if absent.
    #[arg(long, value_name = "mkv|mp4")]
    record_format: Option<RecordFormat>,

    /// Open the session without input forwarding or clipboard sync.
    #[arg(long)]
    no_control: bool,
}

impl MirrorArgs {
    /// Command-line flags take precedence over the config file.
    fn apply(&self, mut config: Config) -> Config {
        if let Some(serial) = &self.serial {
            config.bridge.serial = Some(serial.clone());
        }
        if let Some(range) = self.port_range {
            config.tunnel.port_range = range;
        }
        if self.force_forward {
            config.tunnel.force_forward = true;
        }
        if let Some(path) = &self.record {
            config.record.path = Some(path.clone());
        }
        if let Some(format) = self.record_format {
            config.record.format = Some(format);
        }
        if self.no_control {
            config.control.enabled = false;
        }
        config
    }
}

fn init_tracing(default_level: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Mirror(args) => {
            let config = args.apply(load_config(args.config.as_deref())?);
            init_tracing(&config.session.log_level);
            let report = run_mirror(config).await?;
            log_report(&report);
        }
        Commands::Config { config } => {
            let config = load_config(config.as_deref())?;
            print!("{}", toml::to_string_pretty(&config)?);
        }
    }

    Ok(())
}

async fn run_mirror(config: Config) -> anyhow::Result<MirrorReport> {
    info!(
        bridge = %config.bridge.executable,
        ports = %config.tunnel.port_range,
        "starting devmirror"
    );
    let bridge = Arc::new(AdbBridge::new(
        config.bridge.executable.clone(),
        config.bridge.serial.clone(),
    ));

    let mut mirror = tokio::task::spawn_blocking(move || {
        Mirror::start(bridge, &config, SystemClipboard::new())
    })
    .await
    .context("session setup panicked")??;
    info!(device = %mirror.device(), "mirroring, press Ctrl-C to stop");

    let stop = mirror.stop_handle()?;
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupted, stopping");
            stop.interrupt();
        }
    });

    let mirror = tokio::task::spawn_blocking(move || {
        if let Err(e) = mirror.wait() {
            error!(error = %e, "video stream failed");
        }
        mirror
    })
    .await
    .context("video stream reader panicked")?;
    interrupt.abort();

    let report = tokio::task::spawn_blocking(move || mirror.stop())
        .await
        .context("shutdown panicked")?;
    Ok(report)
}

fn log_report(report: &MirrorReport) {
    info!(
        packets = report.packets,
        control_messages = report.control_messages,
        "session finished"
    );
    match &report.receiver {
        Some(Ok(count)) => info!(device_messages = count, "device messages handled"),
        Some(Err(e)) => error!(error = %e, "device message stream failed"),
        None => {}
    }
    match &report.recording {
        Some(Ok(summary)) => info!(frames = summary.frames, "recording finalized"),
        Some(Err(e)) => warn!(error = %e, "recording incomplete"),
        None => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_config() {
        let cli = Cli::parse_from([
            "devmirror",
            "mirror",
            "--serial",
            "emulator-5554",
            "--port-range",
            "27200:27210",
            "--force-forward",
            "--record",
            "out.bin",
            "--record-format",
            "mp4",
            "--no-control",
        ]);
        let Commands::Mirror(args) = cli.command else {
            panic!("expected mirror command");
        };
        let config = args.apply(Config::default());
        assert_eq!(config.bridge.serial.as_deref(), Some("emulator-5554"));
        assert_eq!(config.tunnel.port_range, PortRange::new(27200, 27210).unwrap());
        assert!(config.tunnel.force_forward);
        assert_eq!(config.record.path, Some(PathBuf::from("out.bin")));
        assert_eq!(config.record.format, Some(RecordFormat::Mp4));
        assert!(!config.control.enabled);
    }

    #[test]
    fn absent_flags_keep_config() {
        let cli = Cli::parse_from(["devmirror", "mirror"]);
        let Commands::Mirror(args) = cli.command else {
            panic!("expected mirror command");
        };
        let mut config = Config::default();
        config.tunnel.force_forward = true;
        let applied = args.apply(config.clone());
        assert!(applied.tunnel.force_forward);
        assert_eq!(applied.tunnel.port_range, config.tunnel.port_range);
        assert!(applied.control.enabled);
        assert!(applied.record.path.is_none());
    }

    #[test]
    fn bad_port_range_is_rejected() {
        assert!(Cli::try_parse_from(["devmirror", "mirror", "--port-range", "9:1"]).is_err());
    }
}
