//! Mirroring configuration loaded from TOML.

use std::path::PathBuf;
use std::time::Duration;

use devmirror_record::{RecordFormat, FALLBACK_DURATION_US};
use devmirror_types::PortRange;
use serde::{Deserialize, Serialize};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub bridge: BridgeConfig,
    #[serde(default)]
    pub tunnel: TunnelConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub record: RecordConfig,
    #[serde(default)]
    pub control: ControlConfig,
}

/// Host-side bridge utility.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    #[serde(default = "default_executable")]
    pub executable: String,
    /// Device serial; `None` lets the bridge pick the only device.
    #[serde(default)]
    pub serial: Option<String>,
    /// Shell command starting the companion on the device. Empty means the
    /// companion is started by something else.
    #[serde(default = "default_companion_command")]
    pub companion_command: Vec<String>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            executable: default_executable(),
            serial: None,
            companion_command: default_companion_command(),
        }
    }
}

/// Tunnel establishment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TunnelConfig {
    #[serde(default)]
    pub port_range: PortRange,
    #[serde(default = "default_socket_name")]
    pub socket_name: String,
    /// Skip reverse mode and forward straight away.
    #[serde(default)]
    pub force_forward: bool,
    #[serde(default = "default_connect_attempts")]
    pub connect_attempts: u32,
    #[serde(default = "default_connect_delay_ms")]
    pub connect_delay_ms: u64,
}

impl Default for TunnelConfig {
    fn default() -> Self {
        Self {
            port_range: PortRange::default(),
            socket_name: default_socket_name(),
            force_forward: false,
            connect_attempts: default_connect_attempts(),
            connect_delay_ms: default_connect_delay_ms(),
        }
    }
}

impl TunnelConfig {
    pub fn connect_delay(&self) -> Duration {
        Duration::from_millis(self.connect_delay_ms)
    }
}

/// Session lifecycle and logging.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// How long to wait for the companion to exit on stop before killing it.
    #[serde(default = "default_watchdog_timeout_ms")]
    pub watchdog_timeout_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            watchdog_timeout_ms: default_watchdog_timeout_ms(),
        }
    }
}

impl SessionConfig {
    pub fn watchdog_timeout(&self) -> Duration {
        Duration::from_millis(self.watchdog_timeout_ms)
    }
}

/// Recording of the video stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordConfig {
    /// Output file; recording is off when unset.
    #[serde(default)]
    pub path: Option<PathBuf>,
    /// Container; inferred from the file extension when unset.
    #[serde(default)]
    pub format: Option<RecordFormat>,
    #[serde(default = "default_fallback_duration_us")]
    pub fallback_duration_us: u64,
}

impl Default for RecordConfig {
    fn default() -> Self {
        Self {
            path: None,
            format: None,
            fallback_duration_us: default_fallback_duration_us(),
        }
    }
}

/// Control channel and clipboard synchronisation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_true")]
    pub clipboard_sync: bool,
    /// How long queued control messages may keep draining on stop before
    /// the socket is closed under the writer.
    #[serde(default = "default_drain_timeout_ms")]
    pub drain_timeout_ms: u64,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            clipboard_sync: true,
            drain_timeout_ms: default_drain_timeout_ms(),
        }
    }
}

impl ControlConfig {
    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }
}

fn default_executable() -> String {
    "adb".to_string()
}

fn default_companion_command() -> Vec<String> {
    vec![
        "CLASSPATH=/data/local/tmp/devmirror-server.jar".to_string(),
        "app_process".to_string(),
        "/".to_string(),
        "devmirror.Server".to_string(),
    ]
}

fn default_socket_name() -> String {
    "devmirror".to_string()
}

fn default_connect_attempts() -> u32 {
    100
}

fn default_connect_delay_ms() -> u64 {
    100
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_watchdog_timeout_ms() -> u64 {
    1000
}

fn default_fallback_duration_us() -> u64 {
    FALLBACK_DURATION_US
}

fn default_drain_timeout_ms() -> u64 {
    500
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let config = Config::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        assert!(toml_str.contains("socket_name = \"devmirror\""));
        assert!(toml_str.contains("first = 27183"));
    }

    #[test]
    fn empty_file_gives_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.tunnel.port_range.first(), 27183);
        assert_eq!(config.tunnel.port_range.last(), 27199);
        assert_eq!(config.tunnel.connect_attempts, 100);
        assert_eq!(config.tunnel.connect_delay(), Duration::from_millis(100));
        assert_eq!(config.session.watchdog_timeout(), Duration::from_secs(1));
        assert_eq!(config.record.fallback_duration_us, 100_000);
        assert_eq!(config.bridge.executable, "adb");
        assert!(config.control.enabled);
        assert_eq!(config.control.drain_timeout(), Duration::from_millis(500));
    }

    #[test]
    fn parse_example_config() {
        let toml_str = r#"
[bridge]
executable = "/opt/platform-tools/adb"
serial = "0123456789ABCDEF"

[tunnel]
port_range = { first = 27200, last = 27210 }
force_forward = true

[session]
log_level = "debug"

[record]
path = "/tmp/screen.mkv"
format = "mkv"

[control]
clipboard_sync = false
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.bridge.serial.as_deref(), Some("0123456789ABCDEF"));
        assert_eq!(config.tunnel.port_range.first(), 27200);
        assert!(config.tunnel.force_forward);
        assert_eq!(config.tunnel.socket_name, "devmirror");
        assert_eq!(config.session.log_level, "debug");
        assert_eq!(config.record.format, Some(RecordFormat::Matroska));
        assert!(config.control.enabled);
        assert!(!config.control.clipboard_sync);
    }

    #[test]
    fn reversed_port_range_is_rejected() {
        let toml_str = "[tunnel]\nport_range = { first = 10, last = 5 }\n";
        assert!(toml::from_str::<Config>(toml_str).is_err());
    }
}
