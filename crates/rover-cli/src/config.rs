//! Configuration – reads/writes `~/.rover/config.toml`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use rover_runtime::ControlLoopConfig;
use serde::{Deserialize, Serialize};

/// One `input → device.operation` link.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkConfig {
    pub input: String,
    pub device: String,
    /// Operation name, e.g. `"set_target_velocity"`.
    pub operation: String,
}

/// Parameters of the simulated rig.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    pub motor_current_limit: f64,
    pub servo_min_pulse_us: f64,
    pub servo_max_pulse_us: f64,
    pub servo_initial_position: f64,
    pub gps_fix_delay_ms: u64,
    pub gps_report_ms: u64,
    pub gps_lat: f64,
    pub gps_lng: f64,
    pub gps_alt: f64,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            motor_current_limit: 15.0,
            servo_min_pulse_us: 500.0,
            servo_max_pulse_us: 2500.0,
            servo_initial_position: 90.0,
            gps_fix_delay_ms: 1500,
            gps_report_ms: 200,
            gps_lat: 49.2827,
            gps_lng: -123.1207,
            gps_alt: 70.0,
        }
    }
}

/// Persisted configuration stored in `~/.rover/config.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// HTTP/WebSocket port observers connect to.
    #[serde(default = "default_cockpit_port")]
    pub cockpit_port: u16,

    /// Longest one input read may block the control loop.
    #[serde(default = "default_input_poll_ms")]
    pub input_poll_ms: u64,

    /// Full-state broadcast cadence.
    #[serde(default = "default_full_sync_ms")]
    pub full_sync_ms: u64,

    /// Delta broadcast cadence and minimum broadcast spacing.
    #[serde(default = "default_delta_ms")]
    pub delta_ms: u64,

    /// Readiness barrier bound; `0` waits forever.
    #[serde(default = "default_readiness_timeout_secs")]
    pub readiness_timeout_secs: u64,

    /// Keep going after a readiness timeout instead of aborting.
    #[serde(default)]
    pub degraded_start: bool,

    /// Start in manual (operator) mode.
    #[serde(default = "default_true")]
    pub start_manual: bool,

    #[serde(default = "default_links")]
    pub links: Vec<LinkConfig>,

    #[serde(default)]
    pub sim: SimConfig,
}

fn default_cockpit_port() -> u16 {
    8080
}
fn default_input_poll_ms() -> u64 {
    50
}
fn default_full_sync_ms() -> u64 {
    500
}
fn default_delta_ms() -> u64 {
    100
}
fn default_readiness_timeout_secs() -> u64 {
    30
}
fn default_true() -> bool {
    true
}
fn default_links() -> Vec<LinkConfig> {
    vec![
        LinkConfig {
            input: "throttle".to_string(),
            device: "dc_motor".to_string(),
            operation: "set_target_velocity".to_string(),
        },
        LinkConfig {
            input: "direction".to_string(),
            device: "servo".to_string(),
            operation: "set_target_position".to_string(),
        },
    ]
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cockpit_port: default_cockpit_port(),
            input_poll_ms: default_input_poll_ms(),
            full_sync_ms: default_full_sync_ms(),
            delta_ms: default_delta_ms(),
            readiness_timeout_secs: default_readiness_timeout_secs(),
            degraded_start: false,
            start_manual: true,
            links: default_links(),
            sim: SimConfig::default(),
        }
    }
}

impl Config {
    pub fn control_loop_config(&self) -> ControlLoopConfig {
        ControlLoopConfig {
            input_poll: Duration::from_millis(self.input_poll_ms),
            full_sync_interval: Duration::from_millis(self.full_sync_ms),
            delta_interval: Duration::from_millis(self.delta_ms),
            start_manual: self.start_manual,
        }
    }

    pub fn readiness_timeout(&self) -> Option<Duration> {
        match self.readiness_timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }
}

/// Return the path to `~/.rover/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".rover").join("config.toml")
}

/// How [`load_or_init`] obtained the configuration.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigOrigin {
    /// Read from an existing file.
    File,
    /// No file existed; the defaults were written.
    Created,
    /// No file existed and the defaults could not be written.
    Unsaved(String),
}

/// Load `~/.rover/config.toml`, writing the defaults on first run, then apply
/// `ROVER_*` overrides.  Overrides never reach the file.
pub fn load_or_init() -> Result<(Config, ConfigOrigin), String> {
    load_or_init_at(&config_path(), |var| std::env::var(var).ok())
}

pub(crate) fn load_or_init_at(
    path: &Path,
    env: impl Fn(&str) -> Option<String>,
) -> Result<(Config, ConfigOrigin), String> {
    let (mut cfg, origin) = match load_from(path)? {
        Some(cfg) => (cfg, ConfigOrigin::File),
        None => {
            let cfg = Config::default();
            let origin = match save_to(&cfg, path) {
                Ok(()) => ConfigOrigin::Created,
                Err(e) => ConfigOrigin::Unsaved(e),
            };
            (cfg, origin)
        }
    };
    apply_overrides_from(&mut cfg, env);
    Ok((cfg, origin))
}

/// Read the config file as written, without environment overrides.
/// Returns `None` if the file does not exist.
pub(crate) fn load_from(path: &Path) -> Result<Option<Config>, String> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read config at {}: {}", path.display(), e))?;
    let cfg: Config =
        toml::from_str(&raw).map_err(|e| format!("Failed to parse config: {}", e))?;
    Ok(Some(cfg))
}

/// Apply `ROVER_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `ROVER_COCKPIT_PORT` | `cockpit_port` |
/// | `ROVER_FULL_SYNC_MS` | `full_sync_ms` |
/// | `ROVER_DELTA_MS` | `delta_ms` |
/// | `ROVER_READINESS_TIMEOUT_SECS` | `readiness_timeout_secs` |
///
/// Unparseable values are ignored.
pub(crate) fn apply_overrides_from(cfg: &mut Config, env: impl Fn(&str) -> Option<String>) {
    let parse = |var: &str| env(var).and_then(|raw| raw.trim().parse::<u64>().ok());
    if let Some(port) = env("ROVER_COCKPIT_PORT").and_then(|raw| raw.trim().parse().ok()) {
        cfg.cockpit_port = port;
    }
    if let Some(ms) = parse("ROVER_FULL_SYNC_MS") {
        cfg.full_sync_ms = ms;
    }
    if let Some(ms) = parse("ROVER_DELTA_MS") {
        cfg.delta_ms = ms;
    }
    if let Some(secs) = parse("ROVER_READINESS_TIMEOUT_SECS") {
        cfg.readiness_timeout_secs = secs;
    }
}

/// Save the config to disk, creating the parent directory if necessary.
pub(crate) fn save_to(cfg: &Config, path: &Path) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| format!("Failed to create config directory: {}", e))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(parent, fs::Permissions::from_mode(0o700))
                .map_err(|e| format!("Failed to set config directory permissions: {}", e))?;
        }
    }
    let raw = toml::to_string_pretty(cfg)
        .map_err(|e| format!("Failed to serialize config: {}", e))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
            .and_then(|mut f| {
                use std::io::Write;
                f.write_all(raw.as_bytes())
            })
            .map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))?;
    }
    #[cfg(not(unix))]
    fs::write(path, raw)
        .map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_default_config() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());

        save_to(&Config::default(), &path).expect("save");

        let loaded = load_from(&path).expect("load ok").expect("some");
        assert_eq!(loaded.cockpit_port, 8080);
        assert_eq!(loaded.links, default_links());
        assert_eq!(loaded.sim, SimConfig::default());
    }

    #[test]
    fn missing_fields_take_defaults() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "delta_ms = 150\n\n[sim]\ngps_fix_delay_ms = 10\n").expect("write");

        let cfg = load_from(&path).expect("load ok").expect("some");
        assert_eq!(cfg.delta_ms, 150);
        assert_eq!(cfg.full_sync_ms, 500);
        assert_eq!(cfg.sim.gps_fix_delay_ms, 10);
        assert_eq!(cfg.sim.motor_current_limit, 15.0);
        assert_eq!(cfg.links.len(), 2);
    }

    #[test]
    fn links_are_configurable() {
        let raw = r#"
            [[links]]
            input = "speed"
            device = "dc_motor"
            operation = "setTargetVelocity"
        "#;
        let cfg: Config = toml::from_str(raw).expect("parse");
        assert_eq!(cfg.links.len(), 1);
        assert_eq!(cfg.links[0].input, "speed");
    }

    #[test]
    fn malformed_config_is_an_error() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "cockpit_port = \"eighty\"").expect("write");
        assert!(load_from(&path).is_err());
    }

    #[test]
    fn load_from_returns_none_when_missing() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());
        assert!(load_from(&path).expect("no error").is_none());
    }

    #[test]
    fn config_path_points_to_rover_dir() {
        let p = config_path_for_home("/home/operator");
        assert!(p.to_string_lossy().contains(".rover"));
        assert!(p.to_string_lossy().ends_with("config.toml"));
    }

    #[cfg(unix)]
    #[test]
    fn config_file_has_restrictive_permissions() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());
        save_to(&Config::default(), &path).expect("save");

        let file_mode = std::fs::metadata(&path).expect("meta").permissions().mode() & 0o777;
        assert_eq!(file_mode, 0o600);
    }

    #[test]
    fn control_loop_config_uses_millisecond_fields() {
        let cfg = Config {
            full_sync_ms: 400,
            delta_ms: 80,
            start_manual: false,
            ..Config::default()
        };
        let lc = cfg.control_loop_config();
        assert_eq!(lc.full_sync_interval, Duration::from_millis(400));
        assert_eq!(lc.delta_interval, Duration::from_millis(80));
        assert!(!lc.start_manual);
    }

    #[test]
    fn zero_readiness_timeout_means_unbounded() {
        let cfg = Config {
            readiness_timeout_secs: 0,
            ..Config::default()
        };
        assert_eq!(cfg.readiness_timeout(), None);
        assert_eq!(Config::default().readiness_timeout(), Some(Duration::from_secs(30)));
    }

    fn fake_env(pairs: &'static [(&'static str, &'static str)]) -> impl Fn(&str) -> Option<String> {
        move |var: &str| pairs.iter().find(|(k, _)| *k == var).map(|(_, v)| v.to_string())
    }

    #[test]
    fn env_overrides_apply_and_ignore_garbage() {
        let mut cfg = Config::default();
        apply_overrides_from(
            &mut cfg,
            fake_env(&[("ROVER_DELTA_MS", " 120 "), ("ROVER_COCKPIT_PORT", "not-a-port")]),
        );
        assert_eq!(cfg.delta_ms, 120);
        assert_eq!(cfg.cockpit_port, 8080);
    }

    #[test]
    fn first_run_writes_defaults_not_overrides() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());
        let env = fake_env(&[("ROVER_FULL_SYNC_MS", "777"), ("ROVER_COCKPIT_PORT", "9191")]);

        let (cfg, origin) = load_or_init_at(&path, &env).expect("init");
        assert_eq!(origin, ConfigOrigin::Created);
        assert_eq!(cfg.full_sync_ms, 777);
        assert_eq!(cfg.cockpit_port, 9191);

        let on_disk = load_from(&path).expect("load ok").expect("some");
        assert_eq!(on_disk, Config::default());

        let (again, origin) = load_or_init_at(&path, |_| None).expect("reload");
        assert_eq!(origin, ConfigOrigin::File);
        assert_eq!(again.full_sync_ms, 500);
    }
}
