use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::channel::DEFAULT_SHM_DIR;
use crate::detect::DetectorKind;

pub const DEFAULT_PORT: u16 = 51000;
const DEFAULT_BIND: &str = "127.0.0.1";
const DEFAULT_SEND_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Deserialize, Default)]
struct BridgeConfigFile {
    port: Option<u16>,
    shm_port: Option<u16>,
    shm_dir: Option<PathBuf>,
    bind: Option<String>,
    detector: Option<DetectorConfigFile>,
    delivery: Option<DeliveryConfigFile>,
    debug_dir: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectorConfigFile {
    kind: Option<String>,
    model_path: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Default)]
struct DeliveryConfigFile {
    timeout_secs: Option<u64>,
}

/// Process configuration for the bridge daemon.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Control endpoint port, also stamped on outbound envelopes.
    pub port: u16,
    /// Shared-memory channel id. Follows `port` when unset.
    pub shm_port: Option<u16>,
    pub shm_dir: PathBuf,
    pub bind: String,
    pub detector: DetectorKind,
    pub model_path: Option<PathBuf>,
    pub send_timeout: Duration,
    pub debug_dir: Option<PathBuf>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            shm_port: None,
            shm_dir: PathBuf::from(DEFAULT_SHM_DIR),
            bind: DEFAULT_BIND.to_string(),
            detector: DetectorKind::Auto,
            model_path: None,
            send_timeout: Duration::from_secs(DEFAULT_SEND_TIMEOUT_SECS),
            debug_dir: None,
        }
    }
}

impl BridgeConfig {
    /// Defaults, then the file named by `FRAME_BRIDGE_CONFIG`, then env overrides.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("FRAME_BRIDGE_CONFIG").ok().map(PathBuf::from);
        Self::load_from(config_path.as_deref())
    }

    /// Like `load`, with the config file given explicitly.
    pub fn load_from(config_path: Option<&Path>) -> Result<Self> {
        let file_cfg = match config_path {
            Some(path) => Some(read_config_file(path)?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn shm_port(&self) -> u16 {
        self.shm_port.unwrap_or(self.port)
    }

    pub fn api_addr(&self) -> Result<SocketAddr> {
        let ip: IpAddr = self
            .bind
            .parse()
            .map_err(|_| anyhow!("bind address '{}' is not an IP address", self.bind))?;
        Ok(SocketAddr::new(ip, self.port))
    }

    fn from_file(file: BridgeConfigFile) -> Result<Self> {
        let defaults = Self::default();
        let detector = match file.detector.as_ref().and_then(|d| d.kind.as_deref()) {
            Some(kind) => kind.parse()?,
            None => defaults.detector,
        };
        Ok(Self {
            port: file.port.unwrap_or(defaults.port),
            shm_port: file.shm_port,
            shm_dir: file.shm_dir.unwrap_or(defaults.shm_dir),
            bind: file.bind.unwrap_or(defaults.bind),
            detector,
            model_path: file.detector.and_then(|d| d.model_path),
            send_timeout: file
                .delivery
                .and_then(|d| d.timeout_secs)
                .map(Duration::from_secs)
                .unwrap_or(defaults.send_timeout),
            debug_dir: file.debug_dir,
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(port) = std::env::var("FRAME_BRIDGE_PORT") {
            self.port = parse_port("FRAME_BRIDGE_PORT", &port)?;
        }
        if let Ok(port) = std::env::var("FRAME_BRIDGE_SHM_PORT") {
            self.shm_port = Some(parse_port("FRAME_BRIDGE_SHM_PORT", &port)?);
        }
        if let Ok(dir) = std::env::var("FRAME_BRIDGE_SHM_DIR") {
            if !dir.trim().is_empty() {
                self.shm_dir = PathBuf::from(dir);
            }
        }
        if let Ok(bind) = std::env::var("FRAME_BRIDGE_BIND") {
            if !bind.trim().is_empty() {
                self.bind = bind.trim().to_string();
            }
        }
        if let Ok(kind) = std::env::var("FRAME_BRIDGE_DETECTOR") {
            if !kind.trim().is_empty() {
                self.detector = kind.parse()?;
            }
        }
        if let Ok(path) = std::env::var("FRAME_BRIDGE_MODEL_PATH") {
            if !path.trim().is_empty() {
                self.model_path = Some(PathBuf::from(path));
            }
        }
        if let Ok(path) = std::env::var("FRAME_BRIDGE_DEBUG_DIR") {
            if !path.trim().is_empty() {
                self.debug_dir = Some(PathBuf::from(path));
            }
        }
        if let Ok(timeout) = std::env::var("FRAME_BRIDGE_SEND_TIMEOUT_SECS") {
            let seconds: u64 = timeout.parse().map_err(|_| {
                anyhow!("FRAME_BRIDGE_SEND_TIMEOUT_SECS must be an integer number of seconds")
            })?;
            self.send_timeout = Duration::from_secs(seconds);
        }
        Ok(())
    }

    /// Check cross-field constraints. Run again after command-line overrides.
    pub fn validate(&self) -> Result<()> {
        self.api_addr()?;
        if self.shm_dir.as_os_str().is_empty() {
            return Err(anyhow!("shared memory directory must not be empty"));
        }
        if self.send_timeout.is_zero() {
            return Err(anyhow!("delivery timeout must be greater than zero"));
        }
        if self.detector == DetectorKind::Model && self.model_path.is_none() {
            return Err(anyhow!("detector 'model' requires a model path"));
        }
        Ok(())
    }
}

fn parse_port(key: &str, value: &str) -> Result<u16> {
    value
        .trim()
        .parse()
        .map_err(|_| anyhow!("{} must be a port number, got '{}'", key, value))
}

fn read_config_file(path: &Path) -> Result<BridgeConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}
