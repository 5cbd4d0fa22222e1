use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use tempfile::NamedTempFile;

use frame_bridge::config::BridgeConfig;
use frame_bridge::DetectorKind;

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "FRAME_BRIDGE_CONFIG",
        "FRAME_BRIDGE_PORT",
        "FRAME_BRIDGE_SHM_PORT",
        "FRAME_BRIDGE_SHM_DIR",
        "FRAME_BRIDGE_BIND",
        "FRAME_BRIDGE_DETECTOR",
        "FRAME_BRIDGE_MODEL_PATH",
        "FRAME_BRIDGE_DEBUG_DIR",
        "FRAME_BRIDGE_SEND_TIMEOUT_SECS",
    ] {
        std::env::remove_var(key);
    }
}

#[test]
fn defaults_without_file_or_env() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let cfg = BridgeConfig::load().expect("load defaults");
    assert_eq!(cfg.port, 51000);
    assert_eq!(cfg.shm_port(), 51000);
    assert_eq!(cfg.shm_dir, PathBuf::from("/dev/shm"));
    assert_eq!(cfg.api_addr().unwrap().to_string(), "127.0.0.1:51000");
    assert_eq!(cfg.detector, DetectorKind::Auto);
    assert_eq!(cfg.send_timeout, Duration::from_secs(30));
    assert!(cfg.model_path.is_none());
    assert!(cfg.debug_dir.is_none());
}

#[test]
fn loads_config_from_file_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    let json = r#"{
        "port": 52000,
        "shm_port": 52001,
        "shm_dir": "/tmp/bridge-shm",
        "bind": "0.0.0.0",
        "detector": { "kind": "noop", "model_path": "/models/yolov8n.onnx" },
        "delivery": { "timeout_secs": 10 },
        "debug_dir": "/tmp/bridge-debug"
    }"#;
    std::io::Write::write_all(&mut file, json.as_bytes()).expect("write config");

    std::env::set_var("FRAME_BRIDGE_CONFIG", file.path());
    std::env::set_var("FRAME_BRIDGE_PORT", "53000");
    std::env::set_var("FRAME_BRIDGE_DETECTOR", "model");

    let cfg = BridgeConfig::load().expect("load config");

    assert_eq!(cfg.port, 53000);
    assert_eq!(cfg.shm_port(), 52001);
    assert_eq!(cfg.shm_dir, PathBuf::from("/tmp/bridge-shm"));
    assert_eq!(cfg.api_addr().unwrap().to_string(), "0.0.0.0:53000");
    assert_eq!(cfg.detector, DetectorKind::Model);
    assert_eq!(cfg.model_path, Some(PathBuf::from("/models/yolov8n.onnx")));
    assert_eq!(cfg.send_timeout, Duration::from_secs(10));
    assert_eq!(cfg.debug_dir, Some(PathBuf::from("/tmp/bridge-debug")));

    clear_env();
}

#[test]
fn shm_port_follows_env_port_when_unset() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("FRAME_BRIDGE_PORT", "51500");
    let cfg = BridgeConfig::load().expect("load config");
    assert_eq!(cfg.shm_port(), 51500);

    std::env::set_var("FRAME_BRIDGE_SHM_PORT", "51600");
    let cfg = BridgeConfig::load().expect("load config");
    assert_eq!(cfg.port, 51500);
    assert_eq!(cfg.shm_port(), 51600);

    clear_env();
}

#[test]
fn rejects_invalid_values() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("FRAME_BRIDGE_PORT", "not-a-port");
    assert!(BridgeConfig::load().is_err());
    clear_env();

    std::env::set_var("FRAME_BRIDGE_BIND", "localhost");
    assert!(BridgeConfig::load().is_err());
    clear_env();

    std::env::set_var("FRAME_BRIDGE_DETECTOR", "model");
    let err = BridgeConfig::load().unwrap_err();
    assert!(err.to_string().contains("model path"));
    clear_env();

    std::env::set_var("FRAME_BRIDGE_SEND_TIMEOUT_SECS", "0");
    assert!(BridgeConfig::load().is_err());
    clear_env();

    std::env::set_var("FRAME_BRIDGE_CONFIG", "/nonexistent/frame-bridge.json");
    let err = BridgeConfig::load().unwrap_err();
    assert!(err.to_string().contains("failed to read config file"));
    clear_env();
}
