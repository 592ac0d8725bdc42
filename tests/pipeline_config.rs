use std::sync::Mutex;
use std::time::Duration;

use tempfile::NamedTempFile;

use maskwatch::PipelineConfig;

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "MASKWATCH_CONFIG",
        "MASKWATCH_QUEUE_SIZE",
        "MASKWATCH_BATCH_SIZE",
        "MASKWATCH_MAX_WORKERS",
        "MASKWATCH_ALERT_COOLDOWN_SECS",
        "MASKWATCH_MIN_VIOLATIONS",
        "MASKWATCH_SOURCES",
    ] {
        std::env::remove_var(key);
    }
}

#[test]
fn loads_config_from_file_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    let json = r#"{
        "queue_size": 200,
        "batch_size": 20,
        "max_workers": 6,
        "poll_timeout_ms": 250,
        "alert_cooldown_secs": 120,
        "min_violations_for_alert": 5,
        "resize": { "width": 320, "height": 240 },
        "streams": [
            { "name": "lobby", "source_uri": "stub://lobby", "target_fps": 15 },
            { "name": "entrance", "source_uri": "stub://entrance", "enabled": false }
        ]
    }"#;
    std::io::Write::write_all(&mut file, json.as_bytes()).expect("write config");

    std::env::set_var("MASKWATCH_CONFIG", file.path());
    std::env::set_var("MASKWATCH_MAX_WORKERS", "2");
    std::env::set_var("MASKWATCH_ALERT_COOLDOWN_SECS", "60");

    let cfg = PipelineConfig::load().expect("load config");

    assert_eq!(cfg.queue_size, 200);
    assert_eq!(cfg.batch_size, 20);
    assert_eq!(cfg.max_workers, 2);
    assert_eq!(cfg.poll_timeout, Duration::from_millis(250));
    assert_eq!(cfg.alert_cooldown, Duration::from_secs(60));
    assert_eq!(cfg.min_violations_for_alert, 5);
    assert_eq!(cfg.resolution.width, 320);
    assert_eq!(cfg.resolution.height, 240);
    assert_eq!(cfg.streams.len(), 2);
    assert_eq!(cfg.streams[0].name, "lobby");
    assert_eq!(cfg.streams[0].target_fps, 15);
    assert!(cfg.streams[0].enabled);
    assert!(!cfg.streams[1].enabled);

    clear_env();
}

#[test]
fn defaults_apply_without_config_file() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let cfg = PipelineConfig::load().expect("load config");

    assert_eq!(cfg.queue_size, 100);
    assert_eq!(cfg.batch_size, 10);
    assert_eq!(cfg.max_workers, 4);
    assert_eq!(cfg.alert_cooldown, Duration::from_secs(300));
    assert_eq!(cfg.min_violations_for_alert, 3);
    assert!(cfg.streams.is_empty());

    clear_env();
}

#[test]
fn sources_env_replaces_configured_streams() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("MASKWATCH_SOURCES", "stub://front,dock=stub://dock");
    let cfg = PipelineConfig::load().expect("load config");

    assert_eq!(cfg.streams.len(), 2);
    assert_eq!(cfg.streams[0].name, "camera_0");
    assert_eq!(cfg.streams[0].source_uri, "stub://front");
    assert_eq!(cfg.streams[1].name, "dock");
    assert_eq!(cfg.streams[1].source_uri, "stub://dock");

    clear_env();
}

#[test]
fn invalid_values_are_rejected() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("MASKWATCH_QUEUE_SIZE", "0");
    assert!(PipelineConfig::load().is_err());

    std::env::set_var("MASKWATCH_QUEUE_SIZE", "not-a-number");
    assert!(PipelineConfig::load().is_err());

    clear_env();
}

#[test]
fn duplicate_stream_names_fail_validation() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    let json = r#"{
        "streams": [
            { "name": "lobby", "source_uri": "stub://a" },
            { "name": "lobby", "source_uri": "stub://b" }
        ]
    }"#;
    std::io::Write::write_all(&mut file, json.as_bytes()).expect("write config");

    let err = PipelineConfig::load_from_path(file.path()).unwrap_err();
    assert!(format!("{err}").contains("duplicate"));

    clear_env();
}

#[test]
fn malformed_stream_names_fail_validation() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    let json = r#"{ "streams": [ { "name": "Front Door!", "source_uri": "stub://a" } ] }"#;
    std::io::Write::write_all(&mut file, json.as_bytes()).expect("write config");

    assert!(PipelineConfig::load_from_path(file.path()).is_err());

    clear_env();
}
