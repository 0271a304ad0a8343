use std::io::Write;
use std::sync::Mutex;
use std::time::Duration;

use tempfile::NamedTempFile;

use scene_switcher::config::{CooldownSetting, SwitcherConfig};
use scene_switcher::error::classify;
use scene_switcher::ingest::DescriptorValue;

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "SCENE_SWITCHER_CONFIG",
        "SCENE_SWITCHER_TARGET_CLASS",
        "SCENE_SWITCHER_CONFIDENCE",
        "SCENE_SWITCHER_WINDOW_TICKS",
        "SCENE_SWITCHER_TICK_MS",
        "SCENE_SWITCHER_COOLDOWN_MS",
        "SCENE_SWITCHER_CONTROLLER_URL",
        "SCENE_SWITCHER_CONTROLLER_TOKEN",
    ] {
        std::env::remove_var(key);
    }
}

fn config_file(suffix: &str, contents: &str) -> NamedTempFile {
    let mut file = tempfile::Builder::new()
        .suffix(suffix)
        .tempfile()
        .expect("temp config");
    file.write_all(contents.as_bytes()).expect("write config");
    file
}

#[test]
fn loads_json_config_from_env_path_with_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = config_file(
        ".json",
        r#"{
            "target_class": "dog",
            "confidence_threshold": 0.65,
            "feeds": {
                "USB Cam": 0,
                "IP Cam 1": "rtsp://admin:pw@192.168.1.20/stream",
                "Porch": "stub://porch?pattern=1,2"
            },
            "timing": {
                "window_ticks": 10,
                "tick_interval_ms": 100,
                "cooldown_ticks": 12,
                "call_timeout_ms": 2000
            },
            "controller": {
                "kind": "memory",
                "initial_output": "Porch"
            }
        }"#,
    );

    std::env::set_var("SCENE_SWITCHER_CONFIG", file.path());
    std::env::set_var("SCENE_SWITCHER_WINDOW_TICKS", "15");
    std::env::set_var("SCENE_SWITCHER_CONTROLLER_TOKEN", "s3cret");

    let cfg = SwitcherConfig::load().expect("load config");

    assert_eq!(cfg.target_class, "dog");
    assert_eq!(cfg.detector.stub_label, "dog");
    assert!((cfg.confidence_threshold - 0.65).abs() < f32::EPSILON);
    assert_eq!(cfg.feed_names(), vec!["IP Cam 1", "Porch", "USB Cam"]);
    assert_eq!(cfg.feeds[2].descriptor, DescriptorValue::Index(0));
    assert_eq!(cfg.timing.window_ticks, 15);
    assert_eq!(cfg.timing.tick_interval, Duration::from_millis(100));
    assert_eq!(cfg.timing.cooldown, CooldownSetting::Ticks(12));
    assert_eq!(cfg.timing.cooldown_ticks(), 12);
    assert_eq!(cfg.controller.timeout, Duration::from_secs(2));
    assert_eq!(cfg.controller.initial_output.as_deref(), Some("Porch"));
    assert_eq!(cfg.controller.token.as_deref(), Some("s3cret"));

    clear_env();
}

#[test]
fn loads_toml_by_extension() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = config_file(
        ".toml",
        r#"
            target_class = "cat"

            [timing]
            tick_interval_ms = 50
            cooldown_ms = 2000

            [feeds]
            "Kitchen" = "stub://kitchen?pattern=3"
            "Yard" = "/dev/video2"
        "#,
    );
    std::env::set_var("SCENE_SWITCHER_TARGET_CLASS", "bird");
    std::env::set_var("SCENE_SWITCHER_COOLDOWN_MS", "1000");

    let cfg = SwitcherConfig::load_from(file.path()).expect("load toml config");

    assert_eq!(cfg.target_class, "bird");
    assert_eq!(cfg.detector.stub_label, "bird");
    assert_eq!(cfg.timing.cooldown_ticks(), 20);
    assert_eq!(
        cfg.feeds[1].descriptor,
        DescriptorValue::Location("/dev/video2".to_string())
    );

    clear_env();
}

#[test]
fn controller_url_override_selects_http_controller() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = config_file(".json", r#"{ "feeds": { "Porch": "stub://porch" } }"#);
    std::env::set_var("SCENE_SWITCHER_CONTROLLER_URL", "http://studio.local:8080/");

    let cfg = SwitcherConfig::load_from(file.path()).expect("load config");
    assert_eq!(cfg.controller.kind, "http");
    assert_eq!(cfg.controller.url.as_deref(), Some("http://studio.local:8080/"));

    clear_env();
}

#[test]
fn invalid_values_are_configuration_errors() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let cases = [
        r#"{ "feeds": {} }"#,
        r#"{ "confidence_threshold": -0.1, "feeds": { "A": 0 } }"#,
        r#"{ "timing": { "window_ticks": 0 }, "feeds": { "A": 0 } }"#,
        r#"{ "timing": { "tick_interval_ms": 0 }, "feeds": { "A": 0 } }"#,
        r#"{ "feeds": { "A": "mms://legacy/stream" } }"#,
        r#"{ "feeds": { " A": 0 } }"#,
        r#"{ "feeds": { "A": 0 }, "target_class": "" }"#,
        r#"{ "feeds": "#,
    ];
    for raw in cases {
        let file = config_file(".json", raw);
        let err = SwitcherConfig::load_from(file.path()).expect_err(raw);
        assert_eq!(
            classify(&err).map(|e| e.code()),
            Some("CONFIGURATION"),
            "{}: {:#}",
            raw,
            err
        );
    }

    let file = config_file(".json", r#"{ "feeds": { "A": 0 } }"#);
    std::env::set_var("SCENE_SWITCHER_TICK_MS", "fast");
    assert!(SwitcherConfig::load_from(file.path()).is_err());

    clear_env();
}

#[test]
fn missing_file_is_an_error() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();
    std::env::set_var("SCENE_SWITCHER_CONFIG", "/nonexistent/scene_switcher.json");
    assert!(SwitcherConfig::load().is_err());
    clear_env();
}
