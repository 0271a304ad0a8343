use anyhow::{anyhow, Context, Result};
use regex::Regex;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

use crate::aggregate::DEFAULT_WINDOW_TICKS;
use crate::error::SwitcherError;
use crate::ingest::{DescriptorValue, SourceDescriptor};
use crate::occupancy::DEFAULT_CONFIDENCE_THRESHOLD;

pub const CONFIG_ENV: &str = "SCENE_SWITCHER_CONFIG";

const DEFAULT_TARGET_CLASS: &str = "cat";
const DEFAULT_TICK_INTERVAL_MS: u64 = 50;
const DEFAULT_COOLDOWN_MS: u64 = 2_000;
const DEFAULT_CALL_TIMEOUT_MS: u64 = 30_000;
const DEFAULT_STATS_INTERVAL_SECS: u64 = 5;
const DEFAULT_DETECTOR_BACKEND: &str = "stub";
const DEFAULT_MODEL_INPUT: u32 = 416;
const DEFAULT_CONTROLLER_KIND: &str = "memory";

#[derive(Debug, Deserialize, Default)]
struct SwitcherConfigFile {
    target_class: Option<String>,
    confidence_threshold: Option<f32>,
    feeds: Option<BTreeMap<String, DescriptorValue>>,
    timing: Option<TimingConfigFile>,
    detector: Option<DetectorConfigFile>,
    controller: Option<ControllerConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct TimingConfigFile {
    window_ticks: Option<u32>,
    tick_interval_ms: Option<u64>,
    cooldown_ticks: Option<u32>,
    cooldown_ms: Option<u64>,
    call_timeout_ms: Option<u64>,
    stats_interval_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectorConfigFile {
    backend: Option<String>,
    model_path: Option<PathBuf>,
    labels_path: Option<PathBuf>,
    input_width: Option<u32>,
    input_height: Option<u32>,
    stub_label: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct ControllerConfigFile {
    kind: Option<String>,
    url: Option<String>,
    token: Option<String>,
    initial_output: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SwitcherConfig {
    pub target_class: String,
    pub confidence_threshold: f32,
    pub feeds: Vec<FeedConfig>,
    pub timing: LoopSettings,
    pub detector: DetectorSettings,
    pub controller: ControllerSettings,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedConfig {
    pub name: String,
    pub descriptor: DescriptorValue,
}

/// Cooldown as configured; converted to ticks at the loop cadence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CooldownSetting {
    Ticks(u32),
    Duration(Duration),
}

#[derive(Debug, Clone)]
pub struct LoopSettings {
    pub window_ticks: u32,
    pub tick_interval: Duration,
    pub cooldown: CooldownSetting,
    pub call_timeout: Duration,
    pub stats_interval: Duration,
}

impl Default for LoopSettings {
    fn default() -> Self {
        Self {
            window_ticks: DEFAULT_WINDOW_TICKS,
            tick_interval: Duration::from_millis(DEFAULT_TICK_INTERVAL_MS),
            cooldown: CooldownSetting::Duration(Duration::from_millis(DEFAULT_COOLDOWN_MS)),
            call_timeout: Duration::from_millis(DEFAULT_CALL_TIMEOUT_MS),
            stats_interval: Duration::from_secs(DEFAULT_STATS_INTERVAL_SECS),
        }
    }
}

impl LoopSettings {
    /// Cooldown in ticks; durations round up to whole ticks.
    pub fn cooldown_ticks(&self) -> u32 {
        match self.cooldown {
            CooldownSetting::Ticks(ticks) => ticks,
            CooldownSetting::Duration(duration) => {
                let tick_ms = self.tick_interval.as_millis().max(1);
                let ticks = duration.as_millis().div_ceil(tick_ms);
                u32::try_from(ticks).unwrap_or(u32::MAX)
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct DetectorSettings {
    /// `stub` or `tract`.
    pub backend: String,
    pub model_path: Option<PathBuf>,
    pub labels_path: Option<PathBuf>,
    pub input_width: u32,
    pub input_height: u32,
    /// Label the stub backend emits; defaults to the target class.
    pub stub_label: String,
}

#[derive(Debug, Clone)]
pub struct ControllerSettings {
    /// `memory` or `http`.
    pub kind: String,
    pub url: Option<String>,
    pub token: Option<String>,
    /// Starting output for the memory controller.
    pub initial_output: Option<String>,
    pub timeout: Duration,
}

impl SwitcherConfig {
    /// Load from the file named by `SCENE_SWITCHER_CONFIG` (if set), then apply
    /// environment overrides and validate.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var(CONFIG_ENV).ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) if !path.trim().is_empty() => Some(read_config_file(Path::new(path))?),
            _ => None,
        };
        Self::assemble(file_cfg.unwrap_or_default())
    }

    /// Like `load`, with an explicit file path.
    pub fn load_from(path: &Path) -> Result<Self> {
        Self::assemble(read_config_file(path)?)
    }

    /// Parse a TOML document without consulting the environment.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let file: SwitcherConfigFile = toml::from_str(raw)
            .map_err(|e| SwitcherError::configuration(format!("invalid TOML config: {}", e)))?;
        let mut cfg = Self::from_file(file)?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn assemble(file: SwitcherConfigFile) -> Result<Self> {
        let mut cfg = Self::from_file(file)?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: SwitcherConfigFile) -> Result<Self> {
        let target_class = file
            .target_class
            .unwrap_or_else(|| DEFAULT_TARGET_CLASS.to_string());
        let confidence_threshold = file
            .confidence_threshold
            .unwrap_or(DEFAULT_CONFIDENCE_THRESHOLD);
        let feeds = file
            .feeds
            .unwrap_or_default()
            .into_iter()
            .map(|(name, descriptor)| FeedConfig { name, descriptor })
            .collect();

        let timing_file = file.timing.unwrap_or_default();
        let defaults = LoopSettings::default();
        let cooldown = match (timing_file.cooldown_ticks, timing_file.cooldown_ms) {
            (Some(_), Some(_)) => {
                return Err(SwitcherError::configuration(
                    "timing: set cooldown_ticks or cooldown_ms, not both",
                )
                .into())
            }
            (Some(ticks), None) => CooldownSetting::Ticks(ticks),
            (None, Some(ms)) => CooldownSetting::Duration(Duration::from_millis(ms)),
            (None, None) => defaults.cooldown,
        };
        let timing = LoopSettings {
            window_ticks: timing_file.window_ticks.unwrap_or(defaults.window_ticks),
            tick_interval: timing_file
                .tick_interval_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.tick_interval),
            cooldown,
            call_timeout: timing_file
                .call_timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.call_timeout),
            stats_interval: timing_file
                .stats_interval_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.stats_interval),
        };

        let detector_file = file.detector.unwrap_or_default();
        let detector = DetectorSettings {
            backend: detector_file
                .backend
                .unwrap_or_else(|| DEFAULT_DETECTOR_BACKEND.to_string()),
            model_path: detector_file.model_path,
            labels_path: detector_file.labels_path,
            input_width: detector_file.input_width.unwrap_or(DEFAULT_MODEL_INPUT),
            input_height: detector_file.input_height.unwrap_or(DEFAULT_MODEL_INPUT),
            stub_label: detector_file
                .stub_label
                .unwrap_or_else(|| target_class.clone()),
        };

        let controller_file = file.controller.unwrap_or_default();
        let controller = ControllerSettings {
            kind: controller_file
                .kind
                .unwrap_or_else(|| DEFAULT_CONTROLLER_KIND.to_string()),
            url: controller_file.url,
            token: controller_file.token,
            initial_output: controller_file.initial_output,
            timeout: timing.call_timeout,
        };

        Ok(Self {
            target_class,
            confidence_threshold,
            feeds,
            timing,
            detector,
            controller,
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(class) = std::env::var("SCENE_SWITCHER_TARGET_CLASS") {
            if !class.trim().is_empty() {
                if self.detector.stub_label == self.target_class {
                    self.detector.stub_label = class.trim().to_string();
                }
                self.target_class = class.trim().to_string();
            }
        }
        if let Ok(threshold) = std::env::var("SCENE_SWITCHER_CONFIDENCE") {
            self.confidence_threshold = threshold.trim().parse().map_err(|_| {
                SwitcherError::configuration("SCENE_SWITCHER_CONFIDENCE must be a number")
            })?;
        }
        if let Ok(window) = std::env::var("SCENE_SWITCHER_WINDOW_TICKS") {
            self.timing.window_ticks = window.trim().parse().map_err(|_| {
                SwitcherError::configuration("SCENE_SWITCHER_WINDOW_TICKS must be an integer")
            })?;
        }
        if let Ok(tick) = std::env::var("SCENE_SWITCHER_TICK_MS") {
            let ms: u64 = tick.trim().parse().map_err(|_| {
                SwitcherError::configuration("SCENE_SWITCHER_TICK_MS must be an integer number of milliseconds")
            })?;
            self.timing.tick_interval = Duration::from_millis(ms);
        }
        if let Ok(cooldown) = std::env::var("SCENE_SWITCHER_COOLDOWN_MS") {
            let ms: u64 = cooldown.trim().parse().map_err(|_| {
                SwitcherError::configuration("SCENE_SWITCHER_COOLDOWN_MS must be an integer number of milliseconds")
            })?;
            self.timing.cooldown = CooldownSetting::Duration(Duration::from_millis(ms));
        }
        if let Ok(url) = std::env::var("SCENE_SWITCHER_CONTROLLER_URL") {
            if !url.trim().is_empty() {
                self.controller.url = Some(url.trim().to_string());
                self.controller.kind = "http".to_string();
            }
        }
        if let Ok(token) = std::env::var("SCENE_SWITCHER_CONTROLLER_TOKEN") {
            if !token.trim().is_empty() {
                self.controller.token = Some(token.trim().to_string());
            }
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        validate_name("target_class", &self.target_class)?;
        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            return Err(SwitcherError::configuration(format!(
                "confidence_threshold must be within [0, 1], got {}",
                self.confidence_threshold
            ))
            .into());
        }
        if self.timing.window_ticks == 0 {
            return Err(SwitcherError::configuration("timing.window_ticks must be greater than zero").into());
        }
        if self.timing.tick_interval.is_zero() {
            return Err(SwitcherError::configuration("timing.tick_interval_ms must be greater than zero").into());
        }
        if self.timing.call_timeout.is_zero() {
            return Err(SwitcherError::configuration("timing.call_timeout_ms must be greater than zero").into());
        }
        if self.feeds.is_empty() {
            return Err(SwitcherError::configuration("at least one feed must be configured").into());
        }
        for feed in &self.feeds {
            validate_name("feed name", &feed.name)?;
            SourceDescriptor::resolve(&feed.descriptor)
                .map_err(anyhow::Error::new)
                .with_context(|| format!("feed '{}'", feed.name))?;
        }
        self.controller.timeout = self.timing.call_timeout;
        Ok(())
    }

    pub fn feed_names(&self) -> Vec<String> {
        self.feeds.iter().map(|feed| feed.name.clone()).collect()
    }
}

/// Feed names and class labels: 1..=64 printable characters, no surrounding
/// whitespace.
pub fn validate_name(what: &str, value: &str) -> Result<()> {
    static NAME_RE: OnceLock<Result<Regex, regex::Error>> = OnceLock::new();
    let re = NAME_RE
        .get_or_init(|| Regex::new(r"^[^\p{Cc}\s](?:[^\p{Cc}]{0,62}[^\p{Cc}\s])?$"))
        .as_ref()
        .map_err(|e| anyhow!("name pattern failed to compile: {}", e))?;
    if !re.is_match(value) {
        return Err(SwitcherError::configuration(format!(
            "{} {:?} must be 1-64 printable characters without surrounding whitespace",
            what, value
        ))
        .into());
    }
    Ok(())
}

fn read_config_file(path: &Path) -> Result<SwitcherConfigFile> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    let is_toml = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| {
            SwitcherError::configuration(format!("invalid config file {}: {}", path.display(), e))
        })?
    } else {
        serde_json::from_str(&raw).map_err(|e| {
            SwitcherError::configuration(format!("invalid config file {}: {}", path.display(), e))
        })?
    };
    Ok(cfg)
}
