//! Pipeline configuration and the stream registry.
//!
//! Configuration is layered the same way the daemon consumes it: JSON config
//! file (`MASKWATCH_CONFIG`), then environment overrides, then validation.
//! The core reads exactly the options named here and nothing else.

use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::Path;
use std::sync::OnceLock;
use std::time::Duration;

use crate::frame::ProcessingResolution;

const DEFAULT_QUEUE_SIZE: usize = 100;
const DEFAULT_BATCH_SIZE: usize = 10;
const DEFAULT_MAX_WORKERS: usize = 4;
const DEFAULT_POLL_TIMEOUT_MS: u64 = 100;
const DEFAULT_RECONNECT_SECS: u64 = 5;
const DEFAULT_ALERT_COOLDOWN_SECS: u64 = 300;
const DEFAULT_MIN_VIOLATIONS: u32 = 3;
const DEFAULT_TARGET_FPS: u32 = 10;

/// A conforming stream name is a local identifier usable in topics, file
/// paths and log lines: lowercase alphanumerics plus `_` and `-`.
pub fn validate_stream_name(name: &str) -> Result<()> {
    static NAME_RE: OnceLock<regex::Regex> = OnceLock::new();
    let re = NAME_RE.get_or_init(|| regex::Regex::new(r"^[a-z0-9][a-z0-9_-]{0,63}$").unwrap());
    if !re.is_match(name) {
        return Err(anyhow!(
            "stream name must match ^[a-z0-9][a-z0-9_-]{{0,63}}$: {:?}",
            name
        ));
    }
    Ok(())
}

#[derive(Debug, Deserialize, Default)]
struct PipelineConfigFile {
    queue_size: Option<usize>,
    batch_size: Option<usize>,
    max_workers: Option<usize>,
    poll_timeout_ms: Option<u64>,
    reconnect_interval_secs: Option<u64>,
    alert_cooldown_secs: Option<u64>,
    min_violations_for_alert: Option<u32>,
    resize: Option<ResizeConfigFile>,
    streams: Option<Vec<StreamConfigFile>>,
}

#[derive(Debug, Deserialize, Default)]
struct ResizeConfigFile {
    width: Option<u32>,
    height: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct StreamConfigFile {
    name: String,
    source_uri: String,
    target_fps: Option<u32>,
    reconnect_interval_secs: Option<u64>,
    enabled: Option<bool>,
}

/// Identity and capture settings for one video source.
///
/// Immutable after creation except `enabled`.
#[derive(Clone, Debug)]
pub struct StreamDescriptor {
    pub name: String,
    pub source_uri: String,
    pub target_fps: u32,
    pub reconnect_interval: Duration,
    pub enabled: bool,
}

impl StreamDescriptor {
    pub fn new(name: &str, source_uri: &str, target_fps: u32) -> Self {
        Self {
            name: name.to_string(),
            source_uri: source_uri.to_string(),
            target_fps,
            reconnect_interval: Duration::from_secs(DEFAULT_RECONNECT_SECS),
            enabled: true,
        }
    }
}

/// Configuration surface consumed by the pipeline core.
#[derive(Clone, Debug)]
pub struct PipelineConfig {
    /// Bus capacity in envelopes.
    pub queue_size: usize,
    /// Batch flush threshold.
    pub batch_size: usize,
    /// Detection worker threads.
    pub max_workers: usize,
    /// Consumer poll timeout; also bounds partial-batch latency.
    pub poll_timeout: Duration,
    /// Default reconnect backoff for streams that do not set their own.
    pub reconnect_interval: Duration,
    pub alert_cooldown: Duration,
    pub min_violations_for_alert: u32,
    pub resolution: ProcessingResolution,
    pub streams: Vec<StreamDescriptor>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            queue_size: DEFAULT_QUEUE_SIZE,
            batch_size: DEFAULT_BATCH_SIZE,
            max_workers: DEFAULT_MAX_WORKERS,
            poll_timeout: Duration::from_millis(DEFAULT_POLL_TIMEOUT_MS),
            reconnect_interval: Duration::from_secs(DEFAULT_RECONNECT_SECS),
            alert_cooldown: Duration::from_secs(DEFAULT_ALERT_COOLDOWN_SECS),
            min_violations_for_alert: DEFAULT_MIN_VIOLATIONS,
            resolution: ProcessingResolution::default(),
            streams: Vec::new(),
        }
    }
}

impl PipelineConfig {
    /// Load from `MASKWATCH_CONFIG` (if set) with environment overrides.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("MASKWATCH_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) => Some(read_config_file(Path::new(path))?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load from an explicit config file path, then apply env overrides.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let mut cfg = Self::from_file(read_config_file(path)?)?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: PipelineConfigFile) -> Result<Self> {
        let defaults = Self::default();
        let reconnect_default = Duration::from_secs(
            file.reconnect_interval_secs.unwrap_or(DEFAULT_RECONNECT_SECS),
        );
        let streams = file
            .streams
            .unwrap_or_default()
            .into_iter()
            .map(|stream| StreamDescriptor {
                name: stream.name,
                source_uri: stream.source_uri,
                target_fps: stream.target_fps.unwrap_or(DEFAULT_TARGET_FPS),
                reconnect_interval: stream
                    .reconnect_interval_secs
                    .map(Duration::from_secs)
                    .unwrap_or(reconnect_default),
                enabled: stream.enabled.unwrap_or(true),
            })
            .collect();
        Ok(Self {
            queue_size: file.queue_size.unwrap_or(defaults.queue_size),
            batch_size: file.batch_size.unwrap_or(defaults.batch_size),
            max_workers: file.max_workers.unwrap_or(defaults.max_workers),
            poll_timeout: Duration::from_millis(
                file.poll_timeout_ms.unwrap_or(DEFAULT_POLL_TIMEOUT_MS),
            ),
            reconnect_interval: reconnect_default,
            alert_cooldown: Duration::from_secs(
                file.alert_cooldown_secs.unwrap_or(DEFAULT_ALERT_COOLDOWN_SECS),
            ),
            min_violations_for_alert: file
                .min_violations_for_alert
                .unwrap_or(DEFAULT_MIN_VIOLATIONS),
            resolution: ProcessingResolution {
                width: file
                    .resize
                    .as_ref()
                    .and_then(|r| r.width)
                    .unwrap_or(defaults.resolution.width),
                height: file
                    .resize
                    .as_ref()
                    .and_then(|r| r.height)
                    .unwrap_or(defaults.resolution.height),
            },
            streams,
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(value) = env_usize("MASKWATCH_QUEUE_SIZE")? {
            self.queue_size = value;
        }
        if let Some(value) = env_usize("MASKWATCH_BATCH_SIZE")? {
            self.batch_size = value;
        }
        if let Some(value) = env_usize("MASKWATCH_MAX_WORKERS")? {
            self.max_workers = value;
        }
        if let Some(value) = env_u64("MASKWATCH_ALERT_COOLDOWN_SECS")? {
            self.alert_cooldown = Duration::from_secs(value);
        }
        if let Some(value) = env_u64("MASKWATCH_MIN_VIOLATIONS")? {
            self.min_violations_for_alert = u32::try_from(value)
                .map_err(|_| anyhow!("MASKWATCH_MIN_VIOLATIONS out of range"))?;
        }
        if let Ok(uris) = std::env::var("MASKWATCH_SOURCES") {
            let parsed = parse_source_list(&uris);
            if !parsed.is_empty() {
                self.streams = parsed;
            }
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.queue_size == 0 {
            return Err(anyhow!("queue_size must be greater than zero"));
        }
        if self.batch_size == 0 {
            return Err(anyhow!("batch_size must be greater than zero"));
        }
        if self.max_workers == 0 {
            return Err(anyhow!("max_workers must be greater than zero"));
        }
        if self.resolution.width == 0 || self.resolution.height == 0 {
            return Err(anyhow!("processing resolution must be non-zero"));
        }
        let mut seen = std::collections::HashSet::new();
        for stream in &self.streams {
            validate_stream_name(&stream.name)?;
            if stream.target_fps == 0 {
                return Err(anyhow!("stream {}: target_fps must be > 0", stream.name));
            }
            if !seen.insert(stream.name.as_str()) {
                return Err(anyhow!("duplicate stream name: {}", stream.name));
            }
        }
        Ok(())
    }
}

fn env_usize(key: &str) -> Result<Option<usize>> {
    match std::env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => {
            let value = raw
                .trim()
                .parse()
                .map_err(|_| anyhow!("{} must be a non-negative integer", key))?;
            Ok(Some(value))
        }
        _ => Ok(None),
    }
}

fn env_u64(key: &str) -> Result<Option<u64>> {
    match std::env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => {
            let value = raw
                .trim()
                .parse()
                .map_err(|_| anyhow!("{} must be a non-negative integer", key))?;
            Ok(Some(value))
        }
        _ => Ok(None),
    }
}

/// Parse `MASKWATCH_SOURCES`: comma-separated URIs, auto-named `camera_<i>`,
/// or `name=uri` pairs for explicit naming.
fn parse_source_list(raw: &str) -> Vec<StreamDescriptor> {
    raw.split(',')
        .map(|entry| entry.trim())
        .filter(|entry| !entry.is_empty())
        .enumerate()
        .map(|(i, entry)| match entry.split_once('=') {
            Some((name, uri)) => StreamDescriptor::new(name.trim(), uri.trim(), DEFAULT_TARGET_FPS),
            None => StreamDescriptor::new(&format!("camera_{}", i), entry, DEFAULT_TARGET_FPS),
        })
        .collect()
}

fn read_config_file(path: &Path) -> Result<PipelineConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}

/// Owns the stream descriptors that configure capture instances.
#[derive(Debug, Default)]
pub struct StreamRegistry {
    streams: Vec<StreamDescriptor>,
}

impl StreamRegistry {
    pub fn new(streams: Vec<StreamDescriptor>) -> Result<Self> {
        let mut registry = Self::default();
        for stream in streams {
            registry.add(stream)?;
        }
        Ok(registry)
    }

    pub fn add(&mut self, descriptor: StreamDescriptor) -> Result<()> {
        validate_stream_name(&descriptor.name)?;
        if self.streams.iter().any(|s| s.name == descriptor.name) {
            log::warn!("stream {} already registered", descriptor.name);
            return Err(anyhow!("stream {} already registered", descriptor.name));
        }
        self.streams.push(descriptor);
        Ok(())
    }

    pub fn remove(&mut self, name: &str) -> Option<StreamDescriptor> {
        let idx = self.streams.iter().position(|s| s.name == name)?;
        Some(self.streams.remove(idx))
    }

    /// Returns false when no stream with that name exists.
    pub fn set_enabled(&mut self, name: &str, enabled: bool) -> bool {
        match self.streams.iter_mut().find(|s| s.name == name) {
            Some(stream) => {
                stream.enabled = enabled;
                true
            }
            None => false,
        }
    }

    pub fn enabled(&self) -> impl Iterator<Item = &StreamDescriptor> {
        self.streams.iter().filter(|s| s.enabled)
    }

    pub fn len(&self) -> usize {
        self.streams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }
}
