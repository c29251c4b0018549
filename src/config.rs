//! Run configuration.
//!
//! One configuration document drives a run. It is read once at startup from
//! inline JSON or from a `.json`, `.toml` or `.yaml` file, validated, and then
//! treated as immutable.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::diff::DiffOptions;
use crate::{Result, WatchError};

/// Default quiet period before a page counts as settled.
pub const DEFAULT_RENDER_DELAY: Duration = Duration::from_millis(500);

/// Default ceiling for one wait episode.
pub const DEFAULT_MAX_WAIT: Duration = Duration::from_secs(60);

/// Deepest `walk.maxDepth` whose tree still fits the DevTools reply parser.
pub const MAX_WALK_DEPTH: u64 = 60;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunConfig {
    pub path: PathConfig,
    #[serde(default)]
    pub diff: DiffOptions,
    #[serde(default)]
    pub render: RenderOptions,
    #[serde(default)]
    pub page: PageOptions,
    /// Passed through untouched to the tree walker.
    #[serde(default = "empty_object")]
    pub walk: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PathConfig {
    pub dir: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderOptions {
    #[serde(default = "default_delay", with = "duration_repr")]
    pub delay: Duration,
    #[serde(default = "default_max_wait", with = "duration_repr")]
    pub max_wait: Duration,
    #[serde(default = "default_true")]
    pub full_page: bool,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            delay: DEFAULT_RENDER_DELAY,
            max_wait: DEFAULT_MAX_WAIT,
            full_page: true,
        }
    }
}

/// Page attributes. Engine-level switches live in the nested `settings`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct PageOptions {
    #[serde(default)]
    pub viewport_size: Viewport,
    #[serde(default = "default_zoom")]
    pub zoom_factor: f64,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub custom_headers: BTreeMap<String, String>,
    #[serde(default)]
    pub settings: EngineSettings,
}

impl Default for PageOptions {
    fn default() -> Self {
        Self {
            viewport_size: Viewport::default(),
            zoom_factor: 1.0,
            custom_headers: BTreeMap::new(),
            settings: EngineSettings::default(),
        }
    }
}

impl PageOptions {
    /// Options for the local diff-rendering document, which needs to read
    /// screenshots from disk.
    pub fn for_highlight(viewport: Viewport) -> Self {
        Self {
            viewport_size: viewport,
            settings: EngineSettings {
                local_to_remote_url_access_enabled: true,
                ..EngineSettings::default()
            },
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct EngineSettings {
    #[serde(default = "default_true")]
    pub javascript_enabled: bool,
    #[serde(default = "default_true")]
    pub load_images: bool,
    #[serde(default)]
    pub local_to_remote_url_access_enabled: bool,
    #[serde(default = "default_true")]
    pub web_security_enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    /// Requests still open after this long are treated as timed out.
    #[serde(
        default,
        with = "duration_repr::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub resource_timeout: Option<Duration>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            javascript_enabled: true,
            load_images: true,
            local_to_remote_url_access_enabled: false,
            web_security_enabled: true,
            user_agent: None,
            resource_timeout: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 800,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ViewportParseError {
    #[error("Invalid viewport format: expected WIDTHxHEIGHT (e.g., 1280x800)")]
    InvalidFormat,
    #[error("Invalid dimension: {0}")]
    InvalidDimension(String),
    #[error("Viewport dimensions must be positive")]
    Zero,
}

impl FromStr for Viewport {
    type Err = ViewportParseError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let (w, h) = s
            .trim()
            .split_once('x')
            .ok_or(ViewportParseError::InvalidFormat)?;
        let parse = |part: &str| {
            part.trim()
                .parse::<u32>()
                .map_err(|_| ViewportParseError::InvalidDimension(part.trim().to_string()))
        };
        let viewport = Viewport {
            width: parse(w)?,
            height: parse(h)?,
        };
        if viewport.width == 0 || viewport.height == 0 {
            return Err(ViewportParseError::Zero);
        }
        Ok(viewport)
    }
}

impl fmt::Display for Viewport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

impl RunConfig {
    /// Minimal configuration rooted at `dir`, everything else defaulted.
    pub fn with_root(dir: impl Into<PathBuf>) -> Self {
        Self {
            path: PathConfig { dir: dir.into() },
            diff: DiffOptions::default(),
            render: RenderOptions::default(),
            page: PageOptions::default(),
            walk: empty_object(),
        }
    }

    /// Loads and validates a configuration from inline JSON (`{...}`) or a
    /// file path.
    pub fn load(source: &str) -> Result<Self> {
        let cfg = Self::read(source)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Like [`RunConfig::load`] without validation, for callers that adjust
    /// the document first.
    pub fn read(source: &str) -> Result<Self> {
        let trimmed = source.trim();
        let cfg = if trimmed.starts_with('{') {
            Self::parse(trimmed, ConfigFormat::Json)
                .map_err(|e| WatchError::config(format!("Failed to parse inline config: {e}")))?
        } else {
            let path = Path::new(trimmed);
            if !path.is_file() {
                return Err(WatchError::config(format!(
                    "Config file not found: {}",
                    path.display()
                )));
            }
            let text = std::fs::read_to_string(path)?;
            Self::parse(&text, ConfigFormat::from_path(path)).map_err(|e| {
                WatchError::config(format!("Failed to read config {}: {}", path.display(), e))
            })?
        };
        Ok(cfg)
    }

    pub fn parse(text: &str, format: ConfigFormat) -> std::result::Result<Self, String> {
        match format {
            ConfigFormat::Json => serde_json::from_str(text).map_err(|e| e.to_string()),
            ConfigFormat::Toml => toml::from_str(text).map_err(|e| e.to_string()),
            ConfigFormat::Yaml => serde_yaml::from_str(text).map_err(|e| e.to_string()),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.path.dir.as_os_str().is_empty() {
            return Err(WatchError::config("path.dir is required"));
        }
        let vp = self.page.viewport_size;
        if vp.width == 0 || vp.height == 0 {
            return Err(WatchError::config(format!(
                "page.viewportSize must be positive, got {vp}"
            )));
        }
        if !(self.page.zoom_factor > 0.0) {
            return Err(WatchError::config("page.zoomFactor must be greater than 0"));
        }
        if self.render.max_wait.is_zero() {
            return Err(WatchError::config("render.maxWait must be greater than 0"));
        }
        if self.render.delay >= self.render.max_wait {
            return Err(WatchError::config(format!(
                "render.delay ({:?}) must be shorter than render.maxWait ({:?})",
                self.render.delay, self.render.max_wait
            )));
        }
        if !self.walk.is_object() {
            return Err(WatchError::config("walk must be an object"));
        }
        if let Some(depth) = self.walk.get("maxDepth") {
            match depth.as_u64() {
                Some(1..=MAX_WALK_DEPTH) => {}
                _ => {
                    return Err(WatchError::config(format!(
                        "walk.maxDepth must be an integer from 1 to {MAX_WALK_DEPTH}, got {depth}"
                    )))
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Json,
    Toml,
    Yaml,
}

impl ConfigFormat {
    pub fn from_path(path: &Path) -> Self {
        match path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_ascii_lowercase())
            .as_deref()
        {
            Some("toml") => ConfigFormat::Toml,
            Some("yaml") | Some("yml") => ConfigFormat::Yaml,
            _ => ConfigFormat::Json,
        }
    }
}

/// Parses `1500` as milliseconds, anything else as humantime (`"1.5s"`).
pub fn parse_duration(text: &str) -> std::result::Result<Duration, String> {
    let text = text.trim();
    if let Ok(ms) = text.parse::<u64>() {
        return Ok(Duration::from_millis(ms));
    }
    humantime_serde::re::humantime::parse_duration(text).map_err(|e| e.to_string())
}

fn empty_object() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}

fn default_delay() -> Duration {
    DEFAULT_RENDER_DELAY
}

fn default_max_wait() -> Duration {
    DEFAULT_MAX_WAIT
}

fn default_zoom() -> f64 {
    1.0
}

fn default_true() -> bool {
    true
}

/// Durations are written as milliseconds (`1500`) or humantime (`"1.5s"`).
mod duration_repr {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Millis(u64),
        Human(#[serde(with = "humantime_serde")] Duration),
    }

    impl From<Repr> for Duration {
        fn from(repr: Repr) -> Self {
            match repr {
                Repr::Millis(ms) => Duration::from_millis(ms),
                Repr::Human(d) => d,
            }
        }
    }

    pub fn serialize<S: Serializer>(value: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Repr::deserialize(d).map(Duration::from)
    }

    pub mod option {
        use super::*;

        pub fn serialize<S: Serializer>(value: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
            match value {
                Some(d) => s.serialize_some(&(d.as_millis() as u64)),
                None => s.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
            Option::<Repr>::deserialize(d).map(|repr| repr.map(Duration::from))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn durations_accept_millis_or_humantime() {
        assert_eq!(parse_duration("1500"), Ok(Duration::from_millis(1500)));
        assert_eq!(parse_duration("2s"), Ok(Duration::from_secs(2)));
        assert!(parse_duration("soon").is_err());
    }

    #[test]
    fn minimal_document_fills_defaults() {
        let cfg = RunConfig::load(r#"{"path":{"dir":"/tmp/snaps"}}"#).unwrap();
        assert_eq!(cfg.path.dir, PathBuf::from("/tmp/snaps"));
        assert_eq!(cfg.render.delay, DEFAULT_RENDER_DELAY);
        assert_eq!(cfg.render.max_wait, DEFAULT_MAX_WAIT);
        assert!(cfg.render.full_page);
        assert_eq!(cfg.page, PageOptions::default());
        assert!(cfg.walk.as_object().is_some_and(|m| m.is_empty()));
    }

    #[test]
    fn delay_accepts_millis_and_humantime() {
        let cfg = RunConfig::load(
            r#"{"path":{"dir":"x"},"render":{"delay":1500,"maxWait":"2m"}}"#,
        )
        .unwrap();
        assert_eq!(cfg.render.delay, Duration::from_millis(1500));
        assert_eq!(cfg.render.max_wait, Duration::from_secs(120));

        let cfg = RunConfig::load(r#"{"path":{"dir":"x"},"render":{"delay":"250ms"}}"#).unwrap();
        assert_eq!(cfg.render.delay, Duration::from_millis(250));
    }

    #[test]
    fn engine_settings_are_a_named_section() {
        let cfg = RunConfig::load(
            r#"{
                "path": {"dir": "x"},
                "page": {
                    "viewportSize": {"width": 800, "height": 600},
                    "customHeaders": {"X-Probe": "1"},
                    "settings": {"userAgent": "pagewatch-test", "resourceTimeout": 3000, "loadImages": false}
                }
            }"#,
        )
        .unwrap();
        assert_eq!(cfg.page.viewport_size, Viewport { width: 800, height: 600 });
        assert_eq!(cfg.page.custom_headers.get("X-Probe").map(String::as_str), Some("1"));
        assert_eq!(cfg.page.settings.user_agent.as_deref(), Some("pagewatch-test"));
        assert_eq!(cfg.page.settings.resource_timeout, Some(Duration::from_secs(3)));
        assert!(!cfg.page.settings.load_images);
        assert!(cfg.page.settings.javascript_enabled);
    }

    #[test]
    fn unknown_page_attributes_are_rejected() {
        let err = RunConfig::load(r#"{"path":{"dir":"x"},"page":{"clipRect":{}}}"#).unwrap_err();
        assert!(err.to_string().contains("unknown field"), "got: {err}");

        let err = RunConfig::load(r#"{"path":{"dir":"x"},"page":{"settings":{"nope":1}}}"#)
            .unwrap_err();
        assert!(err.to_string().contains("unknown field"), "got: {err}");
    }

    #[test]
    fn missing_root_is_rejected() {
        let err = RunConfig::load(r#"{"render":{"delay":10}}"#).unwrap_err();
        assert_eq!(err.exit_code(), 2);
        let err = RunConfig::load(r#"{"path":{"dir":""}}"#).unwrap_err();
        assert!(err.to_string().contains("path.dir"));
    }

    #[test]
    fn delay_must_fit_inside_max_wait() {
        let err = RunConfig::load(r#"{"path":{"dir":"x"},"render":{"delay":"2s","maxWait":"1s"}}"#)
            .unwrap_err();
        assert!(err.to_string().contains("render.delay"));
    }

    #[test]
    fn loads_toml_and_yaml_files() {
        let dir = tempfile::tempdir().unwrap();
        let toml_path = dir.path().join("watch.toml");
        let mut f = std::fs::File::create(&toml_path).unwrap();
        writeln!(f, "[path]\ndir = \"snaps\"\n[render]\ndelay = 100").unwrap();
        let cfg = RunConfig::load(toml_path.to_str().unwrap()).unwrap();
        assert_eq!(cfg.render.delay, Duration::from_millis(100));

        let yaml_path = dir.path().join("watch.yml");
        std::fs::write(&yaml_path, "path:\n  dir: snaps\nwalk:\n  styles: [color]\n").unwrap();
        let cfg = RunConfig::load(yaml_path.to_str().unwrap()).unwrap();
        assert_eq!(cfg.walk["styles"][0], "color");
    }

    #[test]
    fn missing_file_is_a_config_error() {
        let err = RunConfig::load("/definitely/not/here.json").unwrap_err();
        assert!(matches!(err, WatchError::Config(_)));
        assert!(err.to_string().contains("not found"));
    }

    #[test]
    fn highlight_page_allows_file_access() {
        let opts = PageOptions::for_highlight(Viewport { width: 10, height: 20 });
        assert!(opts.settings.local_to_remote_url_access_enabled);
        assert_eq!(opts.viewport_size.width, 10);
    }

    #[test]
    fn viewport_parse() {
        assert_eq!(
            " 1920 x 1080 ".parse::<Viewport>(),
            Ok(Viewport { width: 1920, height: 1080 })
        );
        assert_eq!("1440".parse::<Viewport>(), Err(ViewportParseError::InvalidFormat));
        assert_eq!("0x900".parse::<Viewport>(), Err(ViewportParseError::Zero));
        assert!(matches!(
            "abcx900".parse::<Viewport>(),
            Err(ViewportParseError::InvalidDimension(_))
        ));
        assert_eq!(Viewport { width: 3, height: 4 }.to_string(), "3x4");
    }

    #[test]
    fn walk_depth_is_bounded() {
        let cfg = RunConfig::load(r#"{"path":{"dir":"x"},"walk":{"maxDepth":40}}"#).unwrap();
        assert_eq!(cfg.walk["maxDepth"], 40);

        for bad in ["0", "61", "12.5", "\"deep\""] {
            let doc = format!(r#"{{"path":{{"dir":"x"}},"walk":{{"maxDepth":{bad}}}}}"#);
            let err = RunConfig::load(&doc).unwrap_err();
            assert!(err.to_string().contains("walk.maxDepth"), "{bad}: {err}");
        }
    }

    #[test]
    fn config_round_trips_through_info_document() {
        let cfg = RunConfig::with_root("/snaps");
        let value = serde_json::to_value(&cfg).unwrap();
        assert_eq!(value["render"]["delay"], 500);
        let back: RunConfig = serde_json::from_value(value).unwrap();
        assert_eq!(back.render, cfg.render);
    }
}
