//! Configuration
//!
//! Two pieces of static configuration:
//!
//! - [`PollSettings`]: a default [`PollConfig`] plus named profiles, loadable
//!   from YAML or JSON. File entries override the built-in profiles.
//! - [`DriverConfig`]: browser target, viewport, timeouts and artifact
//!   capture for whatever backend implements [`crate::PageDriver`].

use crate::poll::{PollConfig, Poller};
use crate::result::{PollwrightError, PollwrightResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

/// Profile for closing a modal that may reappear after reload
pub const PROFILE_LOOPING_MODAL: &str = "looping-modal";

/// Profile for reloading until a link disappears
pub const PROFILE_DISAPPEARING_ELEMENTS: &str = "disappearing-elements";

/// Profile for scrolling until something comes into view
pub const PROFILE_INFINITE_SCROLL: &str = "infinite-scroll";

/// Profile for stepping an input towards a target value
pub const PROFILE_SLIDER: &str = "slider";

/// Default base URL of the site under test
pub const DEFAULT_BASE_URL: &str = "https://the-internet.herokuapp.com";

// =============================================================================
// POLL SETTINGS
// =============================================================================

/// Named poll profiles
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PollSettings {
    /// Used when a profile name is unknown
    pub default: PollConfig,
    /// Named configs
    pub profiles: BTreeMap<String, PollConfig>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct SettingsFile {
    #[serde(default)]
    default: Option<PollConfig>,
    #[serde(default)]
    profiles: BTreeMap<String, PollConfig>,
}

impl Default for PollSettings {
    fn default() -> Self {
        let mut profiles = BTreeMap::new();
        profiles.insert(
            PROFILE_LOOPING_MODAL.to_string(),
            PollConfig::attempts(3).with_delay(Duration::from_secs(2)),
        );
        profiles.insert(
            PROFILE_DISAPPEARING_ELEMENTS.to_string(),
            PollConfig::attempts(5),
        );
        profiles.insert(
            PROFILE_INFINITE_SCROLL.to_string(),
            PollConfig::attempts(20).with_delay(Duration::from_millis(500)),
        );
        profiles.insert(PROFILE_SLIDER.to_string(), PollConfig::attempts(20));
        Self {
            default: PollConfig::default(),
            profiles,
        }
    }
}

impl PollSettings {
    /// Built-in profiles
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse YAML and layer it over the built-ins
    pub fn from_yaml_str(yaml: &str) -> PollwrightResult<Self> {
        let file: SettingsFile = serde_yaml_ng::from_str(yaml)?;
        Ok(Self::default().merged(file))
    }

    /// Parse JSON and layer it over the built-ins
    pub fn from_json_str(json: &str) -> PollwrightResult<Self> {
        let file: SettingsFile = serde_json::from_str(json)?;
        Ok(Self::default().merged(file))
    }

    /// Load from a `.yaml`, `.yml` or `.json` file
    pub fn from_path(path: impl AsRef<Path>) -> PollwrightResult<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase);
        let settings = match extension.as_deref() {
            Some("yaml" | "yml") => Self::from_yaml_str(&contents)?,
            Some("json") => Self::from_json_str(&contents)?,
            _ => {
                return Err(PollwrightError::invalid_config(format!(
                    "unsupported settings file: {}",
                    path.display()
                )))
            }
        };
        tracing::debug!(path = %path.display(), profiles = settings.profiles.len(), "loaded poll settings");
        Ok(settings)
    }

    fn merged(mut self, file: SettingsFile) -> Self {
        if let Some(default) = file.default {
            self.default = default;
        }
        self.profiles.extend(file.profiles);
        self
    }

    /// Config for `name`, or the default when there is no such profile
    #[must_use]
    pub fn profile(&self, name: &str) -> PollConfig {
        self.profiles.get(name).copied().unwrap_or(self.default)
    }

    /// Add or replace a profile
    #[must_use]
    pub fn with_profile(mut self, name: impl Into<String>, config: PollConfig) -> Self {
        self.profiles.insert(name.into(), config);
        self
    }

    /// Validated poller for `name`, described by the profile name
    pub fn poller(&self, name: &str) -> PollwrightResult<Poller> {
        Ok(Poller::new(self.profile(name))?.with_description(name))
    }

    /// Validate every config
    pub fn validate(&self) -> PollwrightResult<()> {
        self.default.validate()?;
        for (name, config) in &self.profiles {
            config.validate().map_err(|err| {
                PollwrightError::invalid_config(format!("profile '{name}': {err}"))
            })?;
        }
        Ok(())
    }
}

// =============================================================================
// DRIVER CONFIG
// =============================================================================

/// Browser engine to drive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BrowserKind {
    /// Chromium
    Chromium,
    /// Firefox
    #[default]
    Firefox,
    /// WebKit
    Webkit,
}

/// When to keep an artifact (video, screenshot, trace)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CaptureMode {
    /// Never capture
    #[default]
    Off,
    /// Always capture
    On,
    /// Keep only when the test fails
    OnlyOnFailure,
    /// Capture always, keep only on failure
    RetainOnFailure,
}

impl CaptureMode {
    /// Should the artifact be kept for a test with this result?
    #[must_use]
    pub const fn keep(self, failed: bool) -> bool {
        match self {
            Self::Off => false,
            Self::On => true,
            Self::OnlyOnFailure | Self::RetainOnFailure => failed,
        }
    }
}

/// Browser configuration for a driver backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverConfig {
    /// Base URL relative navigations resolve against
    pub base_url: Option<String>,
    /// Run in headless mode
    pub headless: bool,
    /// Viewport width
    pub viewport_width: u32,
    /// Viewport height
    pub viewport_height: u32,
    /// Per-test timeout in milliseconds
    pub timeout_ms: u64,
    /// Retries of a failed test
    pub retries: u32,
    /// Browser engine
    pub browser: BrowserKind,
    /// Video capture
    pub video: CaptureMode,
    /// Screenshot capture
    pub screenshot: CaptureMode,
    /// Trace capture
    pub trace: CaptureMode,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            base_url: Some(DEFAULT_BASE_URL.to_string()),
            headless: true,
            viewport_width: 1280,
            viewport_height: 720,
            timeout_ms: 8_000,
            retries: 0,
            browser: BrowserKind::Firefox,
            video: CaptureMode::Off,
            screenshot: CaptureMode::OnlyOnFailure,
            trace: CaptureMode::OnlyOnFailure,
        }
    }
}

impl DriverConfig {
    /// Create new config with defaults
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set base URL
    #[must_use]
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Set headless mode
    #[must_use]
    pub const fn headless(mut self, headless: bool) -> Self {
        self.headless = headless;
        self
    }

    /// Set viewport dimensions
    #[must_use]
    pub const fn viewport(mut self, width: u32, height: u32) -> Self {
        self.viewport_width = width;
        self.viewport_height = height;
        self
    }

    /// Set per-test timeout
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Set browser engine
    #[must_use]
    pub const fn browser(mut self, browser: BrowserKind) -> Self {
        self.browser = browser;
        self
    }

    /// Per-test timeout as a Duration
    #[must_use]
    pub const fn timeout_duration(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Resolve `url` against the base URL
    pub fn resolve_url(&self, url: &str) -> PollwrightResult<String> {
        if url.is_empty() {
            return Err(PollwrightError::NavigationError {
                url: String::new(),
                message: "empty URL".to_string(),
            });
        }
        if url.contains("://") {
            return Ok(url.to_string());
        }
        match &self.base_url {
            Some(base) => Ok(format!(
                "{}/{}",
                base.trim_end_matches('/'),
                url.trim_start_matches('/')
            )),
            None => Err(PollwrightError::NavigationError {
                url: url.to_string(),
                message: "relative URL without a base URL".to_string(),
            }),
        }
    }
}
