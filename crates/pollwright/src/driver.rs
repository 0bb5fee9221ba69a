//! Page Driver Capability
//!
//! The browser-automation surface that condition checks close over. The
//! poller never sees a driver; flows capture `&impl PageDriver` in their
//! check closures, so every method takes `&self`.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │  PageDriver (async trait)                                    │
//! ├──────────────────────────────────────────────────────────────┤
//! │  navigate / reload / current_url                             │
//! │  query(selector)   ──► ElementState { visible, text, count } │
//! │  perform(selector, ElementAction)                            │
//! │  wait_for_load(LoadState) / pause(duration)                  │
//! │  dialogs()         ──► DialogHub                             │
//! └──────────────────────────────────────────────────────────────┘
//!          ▲                                   ▲
//!   real browser backend               MockDriver (tests)
//! ```

use crate::dialog::{Dialog, DialogHub};
use crate::result::{PollwrightError, PollwrightResult};
use crate::settings::DriverConfig;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Selector used for page-level actions (mouse wheel, mouse move)
pub const PAGE: &str = ":root";

// =============================================================================
// LOAD STATE
// =============================================================================

/// Page load states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum LoadState {
    /// Wait for the `load` event to fire
    #[default]
    Load,
    /// Wait for `DOMContentLoaded` event
    DomContentLoaded,
    /// Wait for network to be idle
    NetworkIdle,
}

impl LoadState {
    /// Get the JavaScript event name for this load state
    #[must_use]
    pub const fn event_name(&self) -> &'static str {
        match self {
            Self::Load => "load",
            Self::DomContentLoaded => "DOMContentLoaded",
            Self::NetworkIdle => "networkidle",
        }
    }
}

impl std::fmt::Display for LoadState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.event_name())
    }
}

// =============================================================================
// ELEMENT STATE / ACTIONS
// =============================================================================

/// Snapshot of what a selector matches right now
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElementState {
    /// First match is visible
    pub visible: bool,
    /// Text content of the first match
    pub text: Option<String>,
    /// Number of matches
    pub count: usize,
}

impl ElementState {
    /// Nothing matches
    #[must_use]
    pub const fn missing() -> Self {
        Self {
            visible: false,
            text: None,
            count: 0,
        }
    }

    /// One visible match with text
    #[must_use]
    pub fn visible(text: impl Into<String>) -> Self {
        Self {
            visible: true,
            text: Some(text.into()),
            count: 1,
        }
    }

    /// One match, in the DOM but not visible
    #[must_use]
    pub const fn hidden() -> Self {
        Self {
            visible: false,
            text: None,
            count: 1,
        }
    }

    /// Replace the text
    #[must_use]
    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    /// Set the match count
    #[must_use]
    pub const fn with_count(mut self, count: usize) -> Self {
        self.count = count;
        self
    }

    /// Is anything matched at all?
    #[must_use]
    pub const fn is_present(&self) -> bool {
        self.count > 0
    }

    /// Trimmed text, empty when absent
    #[must_use]
    pub fn text_trimmed(&self) -> &str {
        self.text.as_deref().map_or("", str::trim)
    }
}

/// Interaction performed against a selector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ElementAction {
    /// Left click
    Click,
    /// Right click (context menu)
    RightClick,
    /// Replace input value
    Fill(String),
    /// Press a key while focused (e.g. `ArrowRight`)
    Press(String),
    /// Hover the pointer over the element
    Hover,
    /// Select an `<option>` by value
    SelectOption(String),
    /// Tick a checkbox
    Check,
    /// Untick a checkbox
    Uncheck,
    /// Drag onto another selector
    DragTo(String),
    /// Scroll until the element is in view
    ScrollIntoView,
    /// Scroll the mouse wheel (page-level, use [`PAGE`])
    Wheel {
        /// Horizontal delta in pixels
        delta_x: f64,
        /// Vertical delta in pixels
        delta_y: f64,
    },
    /// Move the pointer (page-level, use [`PAGE`])
    MouseMove {
        /// X coordinate
        x: f64,
        /// Y coordinate
        y: f64,
    },
}

impl ElementAction {
    /// Short name used in call history and logs
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Click => "click",
            Self::RightClick => "right_click",
            Self::Fill(_) => "fill",
            Self::Press(_) => "press",
            Self::Hover => "hover",
            Self::SelectOption(_) => "select_option",
            Self::Check => "check",
            Self::Uncheck => "uncheck",
            Self::DragTo(_) => "drag_to",
            Self::ScrollIntoView => "scroll_into_view",
            Self::Wheel { .. } => "wheel",
            Self::MouseMove { .. } => "mouse_move",
        }
    }

    /// Actions that do not need a matched element
    #[must_use]
    pub const fn is_page_level(&self) -> bool {
        matches!(self, Self::Wheel { .. } | Self::MouseMove { .. })
    }
}

// =============================================================================
// DRIVER TRAIT
// =============================================================================

/// Abstract driver for browser automation
///
/// # Implementations
///
/// - `MockDriver` - scripted in-memory page for tests
#[async_trait]
pub trait PageDriver: Send + Sync {
    /// Navigate to URL (relative URLs resolve against the base URL)
    async fn navigate(&self, url: &str) -> PollwrightResult<()>;

    /// Reload the current page
    async fn reload(&self) -> PollwrightResult<()>;

    /// Get current URL
    async fn current_url(&self) -> PollwrightResult<String>;

    /// Read the state of whatever `selector` matches
    async fn query(&self, selector: &str) -> PollwrightResult<ElementState>;

    /// Perform an interaction
    async fn perform(&self, selector: &str, action: ElementAction) -> PollwrightResult<()>;

    /// Wait until the page reaches `state`
    async fn wait_for_load(&self, state: LoadState) -> PollwrightResult<()>;

    /// Fixed wait
    async fn pause(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }

    /// Dialog hub this page dispatches into
    fn dialogs(&self) -> &DialogHub;
}

// =============================================================================
// MOCK DRIVER
// =============================================================================

/// A scripted change to the mock page
#[derive(Debug, Clone, PartialEq)]
pub enum MockEffect {
    /// Insert or replace an element
    SetElement {
        /// Selector
        selector: String,
        /// New state
        state: ElementState,
    },
    /// Change text of an existing element (inserted visible if missing)
    SetText {
        /// Selector
        selector: String,
        /// New text
        text: String,
    },
    /// Remove an element
    Remove {
        /// Selector
        selector: String,
    },
    /// Open a dialog; routed through the driver's [`DialogHub`]
    OpenDialog(Dialog),
    /// Change the current URL
    Navigate(String),
}

impl MockEffect {
    /// Shorthand for [`MockEffect::SetElement`]
    #[must_use]
    pub fn set(selector: impl Into<String>, state: ElementState) -> Self {
        Self::SetElement {
            selector: selector.into(),
            state,
        }
    }

    /// Shorthand for [`MockEffect::SetText`]
    #[must_use]
    pub fn text(selector: impl Into<String>, text: impl Into<String>) -> Self {
        Self::SetText {
            selector: selector.into(),
            text: text.into(),
        }
    }

    /// Shorthand for [`MockEffect::Remove`]
    #[must_use]
    pub fn remove(selector: impl Into<String>) -> Self {
        Self::Remove {
            selector: selector.into(),
        }
    }
}

#[derive(Debug, Default)]
struct MockPage {
    url: String,
    elements: HashMap<String, ElementState>,
    reload_patches: VecDeque<Vec<MockEffect>>,
    action_steps: HashMap<String, VecDeque<Vec<MockEffect>>>,
    action_fallbacks: HashMap<String, Vec<MockEffect>>,
    call_history: Vec<String>,
}

impl MockPage {
    /// Apply page effects, handing dialogs back to the caller
    fn apply(&mut self, effects: Vec<MockEffect>) -> Vec<Dialog> {
        let mut dialogs = Vec::new();
        for effect in effects {
            match effect {
                MockEffect::SetElement { selector, state } => {
                    self.elements.insert(selector, state);
                }
                MockEffect::SetText { selector, text } => {
                    self.elements
                        .entry(selector)
                        .or_insert_with(|| ElementState::visible(""))
                        .text = Some(text);
                }
                MockEffect::Remove { selector } => {
                    self.elements.remove(&selector);
                }
                MockEffect::OpenDialog(dialog) => dialogs.push(dialog),
                MockEffect::Navigate(url) => self.url = url,
            }
        }
        dialogs
    }
}

/// Mock driver for unit testing
///
/// Elements live in a selector-keyed map. Each `reload()` applies the next
/// queued patch. Each action on a selector applies the next scripted step
/// for that selector, or its fallback once the steps run out.
#[derive(Debug)]
pub struct MockDriver {
    config: DriverConfig,
    page: Mutex<MockPage>,
    dialogs: DialogHub,
}

impl Default for MockDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl MockDriver {
    /// Create new mock driver
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(DriverConfig::default())
    }

    /// Create with a specific driver config
    #[must_use]
    pub fn with_config(config: DriverConfig) -> Self {
        Self {
            config,
            page: Mutex::new(MockPage::default()),
            dialogs: DialogHub::new(),
        }
    }

    fn page(&self) -> MutexGuard<'_, MockPage> {
        self.page.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Driver config in use
    #[must_use]
    pub const fn config(&self) -> &DriverConfig {
        &self.config
    }

    /// Add an element (builder style)
    #[must_use]
    pub fn with_element(self, selector: impl Into<String>, state: ElementState) -> Self {
        self.set_element(selector, state);
        self
    }

    /// Insert or replace an element
    pub fn set_element(&self, selector: impl Into<String>, state: ElementState) {
        self.page().elements.insert(selector.into(), state);
    }

    /// Queue a patch applied by the next unconsumed `reload()`
    pub fn queue_reload(&self, effects: impl IntoIterator<Item = MockEffect>) {
        self.page()
            .reload_patches
            .push_back(effects.into_iter().collect());
    }

    /// Queue the effects of the next unconsumed action on `selector`
    pub fn script_action(
        &self,
        selector: impl Into<String>,
        effects: impl IntoIterator<Item = MockEffect>,
    ) {
        self.page()
            .action_steps
            .entry(selector.into())
            .or_default()
            .push_back(effects.into_iter().collect());
    }

    /// Effects applied on every action on `selector` once scripted steps run out
    pub fn persist_action(
        &self,
        selector: impl Into<String>,
        effects: impl IntoIterator<Item = MockEffect>,
    ) {
        self.page()
            .action_fallbacks
            .insert(selector.into(), effects.into_iter().collect());
    }

    /// Get call history
    #[must_use]
    pub fn history(&self) -> Vec<String> {
        self.page().call_history.clone()
    }

    /// Check if method was called
    #[must_use]
    pub fn was_called(&self, method: &str) -> bool {
        self.page()
            .call_history
            .iter()
            .any(|call| call.starts_with(method))
    }

    /// Number of recorded calls starting with `prefix`
    #[must_use]
    pub fn call_count(&self, prefix: &str) -> usize {
        self.page()
            .call_history
            .iter()
            .filter(|call| call.starts_with(prefix))
            .count()
    }

    fn record(&self, call: String) {
        self.page().call_history.push(call);
    }

    fn open_dialogs(&self, dialogs: Vec<Dialog>) {
        for dialog in dialogs {
            self.dialogs.dispatch(dialog);
        }
    }
}

#[async_trait]
impl PageDriver for MockDriver {
    async fn navigate(&self, url: &str) -> PollwrightResult<()> {
        let resolved = self.config.resolve_url(url)?;
        self.record(format!("navigate:{resolved}"));
        self.page().url = resolved;
        Ok(())
    }

    async fn reload(&self) -> PollwrightResult<()> {
        let dialogs = {
            let mut page = self.page();
            page.call_history.push("reload".to_string());
            match page.reload_patches.pop_front() {
                Some(patch) => page.apply(patch),
                None => Vec::new(),
            }
        };
        self.open_dialogs(dialogs);
        Ok(())
    }

    async fn current_url(&self) -> PollwrightResult<String> {
        Ok(self.page().url.clone())
    }

    async fn query(&self, selector: &str) -> PollwrightResult<ElementState> {
        let mut page = self.page();
        page.call_history.push(format!("query:{selector}"));
        Ok(page
            .elements
            .get(selector)
            .cloned()
            .unwrap_or_else(ElementState::missing))
    }

    async fn perform(&self, selector: &str, action: ElementAction) -> PollwrightResult<()> {
        let dialogs = {
            let mut page = self.page();
            page.call_history
                .push(format!("{}:{selector}", action.name()));
            let present = page.elements.get(selector).is_some_and(ElementState::is_present);
            if !present && !action.is_page_level() && selector != PAGE {
                return Err(PollwrightError::ElementNotFound {
                    selector: selector.to_string(),
                });
            }
            let scripted = page
                .action_steps
                .get_mut(selector)
                .and_then(VecDeque::pop_front);
            let step = match scripted {
                Some(effects) => Some(effects),
                None => page.action_fallbacks.get(selector).cloned(),
            };
            match step {
                Some(effects) => page.apply(effects),
                None => Vec::new(),
            }
        };
        self.open_dialogs(dialogs);
        Ok(())
    }

    async fn wait_for_load(&self, state: LoadState) -> PollwrightResult<()> {
        self.record(format!("wait_for_load:{state}"));
        Ok(())
    }

    async fn pause(&self, duration: Duration) {
        // virtual time: record only
        self.record(format!("pause:{}", duration.as_millis()));
    }

    fn dialogs(&self) -> &DialogHub {
        &self.dialogs
    }
}
