//! Dialog Interception
//!
//! Browser dialogs (alert, confirm, prompt, beforeunload) arrive out of band
//! relative to the action that triggers them. The hub lets a caller register
//! interest *before* triggering the action and then await exactly one
//! resolution:
//!
//! ```text
//!   subscribe(kind) ──► trigger action ──► driver dispatch(dialog)
//!         │                                      │
//!         └──────── oneshot resolution ◄─────────┘
//! ```
//!
//! Dialogs nobody subscribed to go to the persistent handler, then to the
//! automatic behaviour.

use crate::result::{PollwrightError, PollwrightResult};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::oneshot;

/// Type of browser dialog
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DialogType {
    /// Alert dialog (OK button only)
    Alert,
    /// Confirm dialog (OK/Cancel buttons)
    Confirm,
    /// Prompt dialog (text input + OK/Cancel)
    Prompt,
    /// Before unload dialog (Leave/Stay buttons)
    BeforeUnload,
}

impl std::fmt::Display for DialogType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Alert => write!(f, "alert"),
            Self::Confirm => write!(f, "confirm"),
            Self::Prompt => write!(f, "prompt"),
            Self::BeforeUnload => write!(f, "beforeunload"),
        }
    }
}

/// Action taken on a dialog
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DialogAction {
    /// Dialog was accepted (OK/Yes/Leave)
    Accept,
    /// Dialog was accepted with input text (for prompts)
    AcceptWith(String),
    /// Dialog was dismissed (Cancel/No/Stay)
    Dismiss,
    /// Dialog is pending (not yet handled)
    Pending,
}

/// Represents a browser dialog
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dialog {
    dialog_type: DialogType,
    message: String,
    default_value: Option<String>,
    action: DialogAction,
}

impl Dialog {
    /// Create a new dialog
    #[must_use]
    pub fn new(dialog_type: DialogType, message: impl Into<String>) -> Self {
        Self {
            dialog_type,
            message: message.into(),
            default_value: None,
            action: DialogAction::Pending,
        }
    }

    /// Create an alert dialog
    #[must_use]
    pub fn alert(message: impl Into<String>) -> Self {
        Self::new(DialogType::Alert, message)
    }

    /// Create a confirm dialog
    #[must_use]
    pub fn confirm(message: impl Into<String>) -> Self {
        Self::new(DialogType::Confirm, message)
    }

    /// Create a prompt dialog
    #[must_use]
    pub fn prompt(message: impl Into<String>, default: Option<String>) -> Self {
        let mut dialog = Self::new(DialogType::Prompt, message);
        dialog.default_value = default;
        dialog
    }

    /// Get dialog type
    #[must_use]
    pub fn dialog_type(&self) -> DialogType {
        self.dialog_type
    }

    /// Get dialog message
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Get action taken
    #[must_use]
    pub fn action(&self) -> &DialogAction {
        &self.action
    }

    /// Check if dialog was handled
    #[must_use]
    pub fn is_handled(&self) -> bool {
        !matches!(self.action, DialogAction::Pending)
    }

    /// Accept the dialog
    pub fn accept(&mut self) {
        self.action = DialogAction::Accept;
    }

    /// Accept the dialog with input text (for prompts)
    pub fn accept_with(&mut self, text: impl Into<String>) {
        self.action = DialogAction::AcceptWith(text.into());
    }

    /// Dismiss the dialog
    pub fn dismiss(&mut self) {
        self.action = DialogAction::Dismiss;
    }
}

/// What a subscriber does with the dialog it receives
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DialogResponse {
    /// Press OK
    Accept,
    /// Type text then press OK
    AcceptWith(String),
    /// Press OK, using the prompt's default value if it has one
    AcceptDefault,
    /// Press Cancel
    Dismiss,
}

impl DialogResponse {
    /// Apply this response to `dialog`
    pub fn apply(&self, dialog: &mut Dialog) {
        match self {
            Self::Accept => dialog.accept(),
            Self::AcceptWith(text) => dialog.accept_with(text.clone()),
            Self::AcceptDefault => match dialog.default_value.clone() {
                Some(default) => dialog.accept_with(default),
                None => dialog.accept(),
            },
            Self::Dismiss => dialog.dismiss(),
        }
    }
}

/// Persistent handler function type for dialogs
pub type DialogHandlerFn = Arc<dyn Fn(&mut Dialog) + Send + Sync>;

/// Fallback for dialogs no subscriber or handler dealt with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AutoDialogBehavior {
    /// Accept all dialogs automatically
    AcceptAll,
    /// Dismiss all dialogs automatically
    #[default]
    DismissAll,
    /// Accept with empty string (for prompts)
    AcceptEmpty,
    /// Use default value (for prompts)
    UseDefault,
    /// Leave dialogs pending
    Manual,
}

struct PendingSubscription {
    id: u64,
    kind: Option<DialogType>,
    response: DialogResponse,
    sender: oneshot::Sender<Dialog>,
}

impl PendingSubscription {
    fn wants(&self, dialog: &Dialog) -> bool {
        self.kind.map_or(true, |kind| kind == dialog.dialog_type)
    }
}

#[derive(Default)]
struct HubState {
    history: Vec<Dialog>,
    handler: Option<DialogHandlerFn>,
    auto_behavior: AutoDialogBehavior,
    subscriptions: Vec<PendingSubscription>,
    next_id: u64,
}

/// Routes dialogs raised by a page to subscribers and handlers
#[derive(Clone, Default)]
pub struct DialogHub {
    state: Arc<Mutex<HubState>>,
}

impl DialogHub {
    /// Create an empty hub
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HubState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a one-shot subscription.
    ///
    /// `kind = None` matches any dialog type. The subscription is removed
    /// when it resolves or when the returned handle is dropped.
    #[must_use]
    pub fn subscribe(
        &self,
        kind: Option<DialogType>,
        response: DialogResponse,
    ) -> DialogSubscription {
        let (sender, receiver) = oneshot::channel();
        let id = {
            let mut state = self.lock();
            state.next_id += 1;
            let id = state.next_id;
            state.subscriptions.push(PendingSubscription {
                id,
                kind,
                response,
                sender,
            });
            id
        };
        tracing::debug!(id, kind = ?kind, "dialog subscription registered");
        DialogSubscription {
            id,
            hub: self.clone(),
            receiver: Some(receiver),
        }
    }

    fn unsubscribe(&self, id: u64) {
        self.lock().subscriptions.retain(|sub| sub.id != id);
    }

    /// Install a persistent handler for dialogs nobody subscribed to
    pub fn on_dialog<F>(&self, handler: F)
    where
        F: Fn(&mut Dialog) + Send + Sync + 'static,
    {
        self.lock().handler = Some(Arc::new(handler));
    }

    /// Remove the persistent handler
    pub fn clear_handler(&self) {
        self.lock().handler = None;
    }

    /// Set automatic behavior
    pub fn set_auto_behavior(&self, behavior: AutoDialogBehavior) {
        self.lock().auto_behavior = behavior;
    }

    /// Route an incoming dialog and return it with its action filled in.
    ///
    /// Drivers call this when the page opens a dialog.
    pub fn dispatch(&self, mut dialog: Dialog) -> Dialog {
        let (subscriber, handler, behavior) = {
            let mut state = self.lock();
            state.subscriptions.retain(|sub| !sub.sender.is_closed());
            let subscriber = state
                .subscriptions
                .iter()
                .position(|sub| sub.wants(&dialog))
                .map(|index| state.subscriptions.remove(index));
            (subscriber, state.handler.clone(), state.auto_behavior)
        };

        if let Some(subscriber) = subscriber {
            subscriber.response.apply(&mut dialog);
            tracing::debug!(
                id = subscriber.id,
                kind = %dialog.dialog_type,
                message = %dialog.message,
                "dialog resolved subscription"
            );
            self.record(&dialog);
            // receiver may have been dropped between the retain and now
            let _ = subscriber.sender.send(dialog.clone());
            return dialog;
        }

        if let Some(handler) = handler {
            handler(&mut dialog);
            if dialog.is_handled() {
                self.record(&dialog);
                return dialog;
            }
        }

        match behavior {
            AutoDialogBehavior::AcceptAll => dialog.accept(),
            AutoDialogBehavior::DismissAll => dialog.dismiss(),
            AutoDialogBehavior::AcceptEmpty => dialog.accept_with(""),
            AutoDialogBehavior::UseDefault => DialogResponse::AcceptDefault.apply(&mut dialog),
            AutoDialogBehavior::Manual => {}
        }
        tracing::debug!(kind = %dialog.dialog_type, ?behavior, "dialog handled automatically");
        self.record(&dialog);
        dialog
    }

    fn record(&self, dialog: &Dialog) {
        self.lock().history.push(dialog.clone());
    }

    /// Get all dialogs encountered
    #[must_use]
    pub fn dialogs(&self) -> Vec<Dialog> {
        self.lock().history.clone()
    }

    /// Get count of dialogs
    #[must_use]
    pub fn dialog_count(&self) -> usize {
        self.lock().history.len()
    }

    /// Number of live subscriptions
    #[must_use]
    pub fn subscription_count(&self) -> usize {
        self.lock().subscriptions.len()
    }

    /// Clear dialog history
    pub fn clear(&self) {
        self.lock().history.clear();
    }

    /// Check if any dialogs were left pending
    #[must_use]
    pub fn has_pending(&self) -> bool {
        self.lock().history.iter().any(|dialog| !dialog.is_handled())
    }

    /// Get last dialog
    #[must_use]
    pub fn last_dialog(&self) -> Option<Dialog> {
        self.lock().history.last().cloned()
    }
}

impl std::fmt::Debug for DialogHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("DialogHub")
            .field("dialog_count", &state.history.len())
            .field("subscriptions", &state.subscriptions.len())
            .field("has_handler", &state.handler.is_some())
            .field("auto_behavior", &state.auto_behavior)
            .finish()
    }
}

/// Handle to a registered one-shot subscription; dropping it unsubscribes
#[derive(Debug)]
pub struct DialogSubscription {
    id: u64,
    hub: DialogHub,
    receiver: Option<oneshot::Receiver<Dialog>>,
}

impl DialogSubscription {
    /// Take the dialog if it has already arrived
    pub fn try_take(&mut self) -> Option<Dialog> {
        let receiver = self.receiver.as_mut()?;
        match receiver.try_recv() {
            Ok(dialog) => {
                self.receiver = None;
                Some(dialog)
            }
            Err(_) => None,
        }
    }

    /// Wait for the single dialog this subscription resolves with
    pub async fn wait(mut self, timeout: Duration) -> PollwrightResult<Dialog> {
        let Some(receiver) = self.receiver.take() else {
            return Err(PollwrightError::DialogError {
                message: "subscription already consumed".to_string(),
            });
        };
        match tokio::time::timeout(timeout, receiver).await {
            Ok(Ok(dialog)) => Ok(dialog),
            Ok(Err(_)) => Err(PollwrightError::DialogError {
                message: "dialog hub dropped the subscription".to_string(),
            }),
            Err(_) => Err(PollwrightError::Timeout {
                ms: timeout.as_millis() as u64,
            }),
        }
    }
}

impl Drop for DialogSubscription {
    fn drop(&mut self) {
        self.hub.unsubscribe(self.id);
    }
}
