//! Pollwright: Bounded Condition Polling for Browser-Driven Tests
//!
//! Pages under test do things on their own schedule: ads reopen after a
//! reload, links vanish at random, menus float, sliders step. Pollwright
//! turns each of those "keep checking until" loops into one bounded,
//! observable session with a typed outcome.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                   POLLWRIGHT Architecture                        │
//! ├─────────────────────────────────────────────────────────────────┤
//! │   ┌────────────┐    ┌────────────┐    ┌────────────┐            │
//! │   │ PollConfig │    │ Poller     │    │ check()    │            │
//! │   │ (budget)   │───►│ session    │───►│ closure    │            │
//! │   └────────────┘    └─────┬──────┘    └─────┬──────┘            │
//! │                           │                 │                    │
//! │                           ▼                 ▼                    │
//! │                    PollResult        PageDriver / DialogHub      │
//! │            Satisfied | Regressed | TimedOut                      │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```
//! use pollwright::{PollConfig, PollOutcome, Poller, TerminalOutcome};
//!
//! let mut seen = 0;
//! let result = Poller::new(PollConfig::attempts(5))
//!     .unwrap()
//!     .run(|| {
//!         seen += 1;
//!         PollOutcome::from(seen == 3)
//!     })
//!     .unwrap();
//! assert_eq!(result.outcome, TerminalOutcome::Satisfied);
//! assert_eq!(result.attempts, 3);
//! ```

#![warn(missing_docs)]
// Lints are configured in workspace Cargo.toml [workspace.lints.clippy]

mod dialog;
mod driver;
mod poll;
mod result;

/// Reusable page loops built on the poller
pub mod flows;

/// Tracing subscriber initialisation
pub mod logging;

/// Poll profiles and driver configuration
pub mod settings;

pub use dialog::{
    AutoDialogBehavior, Dialog, DialogAction, DialogHandlerFn, DialogHub, DialogResponse,
    DialogSubscription, DialogType,
};
pub use driver::{
    ElementAction, ElementState, LoadState, MockDriver, MockEffect, PageDriver, PAGE,
};
pub use flows::{
    dismiss_looping_modal, expect_dialog, reload_until_missing, scroll_until_visible,
    step_until_value, ModalProbe, ModalReport, ReloadReport, ScrollReport, StepReport,
};
pub use poll::{
    poll_until, CancelToken, PollConfig, PollOutcome, PollResult, Poller, TerminalOutcome,
    DEFAULT_POLL_INTERVAL_MS, DEFAULT_POLL_TIMEOUT_MS,
};
pub use result::{PollwrightError, PollwrightResult};
pub use settings::{BrowserKind, CaptureMode, DriverConfig, PollSettings};

/// Prelude for convenient imports
pub mod prelude {
    pub use super::*;
}
