//! Bounded Condition Polling
//!
//! Repeatedly evaluates a caller-supplied condition check under an attempt
//! and/or elapsed-time budget, sleeping between attempts and stopping as soon
//! as a terminal state is reached.
//!
//! ```text
//!   Idle ──run──► Polling ──Satisfied──────────────► Satisfied
//!                   │  ▲                              (terminal)
//!                   │  └── Continue / Regressed* ──┐
//!                   │          (sleep, retry)      │
//!                   ├──Regressed (stop_on_regression)► Regressed
//!                   └──budget exhausted─────────────► TimedOut
//! ```
//!
//! `*` a `Regressed` outcome only stops the session when
//! [`PollConfig::stop_on_regression`] is set.
//!
//! Budgets are checked *before* each condition check, so a slow check can
//! overshoot the time budget by at most its own duration. Attempt and time
//! budgets combine: whichever is hit first ends the session.

use crate::result::{PollwrightError, PollwrightResult};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::Instrument;

// =============================================================================
// CONSTANTS
// =============================================================================

/// Default elapsed-time budget (30 seconds)
pub const DEFAULT_POLL_TIMEOUT_MS: u64 = 30_000;

/// Default delay between attempts (50ms)
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 50;

// =============================================================================
// OUTCOMES
// =============================================================================

/// Result of a single condition check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PollOutcome {
    /// Not there yet, keep polling
    Continue,
    /// The awaited state was reached
    Satisfied,
    /// Something expected went away
    Regressed,
}

impl PollOutcome {
    /// Whether this outcome can end a session on its own
    #[must_use]
    pub const fn is_terminal(self, stop_on_regression: bool) -> bool {
        match self {
            Self::Continue => false,
            Self::Satisfied => true,
            Self::Regressed => stop_on_regression,
        }
    }
}

impl From<bool> for PollOutcome {
    fn from(satisfied: bool) -> Self {
        if satisfied {
            Self::Satisfied
        } else {
            Self::Continue
        }
    }
}

/// How a poll session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminalOutcome {
    /// Condition check reported [`PollOutcome::Satisfied`]
    Satisfied,
    /// Condition check reported [`PollOutcome::Regressed`]
    Regressed,
    /// Budget ran out first
    TimedOut,
}

impl std::fmt::Display for TerminalOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Satisfied => write!(f, "satisfied"),
            Self::Regressed => write!(f, "regressed"),
            Self::TimedOut => write!(f, "timed out"),
        }
    }
}

/// Final record of a poll session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollResult {
    /// Terminal outcome
    pub outcome: TerminalOutcome,
    /// Number of condition checks performed
    pub attempts: u32,
    /// Wall-clock time spent in the session
    #[serde(rename = "elapsed_ms", with = "millis")]
    pub elapsed: Duration,
}

/// Durations on disk are whole milliseconds
mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

impl PollResult {
    /// Did the condition get satisfied?
    #[must_use]
    pub const fn is_satisfied(&self) -> bool {
        matches!(self.outcome, TerminalOutcome::Satisfied)
    }

    /// Did the session stop on a regression?
    #[must_use]
    pub const fn is_regressed(&self) -> bool {
        matches!(self.outcome, TerminalOutcome::Regressed)
    }

    /// Did the budget run out?
    #[must_use]
    pub const fn is_timed_out(&self) -> bool {
        matches!(self.outcome, TerminalOutcome::TimedOut)
    }

    /// Turn anything but [`TerminalOutcome::Satisfied`] into an error.
    ///
    /// Regressions and timeouts are ordinary results; use this when the
    /// enclosing test should fail on them.
    pub fn expect_satisfied(self, description: impl Into<String>) -> PollwrightResult<Self> {
        if self.is_satisfied() {
            Ok(self)
        } else {
            Err(PollwrightError::Unsatisfied {
                description: description.into(),
                outcome: self.outcome,
                attempts: self.attempts,
                elapsed_ms: self.elapsed.as_millis() as u64,
            })
        }
    }
}

// =============================================================================
// POLL CONFIG
// =============================================================================

/// Budget and pacing for a poll session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawPollConfig", into = "RawPollConfig")]
pub struct PollConfig {
    /// Maximum number of condition checks
    pub max_attempts: Option<u32>,
    /// Maximum wall-clock time before giving up
    pub max_elapsed: Option<Duration>,
    /// Sleep between attempts
    pub inter_attempt_delay: Duration,
    /// Stop the session when a check reports [`PollOutcome::Regressed`]
    pub stop_on_regression: bool,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            max_attempts: None,
            max_elapsed: Some(Duration::from_millis(DEFAULT_POLL_TIMEOUT_MS)),
            inter_attempt_delay: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            stop_on_regression: true,
        }
    }
}

impl PollConfig {
    /// Create a config with the default time budget
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Attempt budget only, no delay between attempts
    #[must_use]
    pub const fn attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts: Some(max_attempts),
            max_elapsed: None,
            inter_attempt_delay: Duration::ZERO,
            stop_on_regression: true,
        }
    }

    /// Time budget only, default delay between attempts
    #[must_use]
    pub const fn within(max_elapsed: Duration) -> Self {
        Self {
            max_attempts: None,
            max_elapsed: Some(max_elapsed),
            inter_attempt_delay: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            stop_on_regression: true,
        }
    }

    /// Set the attempt budget
    #[must_use]
    pub const fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    /// Set the time budget
    #[must_use]
    pub const fn with_max_elapsed(mut self, max_elapsed: Duration) -> Self {
        self.max_elapsed = Some(max_elapsed);
        self
    }

    /// Set the delay between attempts
    #[must_use]
    pub const fn with_delay(mut self, delay: Duration) -> Self {
        self.inter_attempt_delay = delay;
        self
    }

    /// Set whether a regression ends the session
    #[must_use]
    pub const fn with_stop_on_regression(mut self, stop: bool) -> Self {
        self.stop_on_regression = stop;
        self
    }

    /// Check the config can produce a bounded session
    pub fn validate(&self) -> PollwrightResult<()> {
        if self.max_attempts.is_none() && self.max_elapsed.is_none() {
            return Err(PollwrightError::invalid_config(
                "neither max_attempts nor max_elapsed is set",
            ));
        }
        if self.max_attempts == Some(0) {
            return Err(PollwrightError::invalid_config(
                "max_attempts must be positive",
            ));
        }
        if self.max_elapsed.is_some_and(|max| max.is_zero()) {
            return Err(PollwrightError::invalid_config(
                "max_elapsed must be positive",
            ));
        }
        Ok(())
    }

    fn attempts_exhausted(&self, attempts: u32) -> bool {
        self.max_attempts.is_some_and(|max| attempts >= max)
    }

    fn time_exhausted(&self, elapsed: Duration) -> bool {
        self.max_elapsed.is_some_and(|max| elapsed >= max)
    }

    /// Delay before the next attempt, clipped to the remaining time budget
    fn next_delay(&self, elapsed: Duration) -> Duration {
        match self.max_elapsed {
            Some(max) => self.inter_attempt_delay.min(max.saturating_sub(elapsed)),
            None => self.inter_attempt_delay,
        }
    }
}

/// On-disk shape of [`PollConfig`]: milliseconds, signed delay
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawPollConfig {
    #[serde(default)]
    max_attempts: Option<u32>,
    #[serde(default)]
    max_elapsed_ms: Option<u64>,
    #[serde(default)]
    inter_attempt_delay_ms: i64,
    #[serde(default = "default_stop_on_regression")]
    stop_on_regression: bool,
}

const fn default_stop_on_regression() -> bool {
    true
}

impl TryFrom<RawPollConfig> for PollConfig {
    type Error = PollwrightError;

    fn try_from(raw: RawPollConfig) -> Result<Self, Self::Error> {
        let delay_ms = u64::try_from(raw.inter_attempt_delay_ms).map_err(|_| {
            PollwrightError::invalid_config(format!(
                "inter_attempt_delay_ms must not be negative (got {})",
                raw.inter_attempt_delay_ms
            ))
        })?;
        let config = Self {
            max_attempts: raw.max_attempts,
            max_elapsed: raw.max_elapsed_ms.map(Duration::from_millis),
            inter_attempt_delay: Duration::from_millis(delay_ms),
            stop_on_regression: raw.stop_on_regression,
        };
        config.validate()?;
        Ok(config)
    }
}

/// Round up so a non-zero sub-millisecond duration stays non-zero
fn ceil_millis(duration: Duration) -> u64 {
    let whole = duration.as_millis() as u64;
    if duration > Duration::from_millis(whole) {
        whole + 1
    } else {
        whole
    }
}

impl From<PollConfig> for RawPollConfig {
    fn from(config: PollConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            max_elapsed_ms: config.max_elapsed.map(ceil_millis),
            inter_attempt_delay_ms: ceil_millis(config.inter_attempt_delay) as i64,
            stop_on_regression: config.stop_on_regression,
        }
    }
}

// =============================================================================
// CANCELLATION
// =============================================================================

/// Cooperative cancellation flag shared between a session and its host
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    /// Create an un-cancelled token
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation; observed at the top of the next attempt
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Has cancellation been requested?
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

// =============================================================================
// POLLER
// =============================================================================

/// A validated, single-use poll session.
///
/// `run` and friends take `self`, so a poller that reached a terminal state
/// cannot be polled again. Clone before running to keep a template around.
#[derive(Debug, Clone)]
pub struct Poller {
    config: PollConfig,
    cancel: Option<CancelToken>,
    description: String,
}

impl Poller {
    /// Validate `config` and create a session
    pub fn new(config: PollConfig) -> PollwrightResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            cancel: None,
            description: "condition".to_string(),
        })
    }

    /// Attach a cancel token
    #[must_use]
    pub fn with_cancel(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Describe what is being polled for (shows up in logs and errors)
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// The validated config
    #[must_use]
    pub const fn config(&self) -> &PollConfig {
        &self.config
    }

    /// Description of the polled condition
    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Poll a fallible check, blocking the current thread between attempts.
    ///
    /// Errors from `check` are returned as-is; the only errors the poller
    /// adds itself are converted from [`PollwrightError::Cancelled`].
    pub fn try_run<F, E>(self, mut check: F) -> Result<PollResult, E>
    where
        F: FnMut() -> Result<PollOutcome, E>,
        E: From<PollwrightError>,
    {
        let span = self.span();
        let _entered = span.enter();
        let mut session = Session::start(&self);
        loop {
            if let Some(result) = session.begin_attempt()? {
                return Ok(result);
            }
            let outcome = check()?;
            match session.settle(outcome) {
                Step::Finish(result) => return Ok(result),
                Step::Wait(delay) => {
                    if !delay.is_zero() {
                        std::thread::sleep(delay);
                    }
                }
            }
        }
    }

    /// Poll an infallible check, blocking the current thread between attempts
    pub fn run<F>(self, mut check: F) -> PollwrightResult<PollResult>
    where
        F: FnMut() -> PollOutcome,
    {
        self.try_run(|| Ok(check()))
    }

    /// Poll a fallible async check, sleeping on the tokio timer
    pub async fn try_run_async<F, Fut, E>(self, mut check: F) -> Result<PollResult, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<PollOutcome, E>>,
        E: From<PollwrightError>,
    {
        let span = self.span();
        async move {
            let mut session = Session::start(&self);
            loop {
                if let Some(result) = session.begin_attempt()? {
                    return Ok(result);
                }
                let outcome = check().await?;
                match session.settle(outcome) {
                    Step::Finish(result) => return Ok(result),
                    Step::Wait(delay) => {
                        if !delay.is_zero() {
                            tokio::time::sleep(delay).await;
                        }
                    }
                }
            }
        }
        .instrument(span)
        .await
    }

    /// Poll an infallible async check
    pub async fn run_async<F, Fut>(self, mut check: F) -> PollwrightResult<PollResult>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = PollOutcome>,
    {
        self.try_run_async(|| {
            let pending = check();
            async move { Ok(pending.await) }
        })
        .await
    }

    fn span(&self) -> tracing::Span {
        tracing::debug_span!(
            "poll",
            description = %self.description,
            max_attempts = ?self.config.max_attempts,
            max_elapsed_ms = ?self.config.max_elapsed.map(|d| d.as_millis()),
        )
    }
}

/// Per-session counters; lives only for one `run`
struct Session<'a> {
    poller: &'a Poller,
    start: Instant,
    attempts: u32,
}

enum Step {
    Finish(PollResult),
    Wait(Duration),
}

impl<'a> Session<'a> {
    fn start(poller: &'a Poller) -> Self {
        Self {
            poller,
            start: Instant::now(),
            attempts: 0,
        }
    }

    /// Cancellation and budget gate in front of every check
    fn begin_attempt(&mut self) -> PollwrightResult<Option<PollResult>> {
        let elapsed = self.start.elapsed();
        if self.poller.cancel.as_ref().is_some_and(CancelToken::is_cancelled) {
            tracing::debug!(attempts = self.attempts, "poll cancelled");
            return Err(PollwrightError::Cancelled {
                attempts: self.attempts,
                elapsed_ms: elapsed.as_millis() as u64,
            });
        }
        let config = &self.poller.config;
        if self.attempts == u32::MAX
            || config.attempts_exhausted(self.attempts)
            || config.time_exhausted(elapsed)
        {
            return Ok(Some(self.finish(TerminalOutcome::TimedOut)));
        }
        self.attempts += 1;
        Ok(None)
    }

    fn settle(&self, outcome: PollOutcome) -> Step {
        let config = &self.poller.config;
        tracing::debug!(attempt = self.attempts, ?outcome, "poll attempt");
        if outcome.is_terminal(config.stop_on_regression) {
            let terminal = match outcome {
                PollOutcome::Satisfied => TerminalOutcome::Satisfied,
                PollOutcome::Regressed | PollOutcome::Continue => TerminalOutcome::Regressed,
            };
            return Step::Finish(self.finish(terminal));
        }
        // No point sleeping when the next gate is going to refuse anyway
        if config.attempts_exhausted(self.attempts) {
            return Step::Finish(self.finish(TerminalOutcome::TimedOut));
        }
        Step::Wait(config.next_delay(self.start.elapsed()))
    }

    fn finish(&self, outcome: TerminalOutcome) -> PollResult {
        let result = PollResult {
            outcome,
            attempts: self.attempts,
            elapsed: self.start.elapsed(),
        };
        tracing::debug!(
            %outcome,
            attempts = result.attempts,
            elapsed_ms = result.elapsed.as_millis() as u64,
            "poll finished"
        );
        result
    }
}

// =============================================================================
// CONVENIENCE FUNCTIONS
// =============================================================================

/// Poll a boolean predicate until it holds or the budget runs out
pub fn poll_until<F>(mut predicate: F, config: PollConfig) -> PollwrightResult<PollResult>
where
    F: FnMut() -> bool,
{
    Poller::new(config)?.run(|| PollOutcome::from(predicate()))
}

// =============================================================================
// TESTS
// =============================================================================
