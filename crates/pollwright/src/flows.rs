//! Page Flows
//!
//! Reusable loops built on [`Poller`] and [`PageDriver`]. Each flow owns its
//! check closure and returns a small report next to the [`PollResult`];
//! `TimedOut` and `Regressed` come back as results, not errors.
//!
//! | Flow                      | Satisfied when            | Regressed when              |
//! |---------------------------|---------------------------|-----------------------------|
//! | [`reload_until_missing`]  | never                     | a selector is not visible   |
//! | [`dismiss_looping_modal`] | the modal did not appear  | never                       |
//! | [`scroll_until_visible`]  | the target is visible     | a tracked selector is lost  |
//! | [`step_until_value`]      | the readout hits target   | the readout overshoots      |

use crate::dialog::{Dialog, DialogHub, DialogResponse, DialogType};
use crate::driver::{ElementAction, LoadState, PageDriver, PAGE};
use crate::poll::{PollConfig, PollOutcome, PollResult, Poller};
use crate::result::{PollwrightError, PollwrightResult};
use futures::future::try_join_all;
use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex, MutexGuard, OnceLock, PoisonError};
use std::time::Duration;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Selectors in `selectors` that are not currently visible
async fn hidden_selectors<D, S>(driver: &D, selectors: &[S]) -> PollwrightResult<Vec<String>>
where
    D: PageDriver + ?Sized,
    S: AsRef<str>,
{
    let states = try_join_all(selectors.iter().map(|sel| driver.query(sel.as_ref()))).await?;
    Ok(selectors
        .iter()
        .zip(states)
        .filter(|(_, state)| !state.visible)
        .map(|(sel, _)| sel.as_ref().to_string())
        .collect())
}

// =============================================================================
// RELOAD UNTIL MISSING
// =============================================================================

/// Result of [`reload_until_missing`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReloadReport {
    /// Poll result; `Regressed` means something disappeared
    pub result: PollResult,
    /// Selectors not visible on the last reload
    pub missing: Vec<String>,
}

impl ReloadReport {
    /// Did any selector disappear?
    #[must_use]
    pub fn disappeared(&self) -> bool {
        !self.missing.is_empty()
    }
}

/// Reload the page until one of `selectors` stops being visible.
///
/// Every attempt reloads first, then queries all selectors. A `TimedOut`
/// result means every selector survived every reload.
pub async fn reload_until_missing<D, S>(
    driver: &D,
    selectors: &[S],
    config: PollConfig,
) -> PollwrightResult<ReloadReport>
where
    D: PageDriver + ?Sized,
    S: AsRef<str> + Sync,
{
    let poller = Poller::new(config)?.with_description("reload until an element disappears");
    let missing = Mutex::new(Vec::new());
    let attempt = AtomicU32::new(0);

    let result = {
        let missing = &missing;
        let attempt = &attempt;
        poller
            .try_run_async(move || async move {
                let reloads = attempt.fetch_add(1, Ordering::Relaxed) + 1;
                driver.reload().await?;
                let gone = hidden_selectors(driver, selectors).await?;
                let outcome = if gone.is_empty() {
                    tracing::debug!(reloads, "all elements present");
                    PollOutcome::Continue
                } else {
                    tracing::warn!(reloads, missing = ?gone, "element disappeared after reload");
                    PollOutcome::Regressed
                };
                *lock(missing) = gone;
                Ok::<_, PollwrightError>(outcome)
            })
            .await?
    };

    Ok(ReloadReport {
        result,
        missing: missing.into_inner().unwrap_or_else(PoisonError::into_inner),
    })
}

// =============================================================================
// LOOPING MODAL
// =============================================================================

/// How to find, provoke and close a modal
#[derive(Debug, Clone, PartialEq)]
pub struct ModalProbe {
    /// Selector of the modal's close control
    pub close: String,
    /// Action that provokes the modal, performed each attempt before looking
    pub trigger: Option<(String, ElementAction)>,
    /// Pause after the page loads, before looking
    pub settle: Duration,
}

impl ModalProbe {
    /// Probe for a modal that opens by itself on page load
    #[must_use]
    pub fn new(close: impl Into<String>) -> Self {
        Self {
            close: close.into(),
            trigger: None,
            settle: Duration::from_secs(2),
        }
    }

    /// Probe for an exit-intent modal: the pointer leaves through the top edge
    #[must_use]
    pub fn exit_intent(close: impl Into<String>, viewport_width: u32) -> Self {
        Self {
            close: close.into(),
            trigger: Some((
                PAGE.to_string(),
                ElementAction::MouseMove {
                    x: f64::from(viewport_width) / 2.0,
                    y: -50.0,
                },
            )),
            settle: Duration::from_secs(1),
        }
    }

    /// Set the action that provokes the modal
    #[must_use]
    pub fn with_trigger(mut self, selector: impl Into<String>, action: ElementAction) -> Self {
        self.trigger = Some((selector.into(), action));
        self
    }

    /// Set the settle pause
    #[must_use]
    pub const fn with_settle(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }
}

/// Result of [`dismiss_looping_modal`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModalReport {
    /// Poll result; `TimedOut` means the modal was still coming back
    pub result: PollResult,
    /// Times the modal was found and closed
    pub dismissed: u32,
}

/// Close a modal that may reopen after every reload.
///
/// Each attempt waits for load, settles, fires the trigger if any, then
/// looks for the close control. Visible: click it, reload, continue.
/// Not visible: satisfied.
pub async fn dismiss_looping_modal<D>(
    driver: &D,
    probe: &ModalProbe,
    config: PollConfig,
) -> PollwrightResult<ModalReport>
where
    D: PageDriver + ?Sized,
{
    let poller = Poller::new(config)?.with_description("dismiss looping modal");
    let dismissed = AtomicU32::new(0);

    let result = {
        let dismissed = &dismissed;
        poller
            .try_run_async(move || async move {
                driver.wait_for_load(LoadState::Load).await?;
                driver.pause(probe.settle).await;
                if let Some((selector, action)) = &probe.trigger {
                    driver.perform(selector, action.clone()).await?;
                }
                if !driver.query(&probe.close).await?.visible {
                    tracing::info!(close = %probe.close, "modal not shown");
                    return Ok::<_, PollwrightError>(PollOutcome::Satisfied);
                }
                driver.perform(&probe.close, ElementAction::Click).await?;
                let count = dismissed.fetch_add(1, Ordering::Relaxed) + 1;
                tracing::info!(count, "modal closed, reloading");
                driver.reload().await?;
                Ok(PollOutcome::Continue)
            })
            .await?
    };

    let report = ModalReport {
        result,
        dismissed: dismissed.into_inner(),
    };
    if report.result.is_timed_out() {
        tracing::warn!(dismissed = report.dismissed, "modal kept reappearing");
    }
    Ok(report)
}

// =============================================================================
// SCROLL UNTIL VISIBLE
// =============================================================================

/// Result of [`scroll_until_visible`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScrollReport {
    /// Poll result
    pub result: PollResult,
    /// Tracked selectors that were not visible when polling stopped
    pub lost: Vec<String>,
}

/// Wheel down the page until `target` is visible.
///
/// `tracked` selectors must stay visible the whole way (a floating menu,
/// say); losing one is a regression. `step` is the vertical wheel delta in
/// pixels per attempt.
pub async fn scroll_until_visible<D, S>(
    driver: &D,
    target: &str,
    tracked: &[S],
    step: f64,
    config: PollConfig,
) -> PollwrightResult<ScrollReport>
where
    D: PageDriver + ?Sized,
    S: AsRef<str> + Sync,
{
    let poller = Poller::new(config)?.with_description(format!("scroll until {target} is visible"));
    let lost = Mutex::new(Vec::new());

    let result = {
        let lost = &lost;
        poller
            .try_run_async(move || async move {
                if driver.query(target).await?.visible {
                    return Ok::<_, PollwrightError>(PollOutcome::Satisfied);
                }
                let hidden = hidden_selectors(driver, tracked).await?;
                if !hidden.is_empty() {
                    tracing::warn!(lost = ?hidden, "tracked element left the viewport");
                    *lock(lost) = hidden;
                    return Ok(PollOutcome::Regressed);
                }
                lock(lost).clear();
                driver
                    .perform(
                        PAGE,
                        ElementAction::Wheel {
                            delta_x: 0.0,
                            delta_y: step,
                        },
                    )
                    .await?;
                Ok(PollOutcome::Continue)
            })
            .await?
    };

    Ok(ScrollReport {
        result,
        lost: lost.into_inner().unwrap_or_else(PoisonError::into_inner),
    })
}

// =============================================================================
// STEP UNTIL VALUE
// =============================================================================

/// Result of [`step_until_value`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepReport {
    /// Poll result; `Regressed` means the readout went past the target
    pub result: PollResult,
    /// Last value read
    pub value: Option<f64>,
}

const VALUE_EPSILON: f64 = 1e-9;

fn parse_readout(selector: &str, text: &str) -> PollwrightResult<f64> {
    text.trim()
        .parse::<f64>()
        .ok()
        .filter(|value| value.is_finite())
        .ok_or_else(|| {
            PollwrightError::driver(format!("readout {selector} is not numeric: '{text}'"))
        })
}

/// Press `key` on `input` until the number shown in `readout` equals `target`.
///
/// The stepping direction is fixed by the first reading. A reading past the
/// target in that direction is a regression. A readout that is not a finite
/// number fails with [`PollwrightError::DriverError`].
pub async fn step_until_value<D>(
    driver: &D,
    input: &str,
    readout: &str,
    target: f64,
    key: &str,
    config: PollConfig,
) -> PollwrightResult<StepReport>
where
    D: PageDriver + ?Sized,
{
    let poller = Poller::new(config)?.with_description(format!("step {readout} to {target}"));
    let start = OnceLock::new();
    let last = Mutex::new(None);

    let result = {
        let start = &start;
        let last = &last;
        poller
            .try_run_async(move || async move {
                let state = driver.query(readout).await?;
                let value = parse_readout(readout, state.text_trimmed())?;
                *lock(last) = Some(value);

                let direction = (target - *start.get_or_init(|| value)).signum();
                if (value - target).abs() < VALUE_EPSILON {
                    return Ok::<_, PollwrightError>(PollOutcome::Satisfied);
                }
                if (value - target) * direction > 0.0 {
                    tracing::warn!(value, target, "readout overshot target");
                    return Ok(PollOutcome::Regressed);
                }
                driver
                    .perform(input, ElementAction::Press(key.to_string()))
                    .await?;
                Ok(PollOutcome::Continue)
            })
            .await?
    };

    Ok(StepReport {
        result,
        value: last.into_inner().unwrap_or_else(PoisonError::into_inner),
    })
}

// =============================================================================
// DIALOGS
// =============================================================================

/// Subscribe to the next dialog, run `trigger`, and wait for the dialog.
///
/// The subscription exists before `trigger` starts, so a dialog raised
/// synchronously by the trigger is not missed. If `trigger` fails, the
/// subscription is dropped and the error returned.
pub async fn expect_dialog<Fut>(
    hub: &DialogHub,
    kind: Option<DialogType>,
    response: DialogResponse,
    timeout: Duration,
    trigger: Fut,
) -> PollwrightResult<Dialog>
where
    Fut: Future<Output = PollwrightResult<()>>,
{
    let subscription = hub.subscribe(kind, response);
    trigger.await?;
    let dialog = subscription.wait(timeout).await?;
    tracing::info!(kind = %dialog.dialog_type(), message = dialog.message(), "dialog handled");
    Ok(dialog)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::dialog::DialogAction;
    use crate::driver::{ElementState, MockDriver, MockEffect};
    use crate::poll::TerminalOutcome;

    const LINKS: [&str; 3] = ["a[href='/']", "a[href='/about/']", "a[href='/gallery/']"];

    fn links_page() -> MockDriver {
        let driver = MockDriver::new();
        for link in LINKS {
            driver.set_element(link, ElementState::visible(link));
        }
        driver
    }

    mod reload_tests {
        use super::*;

        #[tokio::test]
        async fn test_reports_missing_selector() {
            let driver = links_page();
            driver.queue_reload([]);
            driver.queue_reload([MockEffect::remove(LINKS[2])]);

            let report = reload_until_missing(&driver, &LINKS, PollConfig::attempts(5))
                .await
                .unwrap();
            assert_eq!(report.result.outcome, TerminalOutcome::Regressed);
            assert_eq!(report.result.attempts, 2);
            assert_eq!(report.missing, vec![LINKS[2].to_string()]);
            assert!(report.disappeared());
            assert_eq!(driver.call_count("reload"), 2);
        }

        #[tokio::test]
        async fn test_times_out_when_nothing_disappears() {
            let driver = links_page();
            let report = reload_until_missing(&driver, &LINKS, PollConfig::attempts(3))
                .await
                .unwrap();
            assert!(report.result.is_timed_out());
            assert_eq!(report.result.attempts, 3);
            assert!(!report.disappeared());
        }

        #[tokio::test]
        async fn test_keeps_going_past_regression_when_asked() {
            let driver = links_page();
            driver.queue_reload([MockEffect::set(LINKS[0], ElementState::hidden())]);
            driver.queue_reload([MockEffect::set(LINKS[0], ElementState::visible("Home"))]);

            let config = PollConfig::attempts(3).with_stop_on_regression(false);
            let report = reload_until_missing(&driver, &LINKS, config).await.unwrap();
            assert!(report.result.is_timed_out());
            assert_eq!(report.result.attempts, 3);
            assert!(report.missing.is_empty());
        }

        #[tokio::test]
        async fn test_invalid_config_never_reloads() {
            let driver = links_page();
            let config = PollConfig {
                max_attempts: None,
                max_elapsed: None,
                ..PollConfig::default()
            };
            let err = reload_until_missing(&driver, &LINKS, config).await.unwrap_err();
            assert!(matches!(err, PollwrightError::InvalidConfig { .. }));
            assert!(!driver.was_called("reload"));
        }
    }

    mod modal_tests {
        use super::*;

        const CLOSE: &str = ".modal-footer p";

        #[tokio::test]
        async fn test_closes_modal_until_it_stops_appearing() {
            let driver = MockDriver::new().with_element(CLOSE, ElementState::visible("Close"));
            driver.persist_action(CLOSE, [MockEffect::remove(CLOSE)]);
            driver.queue_reload([MockEffect::set(CLOSE, ElementState::visible("Close"))]);
            driver.queue_reload([]);

            let probe = ModalProbe::new(CLOSE);
            let report = dismiss_looping_modal(&driver, &probe, PollConfig::attempts(3))
                .await
                .unwrap();
            assert!(report.result.is_satisfied());
            assert_eq!(report.result.attempts, 3);
            assert_eq!(report.dismissed, 2);
            assert_eq!(driver.call_count("pause:2000"), 3);
        }

        #[tokio::test]
        async fn test_modal_that_keeps_returning_times_out() {
            let driver = MockDriver::new().with_element(CLOSE, ElementState::visible("Close"));
            let probe = ModalProbe::new(CLOSE).with_settle(Duration::ZERO);
            let report = dismiss_looping_modal(&driver, &probe, PollConfig::attempts(3))
                .await
                .unwrap();
            assert!(report.result.is_timed_out());
            assert_eq!(report.dismissed, 3);
        }

        #[tokio::test]
        async fn test_exit_intent_trigger_runs_each_attempt() {
            let driver = MockDriver::new();
            driver.script_action(PAGE, [MockEffect::set(CLOSE, ElementState::visible("Close"))]);
            driver.persist_action(CLOSE, [MockEffect::remove(CLOSE)]);

            let probe = ModalProbe::exit_intent(CLOSE, 1280);
            assert_eq!(
                probe.trigger,
                Some((PAGE.to_string(), ElementAction::MouseMove { x: 640.0, y: -50.0 }))
            );
            let report = dismiss_looping_modal(&driver, &probe, PollConfig::attempts(3))
                .await
                .unwrap();
            assert!(report.result.is_satisfied());
            assert_eq!(report.dismissed, 1);
            assert_eq!(driver.call_count("mouse_move"), 2);
        }
    }

    mod scroll_tests {
        use super::*;

        const FOOTER: &str = "#page-footer";
        const MENU: [&str; 2] = ["a[href='#home']", "a[href='#news']"];

        fn menu_page() -> MockDriver {
            let driver = MockDriver::new().with_element(FOOTER, ElementState::hidden());
            for item in MENU {
                driver.set_element(item, ElementState::visible(item));
            }
            driver
        }

        #[tokio::test]
        async fn test_wheels_until_target_visible() {
            let driver = menu_page();
            driver.script_action(PAGE, []);
            driver.script_action(PAGE, [MockEffect::set(FOOTER, ElementState::visible(""))]);

            let report = scroll_until_visible(&driver, FOOTER, &MENU, 1000.0, PollConfig::attempts(5))
                .await
                .unwrap();
            assert!(report.result.is_satisfied());
            assert_eq!(report.result.attempts, 3);
            assert_eq!(driver.call_count("wheel"), 2);
            assert!(report.lost.is_empty());
        }

        #[tokio::test]
        async fn test_lost_menu_is_regression() {
            let driver = menu_page();
            driver.script_action(PAGE, [MockEffect::set(MENU[1], ElementState::hidden())]);

            let report = scroll_until_visible(&driver, FOOTER, &MENU, 1000.0, PollConfig::attempts(5))
                .await
                .unwrap();
            assert!(report.result.is_regressed());
            assert_eq!(report.result.attempts, 2);
            assert_eq!(report.lost, vec![MENU[1].to_string()]);
        }

        #[tokio::test]
        async fn test_no_tracked_selectors() {
            let driver = menu_page();
            let report =
                scroll_until_visible::<_, &str>(&driver, FOOTER, &[], 500.0, PollConfig::attempts(2))
                    .await
                    .unwrap();
            assert!(report.result.is_timed_out());
            assert_eq!(driver.call_count("wheel"), 2);
        }
    }

    mod step_tests {
        use super::*;

        const SLIDER: &str = "input[type='range']";
        const RANGE: &str = "#range";

        fn slider_page(start: &str, steps: &[&str]) -> MockDriver {
            let driver = MockDriver::new()
                .with_element(SLIDER, ElementState::visible(""))
                .with_element(RANGE, ElementState::visible(start));
            for step in steps {
                driver.script_action(SLIDER, [MockEffect::text(RANGE, *step)]);
            }
            driver
        }

        #[tokio::test]
        async fn test_steps_up_to_target() {
            let driver = slider_page("2.5", &["3", "3.5"]);
            let report =
                step_until_value(&driver, SLIDER, RANGE, 3.5, "ArrowRight", PollConfig::attempts(10))
                    .await
                    .unwrap();
            assert!(report.result.is_satisfied());
            assert_eq!(report.result.attempts, 3);
            assert_eq!(report.value, Some(3.5));
            assert_eq!(driver.call_count("press"), 2);
        }

        #[tokio::test]
        async fn test_steps_down_to_target() {
            let driver = slider_page("1", &["0.5", "0"]);
            let report =
                step_until_value(&driver, SLIDER, RANGE, 0.0, "ArrowLeft", PollConfig::attempts(10))
                    .await
                    .unwrap();
            assert!(report.result.is_satisfied());
            assert_eq!(report.value, Some(0.0));
        }

        #[tokio::test]
        async fn test_overshoot_is_regression() {
            let driver = slider_page("2", &["3"]);
            let report =
                step_until_value(&driver, SLIDER, RANGE, 2.5, "ArrowRight", PollConfig::attempts(10))
                    .await
                    .unwrap();
            assert!(report.result.is_regressed());
            assert_eq!(report.value, Some(3.0));
        }

        #[tokio::test]
        async fn test_non_numeric_readout_propagates() {
            let driver = slider_page("n/a", &[]);
            let err =
                step_until_value(&driver, SLIDER, RANGE, 1.0, "ArrowRight", PollConfig::attempts(3))
                    .await
                    .unwrap_err();
            assert!(matches!(err, PollwrightError::DriverError { .. }));
            assert!(!driver.was_called("press"));
        }

        #[tokio::test]
        async fn test_non_finite_readout_propagates() {
            for readout in ["NaN", "inf", "-infinity"] {
                let driver = slider_page(readout, &[]);
                let err = step_until_value(
                    &driver,
                    SLIDER,
                    RANGE,
                    1.0,
                    "ArrowRight",
                    PollConfig::attempts(50),
                )
                .await
                .unwrap_err();
                assert!(matches!(err, PollwrightError::DriverError { .. }), "{readout}");
                assert_eq!(driver.call_count("press"), 0);
            }
        }
    }

    mod dialog_tests {
        use super::*;

        #[tokio::test]
        async fn test_expect_dialog_catches_dialog_raised_by_trigger() {
            let driver = MockDriver::new().with_element("#confirm", ElementState::visible("JS Confirm"));
            driver.script_action(
                "#confirm",
                [MockEffect::OpenDialog(Dialog::confirm("I am a JS Confirm"))],
            );

            let dialog = expect_dialog(
                driver.dialogs(),
                Some(DialogType::Confirm),
                DialogResponse::Accept,
                Duration::from_millis(100),
                driver.perform("#confirm", ElementAction::Click),
            )
            .await
            .unwrap();
            assert_eq!(dialog.message(), "I am a JS Confirm");
            assert_eq!(dialog.action(), &DialogAction::Accept);
            assert_eq!(driver.dialogs().subscription_count(), 0);
        }

        #[tokio::test]
        async fn test_expect_dialog_times_out() {
            let hub = DialogHub::new();
            let err = expect_dialog(
                &hub,
                None,
                DialogResponse::Dismiss,
                Duration::from_millis(10),
                async { Ok(()) },
            )
            .await
            .unwrap_err();
            assert!(matches!(err, PollwrightError::Timeout { ms: 10 }));
            assert_eq!(hub.subscription_count(), 0);
        }

        #[tokio::test]
        async fn test_failed_trigger_drops_subscription() {
            let driver = MockDriver::new();
            let err = expect_dialog(
                driver.dialogs(),
                None,
                DialogResponse::Accept,
                Duration::from_millis(10),
                driver.perform("#missing", ElementAction::Click),
            )
            .await
            .unwrap_err();
            assert!(matches!(err, PollwrightError::ElementNotFound { .. }));
            assert_eq!(driver.dialogs().subscription_count(), 0);
        }
    }
}
