//! Batch completion poller.
//!
//! Drives an asynchronous batch to a terminal state by fetching it at a
//! fixed interval. The wait between fetches goes through a [`Ticker`] so
//! tests can run without real delays, and is raced against a
//! [`CancellationToken`] so the caller can abort between iterations.
//! Cancelling the poll does not cancel the remote batch.

use async_trait::async_trait;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::batch::{ActionBatch, BatchState};
use crate::client::ActionBatchApi;
use crate::error::{DashboardError, DashboardResult};

/// Default interval between fetches.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Source of the wait between polls.
#[async_trait]
pub trait Ticker: Send + Sync {
    /// Completes after `interval` has elapsed.
    async fn tick(&self, interval: Duration);
}

/// Ticker backed by `tokio::time::sleep`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioTicker;

#[async_trait]
impl Ticker for TokioTicker {
    async fn tick(&self, interval: Duration) {
        tokio::time::sleep(interval).await;
    }
}

/// Polling parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollConfig {
    /// Wait between fetches
    pub interval: Duration,
    /// Give up after this many fetches; `None` polls until terminal
    pub max_attempts: Option<u32>,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            max_attempts: None,
        }
    }
}

/// Terminal result of a batch.
#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    /// Completed without failure
    Completed(ActionBatch),
    /// Failed; the batch status carries the error list
    Failed(ActionBatch),
}

impl PollOutcome {
    /// Classifies a batch that is already terminal. Pending yields `None`.
    pub fn from_batch(batch: ActionBatch) -> Option<Self> {
        match batch.state() {
            BatchState::Completed => Some(PollOutcome::Completed(batch)),
            BatchState::Failed => Some(PollOutcome::Failed(batch)),
            BatchState::Pending => None,
        }
    }

    /// The final batch observation.
    pub fn batch(&self) -> &ActionBatch {
        match self {
            PollOutcome::Completed(b) | PollOutcome::Failed(b) => b,
        }
    }

    /// Returns true for [`PollOutcome::Completed`].
    pub fn is_success(&self) -> bool {
        matches!(self, PollOutcome::Completed(_))
    }

    /// Errors reported by the remote system (empty on success).
    pub fn errors(&self) -> &[String] {
        &self.batch().status.errors
    }

    /// Converts a failure into [`DashboardError::BatchFailed`].
    pub fn into_result(self) -> DashboardResult<ActionBatch> {
        match self {
            PollOutcome::Completed(batch) => Ok(batch),
            PollOutcome::Failed(batch) => Err(DashboardError::BatchFailed {
                batch_id: batch.id,
                errors: batch.status.errors,
            }),
        }
    }
}

/// Polls batches through an [`ActionBatchApi`].
pub struct BatchPoller<'a, A: ?Sized, T: ?Sized> {
    api: &'a A,
    ticker: &'a T,
    config: PollConfig,
}

impl<'a, A, T> BatchPoller<'a, A, T>
where
    A: ActionBatchApi + ?Sized,
    T: Ticker + ?Sized,
{
    /// Creates a poller.
    pub fn new(api: &'a A, ticker: &'a T, config: PollConfig) -> Self {
        Self {
            api,
            ticker,
            config,
        }
    }

    /// Polling parameters in use.
    pub fn config(&self) -> &PollConfig {
        &self.config
    }

    /// Fetches `batch_id` until it reaches a terminal state.
    ///
    /// Transport and lookup errors from the client propagate unchanged.
    /// Exhausting `max_attempts` yields [`DashboardError::PollTimeout`];
    /// cancellation yields [`DashboardError::Cancelled`].
    pub async fn poll(
        &self,
        org: &str,
        batch_id: &str,
        cancel: &CancellationToken,
    ) -> DashboardResult<PollOutcome> {
        let mut attempts: u32 = 0;

        loop {
            if cancel.is_cancelled() {
                return Err(DashboardError::Cancelled {
                    batch_id: batch_id.to_string(),
                });
            }

            let batch = self.api.get_batch(org, batch_id).await?;
            attempts += 1;

            if let Some(outcome) = PollOutcome::from_batch(batch) {
                log_outcome(&outcome, attempts);
                return Ok(outcome);
            }

            if let Some(max) = self.config.max_attempts {
                if attempts >= max {
                    warn!(batch_id, attempts, "Giving up on pending action batch");
                    return Err(DashboardError::PollTimeout {
                        batch_id: batch_id.to_string(),
                        attempts,
                    });
                }
            }

            debug!(batch_id, attempts, "Action batch processing...");

            tokio::select! {
                _ = cancel.cancelled() => {
                    return Err(DashboardError::Cancelled {
                        batch_id: batch_id.to_string(),
                    });
                }
                _ = self.ticker.tick(self.config.interval) => {}
            }
        }
    }

    /// Resolves a freshly submitted batch.
    ///
    /// Synchronous submissions normally come back terminal and are returned
    /// without another fetch; anything still pending is polled under `org`.
    /// The submit response may omit its organization, so the caller's is used.
    pub async fn resolve(
        &self,
        org: &str,
        submitted: ActionBatch,
        cancel: &CancellationToken,
    ) -> DashboardResult<PollOutcome> {
        let id = submitted.id.clone();
        match PollOutcome::from_batch(submitted) {
            Some(outcome) => {
                log_outcome(&outcome, 0);
                Ok(outcome)
            }
            None => self.poll(org, &id, cancel).await,
        }
    }
}

fn log_outcome(outcome: &PollOutcome, attempts: u32) {
    let batch = outcome.batch();
    if outcome.is_success() {
        info!(batch_id = %batch.id, attempts, "Action batch completed");
    } else {
        warn!(
            batch_id = %batch.id,
            attempts,
            errors = ?batch.status.errors,
            "Action batch failed"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::{BatchStatus, NewActionBatch};
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Replays a fixed sequence of statuses, repeating the last one.
    struct ScriptedApi {
        statuses: Mutex<VecDeque<BatchStatus>>,
        fetches: Mutex<u32>,
    }

    impl ScriptedApi {
        fn new(script: &[(bool, bool)]) -> Self {
            let statuses = script
                .iter()
                .map(|&(completed, failed)| BatchStatus {
                    completed,
                    failed,
                    errors: if failed {
                        vec!["boom".to_string()]
                    } else {
                        vec![]
                    },
                    ..Default::default()
                })
                .collect();
            Self {
                statuses: Mutex::new(statuses),
                fetches: Mutex::new(0),
            }
        }

        fn fetches(&self) -> u32 {
            *self.fetches.lock().unwrap()
        }
    }

    #[async_trait]
    impl ActionBatchApi for ScriptedApi {
        async fn submit_batch(&self, _: &str, _: &NewActionBatch) -> DashboardResult<ActionBatch> {
            unimplemented!()
        }

        async fn get_batch(&self, org: &str, batch_id: &str) -> DashboardResult<ActionBatch> {
            *self.fetches.lock().unwrap() += 1;
            let mut statuses = self.statuses.lock().unwrap();
            let status = if statuses.len() > 1 {
                statuses.pop_front().unwrap()
            } else {
                statuses.front().cloned().unwrap_or_default()
            };
            Ok(ActionBatch {
                id: batch_id.to_string(),
                organization_id: org.to_string(),
                confirmed: true,
                synchronous: false,
                actions: vec![],
                status,
            })
        }

        async fn list_batches(&self, _: &str) -> DashboardResult<Vec<ActionBatch>> {
            Ok(vec![])
        }

        async fn cancel_batch(&self, _: &str, _: &str) -> DashboardResult<()> {
            Ok(())
        }

        async fn confirm_batch(&self, _: &str, _: &str) -> DashboardResult<ActionBatch> {
            unimplemented!()
        }
    }

    #[derive(Default)]
    struct CountingTicker {
        ticks: Mutex<Vec<Duration>>,
    }

    #[async_trait]
    impl Ticker for CountingTicker {
        async fn tick(&self, interval: Duration) {
            self.ticks.lock().unwrap().push(interval);
        }
    }

    fn config(max_attempts: Option<u32>) -> PollConfig {
        PollConfig {
            interval: Duration::from_millis(250),
            max_attempts,
        }
    }

    #[tokio::test]
    async fn test_poll_until_completed() {
        let api = ScriptedApi::new(&[(false, false), (false, false), (true, false)]);
        let ticker = CountingTicker::default();
        let poller = BatchPoller::new(&api, &ticker, config(None));

        let outcome = poller
            .poll("1", "b1", &CancellationToken::new())
            .await
            .unwrap();

        assert!(outcome.is_success());
        assert_eq!(api.fetches(), 3);
        assert_eq!(
            *ticker.ticks.lock().unwrap(),
            vec![Duration::from_millis(250); 2]
        );
    }

    #[tokio::test]
    async fn test_poll_failed_carries_errors() {
        let api = ScriptedApi::new(&[(false, false), (false, true)]);
        let ticker = CountingTicker::default();
        let poller = BatchPoller::new(&api, &ticker, config(None));

        let outcome = poller
            .poll("1", "b1", &CancellationToken::new())
            .await
            .unwrap();

        assert!(!outcome.is_success());
        assert_eq!(outcome.errors(), ["boom".to_string()]);
        let err = outcome.into_result().unwrap_err();
        assert!(matches!(err, DashboardError::BatchFailed { .. }));
    }

    #[tokio::test]
    async fn test_poll_both_flags_is_failure() {
        let api = ScriptedApi::new(&[(true, true)]);
        let ticker = CountingTicker::default();
        let poller = BatchPoller::new(&api, &ticker, config(None));

        let outcome = poller
            .poll("1", "b1", &CancellationToken::new())
            .await
            .unwrap();
        assert!(matches!(outcome, PollOutcome::Failed(_)));
    }

    #[tokio::test]
    async fn test_poll_exactly_one_outcome_for_all_scripts() {
        let observations = [(false, false), (true, false), (false, true), (true, true)];
        for first in observations {
            for second in observations {
                let api = ScriptedApi::new(&[first, second, (true, false)]);
                let ticker = CountingTicker::default();
                let poller = BatchPoller::new(&api, &ticker, config(Some(5)));
                let outcome = poller
                    .poll("1", "b1", &CancellationToken::new())
                    .await
                    .unwrap();

                let terminal = [first, second, (true, false)]
                    .into_iter()
                    .find(|&(c, f)| c || f)
                    .unwrap();
                assert_eq!(outcome.is_success(), !terminal.1, "{:?} {:?}", first, second);
            }
        }
    }

    #[tokio::test]
    async fn test_poll_max_attempts() {
        let api = ScriptedApi::new(&[(false, false)]);
        let ticker = CountingTicker::default();
        let poller = BatchPoller::new(&api, &ticker, config(Some(4)));

        let err = poller
            .poll("1", "b1", &CancellationToken::new())
            .await
            .unwrap_err();

        assert_eq!(
            err,
            DashboardError::PollTimeout {
                batch_id: "b1".to_string(),
                attempts: 4
            }
        );
        assert_eq!(api.fetches(), 4);
        assert_eq!(ticker.ticks.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_poll_cancelled_before_first_fetch() {
        let api = ScriptedApi::new(&[(false, false)]);
        let ticker = CountingTicker::default();
        let poller = BatchPoller::new(&api, &ticker, config(None));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = poller.poll("1", "b1", &cancel).await.unwrap_err();
        assert!(matches!(err, DashboardError::Cancelled { .. }));
        assert_eq!(api.fetches(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_cancelled_while_waiting() {
        let api = ScriptedApi::new(&[(false, false)]);
        let ticker = TokioTicker;
        let poller = BatchPoller::new(
            &api,
            &ticker,
            PollConfig {
                interval: Duration::from_secs(3600),
                max_attempts: None,
            },
        );
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();

        let (result, _) = tokio::join!(poller.poll("1", "b1", &cancel), async move {
            tokio::time::sleep(Duration::from_secs(10)).await;
            trigger.cancel();
        });

        assert!(matches!(result, Err(DashboardError::Cancelled { .. })));
        assert_eq!(api.fetches(), 1);
    }

    #[tokio::test]
    async fn test_resolve_terminal_submission_skips_fetch() {
        let api = ScriptedApi::new(&[(false, false)]);
        let ticker = CountingTicker::default();
        let poller = BatchPoller::new(&api, &ticker, config(None));

        let submitted = ActionBatch {
            id: "s1".to_string(),
            organization_id: "1".to_string(),
            confirmed: true,
            synchronous: true,
            actions: vec![],
            status: BatchStatus {
                completed: true,
                ..Default::default()
            },
        };
        let outcome = poller
            .resolve("1", submitted, &CancellationToken::new())
            .await
            .unwrap();
        assert!(outcome.is_success());
        assert_eq!(api.fetches(), 0);
    }

    #[tokio::test]
    async fn test_resolve_pending_polls_with_caller_org() {
        let api = ScriptedApi::new(&[(false, false), (true, false)]);
        let ticker = CountingTicker::default();
        let poller = BatchPoller::new(&api, &ticker, config(None));

        // Submit response without an organization.
        let submitted = ActionBatch {
            id: "a1".to_string(),
            organization_id: String::new(),
            confirmed: true,
            synchronous: false,
            actions: vec![],
            status: BatchStatus::default(),
        };
        let outcome = poller
            .resolve("549236", submitted, &CancellationToken::new())
            .await
            .unwrap();
        assert!(outcome.is_success());
        assert_eq!(outcome.batch().organization_id, "549236");
        assert_eq!(api.fetches(), 2);
    }
}
