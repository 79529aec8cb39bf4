use crate::application::reconciler::{ReconcileOutcome, Reconciler};
use crate::domain::models::{RawInterval, SyncPolicy};
use crate::domain::normalizer::{NormalizeOptions, normalize};
use crate::domain::window::{FetchWindow, compute_window};
use crate::infrastructure::device_client::{ScheduleStore, SwitchActuator};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::notifier::{Escalation, EscalationNotifier};
use crate::infrastructure::timings_client::TimingsClient;
use chrono::{DateTime, Timelike, Utc};
use chrono_tz::Tz;
use std::future::Future;
use std::sync::Arc;
use tokio::time::{Duration as TokioDuration, Instant, MissedTickBehavior, interval, sleep};
use tracing::{debug, error, info, warn};

pub type NowProvider = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u8,
    pub base_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 2,
            base_delay_ms: 200,
        }
    }
}

/// Consecutive fetch failures, volatile for the life of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollState {
    pub consecutive_failures: u32,
    pub threshold: u32,
}

impl PollState {
    pub fn new(threshold: u32) -> Self {
        Self {
            consecutive_failures: 0,
            threshold: threshold.max(1),
        }
    }

    pub fn record_success(&mut self) {
        self.consecutive_failures = 0;
    }

    /// Returns true when this failure reaches the threshold. The counter starts
    /// over so the next escalation needs another full run of failures.
    pub fn record_failure(&mut self) -> bool {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        if self.consecutive_failures >= self.threshold {
            self.consecutive_failures = 0;
            return true;
        }
        false
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollPhase {
    Active,
    Quiescent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    Quiescent,
    FetchFailed { consecutive_failures: u32, escalated: bool },
    /// The fetch could not even be built; nothing was counted or changed.
    Aborted,
    Reconciled(ReconcileOutcome),
}

pub struct SwitchSyncService<T, S, A, N>
where
    T: TimingsClient,
    S: ScheduleStore,
    A: SwitchActuator,
    N: EscalationNotifier,
{
    timings_client: Arc<T>,
    reconciler: Reconciler<S, A>,
    notifier: Arc<N>,
    policy: SyncPolicy,
    time_zone: Tz,
    state: PollState,
    phase: PollPhase,
    retry_policy: RetryPolicy,
    now_provider: NowProvider,
}

impl<T, S, A, N> SwitchSyncService<T, S, A, N>
where
    T: TimingsClient,
    S: ScheduleStore,
    A: SwitchActuator,
    N: EscalationNotifier,
{
    pub fn new(
        timings_client: Arc<T>,
        reconciler: Reconciler<S, A>,
        notifier: Arc<N>,
        policy: SyncPolicy,
        time_zone: Tz,
    ) -> Self {
        Self {
            timings_client,
            reconciler,
            notifier,
            state: PollState::new(policy.failed_sync_threshold),
            policy,
            time_zone,
            phase: PollPhase::Active,
            retry_policy: RetryPolicy::default(),
            now_provider: Arc::new(Utc::now),
        }
    }

    pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    pub fn with_now_provider(mut self, now_provider: NowProvider) -> Self {
        self.now_provider = now_provider;
        self
    }

    pub fn state(&self) -> PollState {
        self.state
    }

    pub fn phase(&self) -> PollPhase {
        self.phase
    }

    /// One fetch, normalize, diff, reconcile pass.
    pub async fn run_cycle(&mut self) -> CycleOutcome {
        let now = (self.now_provider)();
        let hour = now.with_timezone(&self.time_zone).hour();

        if self.policy.quiet_hours().contains(hour) {
            if self.phase == PollPhase::Active {
                info!(hour, "entering quiet hours");
                self.phase = PollPhase::Quiescent;
            }
            self.reconciler.force_off().await;
            return CycleOutcome::Quiescent;
        }
        if self.phase == PollPhase::Quiescent {
            info!(hour, "leaving quiet hours");
            self.phase = PollPhase::Active;
        }

        let window = compute_window(now, self.time_zone, self.policy.week_span, self.policy.mode);
        info!(
            window_start = %window.start,
            window_end = %window.end,
            mode = ?self.policy.mode,
            "fetching timings"
        );

        let raw = match self.fetch_with_retry(&window).await {
            Ok(raw) => raw,
            Err(InfraError::InvalidConfig(message)) => {
                error!(%message, "cannot build timings request, skipping cycle");
                return CycleOutcome::Aborted;
            }
            Err(error) => return self.record_fetch_failure(now, error).await,
        };
        self.state.record_success();

        let options = NormalizeOptions {
            pre_shift_minutes: self.policy.pre_shift_minutes,
            merge_gap_minutes: self.policy.merge_gap_minutes,
            time_zone: self.time_zone,
        };
        let candidate = normalize(&raw, &options);
        debug!(raw = raw.len(), canonical = candidate.len(), "timings normalized");

        CycleOutcome::Reconciled(self.reconciler.reconcile(&candidate).await)
    }

    /// Runs a cycle immediately and then once per refresh interval until
    /// `shutdown` resolves. A cycle in progress always finishes first; ticks
    /// missed while it ran are skipped.
    pub async fn run<F>(&mut self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        let period = TokioDuration::from_millis(self.policy.refresh_interval_ms.max(1));
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tokio::pin!(shutdown);

        info!(refresh_ms = self.policy.refresh_interval_ms, "switch sync started");
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("shutdown requested, stopping switch sync");
                    break;
                }
                _ = ticker.tick() => {
                    let started = Instant::now();
                    let outcome = self.run_cycle().await;
                    debug!(?outcome, "cycle finished");
                    if started.elapsed() > period {
                        warn!(
                            elapsed_ms = started.elapsed().as_millis() as u64,
                            "cycle outlasted the refresh interval, skipping missed ticks"
                        );
                    }
                }
            }
        }
    }

    async fn record_fetch_failure(
        &mut self,
        now: DateTime<Utc>,
        error: InfraError,
    ) -> CycleOutcome {
        let escalated = self.state.record_failure();
        let consecutive_failures = if escalated {
            self.state.threshold
        } else {
            self.state.consecutive_failures
        };
        warn!(%error, failures = consecutive_failures, "timings fetch failed");

        if escalated {
            let escalation = Escalation {
                consecutive_failures,
                last_error: error.to_string(),
                at: now,
            };
            if let Err(notify_error) = self.notifier.notify(&escalation).await {
                warn!(error = %notify_error, "escalation notification failed");
            }
        }

        CycleOutcome::FetchFailed {
            consecutive_failures,
            escalated,
        }
    }

    async fn fetch_with_retry(&self, window: &FetchWindow) -> Result<Vec<RawInterval>, InfraError> {
        let max_attempts = self.retry_policy.max_attempts.max(1);
        let mut attempt: u8 = 0;

        loop {
            match self.timings_client.fetch_timings(window).await {
                Ok(timings) => return Ok(timings),
                Err(error) if error.is_transient() && attempt + 1 < max_attempts => {
                    let delay = self
                        .retry_policy
                        .base_delay_ms
                        .saturating_mul(2u64.saturating_pow(attempt as u32));
                    debug!(%error, delay_ms = delay, "retrying timings fetch");
                    sleep(TokioDuration::from_millis(delay)).await;
                    attempt = attempt.saturating_add(1);
                }
                Err(error) => return Err(error),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::fakes::{
        DeviceCall, FakeDevice, FakeFetch, FakeNotifier, FakeTimingsClient,
    };
    use crate::application::reconciler::ReconcileSummary;
    use crate::domain::models::SwitchCommand;
    use chrono::NaiveDate;

    type TestService = SwitchSyncService<FakeTimingsClient, FakeDevice, FakeDevice, FakeNotifier>;

    fn utc(value: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(value)
            .expect("valid datetime")
            .with_timezone(&Utc)
    }

    fn timings() -> Vec<RawInterval> {
        vec![RawInterval::new("2025-09-03T12:00:00Z", "2025-09-03T13:00:00Z")]
    }

    struct Harness {
        timings: Arc<FakeTimingsClient>,
        device: Arc<FakeDevice>,
        notifier: Arc<FakeNotifier>,
        service: TestService,
    }

    fn harness(timings: FakeTimingsClient, now: &str) -> Harness {
        let timings = Arc::new(timings);
        let device = Arc::new(FakeDevice::default());
        let notifier = Arc::new(FakeNotifier::default());
        let reconciler = Reconciler::new(Arc::clone(&device), Arc::clone(&device), chrono_tz::UTC);
        let fixed = utc(now);
        let service = SwitchSyncService::new(
            Arc::clone(&timings),
            reconciler,
            Arc::clone(&notifier),
            SyncPolicy::default(),
            chrono_tz::UTC,
        )
        .with_retry_policy(RetryPolicy {
            max_attempts: 1,
            base_delay_ms: 1,
        })
        .with_now_provider(Arc::new(move || fixed));

        Harness {
            timings,
            device,
            notifier,
            service,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn quiet_hour_forces_off_without_fetching() {
        let mut h = harness(FakeTimingsClient::returning(timings()), "2025-09-01T23:00:00Z");

        let outcome = h.service.run_cycle().await;

        assert_eq!(outcome, CycleOutcome::Quiescent);
        assert_eq!(h.timings.calls(), 0);
        assert_eq!(h.device.switch_commands(), vec![SwitchCommand::Off]);
        assert_eq!(h.service.phase(), PollPhase::Quiescent);
    }

    #[tokio::test(start_paused = true)]
    async fn daytime_hour_fetches_and_applies() {
        let mut h = harness(FakeTimingsClient::returning(timings()), "2025-09-01T11:00:00Z");

        let outcome = h.service.run_cycle().await;

        assert_eq!(h.timings.calls(), 1);
        assert_eq!(
            outcome,
            CycleOutcome::Reconciled(ReconcileOutcome::Applied(ReconcileSummary {
                listed: 0,
                list_failed: false,
                deleted: 0,
                delete_failures: 0,
                created: 2,
                create_failures: 0,
            }))
        );
        // shifted 30 minutes earlier by default
        assert!(h.device.call_log().contains(&DeviceCall::Create {
            timespec: "0 30 11 * * WED".to_string(),
            action: SwitchCommand::On,
        }));
    }

    #[tokio::test(start_paused = true)]
    async fn calendar_window_is_requested() {
        let mut h = harness(FakeTimingsClient::returning(timings()), "2025-09-03T11:00:00Z");

        h.service.run_cycle().await;

        let windows = h.timings.windows.lock().expect("windows lock poisoned").clone();
        assert_eq!(windows.len(), 1);
        assert_eq!(windows[0].start_date, NaiveDate::from_ymd_opt(2025, 9, 1).expect("date"));
        assert_eq!(windows[0].end_date, NaiveDate::from_ymd_opt(2025, 9, 7).expect("date"));
    }

    #[tokio::test(start_paused = true)]
    async fn second_identical_cycle_is_unchanged() {
        let mut h = harness(FakeTimingsClient::returning(timings()), "2025-09-01T11:00:00Z");

        h.service.run_cycle().await;
        let outcome = h.service.run_cycle().await;

        assert_eq!(outcome, CycleOutcome::Reconciled(ReconcileOutcome::Unchanged));
        assert_eq!(h.device.count(|call| matches!(call, DeviceCall::Create { .. })), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn escalates_once_at_threshold_and_resets() {
        let client = FakeTimingsClient::returning(timings());
        for _ in 0..5 {
            client.push(FakeFetch::HttpError);
        }
        let mut h = harness(client, "2025-09-01T11:00:00Z");

        let mut outcomes = Vec::new();
        for _ in 0..5 {
            outcomes.push(h.service.run_cycle().await);
        }

        assert_eq!(h.notifier.count(), 1);
        assert_eq!(
            outcomes[3],
            CycleOutcome::FetchFailed {
                consecutive_failures: 4,
                escalated: false,
            }
        );
        assert_eq!(
            outcomes[4],
            CycleOutcome::FetchFailed {
                consecutive_failures: 5,
                escalated: true,
            }
        );
        assert_eq!(h.service.state().consecutive_failures, 0);
        let escalation =
            h.notifier.escalations.lock().expect("escalations lock poisoned")[0].clone();
        assert_eq!(escalation.consecutive_failures, 5);
        assert!(escalation.last_error.contains("401"));
    }

    #[tokio::test(start_paused = true)]
    async fn success_resets_failures_without_notification() {
        let client = FakeTimingsClient::returning(timings());
        for _ in 0..3 {
            client.push(FakeFetch::HttpError);
        }
        let mut h = harness(client, "2025-09-01T11:00:00Z");

        for _ in 0..3 {
            h.service.run_cycle().await;
        }
        assert_eq!(h.service.state().consecutive_failures, 3);

        let outcome = h.service.run_cycle().await;

        assert!(matches!(outcome, CycleOutcome::Reconciled(_)));
        assert_eq!(h.service.state().consecutive_failures, 0);
        assert_eq!(h.notifier.count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn invalid_request_aborts_without_counting() {
        let client = FakeTimingsClient::returning(timings());
        client.push(FakeFetch::BadRequestUrl);
        let mut h = harness(client, "2025-09-01T11:00:00Z");

        let outcome = h.service.run_cycle().await;

        assert_eq!(outcome, CycleOutcome::Aborted);
        assert_eq!(h.service.state().consecutive_failures, 0);
        assert!(h.device.call_log().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn transient_errors_are_retried() {
        let client = FakeTimingsClient::returning(timings());
        client.push(FakeFetch::NetworkError);
        let mut h = harness(client, "2025-09-01T11:00:00Z");
        h.service = h.service.with_retry_policy(RetryPolicy::default());

        let outcome = h.service.run_cycle().await;

        assert_eq!(h.timings.calls(), 2);
        assert!(matches!(outcome, CycleOutcome::Reconciled(ReconcileOutcome::Applied(_))));
        assert_eq!(h.service.state().consecutive_failures, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn empty_timings_force_switch_off() {
        let mut h = harness(FakeTimingsClient::returning(Vec::new()), "2025-09-01T11:00:00Z");

        let outcome = h.service.run_cycle().await;

        assert_eq!(outcome, CycleOutcome::Reconciled(ReconcileOutcome::ForcedOff));
        assert_eq!(h.device.call_log(), vec![DeviceCall::Switch(SwitchCommand::Off)]);
    }

    #[tokio::test(start_paused = true)]
    async fn run_stops_on_shutdown_after_first_cycle() {
        let mut h = harness(FakeTimingsClient::returning(timings()), "2025-09-01T11:00:00Z");

        h.service
            .run(sleep(TokioDuration::from_millis(10)))
            .await;

        assert_eq!(h.timings.calls(), 1);
    }

    #[test]
    fn poll_state_counts_and_resets() {
        let mut state = PollState::new(2);
        assert!(!state.record_failure());
        assert!(state.record_failure());
        assert_eq!(state.consecutive_failures, 0);
        assert!(!state.record_failure());
        state.record_success();
        assert_eq!(state.consecutive_failures, 0);
    }
}
