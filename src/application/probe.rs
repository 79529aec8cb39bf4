use crate::application::poll_loop::NowProvider;
use crate::domain::cron::project_timestamp;
use crate::domain::models::{SwitchCommand, SyncPolicy};
use crate::domain::window::compute_window;
use crate::infrastructure::device_client::SwitchActuator;
use crate::infrastructure::error::InfraError;
use crate::infrastructure::timings_client::TimingsClient;
use chrono::Utc;
use chrono_tz::Tz;
use std::future::Future;
use std::sync::Arc;
use tokio::time::{Duration as TokioDuration, MissedTickBehavior, interval};
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeReport {
    pub timings: usize,
    pub switched: SwitchCommand,
}

/// Connectivity check: fetches the window and toggles the switch on every
/// tick without touching device jobs. Quiet hours do not apply.
pub struct TimingsProbe<T, A>
where
    T: TimingsClient,
    A: SwitchActuator,
{
    timings_client: Arc<T>,
    switch: Arc<A>,
    policy: SyncPolicy,
    time_zone: Tz,
    next_command: SwitchCommand,
    now_provider: NowProvider,
}

impl<T, A> TimingsProbe<T, A>
where
    T: TimingsClient,
    A: SwitchActuator,
{
    pub fn new(timings_client: Arc<T>, switch: Arc<A>, policy: SyncPolicy, time_zone: Tz) -> Self {
        Self {
            timings_client,
            switch,
            policy,
            time_zone,
            next_command: SwitchCommand::On,
            now_provider: Arc::new(Utc::now),
        }
    }

    pub fn with_now_provider(mut self, now_provider: NowProvider) -> Self {
        self.now_provider = now_provider;
        self
    }

    pub async fn probe_once(&mut self) -> Result<ProbeReport, InfraError> {
        let window = compute_window(
            (self.now_provider)(),
            self.time_zone,
            self.policy.week_span,
            self.policy.mode,
        );
        let timings = self.timings_client.fetch_timings(&window).await?;
        info!(
            window_start = %window.start_label(),
            window_end = %window.end_label(),
            count = timings.len(),
            "probe fetched timings"
        );
        for (index, timing) in timings.iter().enumerate() {
            info!(
                index,
                on = %timing.on,
                off = %timing.off,
                on_trigger = %project_timestamp(&timing.on, self.time_zone),
                off_trigger = %project_timestamp(&timing.off, self.time_zone),
                "probe timing"
            );
        }

        let command = self.next_command;
        self.switch.set_switch(command).await?;
        info!(switch = command.as_str(), "probe toggled switch");
        self.next_command = SwitchCommand::from_on(!command.is_on());

        Ok(ProbeReport {
            timings: timings.len(),
            switched: command,
        })
    }

    pub async fn run<F>(&mut self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        let period = TokioDuration::from_millis(self.policy.refresh_interval_ms.max(1));
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("shutdown requested, stopping probe");
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(error) = self.probe_once().await {
                        warn!(%error, "probe failed");
                    }
                }
            }
        }
    }
}
