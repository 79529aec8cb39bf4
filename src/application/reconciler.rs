use crate::domain::cron::CronSpec;
use crate::domain::models::{CanonicalInterval, SwitchCommand};
use crate::domain::schedule_diff::differs;
use crate::infrastructure::device_client::{ScheduleStore, SwitchActuator};
use chrono_tz::Tz;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, warn};

const DEFAULT_CALL_SPACING: Duration = Duration::from_millis(200);
const HUMAN_TIME_FORMAT: &str = "%d.%m.%Y %H:%M:%S";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileSummary {
    pub listed: usize,
    pub list_failed: bool,
    pub deleted: usize,
    pub delete_failures: usize,
    pub created: usize,
    pub create_failures: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Nothing scheduled; the switch was forced off and the device jobs left alone.
    ForcedOff,
    Unchanged,
    Applied(ReconcileSummary),
}

/// Keeps the device scheduler in line with the last applied interval list.
///
/// Every remote call is awaited before the next one is issued, with
/// `call_spacing` between them. Taking `&mut self` keeps two reconciliations
/// from ever interleaving.
pub struct Reconciler<S, A>
where
    S: ScheduleStore,
    A: SwitchActuator,
{
    schedule: Arc<S>,
    switch: Arc<A>,
    time_zone: Tz,
    call_spacing: Duration,
    baseline: Option<Vec<CanonicalInterval>>,
}

impl<S, A> Reconciler<S, A>
where
    S: ScheduleStore,
    A: SwitchActuator,
{
    pub fn new(schedule: Arc<S>, switch: Arc<A>, time_zone: Tz) -> Self {
        Self {
            schedule,
            switch,
            time_zone,
            call_spacing: DEFAULT_CALL_SPACING,
            baseline: None,
        }
    }

    pub fn with_call_spacing(mut self, call_spacing: Duration) -> Self {
        self.call_spacing = call_spacing;
        self
    }

    pub fn baseline(&self) -> Option<&[CanonicalInterval]> {
        self.baseline.as_deref()
    }

    pub async fn force_off(&self) {
        if let Err(error) = self.switch.set_switch(SwitchCommand::Off).await {
            warn!(%error, "failed to force switch off");
        }
    }

    pub async fn reconcile(&mut self, candidate: &[CanonicalInterval]) -> ReconcileOutcome {
        if candidate.is_empty() {
            info!("no intervals scheduled, forcing switch off");
            self.force_off().await;
            return ReconcileOutcome::ForcedOff;
        }

        if !differs(self.baseline(), candidate) {
            debug!(intervals = candidate.len(), "schedule unchanged");
            return ReconcileOutcome::Unchanged;
        }

        info!(intervals = candidate.len(), "schedule changed, replacing device jobs");
        let mut pacer = CallPacer::new(self.call_spacing);
        let mut summary = self.delete_all(&mut pacer).await;

        for (trigger, action) in plan_jobs(candidate, self.time_zone) {
            pacer.wait().await;
            match self.schedule.create_job(&trigger, action).await {
                Ok(job_id) => {
                    summary.created += 1;
                    debug!(%job_id, timespec = %trigger, action = action.as_str(), "created job");
                }
                Err(error) => {
                    summary.create_failures += 1;
                    warn!(
                        %error,
                        timespec = %trigger,
                        action = action.as_str(),
                        "failed to create job"
                    );
                }
            }
        }

        self.baseline = Some(candidate.to_vec());
        log_schedule(candidate, self.time_zone);
        info!(
            deleted = summary.deleted,
            delete_failures = summary.delete_failures,
            created = summary.created,
            create_failures = summary.create_failures,
            "schedule applied"
        );
        ReconcileOutcome::Applied(summary)
    }

    /// Removes every job from the device. The next reconcile reinstalls the schedule.
    pub async fn clear_jobs(&mut self) -> ReconcileSummary {
        let mut pacer = CallPacer::new(self.call_spacing);
        let summary = self.delete_all(&mut pacer).await;
        self.baseline = None;
        info!(
            deleted = summary.deleted,
            delete_failures = summary.delete_failures,
            "device jobs cleared"
        );
        summary
    }

    async fn delete_all(&self, pacer: &mut CallPacer) -> ReconcileSummary {
        let mut summary = ReconcileSummary::default();

        let jobs = match self.schedule.list_jobs().await {
            Ok(jobs) => jobs,
            Err(error) => {
                warn!(%error, "failed to list device jobs, continuing");
                summary.list_failed = true;
                Vec::new()
            }
        };
        summary.listed = jobs.len();

        for job in jobs {
            pacer.wait().await;
            match self.schedule.delete_job(job.id).await {
                Ok(()) => {
                    summary.deleted += 1;
                    debug!(job_id = %job.id, timespec = %job.timespec, "deleted job");
                }
                Err(error) => {
                    summary.delete_failures += 1;
                    warn!(job_id = %job.id, %error, "failed to delete job");
                }
            }
        }
        summary
    }
}

/// An ON job at every `on` and an OFF job at every `off`, in schedule order.
pub fn plan_jobs(candidate: &[CanonicalInterval], time_zone: Tz) -> Vec<(CronSpec, SwitchCommand)> {
    candidate
        .iter()
        .flat_map(|interval| {
            [
                (CronSpec::at(interval.on, time_zone), SwitchCommand::On),
                (CronSpec::at(interval.off, time_zone), SwitchCommand::Off),
            ]
        })
        .collect()
}

fn log_schedule(candidate: &[CanonicalInterval], time_zone: Tz) {
    for interval in candidate {
        info!(
            on = %interval.on.with_timezone(&time_zone).format(HUMAN_TIME_FORMAT),
            off = %interval.off.with_timezone(&time_zone).format(HUMAN_TIME_FORMAT),
            "scheduled"
        );
    }
}

/// Spaces consecutive device calls; the first call goes out immediately.
struct CallPacer {
    spacing: Duration,
    started: bool,
}

impl CallPacer {
    fn new(spacing: Duration) -> Self {
        Self {
            spacing,
            started: false,
        }
    }

    async fn wait(&mut self) {
        if self.started && !self.spacing.is_zero() {
            sleep(self.spacing).await;
        }
        self.started = true;
    }
}
