use crate::domain::cron::CronSpec;
use crate::domain::models::{JobId, RawInterval, RemoteJob, SwitchCommand};
use crate::domain::window::FetchWindow;
use crate::infrastructure::device_client::{ScheduleStore, SwitchActuator};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::notifier::{Escalation, EscalationNotifier};
use crate::infrastructure::timings_client::TimingsClient;
use async_trait::async_trait;
use std::collections::{HashSet, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::time::Instant;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceCall {
    List,
    Delete(JobId),
    Create { timespec: String, action: SwitchCommand },
    Switch(SwitchCommand),
}

#[derive(Debug, Default)]
pub struct FakeDevice {
    pub jobs: Mutex<Vec<RemoteJob>>,
    pub calls: Mutex<Vec<(DeviceCall, Instant)>>,
    pub fail_list: Mutex<bool>,
    pub fail_delete: Mutex<HashSet<JobId>>,
    pub fail_create_at: Mutex<HashSet<usize>>,
    next_id: AtomicUsize,
    create_calls: AtomicUsize,
}

impl FakeDevice {
    pub fn with_jobs(ids: &[u64]) -> Self {
        let device = Self::default();
        *device.jobs.lock().expect("jobs lock poisoned") = ids
            .iter()
            .map(|id| RemoteJob {
                id: JobId(*id),
                timespec: "0 0 12 * * MON".to_string(),
                action: Some(SwitchCommand::On),
            })
            .collect();
        device
            .next_id
            .store(ids.iter().copied().max().unwrap_or(0) as usize, Ordering::SeqCst);
        device
    }

    pub fn fail_delete_of(&self, id: u64) {
        self.fail_delete
            .lock()
            .expect("fail delete lock poisoned")
            .insert(JobId(id));
    }

    pub fn record(&self, call: DeviceCall) {
        self.calls
            .lock()
            .expect("calls lock poisoned")
            .push((call, Instant::now()));
    }

    pub fn call_log(&self) -> Vec<DeviceCall> {
        self.calls
            .lock()
            .expect("calls lock poisoned")
            .iter()
            .map(|(call, _)| call.clone())
            .collect()
    }

    pub fn call_times(&self) -> Vec<Instant> {
        self.calls
            .lock()
            .expect("calls lock poisoned")
            .iter()
            .map(|(_, at)| *at)
            .collect()
    }

    pub fn job_ids(&self) -> Vec<JobId> {
        self.jobs
            .lock()
            .expect("jobs lock poisoned")
            .iter()
            .map(|job| job.id)
            .collect()
    }

    pub fn switch_commands(&self) -> Vec<SwitchCommand> {
        self.call_log()
            .into_iter()
            .filter_map(|call| match call {
                DeviceCall::Switch(command) => Some(command),
                _ => None,
            })
            .collect()
    }

    pub fn count(&self, predicate: impl Fn(&DeviceCall) -> bool) -> usize {
        self.call_log().iter().filter(|call| predicate(call)).count()
    }
}

#[async_trait]
impl ScheduleStore for FakeDevice {
    async fn list_jobs(&self) -> Result<Vec<RemoteJob>, InfraError> {
        self.record(DeviceCall::List);
        if *self.fail_list.lock().expect("fail list lock poisoned") {
            return Err(InfraError::RemoteJob("list timed out".to_string()));
        }
        Ok(self.jobs.lock().expect("jobs lock poisoned").clone())
    }

    async fn delete_job(&self, id: JobId) -> Result<(), InfraError> {
        self.record(DeviceCall::Delete(id));
        if self
            .fail_delete
            .lock()
            .expect("fail delete lock poisoned")
            .contains(&id)
        {
            return Err(InfraError::RemoteJob(format!("delete of {id} rejected")));
        }
        self.jobs
            .lock()
            .expect("jobs lock poisoned")
            .retain(|job| job.id != id);
        Ok(())
    }

    async fn create_job(
        &self,
        trigger: &CronSpec,
        action: SwitchCommand,
    ) -> Result<JobId, InfraError> {
        let index = self.create_calls.fetch_add(1, Ordering::SeqCst);
        self.record(DeviceCall::Create {
            timespec: trigger.timespec(),
            action,
        });
        if self
            .fail_create_at
            .lock()
            .expect("fail create lock poisoned")
            .contains(&index)
        {
            return Err(InfraError::RemoteJob("create rejected".to_string()));
        }
        let id = JobId(self.next_id.fetch_add(1, Ordering::SeqCst) as u64 + 1);
        self.jobs.lock().expect("jobs lock poisoned").push(RemoteJob {
            id,
            timespec: trigger.timespec(),
            action: Some(action),
        });
        Ok(id)
    }
}

#[async_trait]
impl SwitchActuator for FakeDevice {
    async fn set_switch(&self, command: SwitchCommand) -> Result<(), InfraError> {
        self.record(DeviceCall::Switch(command));
        Ok(())
    }
}

#[derive(Debug)]
pub enum FakeFetch {
    Timings(Vec<RawInterval>),
    NetworkError,
    HttpError,
    BadRequestUrl,
}

#[derive(Debug, Default)]
pub struct FakeTimingsClient {
    pub responses: Mutex<VecDeque<FakeFetch>>,
    pub fallback: Mutex<Vec<RawInterval>>,
    pub windows: Mutex<Vec<FetchWindow>>,
    pub fetch_calls: AtomicUsize,
}

impl FakeTimingsClient {
    pub fn returning(timings: Vec<RawInterval>) -> Self {
        let client = Self::default();
        *client.fallback.lock().expect("fallback lock poisoned") = timings;
        client
    }

    pub fn push(&self, response: FakeFetch) {
        self.responses
            .lock()
            .expect("responses lock poisoned")
            .push_back(response);
    }

    pub fn calls(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TimingsClient for FakeTimingsClient {
    async fn fetch_timings(&self, window: &FetchWindow) -> Result<Vec<RawInterval>, InfraError> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        self.windows.lock().expect("windows lock poisoned").push(*window);

        let next = self.responses.lock().expect("responses lock poisoned").pop_front();
        match next {
            Some(FakeFetch::Timings(timings)) => Ok(timings),
            Some(FakeFetch::NetworkError) => {
                Err(InfraError::Network("network error while fetching timings".to_string()))
            }
            Some(FakeFetch::HttpError) => {
                Err(InfraError::Fetch("timings api error: http 401".to_string()))
            }
            Some(FakeFetch::BadRequestUrl) => {
                Err(InfraError::InvalidConfig("invalid calendar base url".to_string()))
            }
            None => Ok(self.fallback.lock().expect("fallback lock poisoned").clone()),
        }
    }
}

#[derive(Debug, Default)]
pub struct FakeNotifier {
    pub escalations: Mutex<Vec<Escalation>>,
}

impl FakeNotifier {
    pub fn count(&self) -> usize {
        self.escalations.lock().expect("escalations lock poisoned").len()
    }
}

#[async_trait]
impl EscalationNotifier for FakeNotifier {
    async fn notify(&self, escalation: &Escalation) -> Result<(), InfraError> {
        self.escalations
            .lock()
            .expect("escalations lock poisoned")
            .push(escalation.clone());
        Ok(())
    }
}
