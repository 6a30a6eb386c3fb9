//! Test doubles shared by the scheduler's tests.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use futures::future::BoxFuture;
use ondemand_config::{Layout, SchedulerConfig};
use ondemand_core::orchestrator::{Orchestrator, RunTaskParams, TaskSubmission};
use ondemand_core::task::TaskSpec;
use ondemand_core::template::TemplateLibrary;
use ondemand_core::{Error, JobRequest, Result};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::builder::{BuilderConfig, TaskBuilder, TaskRequest};
use crate::launch::LaunchPlan;
use crate::retry::Sleeper;

pub fn config() -> SchedulerConfig {
    SchedulerConfig {
        cluster: Some("ci".to_string()),
        subnets: vec!["subnet-a".to_string()],
        queue: Some("ondemand".to_string()),
        ..Default::default()
    }
}

pub fn plan(job: &str) -> LaunchPlan {
    let builder = TaskBuilder::new(BuilderConfig::runtime(&config()));
    let request = TaskRequest::from_job(&JobRequest::new(job, &["image=foo/bar"]), "seed");
    let task = builder
        .build(&request, &Layout::builtin(), Utc::now())
        .unwrap();
    LaunchPlan::new(task, "ci", &config().subnets).unwrap()
}

/// In-memory orchestrator with scripted failures.
#[derive(Default)]
pub struct StubOrchestrator {
    fail_first: AtomicU32,
    placement_failures: AtomicU32,
    failing_jobs: BTreeSet<String>,
    attempts: AtomicU32,
    registrations: AtomicU32,
    registered: Mutex<BTreeMap<String, TaskSpec>>,
    submitted: Mutex<Vec<RunTaskParams>>,
}

impl StubOrchestrator {
    /// Fail the first `n` launches.
    pub fn failing_first(n: u32) -> Self {
        Self {
            fail_first: AtomicU32::new(n),
            ..Default::default()
        }
    }

    /// Always fail launches for these job ids.
    pub fn failing_jobs(jobs: &[&str]) -> Self {
        Self {
            failing_jobs: jobs.iter().map(|j| j.to_string()).collect(),
            ..Default::default()
        }
    }

    /// Report the first `n` launches as placement failures with no task started.
    pub fn with_placement_failures(self, n: u32) -> Self {
        self.placement_failures.store(n, Ordering::SeqCst);
        self
    }

    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn registrations(&self) -> u32 {
        self.registrations.load(Ordering::SeqCst)
    }

    pub fn submitted(&self) -> Vec<RunTaskParams> {
        self.submitted.lock().unwrap().clone()
    }

    pub fn registered(&self) -> Vec<TaskSpec> {
        self.registered.lock().unwrap().values().cloned().collect()
    }

    fn take(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl Orchestrator for StubOrchestrator {
    fn name(&self) -> &'static str {
        "stub"
    }

    async fn describe_task_specification(&self, family: &str) -> Result<Option<String>> {
        let registered = self.registered.lock().unwrap();
        Ok(registered.contains_key(family).then(|| format!("{}:1", family)))
    }

    async fn register_task_specification(&self, spec: &TaskSpec) -> Result<String> {
        let family = spec.family.to_string();
        self.registrations.fetch_add(1, Ordering::SeqCst);
        self.registered
            .lock()
            .unwrap()
            .insert(family.clone(), spec.clone());
        Ok(format!("{}:1", family))
    }

    async fn submit_task(&self, params: &RunTaskParams) -> Result<TaskSubmission> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;

        let job = params.job_id().unwrap_or_default();
        if self.failing_jobs.contains(job) {
            return Err(Error::Orchestrator(format!("job {} rejected", job)));
        }
        if Self::take(&self.fail_first) {
            return Err(Error::Orchestrator("throttled".to_string()));
        }
        if Self::take(&self.placement_failures) {
            return Ok(TaskSubmission {
                tasks: Vec::new(),
                failures: vec!["RESOURCE:MEMORY".to_string()],
            });
        }

        self.submitted.lock().unwrap().push(params.clone());
        Ok(TaskSubmission {
            tasks: vec![format!("task-{}", attempt)],
            failures: Vec::new(),
        })
    }
}

/// Records requested delays and returns immediately.
#[derive(Clone, Default)]
pub struct RecordingSleeper {
    delays: Arc<Mutex<Vec<Duration>>>,
}

impl RecordingSleeper {
    pub fn sleeper(&self) -> Sleeper {
        let delays = self.delays.clone();
        Arc::new(move |delay: Duration| -> BoxFuture<'static, ()> {
            delays.lock().unwrap().push(delay);
            Box::pin(async {})
        })
    }

    pub fn delays(&self) -> Vec<Duration> {
        self.delays.lock().unwrap().clone()
    }
}

/// Library serving layouts from memory.
#[derive(Default)]
pub struct MemoryLibrary {
    layouts: BTreeMap<String, String>,
}

impl MemoryLibrary {
    pub fn with(mut self, name: &str, kdl: &str) -> Self {
        self.layouts.insert(name.to_string(), kdl.to_string());
        self
    }
}

#[async_trait]
impl TemplateLibrary for MemoryLibrary {
    async fn fetch(&self, name: &str) -> Result<Bytes> {
        self.layouts
            .get(name)
            .map(|kdl| Bytes::from(kdl.clone()))
            .ok_or_else(|| Error::TemplateLibrary(format!("no layout named '{}'", name)))
    }
}
