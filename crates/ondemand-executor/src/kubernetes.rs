//! Kubernetes orchestrator implementation.
//!
//! Task specifications are stored as `PodTemplate`s named after their family,
//! so describing a family is a single `GET`. Each launch creates a `batch/v1`
//! Job from the template; Jobs are named after the CI job so a redelivered
//! message cannot start a second agent for the same job.

use async_trait::async_trait;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::PodTemplate;
use kube::Client;
use kube::api::{Api, PostParams};
use ondemand_core::orchestrator::{Orchestrator, RunTaskParams, TaskSubmission, literal};
use ondemand_core::task::TaskSpec;
use ondemand_core::{Error, Result};
use tracing::{debug, info};

use crate::manifest;

/// Kubernetes-based orchestrator.
pub struct KubernetesOrchestrator {
    client: Client,
    namespace: String,
}

impl KubernetesOrchestrator {
    pub async fn new(namespace: impl Into<String>) -> Result<Self> {
        let client = Client::try_default()
            .await
            .map_err(|e| Error::Configuration(format!("kubernetes client: {}", e)))?;
        Ok(Self {
            client,
            namespace: namespace.into(),
        })
    }

    pub fn with_client(client: Client, namespace: impl Into<String>) -> Self {
        Self {
            client,
            namespace: namespace.into(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    fn templates(&self) -> Api<PodTemplate> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }

    fn jobs(&self) -> Api<Job> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }
}

fn orchestrator_error(action: &str, e: kube::Error) -> Error {
    Error::Orchestrator(format!("{}: {}", action, e))
}

#[async_trait]
impl Orchestrator for KubernetesOrchestrator {
    fn name(&self) -> &'static str {
        "kubernetes"
    }

    async fn describe_task_specification(&self, family: &str) -> Result<Option<String>> {
        let name = manifest::template_name(family);
        match self.templates().get(&name).await {
            Ok(_) => Ok(Some(name)),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(None),
            Err(e) => Err(orchestrator_error("failed to get pod template", e)),
        }
    }

    async fn register_task_specification(&self, spec: &TaskSpec) -> Result<String> {
        let template = manifest::pod_template(spec)?;
        let name = manifest::template_name(literal("family", &spec.family)?);

        match self
            .templates()
            .create(&PostParams::default(), &template)
            .await
        {
            Ok(_) => {
                info!(template = %name, namespace = %self.namespace, "Registered pod template");
                Ok(name)
            }
            // families are content addressed, an existing template is identical
            Err(kube::Error::Api(ae)) if ae.code == 409 => {
                debug!(template = %name, "Pod template already registered");
                Ok(name)
            }
            Err(e) => Err(orchestrator_error("failed to create pod template", e)),
        }
    }

    async fn submit_task(&self, params: &RunTaskParams) -> Result<TaskSubmission> {
        debug!(
            cluster = %params.cluster,
            namespace = %self.namespace,
            "Launching in namespace; cluster and network settings are not used"
        );

        let template = match self.templates().get(&params.task_definition).await {
            Ok(template) => template,
            // registration is not yet visible, retryable
            Err(kube::Error::Api(ae)) if ae.code == 404 => {
                return Err(Error::Orchestrator(format!(
                    "pod template {} not found",
                    params.task_definition
                )));
            }
            Err(e) => return Err(orchestrator_error("failed to get pod template", e)),
        };

        let job = manifest::job(&template, params)?;
        let name = job.metadata.name.clone().unwrap_or_default();

        match self.jobs().create(&PostParams::default(), &job).await {
            Ok(_) => {
                info!(job = %name, namespace = %self.namespace, "Created job");
            }
            Err(kube::Error::Api(ae)) if ae.code == 409 => {
                info!(job = %name, "Job already exists");
            }
            Err(e) => return Err(orchestrator_error("failed to create job", e)),
        }

        Ok(TaskSubmission {
            tasks: vec![name],
            failures: Vec::new(),
        })
    }
}
