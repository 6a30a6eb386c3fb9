//! CLI command implementations.

use anyhow::{Context, Result, bail};
use chrono::Utc;
use ondemand_config::{Layout, SchedulerConfig, parse_layout, parse_scheduler_config};
use ondemand_core::JobRequest;
use ondemand_executor::manifest;
use ondemand_scheduler::{BuilderConfig, LaunchPlan, TaskBuilder, TaskRequest};
use ondemand_transform::Expander;
use serde_json::{Value, json};
use std::path::Path;

pub fn load_config(path: Option<&Path>) -> Result<SchedulerConfig> {
    match path {
        Some(path) => {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            parse_scheduler_config(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))
        }
        None => Ok(SchedulerConfig::from_env()),
    }
}

/// Parse a layout and require an `agent` container.
pub fn validate_layout(path: &Path) -> Result<Layout> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read layout: {}", path.display()))?;
    let layout = parse_layout(&content)
        .with_context(|| format!("Failed to parse layout: {}", path.display()))?;
    if layout.agent().is_none() {
        bail!("layout '{}' has no 'agent' container", layout.name);
    }
    Ok(layout)
}

/// Compile a job the way the scheduler would.
///
/// The default output is the compiled task with its roles; `kubernetes`
/// switches to the pod template and job the Kubernetes backend would create.
pub fn render(
    config: &SchedulerConfig,
    job_id: &str,
    rules: &[String],
    layout: Option<&Path>,
    kubernetes: bool,
) -> Result<Value> {
    let layout = match layout {
        Some(path) => validate_layout(path)?,
        None => Layout::builtin(),
    };

    let rules: Vec<&str> = rules.iter().map(String::as_str).collect();
    let job = JobRequest::new(job_id, &rules);
    let request = TaskRequest::from_job(&job, &config.seed_image);
    let compiled = TaskBuilder::new(BuilderConfig::runtime(config)).build(&request, &layout, Utc::now())?;

    if !kubernetes {
        return Ok(serde_json::to_value(&compiled)?);
    }

    let cluster = config.cluster.as_deref().unwrap_or("default");
    let plan = LaunchPlan::new(compiled, cluster, config.require_subnets()?)?;
    let template = manifest::pod_template(&plan.definition)?;
    let job = manifest::job(&template, &plan.params)?;
    Ok(json!({
        "podTemplate": template,
        "job": job,
    }))
}

/// Expand a template fragment read from `path`.
pub fn expand(config: &SchedulerConfig, path: &Path) -> Result<Value> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read fragment: {}", path.display()))?;
    let fragment: Value = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse fragment: {}", path.display()))?;
    Ok(Expander::from_config(config).expand_fragment(fragment)?)
}
