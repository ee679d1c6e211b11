//! Service health probe: replica scoring, pod states, related events, and
//! namespace-wide rollup.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::exec::run_command;
use super::kubectl::{triage_events, ClusterEvent};
use super::{parse_inputs, Category, Descriptor, InputMap, Outcome, OutcomeMetadata, Probe};

fn default_namespace() -> String {
    "default".to_string()
}

/// Health of a single workload, derived from replica counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Score a workload from ready vs desired replica counts.
///
/// Fully ready and wanting at least one replica is healthy; partially ready
/// is degraded; zero ready (or zero desired) is unhealthy.
#[must_use]
pub fn assess_replica_health(ready: u32, desired: u32) -> HealthState {
    if desired > 0 && ready == desired {
        HealthState::Healthy
    } else if ready > 0 && ready < desired {
        HealthState::Degraded
    } else {
        HealthState::Unhealthy
    }
}

/// Health of a whole namespace, derived from pod and deployment rollups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NamespaceState {
    Healthy,
    Degraded,
    Critical,
}

/// Roll up a namespace: no failures anywhere is healthy, anything still
/// running keeps it at degraded, otherwise critical.
#[must_use]
pub fn assess_namespace_health(
    running_pods: usize,
    failed_pods: usize,
    unhealthy_deployments: usize,
) -> NamespaceState {
    if failed_pods == 0 && unhealthy_deployments == 0 {
        NamespaceState::Healthy
    } else if running_pods > 0 {
        NamespaceState::Degraded
    } else {
        NamespaceState::Critical
    }
}

/// How a pod counts toward the namespace rollup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PodCondition {
    Running,
    Pending,
    Failed,
}

/// Classify a pod from its phase and per-container readiness.
///
/// A Running pod only counts as running when every container is ready;
/// Running-but-unready pods count as failed. Pending pods are tracked
/// separately; every other phase is failed.
#[must_use]
pub fn classify_pod(phase: Option<&str>, containers_ready: &[bool]) -> PodCondition {
    match phase {
        Some("Running") => {
            if containers_ready.iter().all(|ready| *ready) {
                PodCondition::Running
            } else {
                PodCondition::Failed
            }
        }
        Some("Pending") => PodCondition::Pending,
        _ => PodCondition::Failed,
    }
}

/// Events are related to a service when its name appears in the involved
/// object or the message. Matching is case-insensitive.
#[must_use]
pub fn filter_service_events(events: &[ClusterEvent], service_name: &str) -> Vec<ClusterEvent> {
    let needle = service_name.to_lowercase();
    events
        .iter()
        .filter(|e| {
            e.object.to_lowercase().contains(&needle)
                || e.message.to_lowercase().contains(&needle)
        })
        .cloned()
        .collect()
}

// Raw kubectl shapes.

#[derive(Debug, Deserialize)]
struct DeploymentDoc {
    #[serde(default)]
    spec: DeploymentSpec,
    #[serde(default)]
    status: DeploymentStatus,
}

#[derive(Debug, Default, Deserialize)]
struct DeploymentSpec {
    #[serde(default)]
    replicas: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeploymentStatus {
    #[serde(default)]
    ready_replicas: Option<u32>,
    #[serde(default)]
    available_replicas: Option<u32>,
    #[serde(default)]
    updated_replicas: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct DeploymentList {
    #[serde(default)]
    items: Vec<NamedDeployment>,
}

#[derive(Debug, Deserialize)]
struct NamedDeployment {
    #[serde(default)]
    metadata: ObjectMeta,
    #[serde(default)]
    spec: DeploymentSpec,
    #[serde(default)]
    status: DeploymentStatus,
}

#[derive(Debug, Default, Deserialize)]
struct ObjectMeta {
    #[serde(default)]
    name: String,
}

#[derive(Debug, Deserialize)]
struct PodList {
    #[serde(default)]
    items: Vec<PodDoc>,
}

#[derive(Debug, Deserialize)]
struct PodDoc {
    #[serde(default)]
    metadata: ObjectMeta,
    #[serde(default)]
    status: PodStatus,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PodStatus {
    #[serde(default)]
    phase: Option<String>,
    #[serde(default)]
    container_statuses: Vec<ContainerStatus>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ContainerStatus {
    #[serde(default)]
    ready: bool,
    #[serde(default)]
    restart_count: u32,
}

#[derive(Debug, Deserialize)]
struct EventListDoc {
    #[serde(default)]
    items: Vec<Value>,
}

fn event_from_raw(item: &Value) -> ClusterEvent {
    let object = format!(
        "{}/{}",
        item.pointer("/involvedObject/kind")
            .and_then(Value::as_str)
            .unwrap_or_default(),
        item.pointer("/involvedObject/name")
            .and_then(Value::as_str)
            .unwrap_or_default()
    );
    ClusterEvent {
        timestamp: item
            .get("lastTimestamp")
            .and_then(Value::as_str)
            .map(ToString::to_string),
        event_type: item
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        reason: item
            .get("reason")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        message: item
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        object,
        namespace: item
            .pointer("/metadata/namespace")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
    }
}

/// Service and namespace health check probe.
pub struct ServiceHealthProbe {
    descriptor: Descriptor,
}

#[derive(Debug, Deserialize)]
struct ServiceHealthInputs {
    service_name: String,
    #[serde(default = "default_namespace")]
    namespace: String,
    #[serde(default)]
    check_type: Option<String>,
}

impl ServiceHealthProbe {
    pub fn new() -> anyhow::Result<Self> {
        Ok(Self {
            descriptor: Descriptor::new(
                "k8s_service_health",
                "Kubernetes Service Health Check",
                "Check deployment replica health, pod states, and related events for a service, or roll up an entire namespace",
                &[
                    ("service_name", "Name of the service/deployment to check"),
                    ("namespace", "Kubernetes namespace (optional, defaults to 'default')"),
                    (
                        "check_type",
                        "Scope of the check: 'service' or 'namespace' (optional, defaults to 'service')",
                    ),
                ],
                Category::Health,
            ),
        })
    }

    async fn check_service(&self, service: &str, namespace: &str) -> anyhow::Result<Value> {
        let (deployment, pods, events) = tokio::try_join!(
            self.deployment_health(service, namespace),
            self.pod_health(service, namespace),
            self.related_events(service, namespace),
        )?;
        Ok(json!({
            "service": service,
            "namespace": namespace,
            "deployment": deployment,
            "pods": pods,
            "related_events": events,
        }))
    }

    async fn deployment_health(&self, service: &str, namespace: &str) -> anyhow::Result<Value> {
        let output = run_command(
            "kubectl",
            &["get", "deployment", service, "-n", namespace, "-o", "json"],
        )
        .await?;
        if !output.success {
            return Ok(json!({
                "status": "not_found",
                "detail": output.stderr.trim(),
            }));
        }

        let doc: DeploymentDoc = serde_json::from_str(&output.stdout)?;
        let desired = doc.spec.replicas.unwrap_or(0);
        let ready = doc.status.ready_replicas.unwrap_or(0);
        let state = assess_replica_health(ready, desired);

        Ok(json!({
            "status": state,
            "desired_replicas": desired,
            "ready_replicas": ready,
            "available_replicas": doc.status.available_replicas.unwrap_or(0),
            "updated_replicas": doc.status.updated_replicas.unwrap_or(0),
        }))
    }

    async fn pod_health(&self, service: &str, namespace: &str) -> anyhow::Result<Value> {
        let selector = format!("app={service}");
        let output = run_command(
            "kubectl",
            &["get", "pods", "-n", namespace, "-l", &selector, "-o", "json"],
        )
        .await?;
        if !output.success {
            return Ok(json!({
                "status": "error",
                "detail": output.stderr.trim(),
            }));
        }

        let list: PodList = serde_json::from_str(&output.stdout)?;
        let pods: Vec<Value> = list
            .items
            .iter()
            .map(|pod| {
                let restarts: u32 = pod
                    .status
                    .container_statuses
                    .iter()
                    .map(|c| c.restart_count)
                    .sum();
                let ready = pod.status.container_statuses.iter().all(|c| c.ready)
                    && !pod.status.container_statuses.is_empty();
                json!({
                    "name": pod.metadata.name,
                    "phase": pod.status.phase,
                    "ready": ready,
                    "restarts": restarts,
                })
            })
            .collect();

        let running = list
            .items
            .iter()
            .filter(|p| p.status.phase.as_deref() == Some("Running"))
            .count();

        Ok(json!({
            "total": pods.len(),
            "running": running,
            "pods": pods,
        }))
    }

    async fn related_events(&self, service: &str, namespace: &str) -> anyhow::Result<Value> {
        let output = run_command(
            "kubectl",
            &["get", "events", "-n", namespace, "--sort-by=.lastTimestamp", "-o", "json"],
        )
        .await?;
        if !output.success {
            return Ok(json!({ "events": [], "detail": output.stderr.trim() }));
        }

        let list: EventListDoc = serde_json::from_str(&output.stdout)?;
        let events: Vec<ClusterEvent> = list.items.iter().map(event_from_raw).collect();
        let related = filter_service_events(&events, service);
        let triage = triage_events(&related);

        Ok(json!({
            "count": related.len(),
            "events": related.iter().rev().take(10).collect::<Vec<_>>(),
            "triage": triage.summary(),
        }))
    }

    async fn check_namespace(&self, namespace: &str) -> anyhow::Result<Value> {
        let pods_args = ["get", "pods", "-n", namespace, "-o", "json"];
        let deploys_args = ["get", "deployments", "-n", namespace, "-o", "json"];
        let (pods_out, deploys_out) = tokio::try_join!(
            run_command("kubectl", &pods_args),
            run_command("kubectl", &deploys_args),
        )?;

        if !pods_out.success {
            anyhow::bail!("Failed to list pods: {}", pods_out.stderr.trim());
        }
        if !deploys_out.success {
            anyhow::bail!("Failed to list deployments: {}", deploys_out.stderr.trim());
        }

        let pods: PodList = serde_json::from_str(&pods_out.stdout)?;
        let deployments: DeploymentList = serde_json::from_str(&deploys_out.stdout)?;

        let mut running = 0usize;
        let mut pending = 0usize;
        let mut failed = 0usize;
        let mut pod_issues: Vec<Value> = Vec::new();
        for pod in &pods.items {
            let ready: Vec<bool> = pod
                .status
                .container_statuses
                .iter()
                .map(|c| c.ready)
                .collect();
            let phase = pod.status.phase.as_deref();
            match classify_pod(phase, &ready) {
                PodCondition::Running => running += 1,
                PodCondition::Pending => {
                    pending += 1;
                    pod_issues.push(json!({
                        "name": pod.metadata.name,
                        "issue": "pending",
                        "status": phase,
                    }));
                }
                PodCondition::Failed => {
                    failed += 1;
                    let issue = if phase == Some("Running") {
                        "containers_not_ready"
                    } else {
                        "failed_status"
                    };
                    pod_issues.push(json!({
                        "name": pod.metadata.name,
                        "issue": issue,
                        "status": phase,
                    }));
                }
            }
        }

        let unhealthy: Vec<Value> = deployments
            .items
            .iter()
            .filter_map(|d| {
                let desired = d.spec.replicas.unwrap_or(0);
                let ready = d.status.ready_replicas.unwrap_or(0);
                match assess_replica_health(ready, desired) {
                    HealthState::Healthy => None,
                    state => Some(json!({
                        "name": d.metadata.name,
                        "status": state,
                        "ready": ready,
                        "desired": desired,
                    })),
                }
            })
            .collect();

        let state = assess_namespace_health(running, failed, unhealthy.len());

        Ok(json!({
            "namespace": namespace,
            "status": state,
            "pods": {
                "total": pods.items.len(),
                "running": running,
                "pending": pending,
                "failed": failed,
                "issues": pod_issues,
            },
            "deployments": {
                "total": deployments.items.len(),
                "unhealthy": unhealthy,
            },
        }))
    }
}

#[async_trait]
impl Probe for ServiceHealthProbe {
    fn descriptor(&self) -> &Descriptor {
        &self.descriptor
    }

    async fn execute(&self, inputs: &InputMap) -> anyhow::Result<Outcome> {
        let inputs: ServiceHealthInputs = parse_inputs(inputs)?;
        let check_type = inputs.check_type.as_deref().unwrap_or("service");

        let payload = match check_type {
            "namespace" => self.check_namespace(&inputs.namespace).await?,
            _ => {
                self.check_service(&inputs.service_name, &inputs.namespace)
                    .await?
            }
        };

        Ok(Outcome::ok_with_metadata(
            payload,
            OutcomeMetadata::for_command(format!(
                "k8s_service_health {} --namespace {} --check-type {check_type}",
                inputs.service_name, inputs.namespace
            )),
        ))
    }
}
