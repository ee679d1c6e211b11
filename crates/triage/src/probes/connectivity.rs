//! Service connectivity probe: DNS, service discovery, port reachability,
//! and HTTP health, run concurrently and rolled into one status.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use super::exec::run_command;
use super::{parse_inputs, Category, Descriptor, InputMap, Outcome, OutcomeMetadata, Probe};

fn default_namespace() -> String {
    "default".to_string()
}

/// Checks whose failure caps the overall status below healthy.
const CRITICAL_CHECKS: &[&str] = &["dns_resolution", "service_discovery"];

const NETSHOOT_IMAGE: &str = "nicolaka/netshoot";
const CURL_IMAGE: &str = "curlimages/curl";

/// One finished connectivity check.
#[derive(Debug, Clone, Serialize)]
pub struct CheckResult {
    pub name: String,
    pub passed: bool,
    pub detail: Value,
}

impl CheckResult {
    fn passed(name: &str, detail: Value) -> Self {
        Self {
            name: name.to_string(),
            passed: true,
            detail,
        }
    }

    fn failed(name: &str, detail: Value) -> Self {
        Self {
            name: name.to_string(),
            passed: false,
            detail,
        }
    }

    fn is_critical(&self) -> bool {
        CRITICAL_CHECKS.contains(&self.name.as_str())
    }
}

/// Overall connectivity status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectivityState {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Score the check set: at least 80% passing with no critical failure is
/// healthy, at least 50% passing is degraded, anything less is unhealthy.
#[must_use]
pub fn assess_overall_status(results: &[CheckResult]) -> ConnectivityState {
    if results.is_empty() {
        return ConnectivityState::Unhealthy;
    }
    let passed = results.iter().filter(|r| r.passed).count();
    let ratio = passed as f64 / results.len() as f64;
    let critical_failure = results.iter().any(|r| !r.passed && r.is_critical());

    if ratio >= 0.8 && !critical_failure {
        ConnectivityState::Healthy
    } else if ratio >= 0.5 {
        ConnectivityState::Degraded
    } else {
        ConnectivityState::Unhealthy
    }
}

/// Service connectivity diagnosis probe.
///
/// DNS, port, and HTTP checks run from short-lived diagnostic pods inside
/// the cluster, so they observe exactly what workloads observe.
pub struct ServiceConnectivityProbe {
    descriptor: Descriptor,
}

#[derive(Debug, Deserialize)]
struct ConnectivityInputs {
    service_name: String,
    #[serde(default = "default_namespace")]
    namespace: String,
    #[serde(default)]
    port: Option<u16>,
    #[serde(default)]
    health_path: Option<String>,
}

impl ServiceConnectivityProbe {
    pub fn new() -> anyhow::Result<Self> {
        Ok(Self {
            descriptor: Descriptor::new(
                "service_connectivity",
                "Service Connectivity Diagnosis",
                "Diagnose service connectivity: DNS resolution, service discovery, port reachability, and HTTP health endpoint",
                &[
                    ("service_name", "Name of the service to diagnose"),
                    ("namespace", "Kubernetes namespace (optional, defaults to 'default')"),
                    ("port", "Service port to test (optional, defaults to 80)"),
                    (
                        "health_path",
                        "HTTP health endpoint path (optional, defaults to '/health')",
                    ),
                ],
                Category::Health,
            ),
        })
    }

    async fn test_dns_resolution(&self, service: &str, namespace: &str) -> CheckResult {
        let fqdn = format!("{service}.{namespace}.svc.cluster.local");
        let pod_name = ephemeral_pod_name("dns-test");
        let result = run_command(
            "kubectl",
            &[
                "run", &pod_name, "--image", NETSHOOT_IMAGE, "--rm", "-i",
                "--restart=Never", "--", "nslookup", &fqdn,
            ],
        )
        .await;

        match result {
            Ok(output) if output.success && !output.stdout.contains("can't find") => {
                CheckResult::passed("dns_resolution", json!({ "fqdn": fqdn }))
            }
            Ok(output) => CheckResult::failed(
                "dns_resolution",
                json!({ "fqdn": fqdn, "output": output.stderr.trim() }),
            ),
            Err(e) => CheckResult::failed(
                "dns_resolution",
                json!({ "fqdn": fqdn, "error": e.to_string() }),
            ),
        }
    }

    async fn test_service_discovery(&self, service: &str, namespace: &str) -> CheckResult {
        let result = run_command(
            "kubectl",
            &["get", "service", service, "-n", namespace, "-o", "json"],
        )
        .await;

        match result {
            Ok(output) if output.success => {
                match serde_json::from_str::<Value>(&output.stdout) {
                    Ok(doc) => {
                        let cluster_ip = doc
                            .pointer("/spec/clusterIP")
                            .and_then(Value::as_str)
                            .unwrap_or_default()
                            .to_string();
                        let ports = doc
                            .pointer("/spec/ports")
                            .cloned()
                            .unwrap_or(Value::Array(Vec::new()));
                        if cluster_ip.is_empty() || cluster_ip == "None" {
                            CheckResult::failed(
                                "service_discovery",
                                json!({ "reason": "service has no cluster IP" }),
                            )
                        } else {
                            CheckResult::passed(
                                "service_discovery",
                                json!({ "cluster_ip": cluster_ip, "ports": ports }),
                            )
                        }
                    }
                    Err(e) => CheckResult::failed(
                        "service_discovery",
                        json!({ "error": format!("unexpected service payload: {e}") }),
                    ),
                }
            }
            Ok(output) => CheckResult::failed(
                "service_discovery",
                json!({ "error": output.stderr.trim() }),
            ),
            Err(e) => CheckResult::failed("service_discovery", json!({ "error": e.to_string() })),
        }
    }

    async fn test_port_connectivity(
        &self,
        service: &str,
        namespace: &str,
        port: u16,
    ) -> CheckResult {
        let target = format!("{service}.{namespace}.svc.cluster.local");
        let port_str = port.to_string();
        let pod_name = ephemeral_pod_name("port-test");
        let result = run_command(
            "kubectl",
            &[
                "run", &pod_name, "--image", NETSHOOT_IMAGE, "--rm", "-i",
                "--restart=Never", "--", "nc", "-zv", "-w", "5", &target, &port_str,
            ],
        )
        .await;

        match result {
            Ok(output) if output.success => {
                CheckResult::passed("port_connectivity", json!({ "target": target, "port": port }))
            }
            Ok(output) => CheckResult::failed(
                "port_connectivity",
                json!({ "target": target, "port": port, "output": output.stderr.trim() }),
            ),
            Err(e) => CheckResult::failed(
                "port_connectivity",
                json!({ "target": target, "port": port, "error": e.to_string() }),
            ),
        }
    }

    async fn test_http_health(
        &self,
        service: &str,
        namespace: &str,
        port: u16,
        path: &str,
    ) -> CheckResult {
        let url = format!("http://{service}.{namespace}.svc.cluster.local:{port}{path}");
        let pod_name = ephemeral_pod_name("curl-test");
        let result = run_command(
            "kubectl",
            &[
                "run", &pod_name, "--image", CURL_IMAGE, "--rm", "-i",
                "--restart=Never", "--", "curl", "-s", "-o", "/dev/null",
                "-w", "%{http_code}", "--max-time", "10", &url,
            ],
        )
        .await;

        match result {
            Ok(output) if output.success => {
                let code = output
                    .stdout
                    .trim()
                    .chars()
                    .filter(char::is_ascii_digit)
                    .take(3)
                    .collect::<String>();
                let healthy = code.starts_with('2') || code.starts_with('3');
                if healthy {
                    CheckResult::passed("http_health", json!({ "url": url, "status_code": code }))
                } else {
                    CheckResult::failed("http_health", json!({ "url": url, "status_code": code }))
                }
            }
            Ok(output) => CheckResult::failed(
                "http_health",
                json!({ "url": url, "output": output.stderr.trim() }),
            ),
            Err(e) => CheckResult::failed("http_health", json!({ "url": url, "error": e.to_string() })),
        }
    }
}

fn ephemeral_pod_name(prefix: &str) -> String {
    let suffix: String = Uuid::new_v4().simple().to_string()[..8].to_string();
    format!("{prefix}-{suffix}")
}

#[async_trait]
impl Probe for ServiceConnectivityProbe {
    fn descriptor(&self) -> &Descriptor {
        &self.descriptor
    }

    async fn execute(&self, inputs: &InputMap) -> anyhow::Result<Outcome> {
        let inputs: ConnectivityInputs = parse_inputs(inputs)?;
        let port = inputs.port.unwrap_or(80);
        let health_path = inputs.health_path.as_deref().unwrap_or("/health");
        let service = &inputs.service_name;
        let namespace = &inputs.namespace;

        let (dns, discovery, port_check, http) = tokio::join!(
            self.test_dns_resolution(service, namespace),
            self.test_service_discovery(service, namespace),
            self.test_port_connectivity(service, namespace, port),
            self.test_http_health(service, namespace, port, health_path),
        );

        let results = vec![dns, discovery, port_check, http];
        let status = assess_overall_status(&results);
        let passed = results.iter().filter(|r| r.passed).count();

        Ok(Outcome::ok_with_metadata(
            json!({
                "service": service,
                "namespace": namespace,
                "overall_status": status,
                "checks_passed": passed,
                "checks_total": results.len(),
                "checks": results,
            }),
            OutcomeMetadata::for_command(format!(
                "service_connectivity {service} --namespace {namespace} --port {port}"
            )),
        ))
    }
}
