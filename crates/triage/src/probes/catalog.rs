//! Probe catalog: registration, discovery, and validated dispatch.
//!
//! The catalog is built once at process start from the enabled-tool
//! configuration and is read-only for the lifetime of an investigation.
//! `dispatch` never raises: unknown ids, missing required inputs, and probe
//! faults all come back as failed [`Outcome`]s.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{info, warn};

use crate::config::Config;

use super::connectivity::ServiceConnectivityProbe;
use super::git::{CommitHistoryProbe, DeploymentAnalysisProbe};
use super::health::ServiceHealthProbe;
use super::kubectl::{ClusterEventsProbe, KubectlCommandProbe};
use super::logs::PodLogsProbe;
use super::loki::{LokiLogsProbe, LokiMetricsProbe};
use super::prometheus::{PrometheusAlertsProbe, PrometheusQueryProbe, PrometheusTargetsProbe};
use super::{missing_required_inputs, Descriptor, InputMap, Outcome, Probe};

/// Registry of enabled probes for one process lifetime.
#[derive(Default)]
pub struct Catalog {
    probes: HashMap<String, Arc<dyn Probe>>,
}

impl Catalog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a probe, overwriting any previous probe with the same id.
    pub fn register(&mut self, probe: Arc<dyn Probe>) {
        self.probes
            .insert(probe.descriptor().id.clone(), probe);
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<Arc<dyn Probe>> {
        self.probes.get(id).cloned()
    }

    /// Descriptors of every registered probe, for planner consumption.
    #[must_use]
    pub fn list(&self) -> Vec<Descriptor> {
        self.probes
            .values()
            .map(|p| p.descriptor().clone())
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.probes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.probes.is_empty()
    }

    /// Look up a probe, validate required inputs, and execute it.
    ///
    /// Always returns an [`Outcome`]; probe faults are captured, not
    /// propagated. The probe's `execute` is never invoked when a required
    /// input is missing.
    pub async fn dispatch(&self, id: &str, inputs: &InputMap) -> Outcome {
        let Some(probe) = self.get(id) else {
            return Outcome::failure(format!("Probe '{id}' not found"));
        };

        let missing = missing_required_inputs(probe.descriptor(), inputs);
        if !missing.is_empty() {
            return Outcome::failure(format!(
                "Missing required inputs for '{id}': {}",
                missing.join(", ")
            ));
        }

        match probe.execute(inputs).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(probe = id, error = %e, "Probe execution fault");
                Outcome::failure(format!("Probe '{id}' failed: {e:#}"))
            }
        }
    }

    /// Build the catalog from configuration.
    ///
    /// Each enabled family is constructed independently; a family whose
    /// probes refuse to construct (missing binary, bad repo path) is logged
    /// and skipped so the remaining families still come up. The caller must
    /// treat an empty catalog as fatal.
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        let mut catalog = Self::new();

        if config.is_enabled("kubernetes") {
            let family: Vec<anyhow::Result<Arc<dyn Probe>>> = vec![
                KubectlCommandProbe::new().map(|p| Arc::new(p) as Arc<dyn Probe>),
                ClusterEventsProbe::new().map(|p| Arc::new(p) as Arc<dyn Probe>),
                PodLogsProbe::new().map(|p| Arc::new(p) as Arc<dyn Probe>),
                ServiceHealthProbe::new().map(|p| Arc::new(p) as Arc<dyn Probe>),
                ServiceConnectivityProbe::new().map(|p| Arc::new(p) as Arc<dyn Probe>),
            ];
            register_family(&mut catalog, "kubernetes", family);
        } else {
            info!("Kubernetes probes disabled");
        }

        if config.is_enabled("loki") {
            let loki_config = config.loki_client_config();
            let family: Vec<anyhow::Result<Arc<dyn Probe>>> = vec![
                LokiLogsProbe::new(loki_config.clone()).map(|p| Arc::new(p) as Arc<dyn Probe>),
                LokiMetricsProbe::new(loki_config).map(|p| Arc::new(p) as Arc<dyn Probe>),
            ];
            register_family(&mut catalog, "loki", family);
        } else {
            info!("Loki probes disabled");
        }

        if config.is_enabled("prometheus") {
            let prom_config = config.prometheus_client_config();
            let family: Vec<anyhow::Result<Arc<dyn Probe>>> = vec![
                PrometheusQueryProbe::new(prom_config.clone())
                    .map(|p| Arc::new(p) as Arc<dyn Probe>),
                PrometheusAlertsProbe::new(prom_config.clone())
                    .map(|p| Arc::new(p) as Arc<dyn Probe>),
                PrometheusTargetsProbe::new(prom_config).map(|p| Arc::new(p) as Arc<dyn Probe>),
            ];
            register_family(&mut catalog, "prometheus", family);
        } else {
            info!("Prometheus probes disabled");
        }

        if config.is_enabled("git") {
            let repo_path = config.git_repo_path();
            let family: Vec<anyhow::Result<Arc<dyn Probe>>> = vec![
                CommitHistoryProbe::new(repo_path.clone()).map(|p| Arc::new(p) as Arc<dyn Probe>),
                DeploymentAnalysisProbe::new(repo_path).map(|p| Arc::new(p) as Arc<dyn Probe>),
            ];
            register_family(&mut catalog, "git", family);
        } else {
            info!("Git probes disabled");
        }

        info!(
            probes = catalog.len(),
            "Catalog populated: {:?}",
            catalog.list().iter().map(|d| d.id.clone()).collect::<Vec<_>>()
        );

        catalog
    }
}

/// Register every probe of a family that constructed successfully.
///
/// A single failing probe skips only itself; the family name is used for
/// log context.
fn register_family(
    catalog: &mut Catalog,
    family: &str,
    probes: Vec<anyhow::Result<Arc<dyn Probe>>>,
) {
    let mut registered = 0usize;
    for probe in probes {
        match probe {
            Ok(probe) => {
                catalog.register(probe);
                registered += 1;
            }
            Err(e) => {
                warn!(family, error = %e, "Failed to initialize probe, skipping");
            }
        }
    }
    if registered > 0 {
        info!(family, registered, "Probe family enabled");
    } else {
        warn!(family, "Probe family enabled in config but no probe constructed");
    }
}
