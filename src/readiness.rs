//! Cluster readiness engine
//!
//! A bounded polling loop over a layered health predicate. Each cycle checks
//! the layers in strict order - `ServiceUp`, `ApiReachable`, `NodesReady`,
//! `WorkloadsHealthy` - short-circuiting at the first failure, so probe
//! effort and log noise stay proportional to actual progress. A layer that
//! passed in one cycle may regress and is rechecked every cycle.
//!
//! Observation gathering lives behind [`ClusterObserver`], and layer
//! semantics live in the pure [`evaluate`] function, so the state machine's
//! tie-breaks (zero-object = not ready, short-circuit order) are testable
//! without a cluster.
//!
//! Polling is the only option here: neither the service manager nor the API
//! server exposes a push interface suitable for this context. Timeouts are
//! checked once per cycle, so a slow underlying query can overshoot the
//! nominal bound by its own duration - accepted imprecision.

use std::fmt;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Node, Pod};
use kube::api::ListParams;
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Api, Client, Config};
#[cfg(test)]
use mockall::automock;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::{cmd, Error, Result, K0S_BINARY_PATH, K0S_SERVICE_NAME, SYSTEM_NAMESPACE};

/// One named health predicate in the ordered readiness chain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layer {
    /// The service's own status command returns success
    ServiceUp,
    /// A cluster-info style API query succeeds
    ApiReachable,
    /// Every node reports a Ready condition (zero nodes is not ready)
    NodesReady,
    /// Every system-namespace pod is Running or Succeeded (zero pods is not healthy)
    WorkloadsHealthy,
    /// In-cluster DNS resolves an internal service name (deep check only)
    DnsFunctional,
}

impl Layer {
    /// Layer name as carried in timeout errors and logs
    pub fn as_str(&self) -> &'static str {
        match self {
            Layer::ServiceUp => "ServiceUp",
            Layer::ApiReachable => "APIReachable",
            Layer::NodesReady => "NodesReady",
            Layer::WorkloadsHealthy => "WorkloadsHealthy",
            Layer::DnsFunctional => "DNSFunctional",
        }
    }
}

impl fmt::Display for Layer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Bounds and knobs for the polling loop
#[derive(Debug, Clone)]
pub struct ReadinessConfig {
    /// Total time budget before the engine gives up
    pub timeout: Duration,
    /// Sleep between poll cycles
    pub poll_interval: Duration,
    /// Whether to run the DNS deep check after reaching ready
    pub dns_check: bool,
}

impl Default for ReadinessConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(300),
            poll_interval: Duration::from_secs(5),
            dns_check: false,
        }
    }
}

/// Health of one node as observed in a poll cycle
#[derive(Debug, Clone)]
pub struct NodeHealth {
    /// Node name
    pub name: String,
    /// Whether the node's Ready condition is True
    pub ready: bool,
}

/// Health of one system-namespace pod as observed in a poll cycle
#[derive(Debug, Clone)]
pub struct PodHealth {
    /// Pod name
    pub name: String,
    /// Reported lifecycle phase
    pub phase: String,
}

impl PodHealth {
    /// Whether the phase is compatible with a healthy system workload
    pub fn healthy(&self) -> bool {
        matches!(self.phase.as_str(), "Running" | "Succeeded")
    }
}

/// Everything one poll cycle observed.
///
/// `None` means the signal was never probed (an earlier layer already
/// failed) or the query itself failed; both count as the layer failing.
#[derive(Debug, Clone, Default)]
pub struct Observations {
    /// Service status command succeeded
    pub service_ok: bool,
    /// API query succeeded
    pub api_ok: Option<bool>,
    /// Node healths, if probed and listable
    pub nodes: Option<Vec<NodeHealth>>,
    /// System pod healths, if probed and listable
    pub pods: Option<Vec<PodHealth>>,
}

/// Evaluate one cycle's observations against the layered predicate.
///
/// Pure: returns the first failing layer, or `Ok` when every required layer
/// passes. Zero nodes and zero pods fail their layers - a successful query
/// that races ahead of object creation must not count as ready.
pub fn evaluate(obs: &Observations) -> std::result::Result<(), Layer> {
    if !obs.service_ok {
        return Err(Layer::ServiceUp);
    }
    if !obs.api_ok.unwrap_or(false) {
        return Err(Layer::ApiReachable);
    }
    match &obs.nodes {
        Some(nodes) if !nodes.is_empty() && nodes.iter().all(|n| n.ready) => {}
        _ => return Err(Layer::NodesReady),
    }
    match &obs.pods {
        Some(pods) if !pods.is_empty() && pods.iter().all(PodHealth::healthy) => {}
        _ => return Err(Layer::WorkloadsHealthy),
    }
    Ok(())
}

/// Diagnostic bundle captured when the engine times out
#[derive(Debug, Clone, Default)]
pub struct Diagnostics {
    /// Service status report
    pub service_status: String,
    /// Recent service logs
    pub service_logs: String,
    /// API cluster-info output
    pub cluster_info: String,
    /// Node listing
    pub nodes: String,
    /// Pod listing across namespaces
    pub pods: String,
}

impl Diagnostics {
    /// Emit the bundle to stdout, grouped for readability
    pub fn print(&self) {
        let sections = [
            ("service status", &self.service_status),
            ("service logs", &self.service_logs),
            ("cluster-info", &self.cluster_info),
            ("nodes", &self.nodes),
            ("pods", &self.pods),
        ];
        for (title, body) in sections {
            println!("=== {} ===", title);
            println!("{}", body.trim_end());
            println!();
        }
    }
}

/// Source of the readiness signals, one method per layer.
///
/// Gathering is separated from evaluation so tests can script arbitrary
/// health progressions without a cluster.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ClusterObserver: Send + Sync {
    /// Whether the runtime's own status command reports the service up
    async fn service_status(&self) -> bool;
    /// Whether the API answers a basic query
    async fn api_reachable(&self) -> bool;
    /// Node healths, or `None` when the listing fails
    async fn nodes(&self) -> Option<Vec<NodeHealth>>;
    /// System-namespace pod healths, or `None` when the listing fails
    async fn system_pods(&self) -> Option<Vec<PodHealth>>;
    /// Capture the diagnostic bundle (called only on timeout)
    async fn diagnostics(&self) -> Diagnostics;
}

/// Terminal value of one engine run. Never mutated after production.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadinessVerdict {
    /// Every required layer passed within one cycle
    Ready,
    /// Time ran out before all layers passed
    TimedOut {
        /// Wall time spent polling
        elapsed: Duration,
        /// The layer that was failing when time ran out
        last_layer: Layer,
    },
}

/// Gather one cycle's observations, stopping at the first failing layer.
async fn gather(observer: &dyn ClusterObserver) -> Observations {
    let mut obs = Observations {
        service_ok: observer.service_status().await,
        ..Default::default()
    };
    if evaluate(&obs) == Err(Layer::ServiceUp) {
        return obs;
    }

    obs.api_ok = Some(observer.api_reachable().await);
    if evaluate(&obs) == Err(Layer::ApiReachable) {
        return obs;
    }

    obs.nodes = observer.nodes().await;
    if evaluate(&obs) == Err(Layer::NodesReady) {
        return obs;
    }

    obs.pods = observer.system_pods().await;
    obs
}

/// Run the polling loop to a terminal verdict.
///
/// The timeout is checked at the top of each cycle, so a config whose
/// interval exceeds its timeout still gets one full evaluation before the
/// engine can give up.
pub async fn poll(observer: &dyn ClusterObserver, config: &ReadinessConfig) -> ReadinessVerdict {
    let start = Instant::now();
    let mut last_layer = Layer::ServiceUp;
    let mut cycle = 0u32;

    loop {
        let elapsed = start.elapsed();
        if elapsed > config.timeout {
            return ReadinessVerdict::TimedOut {
                elapsed,
                last_layer,
            };
        }

        cycle += 1;
        let obs = gather(observer).await;
        match evaluate(&obs) {
            Ok(()) => {
                info!(cycles = cycle, elapsed = ?start.elapsed(), "Cluster is ready");
                return ReadinessVerdict::Ready;
            }
            Err(layer) => {
                debug!(cycle, layer = %layer, "Readiness layer not yet passing");
                last_layer = layer;
            }
        }

        tokio::time::sleep(config.poll_interval).await;
    }
}

/// Wait until the cluster is ready, or fail with diagnostics.
///
/// On timeout the diagnostic bundle is captured and printed before the
/// error is returned, so the failure output always explains what the
/// cluster looked like when time ran out.
pub async fn wait_for_ready(
    observer: &dyn ClusterObserver,
    config: &ReadinessConfig,
) -> Result<()> {
    info!(
        timeout = ?config.timeout,
        poll_interval = ?config.poll_interval,
        "Waiting for cluster readiness"
    );

    match poll(observer, config).await {
        ReadinessVerdict::Ready => Ok(()),
        ReadinessVerdict::TimedOut { elapsed, last_layer } => {
            observer.diagnostics().await.print();
            Err(Error::ReadinessTimeout {
                elapsed,
                last_layer: last_layer.as_str(),
            })
        }
    }
}

// =============================================================================
// Production observer
// =============================================================================

/// Observer backed by the real k0s service and cluster API
pub struct K0sObserver {
    client: Client,
}

impl K0sObserver {
    /// Connect to the cluster using the extracted admin kubeconfig.
    ///
    /// Connection and read timeouts are kept short: a local API server
    /// answers fast or not at all, and long hangs would blow the poll
    /// cadence way past the configured interval.
    pub async fn connect(kubeconfig: &Path) -> Result<Self> {
        let raw = Kubeconfig::read_from(kubeconfig)
            .map_err(|e| Error::launch(format!("failed to read kubeconfig: {}", e)))?;
        let mut config = Config::from_custom_kubeconfig(raw, &KubeConfigOptions::default())
            .await
            .map_err(|e| Error::launch(format!("failed to load kubeconfig: {}", e)))?;
        config.connect_timeout = Some(Duration::from_secs(5));
        config.read_timeout = Some(Duration::from_secs(15));

        let client = Client::try_from(config)?;
        Ok(Self { client })
    }

    /// Handle to the underlying API client (cheap to clone)
    pub fn client(&self) -> Client {
        self.client.clone()
    }
}

#[async_trait]
impl ClusterObserver for K0sObserver {
    async fn service_status(&self) -> bool {
        cmd::succeeds(K0S_BINARY_PATH, &["status"]).await
    }

    async fn api_reachable(&self) -> bool {
        self.client.apiserver_version().await.is_ok()
    }

    async fn nodes(&self) -> Option<Vec<NodeHealth>> {
        let api: Api<Node> = Api::all(self.client.clone());
        let list = api.list(&ListParams::default()).await.ok()?;
        Some(
            list.items
                .iter()
                .map(|node| NodeHealth {
                    name: node.metadata.name.clone().unwrap_or_default(),
                    ready: node_is_ready(node),
                })
                .collect(),
        )
    }

    async fn system_pods(&self) -> Option<Vec<PodHealth>> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), SYSTEM_NAMESPACE);
        let list = api.list(&ListParams::default()).await.ok()?;
        Some(
            list.items
                .iter()
                .map(|pod| PodHealth {
                    name: pod.metadata.name.clone().unwrap_or_default(),
                    phase: pod
                        .status
                        .as_ref()
                        .and_then(|s| s.phase.clone())
                        .unwrap_or_default(),
                })
                .collect(),
        )
    }

    async fn diagnostics(&self) -> Diagnostics {
        Diagnostics {
            service_status: cmd::capture(K0S_BINARY_PATH, &["status"]).await,
            service_logs: cmd::capture(
                "journalctl",
                &["-u", K0S_SERVICE_NAME, "--no-pager", "-n", "80"],
            )
            .await,
            cluster_info: cmd::capture(K0S_BINARY_PATH, &["kubectl", "cluster-info"]).await,
            nodes: cmd::capture(K0S_BINARY_PATH, &["kubectl", "get", "nodes", "-o", "wide"]).await,
            pods: cmd::capture(K0S_BINARY_PATH, &["kubectl", "get", "pods", "-A"]).await,
        }
    }
}

/// Whether a node's Ready condition is True
fn node_is_ready(node: &Node) -> bool {
    node.status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .map(|conditions| {
            conditions
                .iter()
                .any(|c| c.type_ == "Ready" && c.status == "True")
        })
        .unwrap_or(false)
}
