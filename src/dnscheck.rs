//! DNS deep check
//!
//! Optional, more expensive readiness validation run once after the cluster
//! is otherwise ready: wait for the in-cluster DNS workload to become
//! available, then schedule an ephemeral probe pod and assert it can resolve
//! an internal service name. The probe pod is removed on every exit path,
//! success or failure.

use std::time::Duration;

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{DeleteParams, PostParams};
use kube::{Api, Client};
use serde_json::json;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::readiness::Layer;
use crate::{Error, Result, SYSTEM_NAMESPACE};

/// Name of the in-cluster DNS deployment k0s ships
const DNS_DEPLOYMENT: &str = "coredns";

/// Bound on waiting for the DNS workload itself to come up
const DNS_WAIT_TIMEOUT: Duration = Duration::from_secs(120);

/// Bound on waiting for the probe pod to finish
const PROBE_TIMEOUT: Duration = Duration::from_secs(120);

/// Interval between checks while waiting on the DNS workload or the probe
const POLL_INTERVAL: Duration = Duration::from_secs(3);

/// Probe pod name; namespaced to `default` to stay out of system workloads
const PROBE_POD: &str = "k0sbox-dns-probe";

/// Internal name the probe must resolve through the cluster's service mesh
const PROBE_TARGET: &str = "kubernetes.default.svc.cluster.local";

/// Verify in-cluster DNS end to end.
///
/// Fatal on any failure: a cluster whose DNS cannot resolve its own API
/// service is not usable, even if every basic readiness layer passed.
pub async fn verify_dns(client: &Client) -> Result<()> {
    info!(layer = %Layer::DnsFunctional, query = PROBE_TARGET, "Running DNS deep check");

    wait_for_dns_workload(client).await?;

    let pods: Api<Pod> = Api::namespaced(client.clone(), "default");

    // A leftover probe from an earlier attempt would make the create fail.
    let _ = pods.delete(PROBE_POD, &DeleteParams::default()).await;

    create_probe_pod(&pods).await?;
    let result = wait_for_probe(&pods).await;

    // The probe is removed on every exit path; losing the race to delete it
    // is only worth a warning, never a failure of its own.
    if let Err(e) = pods.delete(PROBE_POD, &DeleteParams::default()).await {
        match e {
            kube::Error::Api(ref ae) if ae.code == 404 => {}
            other => warn!(error = %other, "Failed to remove DNS probe pod"),
        }
    }

    result?;
    info!("DNS deep check passed");
    Ok(())
}

/// Wait for the DNS deployment to report Available.
async fn wait_for_dns_workload(client: &Client) -> Result<()> {
    let deployments: Api<Deployment> = Api::namespaced(client.clone(), SYSTEM_NAMESPACE);
    let start = Instant::now();

    loop {
        match deployments.get(DNS_DEPLOYMENT).await {
            Ok(deployment) => {
                let available = deployment
                    .status
                    .as_ref()
                    .and_then(|s| s.conditions.as_ref())
                    .map(|conditions| {
                        conditions
                            .iter()
                            .any(|c| c.type_ == "Available" && c.status == "True")
                    })
                    .unwrap_or(false);
                if available {
                    debug!(deployment = DNS_DEPLOYMENT, "DNS workload is available");
                    return Ok(());
                }
            }
            Err(kube::Error::Api(ref ae)) if ae.code == 404 => {
                debug!(deployment = DNS_DEPLOYMENT, "DNS workload not created yet");
            }
            Err(e) => {
                return Err(Error::dns_verification(format!(
                    "failed to query DNS workload: {}",
                    e
                )))
            }
        }

        if start.elapsed() >= DNS_WAIT_TIMEOUT {
            return Err(Error::dns_verification(format!(
                "DNS workload {}/{} not available within {:?}",
                SYSTEM_NAMESPACE, DNS_DEPLOYMENT, DNS_WAIT_TIMEOUT
            )));
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

/// Create the ephemeral resolution probe.
async fn create_probe_pod(pods: &Api<Pod>) -> Result<()> {
    let pod: Pod = serde_json::from_value(json!({
        "apiVersion": "v1",
        "kind": "Pod",
        "metadata": {
            "name": PROBE_POD,
            "labels": { "app.kubernetes.io/managed-by": "k0sbox" }
        },
        "spec": {
            "restartPolicy": "Never",
            "containers": [{
                "name": "probe",
                "image": "busybox:1.36",
                "command": ["nslookup", PROBE_TARGET]
            }]
        }
    }))
    .map_err(|e| Error::dns_verification(format!("invalid probe pod spec: {}", e)))?;

    pods.create(&PostParams::default(), &pod)
        .await
        .map_err(|e| Error::dns_verification(format!("failed to create probe pod: {}", e)))?;
    Ok(())
}

/// Wait for the probe to reach a terminal phase.
async fn wait_for_probe(pods: &Api<Pod>) -> Result<()> {
    let start = Instant::now();

    loop {
        let phase = pods
            .get(PROBE_POD)
            .await
            .ok()
            .and_then(|pod| pod.status.and_then(|s| s.phase));

        match phase.as_deref() {
            Some("Succeeded") => return Ok(()),
            Some("Failed") => {
                return Err(Error::dns_verification(format!(
                    "probe pod could not resolve {}",
                    PROBE_TARGET
                )))
            }
            other => debug!(phase = ?other, "DNS probe still running"),
        }

        if start.elapsed() >= PROBE_TIMEOUT {
            return Err(Error::dns_verification(format!(
                "probe pod did not finish within {:?}",
                PROBE_TIMEOUT
            )));
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}
