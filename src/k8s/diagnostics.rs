//! Pod start-up failure diagnosis

use std::fmt;
use std::sync::Arc;

use k8s_openapi::api::core::v1::Pod;
use serde::Serialize;
use tracing::{debug, instrument};

use super::client::ClusterClient;
use super::deployments::DeploymentDirectory;
use crate::error::KubeError;

/// Waiting reasons that mean a container cannot start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FailureReason {
    ImagePullBackOff,
    ErrImagePull,
    CrashLoopBackOff,
}

impl FailureReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureReason::ImagePullBackOff => "ImagePullBackOff",
            FailureReason::ErrImagePull => "ErrImagePull",
            FailureReason::CrashLoopBackOff => "CrashLoopBackOff",
        }
    }

    /// `None` for any reason outside the recognised set.
    pub fn parse(reason: &str) -> Option<Self> {
        match reason {
            "ImagePullBackOff" => Some(FailureReason::ImagePullBackOff),
            "ErrImagePull" => Some(FailureReason::ErrImagePull),
            "CrashLoopBackOff" => Some(FailureReason::CrashLoopBackOff),
            _ => None,
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// First failing container found for a deployment.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PodFailure {
    pub reason: FailureReason,
    pub message: String,
    pub pod: String,
    pub container: String,
}

/// Finds containers of a deployment's pods that are stuck waiting.
#[derive(Clone)]
pub struct PodDiagnostics {
    client: Arc<dyn ClusterClient>,
    deployments: DeploymentDirectory,
}

impl PodDiagnostics {
    pub fn new(client: Arc<dyn ClusterClient>) -> Self {
        Self {
            deployments: DeploymentDirectory::new(client.clone()),
            client,
        }
    }

    /// Report the first recognised failure among the deployment's pods, or
    /// `None` when nothing is failing.
    ///
    /// Pods are scanned in listing order and containers in status order. The
    /// API server does not promise a stable order, so with several pods
    /// failing at once repeated calls may report different ones.
    #[instrument(skip(self))]
    pub async fn diagnose(
        &self,
        namespace: &str,
        deployment: &str,
    ) -> Result<Option<PodFailure>, KubeError> {
        // An empty selector matches every pod in the namespace.
        let selector = self.deployments.pod_selector(namespace, deployment).await?;
        let pods = self.client.list_pods(namespace, &selector).await?;
        debug!(pods = pods.len(), "Scanning pods for failing containers");

        Ok(first_failure(&pods))
    }
}

/// First container in `pods` waiting with a recognised failure reason.
pub fn first_failure(pods: &[Pod]) -> Option<PodFailure> {
    pods.iter().find_map(|pod| {
        let statuses = pod.status.as_ref()?.container_statuses.as_ref()?;
        statuses.iter().find_map(|cs| {
            let waiting = cs.state.as_ref()?.waiting.as_ref()?;
            let reason = FailureReason::parse(waiting.reason.as_deref()?)?;
            Some(PodFailure {
                reason,
                message: waiting.message.clone().unwrap_or_default(),
                pod: pod.metadata.name.clone().unwrap_or_default(),
                container: cs.name.clone(),
            })
        })
    })
}
