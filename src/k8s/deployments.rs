//! Deployment discovery and mutation
//!
//! Writes follow a read-modify-write cycle guarded by the object's
//! resourceVersion. Nothing here locks locally: concurrent callers rely on
//! the API server rejecting stale writes, and the loser of a race re-reads
//! and tries again.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Duration as ChronoDuration, SecondsFormat, Utc};
use k8s_openapi::api::apps::v1::Deployment;
use tracing::{debug, info, instrument, warn};

use super::client::ClusterClient;
use super::retry::{retry_on_conflict, RetryError, RetryPolicy};
use crate::error::KubeError;

/// Pod template annotation bumped to trigger a rollout, as `kubectl rollout
/// restart` does.
pub const RESTARTED_AT_ANNOTATION: &str = "kubectl.kubernetes.io/restartedAt";

/// Read-only access to deployments.
#[derive(Clone)]
pub struct DeploymentDirectory {
    client: Arc<dyn ClusterClient>,
}

impl DeploymentDirectory {
    pub fn new(client: Arc<dyn ClusterClient>) -> Self {
        Self { client }
    }

    /// Deployments in `namespace`, in the order the API server returns them.
    #[instrument(skip(self))]
    pub async fn list_deployments(&self, namespace: &str) -> Result<Vec<Deployment>, KubeError> {
        self.client.list_deployments(namespace).await.map_err(|e| {
            warn!(error = %e, "Failed to list deployments");
            e
        })
    }

    #[instrument(skip(self))]
    pub async fn get_deployment(&self, namespace: &str, name: &str) -> Result<Deployment, KubeError> {
        self.client.get_deployment(namespace, name).await
    }

    /// The `matchLabels` part of a deployment's pod selector.
    pub async fn pod_selector(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<BTreeMap<String, String>, KubeError> {
        let deployment = self.get_deployment(namespace, name).await?;
        Ok(deployment
            .spec
            .and_then(|spec| spec.selector.match_labels)
            .unwrap_or_default())
    }
}

/// Performs restarts and image updates under a [`RetryPolicy`].
#[derive(Clone)]
pub struct DeploymentMutator {
    client: Arc<dyn ClusterClient>,
    policy: RetryPolicy,
    timeout: Option<Duration>,
}

impl DeploymentMutator {
    pub fn new(client: Arc<dyn ClusterClient>, policy: RetryPolicy) -> Self {
        Self {
            client,
            policy,
            timeout: None,
        }
    }

    /// Bound each mutate call. A call that exceeds the deadline fails with
    /// [`KubeError::Timeout`]; a write already accepted by the server stays.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Set the restart annotation on the pod template, forcing new pods
    /// without touching any container spec.
    #[instrument(skip(self))]
    pub async fn restart(&self, namespace: &str, name: &str) -> Result<Deployment, KubeError> {
        self.mutate("restart", namespace, name, |deployment| {
            let template = &mut deployment
                .spec
                .get_or_insert_with(Default::default)
                .template;
            let annotations = template
                .metadata
                .get_or_insert_with(Default::default)
                .annotations
                .get_or_insert_with(BTreeMap::new);

            let stamp = next_restart_stamp(
                annotations.get(RESTARTED_AT_ANNOTATION).map(String::as_str),
                Utc::now(),
            );
            annotations.insert(RESTARTED_AT_ANNOTATION.to_string(), stamp);
            Ok(())
        })
        .await
    }

    /// Point the first container at `image`. Other containers keep theirs.
    #[instrument(skip(self))]
    pub async fn update_image(
        &self,
        namespace: &str,
        name: &str,
        image: &str,
    ) -> Result<Deployment, KubeError> {
        self.mutate("update image", namespace, name, |deployment| {
            let container = deployment
                .spec
                .as_mut()
                .and_then(|spec| spec.template.spec.as_mut())
                .and_then(|pod| pod.containers.first_mut())
                .ok_or_else(|| KubeError::Precondition {
                    namespace: namespace.to_string(),
                    name: name.to_string(),
                    message: "deployment has no containers to update".to_string(),
                })?;
            container.image = Some(image.to_string());
            Ok(())
        })
        .await
    }

    async fn mutate<F>(
        &self,
        operation: &'static str,
        namespace: &str,
        name: &str,
        transform: F,
    ) -> Result<Deployment, KubeError>
    where
        F: Fn(&mut Deployment) -> Result<(), KubeError> + Send + Sync,
    {
        let cycle = self.run_cycles(operation, namespace, name, &transform);
        match self.timeout {
            Some(limit) => tokio::time::timeout(limit, cycle).await.map_err(|_| {
                warn!(operation, ?limit, "Mutation deadline exceeded");
                KubeError::Timeout {
                    operation,
                    namespace: namespace.to_string(),
                    name: name.to_string(),
                    limit,
                }
            })?,
            None => cycle.await,
        }
    }

    async fn run_cycles<F>(
        &self,
        operation: &'static str,
        namespace: &str,
        name: &str,
        transform: &F,
    ) -> Result<Deployment, KubeError>
    where
        F: Fn(&mut Deployment) -> Result<(), KubeError> + Send + Sync,
    {
        let client = &self.client;
        let result = retry_on_conflict(&self.policy, move |attempt| async move {
            // Fresh read every attempt: the write below must carry this
            // cycle's resourceVersion and no other.
            let mut current = client.get_deployment(namespace, name).await?;
            transform(&mut current)?;
            debug!(attempt, operation, "Writing deployment");
            client.update_deployment(namespace, &current).await
        })
        .await;

        match result {
            Ok(updated) => {
                info!(operation, namespace, name, "Deployment updated");
                Ok(updated)
            }
            Err(RetryError::Fatal(e)) => {
                warn!(operation, error = %e, "Deployment update failed");
                Err(e)
            }
            Err(RetryError::Exhausted { attempts, last }) => {
                warn!(operation, attempts, error = %last, "Gave up after repeated conflicts");
                Err(KubeError::RetriesExhausted {
                    operation,
                    namespace: namespace.to_string(),
                    name: name.to_string(),
                    attempts,
                })
            }
        }
    }
}

/// Timestamp for the restart annotation, strictly later than `previous`
/// when that parses.
pub fn next_restart_stamp(previous: Option<&str>, now: DateTime<Utc>) -> String {
    let previous = previous
        .and_then(|p| DateTime::parse_from_rfc3339(p).ok())
        .map(|p| p.with_timezone(&Utc));
    let stamp = match previous {
        Some(p) if p >= now => p + ChronoDuration::nanoseconds(1),
        _ => now,
    };
    stamp.to_rfc3339_opts(SecondsFormat::Nanos, true)
}
