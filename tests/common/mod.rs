//! In-memory cluster used by the integration tests
//!
//! Enforces resourceVersion checks on update the way the API server does, and
//! can simulate other writers landing between a read and a write.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    Container, ContainerState, ContainerStateRunning, ContainerStateWaiting, ContainerStatus, Pod,
    PodSpec, PodStatus, PodTemplateSpec,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};

use upkube::error::KubeError;
use upkube::k8s::ClusterClient;

type Interference = Box<dyn Fn(&mut Deployment) + Send + Sync>;

#[derive(Default)]
struct Store {
    namespaces: Vec<String>,
    deployments: Vec<Deployment>,
    pods: Vec<Pod>,
    next_version: u64,
}

#[derive(Default)]
pub struct FakeCluster {
    store: Mutex<Store>,
    gets: AtomicUsize,
    updates: AtomicUsize,
    forced_conflicts: AtomicUsize,
    interleaved_writes: AtomicUsize,
    interference: Mutex<Option<Interference>>,
    deny_namespace_listing: AtomicBool,
    unreachable: AtomicBool,
}

impl FakeCluster {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add_namespace(&self, name: &str) {
        self.store.lock().unwrap().namespaces.push(name.to_string());
    }

    pub fn add_deployment(&self, mut deployment: Deployment) {
        let mut store = self.store.lock().unwrap();
        store.next_version += 1;
        deployment.metadata.resource_version = Some(store.next_version.to_string());
        store.deployments.push(deployment);
    }

    pub fn add_pod(&self, pod: Pod) {
        self.store.lock().unwrap().pods.push(pod);
    }

    /// Reject the next `n` updates with a conflict regardless of version.
    pub fn force_conflicts(&self, n: usize) {
        self.forced_conflicts.store(n, Ordering::SeqCst);
    }

    /// After each of the next `n` reads, apply `write` as if another client
    /// updated the deployment, invalidating the version just handed out.
    pub fn interleave_writes(&self, n: usize, write: impl Fn(&mut Deployment) + Send + Sync + 'static) {
        *self.interference.lock().unwrap() = Some(Box::new(write));
        self.interleaved_writes.store(n, Ordering::SeqCst);
    }

    pub fn deny_namespace_listing(&self) {
        self.deny_namespace_listing.store(true, Ordering::SeqCst);
    }

    pub fn go_offline(&self) {
        self.unreachable.store(true, Ordering::SeqCst);
    }

    pub fn gets(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }

    pub fn updates(&self) -> usize {
        self.updates.load(Ordering::SeqCst)
    }

    pub fn stored(&self, namespace: &str, name: &str) -> Option<Deployment> {
        let store = self.store.lock().unwrap();
        find(&store.deployments, namespace, name).cloned()
    }

    fn check_online(&self, operation: &str) -> Result<(), KubeError> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(KubeError::Transport {
                operation: operation.to_string(),
                message: "connection refused".to_string(),
            });
        }
        Ok(())
    }

    fn take_one(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

fn find<'a>(deployments: &'a [Deployment], namespace: &str, name: &str) -> Option<&'a Deployment> {
    deployments.iter().find(|d| {
        d.metadata.namespace.as_deref() == Some(namespace) && d.metadata.name.as_deref() == Some(name)
    })
}

fn not_found(namespace: &str, name: &str) -> KubeError {
    KubeError::NotFound {
        kind: "deployment",
        namespace: namespace.to_string(),
        name: name.to_string(),
    }
}

fn conflict(namespace: &str, name: &str) -> KubeError {
    KubeError::Conflict {
        namespace: namespace.to_string(),
        name: name.to_string(),
        message: "the object has been modified; please apply your changes to the latest version"
            .to_string(),
    }
}

#[async_trait]
impl ClusterClient for FakeCluster {
    async fn get_deployment(&self, namespace: &str, name: &str) -> Result<Deployment, KubeError> {
        self.check_online("get deployment")?;
        self.gets.fetch_add(1, Ordering::SeqCst);

        let read = {
            let mut store = self.store.lock().unwrap();
            let read = find(&store.deployments, namespace, name)
                .cloned()
                .ok_or_else(|| not_found(namespace, name))?;

            if Self::take_one(&self.interleaved_writes) {
                let interference = self.interference.lock().unwrap();
                store.next_version += 1;
                let version = store.next_version.to_string();
                if let Some(stored) = store.deployments.iter_mut().find(|d| {
                    d.metadata.namespace.as_deref() == Some(namespace)
                        && d.metadata.name.as_deref() == Some(name)
                }) {
                    if let Some(write) = interference.as_ref() {
                        write(stored);
                    }
                    stored.metadata.resource_version = Some(version);
                }
            }
            read
        };

        // Let other tasks run between a read and the write that follows it.
        tokio::task::yield_now().await;
        Ok(read)
    }

    async fn update_deployment(
        &self,
        namespace: &str,
        deployment: &Deployment,
    ) -> Result<Deployment, KubeError> {
        self.check_online("update deployment")?;
        self.updates.fetch_add(1, Ordering::SeqCst);

        let name = deployment.metadata.name.clone().unwrap_or_default();
        if Self::take_one(&self.forced_conflicts) {
            return Err(conflict(namespace, &name));
        }

        let mut store = self.store.lock().unwrap();
        store.next_version += 1;
        let version = store.next_version.to_string();
        let stored = store
            .deployments
            .iter_mut()
            .find(|d| {
                d.metadata.namespace.as_deref() == Some(namespace)
                    && d.metadata.name.as_deref() == Some(name.as_str())
            })
            .ok_or_else(|| not_found(namespace, &name))?;

        if stored.metadata.resource_version != deployment.metadata.resource_version {
            return Err(conflict(namespace, &name));
        }

        let mut written = deployment.clone();
        written.metadata.resource_version = Some(version);
        *stored = written.clone();
        Ok(written)
    }

    async fn list_namespaces(&self) -> Result<Vec<String>, KubeError> {
        self.check_online("list namespaces")?;
        if self.deny_namespace_listing.load(Ordering::SeqCst) {
            return Err(KubeError::PermissionDenied {
                operation: "list namespaces",
                namespace: String::new(),
                name: String::new(),
                message: "namespaces is forbidden: User \"system:serviceaccount:default:upkube\" cannot list resource \"namespaces\"".to_string(),
            });
        }
        Ok(self.store.lock().unwrap().namespaces.clone())
    }

    async fn list_deployments(&self, namespace: &str) -> Result<Vec<Deployment>, KubeError> {
        self.check_online(&format!("list deployments in namespace {}", namespace))?;
        let store = self.store.lock().unwrap();
        Ok(store
            .deployments
            .iter()
            .filter(|d| d.metadata.namespace.as_deref() == Some(namespace))
            .cloned()
            .collect())
    }

    async fn list_pods(
        &self,
        namespace: &str,
        selector: &BTreeMap<String, String>,
    ) -> Result<Vec<Pod>, KubeError> {
        self.check_online("list pods")?;
        let store = self.store.lock().unwrap();
        Ok(store
            .pods
            .iter()
            .filter(|p| p.metadata.namespace.as_deref() == Some(namespace))
            .filter(|p| {
                let labels = p.metadata.labels.clone().unwrap_or_default();
                selector.iter().all(|(k, v)| labels.get(k) == Some(v))
            })
            .cloned()
            .collect())
    }
}

/// A deployment selecting pods labelled `app=<name>`.
pub fn deployment(namespace: &str, name: &str, images: &[&str]) -> Deployment {
    let labels: BTreeMap<String, String> = [("app".to_string(), name.to_string())]
        .into_iter()
        .collect();

    Deployment {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        spec: Some(DeploymentSpec {
            replicas: Some(2),
            selector: LabelSelector {
                match_labels: Some(labels.clone()),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: images
                        .iter()
                        .enumerate()
                        .map(|(i, image)| Container {
                            name: format!("container-{}", i),
                            image: Some(image.to_string()),
                            ..Default::default()
                        })
                        .collect(),
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        status: None,
    }
}

pub fn running(container: &str) -> ContainerStatus {
    ContainerStatus {
        name: container.to_string(),
        ready: true,
        state: Some(ContainerState {
            running: Some(ContainerStateRunning::default()),
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub fn waiting(container: &str, reason: &str, message: &str) -> ContainerStatus {
    ContainerStatus {
        name: container.to_string(),
        state: Some(ContainerState {
            waiting: Some(ContainerStateWaiting {
                reason: Some(reason.to_string()),
                message: Some(message.to_string()),
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub fn pod(namespace: &str, name: &str, labels: &[(&str, &str)], statuses: Vec<ContainerStatus>) -> Pod {
    Pod {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            labels: Some(
                labels
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
            ),
            ..Default::default()
        },
        spec: None,
        status: Some(PodStatus {
            container_statuses: Some(statuses),
            ..Default::default()
        }),
    }
}

pub fn images(deployment: &Deployment) -> Vec<String> {
    deployment
        .spec
        .as_ref()
        .and_then(|s| s.template.spec.as_ref())
        .map(|p| {
            p.containers
                .iter()
                .map(|c| c.image.clone().unwrap_or_default())
                .collect()
        })
        .unwrap_or_default()
}

pub fn restarted_at(deployment: &Deployment) -> Option<String> {
    deployment
        .spec
        .as_ref()?
        .template
        .metadata
        .as_ref()?
        .annotations
        .as_ref()?
        .get(upkube::k8s::RESTARTED_AT_ANNOTATION)
        .cloned()
}
