//! Cluster API access
//!
//! [`ClusterClient`] is the narrow set of reads and writes the rest of the
//! crate needs. [`K8sClient`] implements it over `kube::Client`.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Namespace, Pod};
use kube::{
    api::{Api, ListParams, PostParams},
    config::{KubeConfigOptions, Kubeconfig},
    Client, Config,
};
use tracing::{info, instrument};

use crate::config::{Config as AppConfig, Environment};
use crate::error::KubeError;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Reads and writes against the cluster API.
///
/// Implementations must be safe to share between concurrent callers; one
/// instance is built at startup and handed to every component.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// Fetch a deployment. The returned object carries the resourceVersion
    /// that a later update must present.
    async fn get_deployment(&self, namespace: &str, name: &str) -> Result<Deployment, KubeError>;

    /// Replace a deployment. Fails with [`KubeError::Conflict`] if the stored
    /// resourceVersion no longer matches the one on `deployment`.
    async fn update_deployment(
        &self,
        namespace: &str,
        deployment: &Deployment,
    ) -> Result<Deployment, KubeError>;

    /// Names of all namespaces visible to the credentials in use.
    async fn list_namespaces(&self) -> Result<Vec<String>, KubeError>;

    async fn list_deployments(&self, namespace: &str) -> Result<Vec<Deployment>, KubeError>;

    /// Pods in `namespace` carrying every label in `selector`.
    async fn list_pods(
        &self,
        namespace: &str,
        selector: &BTreeMap<String, String>,
    ) -> Result<Vec<Pod>, KubeError>;
}

/// Render a label map as a Kubernetes equality-based selector.
pub fn label_selector(selector: &BTreeMap<String, String>) -> String {
    selector
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(",")
}

/// [`ClusterClient`] backed by a real API server.
#[derive(Clone)]
pub struct K8sClient {
    client: Client,
}

impl K8sClient {
    /// Build a client for the configured environment: the pod's service
    /// account in `prod`, the local kubeconfig otherwise.
    #[instrument(skip_all, fields(environment = ?config.environment))]
    pub async fn new(config: &AppConfig) -> anyhow::Result<Self> {
        let mut kube_config = match (config.environment, config.kubeconfig.as_deref()) {
            (Environment::Prod, _) => Config::incluster()?,
            (Environment::Dev, Some(path)) => {
                let kubeconfig = Kubeconfig::read_from(path)?;
                Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default()).await?
            }
            (Environment::Dev, None) => Config::infer().await?,
        };
        kube_config.connect_timeout = Some(CONNECT_TIMEOUT);
        kube_config.read_timeout = Some(READ_TIMEOUT);

        let client = Client::try_from(kube_config)?;
        info!("Connected to Kubernetes cluster");

        Ok(Self { client })
    }

    /// Wrap an existing client.
    pub fn from_client(client: Client) -> Self {
        Self { client }
    }

    fn deployments(&self, namespace: &str) -> Api<Deployment> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn pods(&self, namespace: &str) -> Api<Pod> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait]
impl ClusterClient for K8sClient {
    #[instrument(skip(self))]
    async fn get_deployment(&self, namespace: &str, name: &str) -> Result<Deployment, KubeError> {
        self.deployments(namespace)
            .get(name)
            .await
            .map_err(|e| KubeError::from_kube(e, "deployment", "get deployment", namespace, name))
    }

    #[instrument(skip(self, deployment), fields(name = %deployment.metadata.name.as_deref().unwrap_or("unknown")))]
    async fn update_deployment(
        &self,
        namespace: &str,
        deployment: &Deployment,
    ) -> Result<Deployment, KubeError> {
        let name = deployment.metadata.name.as_deref().unwrap_or_default();
        self.deployments(namespace)
            .replace(name, &PostParams::default(), deployment)
            .await
            .map_err(|e| KubeError::from_kube(e, "deployment", "update deployment", namespace, name))
    }

    #[instrument(skip(self))]
    async fn list_namespaces(&self) -> Result<Vec<String>, KubeError> {
        let namespaces: Api<Namespace> = Api::all(self.client.clone());
        let list = namespaces
            .list(&ListParams::default())
            .await
            .map_err(|e| KubeError::from_kube(e, "namespace", "list namespaces", "", ""))?;

        Ok(list
            .items
            .into_iter()
            .filter_map(|ns| ns.metadata.name)
            .collect())
    }

    #[instrument(skip(self))]
    async fn list_deployments(&self, namespace: &str) -> Result<Vec<Deployment>, KubeError> {
        let list = self
            .deployments(namespace)
            .list(&ListParams::default())
            .await
            .map_err(|e| KubeError::from_kube(e, "deployment", "list deployments", namespace, ""))?;
        Ok(list.items)
    }

    #[instrument(skip(self))]
    async fn list_pods(
        &self,
        namespace: &str,
        selector: &BTreeMap<String, String>,
    ) -> Result<Vec<Pod>, KubeError> {
        let mut params = ListParams::default();
        if !selector.is_empty() {
            params = params.labels(&label_selector(selector));
        }
        let list = self
            .pods(namespace)
            .list(&params)
            .await
            .map_err(|e| KubeError::from_kube(e, "pod", "list pods", namespace, ""))?;
        Ok(list.items)
    }
}
