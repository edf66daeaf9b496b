pub mod auth;
pub mod deployments;
pub mod health;
pub mod namespaces;
pub mod response;

use std::sync::Arc;

use crate::config::Config;
use crate::k8s::{
    ClusterClient, DeploymentDirectory, DeploymentMutator, NamespaceDirectory, PodDiagnostics,
};

/// Shared application state
///
/// Every component holds the same cluster client; nothing here is mutated
/// after startup.
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub namespaces: NamespaceDirectory,
    pub deployments: DeploymentDirectory,
    pub mutator: DeploymentMutator,
    pub diagnostics: PodDiagnostics,
}

impl AppState {
    pub fn new(client: Arc<dyn ClusterClient>, config: Config) -> Self {
        let mutator = DeploymentMutator::new(client.clone(), config.retry_policy())
            .with_timeout(config.mutation_timeout());

        Self {
            namespaces: NamespaceDirectory::new(client.clone()),
            deployments: DeploymentDirectory::new(client.clone()),
            diagnostics: PodDiagnostics::new(client),
            mutator,
            config,
        }
    }
}
