//! Namespace discovery

use std::sync::Arc;

use tracing::{instrument, warn};

use super::client::ClusterClient;
use crate::error::KubeError;

/// Namespace assumed reachable when listing is not allowed.
pub const FALLBACK_NAMESPACE: &str = "default";

/// Lists namespaces, falling back to [`FALLBACK_NAMESPACE`] when the
/// credentials may not list them.
///
/// A restricted service account can usually still work in its own namespace,
/// so a forbidden listing yields `["default"]` instead of an error. The result
/// is therefore not exhaustive in restricted environments.
#[derive(Clone)]
pub struct NamespaceDirectory {
    client: Arc<dyn ClusterClient>,
}

impl NamespaceDirectory {
    pub fn new(client: Arc<dyn ClusterClient>) -> Self {
        Self { client }
    }

    #[instrument(skip(self))]
    pub async fn list_namespaces(&self) -> Result<Vec<String>, KubeError> {
        match self.client.list_namespaces().await {
            Ok(names) => Ok(names),
            Err(e) if e.is_permission_denied() => {
                warn!(error = %e, "Namespace listing forbidden, falling back to '{}'", FALLBACK_NAMESPACE);
                Ok(vec![FALLBACK_NAMESPACE.to_string()])
            }
            Err(e) => Err(e),
        }
    }
}
