//! Kubernetes integration module for Upkube
//!
//! This module holds everything that talks to the cluster:
//! - Listing namespaces, with a fallback for restricted service accounts
//! - Listing deployments
//! - Restarting deployments and swapping their image under optimistic concurrency
//! - Diagnosing pods that fail to start

mod client;
mod deployments;
mod diagnostics;
mod namespaces;
mod retry;

pub use client::{label_selector, ClusterClient, K8sClient};
pub use deployments::{
    next_restart_stamp, DeploymentDirectory, DeploymentMutator, RESTARTED_AT_ANNOTATION,
};
pub use diagnostics::{first_failure, FailureReason, PodDiagnostics, PodFailure};
pub use namespaces::{NamespaceDirectory, FALLBACK_NAMESPACE};
pub use retry::{retry_on_conflict, Backoff, RetryError, RetryPolicy};
