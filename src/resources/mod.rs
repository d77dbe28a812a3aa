//! Cluster resource queries
//!
//! `get`, `delete`, `describe` and `apply` map onto kubectl on Kubernetes,
//! `docker service|node|stack` on Swarm and plain docker otherwise. The
//! cluster type comes from `--cluster-type` or from the detector.

pub mod backend;
pub mod mapper;

pub use backend::{
    apply_invocation, delete_invocation, describe_invocation, get_invocation, prepare_stack,
    Invocation, QueryOptions,
};
pub use mapper::normalize_type;

use crate::cluster::{ClusterDetector, ClusterType};
use crate::exec::Executor;
use std::sync::Arc;

/// Use the explicit type when given, otherwise probe the local host
pub async fn resolve_cluster_type(
    explicit: Option<&str>,
    executor: Arc<dyn Executor>,
) -> crate::Result<ClusterType> {
    match explicit.filter(|s| !s.trim().is_empty()) {
        Some(value) => value.parse(),
        None => Ok(ClusterDetector::new(executor).detect().await),
    }
}
