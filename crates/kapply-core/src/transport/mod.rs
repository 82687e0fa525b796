//! The cluster transport interface: the REST/dynamic client that performs
//! patch/create/delete calls. Referenced only through this trait -- the
//! implementation is an external collaborator.

use async_trait::async_trait;

use crate::event::ApplyOperation;
use crate::manifest::Object;
use crate::object::ObjectId;

/// Propagation policy for a delete call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropagationPolicy {
    Foreground,
    Background,
    Orphan,
}

/// Server-side-apply specific options.
#[derive(Debug, Clone, Default)]
pub struct ServerSideOptions {
    pub server_side_apply: bool,
    pub force_conflicts: bool,
    pub field_manager: Option<String>,
}

/// Client-vs-server-vs-none dry run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DryRunStrategy {
    #[default]
    None,
    Client,
    Server,
}

impl DryRunStrategy {
    pub fn is_dry_run(&self) -> bool {
        !matches!(self, DryRunStrategy::None)
    }
}

/// Outcome of a single create-or-patch call.
#[derive(Debug, Clone)]
pub struct ApplyResult {
    pub operation: ApplyOperation,
    pub uid: Option<String>,
    pub generation: Option<i64>,
}

/// Error a transport call can report for a single object. Transport errors
/// never abort a run; they are surfaced per-object.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct TransportError {
    pub message: String,
}

impl TransportError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Adapter interface for the cluster's REST/dynamic client.
///
/// Object-safe so it can be stored as `Arc<dyn ClusterTransport>` and shared
/// across concurrently-running apply/prune tasks.
#[async_trait]
pub trait ClusterTransport: Send + Sync {
    /// Create or patch `object`. `dry_run` and `sso` mirror the per-run
    /// options the apply task was configured with.
    async fn apply(
        &self,
        object: &Object,
        dry_run: DryRunStrategy,
        sso: &ServerSideOptions,
    ) -> Result<ApplyResult, TransportError>;

    /// Delete the object named by `id`. A 404 is success: implementations
    /// return `Ok(())` rather than an error in that case.
    async fn delete(
        &self,
        id: &ObjectId,
        policy: PropagationPolicy,
        dry_run: DryRunStrategy,
    ) -> Result<(), TransportError>;

    /// `true` if `id` names a type the transport's type registry does not
    /// currently recognise: a CR of a CRD that is itself only
    /// dry-run-applied in this run is the common case.
    async fn type_unknown(&self, id: &ObjectId) -> bool {
        let _ = id;
        false
    }
}
