//! Core types for the reconciler.

use std::fmt;
use std::time::Duration;

use ko_core::KoBuilderState;
use kube::{Resource, ResourceExt};

use crate::error::{Error, Result};

/// Identity of a namespaced object.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey {
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    /// Create a new key.
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Key of an existing namespaced object.
    ///
    /// # Errors
    ///
    /// Returns `Error::MissingNamespace` for an object without a namespace.
    pub fn of<K: Resource>(object: &K) -> Result<Self> {
        let name = object.name_any();
        object
            .namespace()
            .map(|namespace| Self::new(namespace, name.clone()))
            .ok_or_else(|| Error::missing_namespace(name))
    }

    /// Key of a sibling object in the same namespace.
    pub fn sibling(&self, name: impl Into<String>) -> Self {
        Self::new(self.namespace.clone(), name)
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Kinds of object the reconciler reads or writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArtifactKind {
    KoBuilder,
    ConfigMap,
    Job,
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::KoBuilder => "KoBuilder",
            Self::ConfigMap => "ConfigMap",
            Self::Job => "Job",
        })
    }
}

/// Actions the reconciler can take.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileAction {
    /// Create the builder's ConfigMap.
    CreateConfig { key: ObjectKey },
    /// Overwrite a drifted ConfigMap.
    UpdateConfig { key: ObjectKey },
    /// Create the builder's Job.
    CreateJob { key: ObjectKey },
    /// Persist a new state on the builder.
    SetState {
        key: ObjectKey,
        from: Option<KoBuilderState>,
        to: KoBuilderState,
    },
    /// Delete a terminated Job.
    DeleteJob { key: ObjectKey },
}

impl ReconcileAction {
    /// Get the key this action targets.
    pub fn key(&self) -> &ObjectKey {
        match self {
            Self::CreateConfig { key }
            | Self::UpdateConfig { key }
            | Self::CreateJob { key }
            | Self::SetState { key, .. }
            | Self::DeleteJob { key } => key,
        }
    }

    /// Get a description of the action.
    pub fn description(&self) -> String {
        match self {
            Self::CreateConfig { key } => format!("create configmap {key}"),
            Self::UpdateConfig { key } => format!("update configmap {key}"),
            Self::CreateJob { key } => format!("create job {key}"),
            Self::SetState { key, from, to } => {
                let from = from.map_or("<none>", KoBuilderState::as_str);
                format!("set state of {key}: {from} -> {to}")
            }
            Self::DeleteJob { key } => format!("delete job {key}"),
        }
    }
}

/// Result of one reconcile pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileResult {
    /// Actions that were taken, in order.
    pub actions_taken: Vec<ReconcileAction>,
    /// Requested delay before the next pass, if any.
    pub requeue_after: Option<Duration>,
}

impl ReconcileResult {
    /// Result of a pass that found nothing to do.
    pub fn unchanged() -> Self {
        Self::default()
    }

    /// Whether the pass wrote nothing.
    pub fn converged(&self) -> bool {
        self.actions_taken.is_empty()
    }

    /// The last state this pass persisted, if any.
    pub fn final_state(&self) -> Option<KoBuilderState> {
        self.actions_taken.iter().rev().find_map(|action| match action {
            ReconcileAction::SetState { to, .. } => Some(*to),
            _ => None,
        })
    }
}
