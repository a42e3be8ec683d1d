//! The `KoBuilder` custom resource.
//!
//! A `KoBuilder` declares one build-and-publish run: which repository and
//! checkout to build, where the manifests live, and which registry and
//! cloud service account to publish with. The operator derives a ConfigMap
//! and a Job from it and reflects the Job's outcome in `status.state`.

use std::fmt;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Desired state of a `KoBuilder`.
#[derive(CustomResource, Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "ko.feloy.dev",
    version = "v1alpha1",
    kind = "KoBuilder",
    plural = "kobuilders",
    namespaced,
    status = "KoBuilderStatus",
    printcolumn = r#"{"name":"State","type":"string","jsonPath":".status.state"}"#,
    printcolumn = r#"{"name":"Checkout","type":"string","jsonPath":".spec.checkout"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct KoBuilderSpec {
    /// Registry the built images are pushed to.
    pub registry: String,
    /// Cloud service account used by the build.
    pub service_account: String,
    /// Source repository to clone.
    pub repository: String,
    /// Branch, tag or commit to check out.
    pub checkout: String,
    /// Path of the manifests/templates inside the repository.
    pub config_path: String,
}

/// Observed state of a `KoBuilder`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct KoBuilderStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<KoBuilderState>,
}

/// Deployment state of a `KoBuilder`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub enum KoBuilderState {
    /// The job exists but reports no activity yet.
    Unknown,
    /// The job's pod is running.
    Deploying,
    /// The job succeeded.
    Deployed,
    /// The job failed.
    ErrorDeploying,
    /// The configuration changed; a fresh run is warranted.
    Updated,
}

impl KoBuilderState {
    /// All states, in declaration order.
    pub const ALL: [Self; 5] = [
        Self::Unknown,
        Self::Deploying,
        Self::Deployed,
        Self::ErrorDeploying,
        Self::Updated,
    ];

    /// Wire name of the state.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Unknown => "Unknown",
            Self::Deploying => "Deploying",
            Self::Deployed => "Deployed",
            Self::ErrorDeploying => "ErrorDeploying",
            Self::Updated => "Updated",
        }
    }

    /// Whether the state ends a job's lifetime.
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Deployed | Self::ErrorDeploying)
    }
}

impl fmt::Display for KoBuilderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl KoBuilder {
    /// Current state, `None` when the builder has never been reconciled.
    pub fn state(&self) -> Option<KoBuilderState> {
        self.status.as_ref().and_then(|status| status.state)
    }

    /// Parse a `KoBuilder` from a YAML manifest.
    ///
    /// # Errors
    ///
    /// Returns `Error::ManifestParseFailed` if the document is not a valid
    /// `KoBuilder`.
    pub fn from_yaml(manifest: &str) -> Result<Self> {
        serde_yaml::from_str(manifest).map_err(|e| Error::manifest_parse_failed(e.to_string()))
    }
}
