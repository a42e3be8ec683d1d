//! Object store seam used by the reconciler.

use async_trait::async_trait;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::ConfigMap;
use ko_core::{KoBuilder, KoBuilderState};

use crate::error::Result;
use crate::types::ObjectKey;

/// Trait for object storage backends.
///
/// Reads return `Ok(None)` when the object does not exist. Writes that
/// carry a `resourceVersion` fail with `Error::Conflict` when it is stale.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Fetch a builder.
    async fn get_builder(&self, key: &ObjectKey) -> Result<Option<KoBuilder>>;

    /// Persist `state` on the builder's status subresource and return the
    /// updated builder.
    async fn update_builder_status(
        &self,
        builder: &KoBuilder,
        state: KoBuilderState,
    ) -> Result<KoBuilder>;

    /// Fetch a ConfigMap.
    async fn get_config_map(&self, key: &ObjectKey) -> Result<Option<ConfigMap>>;

    /// Create a ConfigMap.
    async fn create_config_map(&self, config: &ConfigMap) -> Result<ConfigMap>;

    /// Replace an existing ConfigMap.
    async fn replace_config_map(&self, config: &ConfigMap) -> Result<ConfigMap>;

    /// Fetch a Job.
    async fn get_job(&self, key: &ObjectKey) -> Result<Option<Job>>;

    /// Create a Job.
    async fn create_job(&self, job: &Job) -> Result<Job>;

    /// Delete a Job and its pods. Deleting a missing Job succeeds.
    async fn delete_job(&self, key: &ObjectKey) -> Result<()>;
}
