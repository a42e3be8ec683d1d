//! Reconciler implementation.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use itertools::Itertools;
use k8s_openapi::api::core::v1::ConfigMap;
use ko_core::{JobConfig, KoBuilder, KoBuilderState, OperatorConfig};
use kube::ResourceExt;
use tracing::{debug, info};

use crate::desired;
use crate::error::{Error, Result};
use crate::status::{self, JobCounters};
use crate::store::ArtifactStore;
use crate::types::{ObjectKey, ReconcileAction, ReconcileResult};

/// Configuration for the reconciler.
#[derive(Debug, Clone, Default)]
pub struct ReconcilerConfig {
    /// Fixed parts of the Job pod template.
    pub job: JobConfig,
    /// Requeue interval while a job is still running.
    pub active_requeue: Option<Duration>,
}

impl From<&OperatorConfig> for ReconcilerConfig {
    fn from(config: &OperatorConfig) -> Self {
        Self {
            job: config.job.clone(),
            active_requeue: config.controller.active_requeue(),
        }
    }
}

/// K8s-style reconciler for `KoBuilder` resources.
///
/// Holds no state between passes: every pass re-reads the builder and its
/// children, so a redelivered key is always safe to reconcile again.
pub struct Reconciler {
    /// Object store.
    store: Arc<dyn ArtifactStore>,
    /// Configuration.
    config: ReconcilerConfig,
}

impl Reconciler {
    /// Create a new reconciler.
    pub fn new(store: Arc<dyn ArtifactStore>, config: ReconcilerConfig) -> Self {
        Self { store, config }
    }

    /// Run one reconcile pass for the builder at `key`.
    ///
    /// A missing builder is not an error: its children are removed by
    /// owner-reference garbage collection.
    ///
    /// # Errors
    ///
    /// Returns the first store error; nothing is retried here.
    pub async fn reconcile(&self, key: &ObjectKey) -> Result<ReconcileResult> {
        let Some(builder) = self.store.get_builder(key).await? else {
            debug!(kobuilder = %key, "KoBuilder not found, nothing to do");
            return Ok(ReconcileResult::unchanged());
        };

        info!(
            kobuilder = %key,
            state = ?builder.state(),
            checkout = %builder.spec.checkout,
            "Starting reconciliation"
        );

        let mut actions = Vec::new();
        let (builder, config_name) = self.apply_config(key, builder, &mut actions).await?;
        let requeue_after = self.apply_job(key, builder, &config_name, &mut actions).await?;

        if actions.is_empty() {
            debug!(kobuilder = %key, "KoBuilder converged");
        } else {
            info!(
                kobuilder = %key,
                actions_taken = actions.len(),
                "Reconciliation complete"
            );
        }

        Ok(ReconcileResult {
            actions_taken: actions,
            requeue_after,
        })
    }

    /// Converge the ConfigMap and return the builder (possibly with a fresh
    /// status) and the ConfigMap's name.
    async fn apply_config(
        &self,
        key: &ObjectKey,
        builder: KoBuilder,
        actions: &mut Vec<ReconcileAction>,
    ) -> Result<(KoBuilder, String)> {
        let mut expected = desired::build_config(&builder);
        let config_key = key.sibling(expected.name_any());

        match self.store.get_config_map(&config_key).await? {
            None => {
                desired::set_owner(&mut expected.metadata, &builder);
                let created = self.store.create_config_map(&expected).await?;
                info!(kobuilder = %key, configmap = %config_key, "Created ConfigMap");
                actions.push(ReconcileAction::CreateConfig { key: config_key });
                Ok((builder, created.name_any()))
            }
            Some(found) if found.data == expected.data => Ok((builder, found.name_any())),
            Some(found) => {
                debug!(
                    kobuilder = %key,
                    configmap = %config_key,
                    drifted = ?drifted_keys(&found, &expected),
                    "ConfigMap differs from expected"
                );
                // Record Updated first: once the ConfigMap matches, the drift
                // is no longer visible to a later pass.
                let builder = self
                    .set_state(key, builder, KoBuilderState::Updated, actions)
                    .await?;

                desired::set_owner(&mut expected.metadata, &builder);
                expected.metadata.resource_version.clone_from(&found.metadata.resource_version);
                self.store.replace_config_map(&expected).await?;
                info!(kobuilder = %key, configmap = %config_key, "Updated ConfigMap");
                actions.push(ReconcileAction::UpdateConfig { key: config_key });
                Ok((builder, found.name_any()))
            }
        }
    }

    /// Converge the Job and return the requested requeue delay.
    async fn apply_job(
        &self,
        key: &ObjectKey,
        builder: KoBuilder,
        config_name: &str,
        actions: &mut Vec<ReconcileAction>,
    ) -> Result<Option<Duration>> {
        let mut expected = desired::build_job(&builder, config_name, &self.config.job);
        let job_key = key.sibling(expected.name_any());

        match self.store.get_job(&job_key).await? {
            Some(found) => {
                let counters = JobCounters::of(&found);
                let transition = status::transition(counters);
                if transition.state == KoBuilderState::Unknown {
                    info!(kobuilder = %key, job = %job_key, ?counters, "Job reports no activity yet");
                }
                self.set_state(key, builder, transition.state, actions).await?;

                if transition.delete_job {
                    self.store.delete_job(&job_key).await?;
                    info!(kobuilder = %key, job = %job_key, state = %transition.state, "Deleted finished Job");
                    actions.push(ReconcileAction::DeleteJob { key: job_key });
                    Ok(None)
                } else {
                    Ok(self.config.active_requeue)
                }
            }
            None if status::should_create_job(builder.state()) => {
                desired::set_owner(&mut expected.metadata, &builder);
                self.store.create_job(&expected).await?;
                info!(kobuilder = %key, job = %job_key, "Created Job");
                actions.push(ReconcileAction::CreateJob { key: job_key });
                Ok(None)
            }
            None => {
                debug!(
                    kobuilder = %key,
                    state = ?builder.state(),
                    "Job not found and builder already ran, not recreating"
                );
                Ok(None)
            }
        }
    }

    /// Persist `state` if it differs from the builder's current one.
    async fn set_state(
        &self,
        key: &ObjectKey,
        builder: KoBuilder,
        state: KoBuilderState,
        actions: &mut Vec<ReconcileAction>,
    ) -> Result<KoBuilder> {
        let from = builder.state();
        if from == Some(state) {
            return Ok(builder);
        }

        let updated = self.store.update_builder_status(&builder, state).await?;
        info!(kobuilder = %key, state = %state, "Set state");
        actions.push(ReconcileAction::SetState {
            key: key.clone(),
            from,
            to: state,
        });
        Ok(updated)
    }
}

/// Keys whose presence or value differs between two ConfigMaps.
fn drifted_keys(found: &ConfigMap, expected: &ConfigMap) -> Vec<String> {
    let empty = BTreeMap::new();
    let found = found.data.as_ref().unwrap_or(&empty);
    let expected = expected.data.as_ref().unwrap_or(&empty);
    found
        .keys()
        .chain(expected.keys())
        .filter(|k| found.get(*k) != expected.get(*k))
        .sorted()
        .dedup()
        .cloned()
        .collect()
}

/// Builder for Reconciler.
#[derive(Default)]
pub struct ReconcilerBuilder {
    store: Option<Arc<dyn ArtifactStore>>,
    config: ReconcilerConfig,
}

impl ReconcilerBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the object store.
    pub fn with_store(mut self, store: Arc<dyn ArtifactStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Set the configuration.
    pub fn with_config(mut self, config: ReconcilerConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the job template.
    pub fn job(mut self, job: JobConfig) -> Self {
        self.config.job = job;
        self
    }

    /// Requeue running jobs after `interval`.
    pub fn active_requeue(mut self, interval: Duration) -> Self {
        self.config.active_requeue = Some(interval);
        self
    }

    /// Build the reconciler.
    ///
    /// # Errors
    ///
    /// Returns `Error::Core` with an invalid-config reason if no store was set.
    pub fn build(self) -> Result<Reconciler> {
        let store = self
            .store
            .ok_or_else(|| Error::from(ko_core::Error::invalid_config("object store is required")))?;
        Ok(Reconciler::new(store, self.config))
    }
}
