//! In-memory object store.
//!
//! Behaves like the API server for the calls the reconciler makes:
//! resource versions are checked on replace and status writes, uids are
//! assigned on create, and deleting a builder removes every object whose
//! owner references point at its uid. Every write is recorded so tests can
//! assert on exactly what a reconcile pass did.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::batch::v1::{Job, JobStatus};
use k8s_openapi::api::core::v1::ConfigMap;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use ko_core::{KoBuilder, KoBuilderState, KoBuilderStatus};
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::{Error, Result};
use crate::status::JobCounters;
use crate::store::ArtifactStore;
use crate::types::{ArtifactKind, ObjectKey};

/// Store operations, used to inject faults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOpKind {
    GetBuilder,
    UpdateStatus,
    GetConfigMap,
    CreateConfigMap,
    ReplaceConfigMap,
    GetJob,
    CreateJob,
    DeleteJob,
}

impl StoreOpKind {
    const fn verb(self) -> &'static str {
        match self {
            Self::GetBuilder | Self::GetConfigMap | Self::GetJob => "get",
            Self::UpdateStatus => "update status of",
            Self::CreateConfigMap | Self::CreateJob => "create",
            Self::ReplaceConfigMap => "replace",
            Self::DeleteJob => "delete",
        }
    }

    const fn kind(self) -> ArtifactKind {
        match self {
            Self::GetBuilder | Self::UpdateStatus => ArtifactKind::KoBuilder,
            Self::GetConfigMap | Self::CreateConfigMap | Self::ReplaceConfigMap => {
                ArtifactKind::ConfigMap
            }
            Self::GetJob | Self::CreateJob | Self::DeleteJob => ArtifactKind::Job,
        }
    }
}

/// A write issued through the `ArtifactStore` interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreWrite {
    UpdateStatus { key: ObjectKey, state: KoBuilderState },
    CreateConfigMap { key: ObjectKey },
    ReplaceConfigMap { key: ObjectKey },
    CreateJob { key: ObjectKey },
    DeleteJob { key: ObjectKey },
}

#[derive(Default)]
struct State {
    builders: HashMap<ObjectKey, KoBuilder>,
    config_maps: HashMap<ObjectKey, ConfigMap>,
    jobs: HashMap<ObjectKey, Job>,
    resource_version: u64,
    writes: Vec<StoreWrite>,
    faults: HashMap<StoreOpKind, String>,
}

impl State {
    fn next_version(&mut self) -> String {
        self.resource_version = self.resource_version.saturating_add(1);
        self.resource_version.to_string()
    }

    fn take_fault(&mut self, op: StoreOpKind, key: &ObjectKey) -> Result<()> {
        match self.faults.remove(&op) {
            Some(reason) => Err(Error::api(op.verb(), op.kind(), key, reason)),
            None => Ok(()),
        }
    }

    fn stamp_new(&mut self, meta: &mut ObjectMeta) {
        meta.uid = Some(uuid::Uuid::new_v4().to_string());
        meta.resource_version = Some(self.next_version());
    }
}

/// In-memory `ArtifactStore` for tests and offline runs.
#[derive(Default)]
pub struct InMemoryStore {
    state: RwLock<State>,
}

impl InMemoryStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new empty store wrapped in an Arc.
    pub fn new_arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Create or update a builder the way `kubectl apply` would: a new
    /// builder gets a uid, an existing one keeps its uid and status and
    /// takes the new spec.
    ///
    /// # Errors
    ///
    /// Returns `Error::MissingNamespace` if the builder has no namespace.
    pub async fn apply_builder(&self, mut builder: KoBuilder) -> Result<KoBuilder> {
        let key = ObjectKey::of(&builder)?;
        let mut state = self.state.write().await;
        let version = state.next_version();

        let stored = match state.builders.remove(&key) {
            Some(mut existing) => {
                existing.spec = builder.spec;
                existing.metadata.resource_version = Some(version);
                existing
            }
            None => {
                builder.metadata.uid = Some(uuid::Uuid::new_v4().to_string());
                builder.metadata.resource_version = Some(version);
                builder.status = None;
                builder
            }
        };
        state.builders.insert(key, stored.clone());
        Ok(stored)
    }

    /// Delete a builder and cascade to the objects it owns.
    ///
    /// Returns the dependents that were removed.
    pub async fn delete_builder(&self, key: &ObjectKey) -> Vec<(ArtifactKind, ObjectKey)> {
        let mut state = self.state.write().await;
        let Some(uid) = state
            .builders
            .remove(key)
            .and_then(|builder| builder.metadata.uid)
        else {
            return Vec::new();
        };

        let owned_by = |meta: &ObjectMeta| {
            meta.owner_references
                .iter()
                .flatten()
                .any(|owner| owner.uid == uid)
        };

        let config_keys: Vec<ObjectKey> = state
            .config_maps
            .iter()
            .filter(|(_, cm)| owned_by(&cm.metadata))
            .map(|(k, _)| k.clone())
            .collect();
        let job_keys: Vec<ObjectKey> = state
            .jobs
            .iter()
            .filter(|(_, job)| owned_by(&job.metadata))
            .map(|(k, _)| k.clone())
            .collect();

        for k in &config_keys {
            state.config_maps.remove(k);
        }
        for k in &job_keys {
            state.jobs.remove(k);
        }

        debug!(
            kobuilder = %key,
            config_maps = config_keys.len(),
            jobs = job_keys.len(),
            "Cascade deleted dependents"
        );

        config_keys
            .into_iter()
            .map(|k| (ArtifactKind::ConfigMap, k))
            .chain(job_keys.into_iter().map(|k| (ArtifactKind::Job, k)))
            .collect()
    }

    /// Report execution counters on a Job, as the Job controller would.
    ///
    /// # Errors
    ///
    /// Returns `Error::Api` if the Job does not exist.
    pub async fn set_job_counters(&self, key: &ObjectKey, counters: JobCounters) -> Result<()> {
        let mut state = self.state.write().await;
        let version = state.next_version();
        let job = state
            .jobs
            .get_mut(key)
            .ok_or_else(|| Error::api("update status of", ArtifactKind::Job, key, "not found"))?;
        job.status = Some(JobStatus {
            active: Some(counters.active),
            succeeded: Some(counters.succeeded),
            failed: Some(counters.failed),
            ..JobStatus::default()
        });
        job.metadata.resource_version = Some(version);
        Ok(())
    }

    /// Overwrite a ConfigMap's data out of band.
    ///
    /// # Errors
    ///
    /// Returns `Error::Api` if the ConfigMap does not exist.
    pub async fn edit_config_data<F>(&self, key: &ObjectKey, edit: F) -> Result<()>
    where
        F: FnOnce(&mut BTreeMap<String, String>),
    {
        let mut state = self.state.write().await;
        let version = state.next_version();
        let config = state
            .config_maps
            .get_mut(key)
            .ok_or_else(|| Error::api("edit", ArtifactKind::ConfigMap, key, "not found"))?;
        edit(config.data.get_or_insert_with(BTreeMap::new));
        config.metadata.resource_version = Some(version);
        Ok(())
    }

    /// Make the next `op` fail with `reason`.
    pub async fn fail_next(&self, op: StoreOpKind, reason: impl Into<String>) {
        self.state.write().await.faults.insert(op, reason.into());
    }

    /// Writes recorded so far.
    pub async fn writes(&self) -> Vec<StoreWrite> {
        self.state.read().await.writes.clone()
    }

    /// Forget recorded writes.
    pub async fn clear_writes(&self) {
        self.state.write().await.writes.clear();
    }
}

#[async_trait]
impl ArtifactStore for InMemoryStore {
    async fn get_builder(&self, key: &ObjectKey) -> Result<Option<KoBuilder>> {
        let mut state = self.state.write().await;
        state.take_fault(StoreOpKind::GetBuilder, key)?;
        Ok(state.builders.get(key).cloned())
    }

    async fn update_builder_status(
        &self,
        builder: &KoBuilder,
        new_state: KoBuilderState,
    ) -> Result<KoBuilder> {
        let key = ObjectKey::of(builder)?;
        let mut state = self.state.write().await;
        state.take_fault(StoreOpKind::UpdateStatus, &key)?;
        let version = state.next_version();

        let stored = state.builders.get_mut(&key).ok_or_else(|| {
            Error::api("update status of", ArtifactKind::KoBuilder, &key, "not found")
        })?;
        if stored.metadata.resource_version != builder.metadata.resource_version {
            return Err(Error::conflict(ArtifactKind::KoBuilder, &key));
        }
        stored.status = Some(KoBuilderStatus {
            state: Some(new_state),
        });
        stored.metadata.resource_version = Some(version);
        let updated = stored.clone();

        state.writes.push(StoreWrite::UpdateStatus {
            key,
            state: new_state,
        });
        Ok(updated)
    }

    async fn get_config_map(&self, key: &ObjectKey) -> Result<Option<ConfigMap>> {
        let mut state = self.state.write().await;
        state.take_fault(StoreOpKind::GetConfigMap, key)?;
        Ok(state.config_maps.get(key).cloned())
    }

    async fn create_config_map(&self, config: &ConfigMap) -> Result<ConfigMap> {
        let key = ObjectKey::of(config)?;
        let mut state = self.state.write().await;
        state.take_fault(StoreOpKind::CreateConfigMap, &key)?;
        if state.config_maps.contains_key(&key) {
            return Err(Error::already_exists(ArtifactKind::ConfigMap, &key));
        }

        let mut created = config.clone();
        state.stamp_new(&mut created.metadata);
        state.config_maps.insert(key.clone(), created.clone());
        state.writes.push(StoreWrite::CreateConfigMap { key });
        Ok(created)
    }

    async fn replace_config_map(&self, config: &ConfigMap) -> Result<ConfigMap> {
        let key = ObjectKey::of(config)?;
        let mut state = self.state.write().await;
        state.take_fault(StoreOpKind::ReplaceConfigMap, &key)?;
        let version = state.next_version();

        let stored = state
            .config_maps
            .get_mut(&key)
            .ok_or_else(|| Error::api("replace", ArtifactKind::ConfigMap, &key, "not found"))?;
        if config.metadata.resource_version.is_some()
            && config.metadata.resource_version != stored.metadata.resource_version
        {
            return Err(Error::conflict(ArtifactKind::ConfigMap, &key));
        }

        let mut replaced = config.clone();
        replaced.metadata.uid.clone_from(&stored.metadata.uid);
        replaced.metadata.resource_version = Some(version);
        *stored = replaced.clone();

        state.writes.push(StoreWrite::ReplaceConfigMap { key });
        Ok(replaced)
    }

    async fn get_job(&self, key: &ObjectKey) -> Result<Option<Job>> {
        let mut state = self.state.write().await;
        state.take_fault(StoreOpKind::GetJob, key)?;
        Ok(state.jobs.get(key).cloned())
    }

    async fn create_job(&self, job: &Job) -> Result<Job> {
        let key = ObjectKey::of(job)?;
        let mut state = self.state.write().await;
        state.take_fault(StoreOpKind::CreateJob, &key)?;
        if state.jobs.contains_key(&key) {
            return Err(Error::already_exists(ArtifactKind::Job, &key));
        }

        let mut created = job.clone();
        state.stamp_new(&mut created.metadata);
        state.jobs.insert(key.clone(), created.clone());
        state.writes.push(StoreWrite::CreateJob { key });
        Ok(created)
    }

    async fn delete_job(&self, key: &ObjectKey) -> Result<()> {
        let mut state = self.state.write().await;
        state.take_fault(StoreOpKind::DeleteJob, key)?;
        state.jobs.remove(key);
        state.writes.push(StoreWrite::DeleteJob { key: key.clone() });
        Ok(())
    }
}
