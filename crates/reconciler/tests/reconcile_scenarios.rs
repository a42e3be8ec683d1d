//! End-to-end reconcile scenarios against the in-memory store.
//!
//! These tests verify that:
//! - A new builder gets a ConfigMap and a Job, in that order
//! - Job counters drive the builder state and finished Jobs are removed
//! - Repeated passes over unchanged state write nothing
//! - ConfigMap drift is repaired and re-runs the build
//! - Store failures abort the pass and a later pass heals it

#![forbid(clippy::unwrap_used)]
#![forbid(clippy::expect_used)]
#![forbid(clippy::panic)]

use std::sync::Arc;
use std::time::Duration;

use ko_core::{KoBuilder, KoBuilderSpec, KoBuilderState};
use ko_reconciler::{
    ArtifactKind, ArtifactStore, Error, InMemoryStore, JobCounters, ObjectKey, ReconcileAction,
    Reconciler, ReconcilerConfig, StoreOpKind, StoreWrite,
};

type TestResult = Result<(), Box<dyn std::error::Error>>;

const NAMESPACE: &str = "builds";
const NAME: &str = "my-build";

fn spec() -> KoBuilderSpec {
    KoBuilderSpec {
        registry: "user/img".to_string(),
        service_account: "sa@proj".to_string(),
        repository: "org/repo".to_string(),
        checkout: "1.2.3".to_string(),
        config_path: "/templates".to_string(),
    }
}

fn manifest(spec: KoBuilderSpec) -> KoBuilder {
    let mut builder = KoBuilder::new(NAME, spec);
    builder.metadata.namespace = Some(NAMESPACE.to_string());
    builder
}

fn builder_key() -> ObjectKey {
    ObjectKey::new(NAMESPACE, NAME)
}

fn config_key() -> ObjectKey {
    ObjectKey::new(NAMESPACE, "my-build-config")
}

fn job_key() -> ObjectKey {
    ObjectKey::new(NAMESPACE, "my-build-job")
}

struct Harness {
    store: Arc<InMemoryStore>,
    reconciler: Reconciler,
}

impl Harness {
    async fn new() -> Result<Self, Error> {
        let store = InMemoryStore::new_arc();
        store.apply_builder(manifest(spec())).await?;
        let reconciler = Reconciler::new(store.clone(), ReconcilerConfig::default());
        Ok(Self { store, reconciler })
    }

    async fn state(&self) -> Result<Option<KoBuilderState>, Error> {
        Ok(self
            .store
            .get_builder(&builder_key())
            .await?
            .and_then(|builder| builder.state()))
    }

    /// Run the first pass and the pass triggered by the Job's creation.
    async fn start(&self) -> Result<(), Error> {
        self.reconciler.reconcile(&builder_key()).await?;
        self.reconciler.reconcile(&builder_key()).await?;
        self.store.clear_writes().await;
        Ok(())
    }

    /// Drive the Job to a terminal outcome and reconcile it.
    async fn finish(&self, counters: JobCounters) -> Result<(), Error> {
        self.start().await?;
        self.store.set_job_counters(&job_key(), counters).await?;
        self.reconciler.reconcile(&builder_key()).await?;
        self.store.clear_writes().await;
        Ok(())
    }
}

/// Scenario A: a new builder gets its ConfigMap and Job.
///
/// # GIVEN
/// A fresh KoBuilder `my-build` with no status
///
/// # WHEN
/// It is reconciled, then reconciled again for the Job's creation event
///
/// # THEN
/// `my-build-config` carries the spec and owner fields, `my-build-job`
/// reads it, and the state becomes `Unknown`
#[tokio::test]
async fn test_new_builder_gets_config_and_job() -> TestResult {
    let h = Harness::new().await?;

    let first = h.reconciler.reconcile(&builder_key()).await?;
    assert_eq!(
        first.actions_taken,
        vec![
            ReconcileAction::CreateConfig { key: config_key() },
            ReconcileAction::CreateJob { key: job_key() },
        ]
    );

    let config = h
        .store
        .get_config_map(&config_key())
        .await?
        .ok_or("ConfigMap was not created")?;
    let data = config.data.ok_or("ConfigMap has no data")?;
    assert_eq!(data.get("REGISTRY").map(String::as_str), Some("user/img"));
    assert_eq!(data.get("CHECKOUT").map(String::as_str), Some("1.2.3"));
    assert_eq!(data.get("OWNER_NAME").map(String::as_str), Some(NAME));
    assert_eq!(data.len(), 10);

    let job = h.store.get_job(&job_key()).await?.ok_or("Job was not created")?;
    let env_from = job
        .spec
        .and_then(|spec| spec.template.spec)
        .and_then(|pod| pod.containers.into_iter().next())
        .and_then(|container| container.env_from)
        .ok_or("Job container has no envFrom")?;
    let sources = serde_json::to_value(&env_from)?;
    let referenced: Vec<&str> = sources
        .as_array()
        .into_iter()
        .flatten()
        .filter_map(|source| source.pointer("/configMapRef/name"))
        .filter_map(serde_json::Value::as_str)
        .collect();
    assert_eq!(referenced, vec!["my-build-config"]);

    let second = h.reconciler.reconcile(&builder_key()).await?;
    assert_eq!(second.final_state(), Some(KoBuilderState::Unknown));
    assert_eq!(h.state().await?, Some(KoBuilderState::Unknown));
    Ok(())
}

/// Scenario B: an active Job moves the builder to `Deploying`.
///
/// # GIVEN
/// A started builder whose Job reports `active=1`
///
/// # WHEN
/// It is reconciled
///
/// # THEN
/// The state is `Deploying` and the Job is kept
#[tokio::test]
async fn test_active_job_sets_deploying() -> TestResult {
    let h = Harness::new().await?;
    h.start().await?;

    h.store
        .set_job_counters(&job_key(), JobCounters::new(1, 0, 0))
        .await?;
    h.reconciler.reconcile(&builder_key()).await?;

    assert_eq!(h.state().await?, Some(KoBuilderState::Deploying));
    assert!(h.store.get_job(&job_key()).await?.is_some());
    Ok(())
}

/// Scenario C: a succeeded Job moves the builder to `Deployed`.
///
/// # GIVEN
/// A started builder whose Job reports `succeeded=1`
///
/// # WHEN
/// It is reconciled
///
/// # THEN
/// The state is `Deployed` and the Job is deleted
#[tokio::test]
async fn test_succeeded_job_sets_deployed_and_is_deleted() -> TestResult {
    let h = Harness::new().await?;
    h.start().await?;

    h.store
        .set_job_counters(&job_key(), JobCounters::new(0, 1, 0))
        .await?;
    let result = h.reconciler.reconcile(&builder_key()).await?;

    assert_eq!(h.state().await?, Some(KoBuilderState::Deployed));
    assert!(h.store.get_job(&job_key()).await?.is_none());
    assert_eq!(
        h.store.writes().await,
        vec![
            StoreWrite::UpdateStatus {
                key: builder_key(),
                state: KoBuilderState::Deployed
            },
            StoreWrite::DeleteJob { key: job_key() },
        ]
    );
    assert_eq!(result.requeue_after, None);
    Ok(())
}

/// Scenario D: a failed Job moves the builder to `ErrorDeploying`.
///
/// # GIVEN
/// A started builder whose Job reports `failed=1`
///
/// # WHEN
/// It is reconciled
///
/// # THEN
/// The state is `ErrorDeploying` and the Job is deleted
#[tokio::test]
async fn test_failed_job_sets_error_deploying_and_is_deleted() -> TestResult {
    let h = Harness::new().await?;
    h.start().await?;

    h.store
        .set_job_counters(&job_key(), JobCounters::new(0, 0, 1))
        .await?;
    h.reconciler.reconcile(&builder_key()).await?;

    assert_eq!(h.state().await?, Some(KoBuilderState::ErrorDeploying));
    assert!(h.store.get_job(&job_key()).await?.is_none());
    Ok(())
}

/// Scenario E: deleting the builder removes what it owns.
///
/// # GIVEN
/// A started builder with its ConfigMap and Job
///
/// # WHEN
/// The builder is deleted and its key is reconciled
///
/// # THEN
/// Both children are gone and the pass writes nothing
#[tokio::test]
async fn test_deleted_builder_cascades() -> TestResult {
    let h = Harness::new().await?;
    h.start().await?;

    let removed = h.store.delete_builder(&builder_key()).await;
    assert_eq!(
        removed,
        vec![
            (ArtifactKind::ConfigMap, config_key()),
            (ArtifactKind::Job, job_key()),
        ]
    );

    let result = h.reconciler.reconcile(&builder_key()).await?;
    assert!(result.converged());
    assert!(h.store.get_config_map(&config_key()).await?.is_none());
    assert!(h.store.get_job(&job_key()).await?.is_none());
    assert!(h.store.writes().await.is_empty());
    Ok(())
}

/// Redelivered passes over unchanged state are free.
///
/// # GIVEN
/// A builder whose Job is running and already mirrored as `Deploying`
///
/// # WHEN
/// It is reconciled twice more
///
/// # THEN
/// No writes are issued
#[tokio::test]
async fn test_repeated_pass_writes_nothing() -> TestResult {
    let h = Harness::new().await?;
    h.start().await?;
    h.store
        .set_job_counters(&job_key(), JobCounters::new(1, 0, 0))
        .await?;
    h.reconciler.reconcile(&builder_key()).await?;
    h.store.clear_writes().await;

    for _ in 0..2 {
        let result = h.reconciler.reconcile(&builder_key()).await?;
        assert!(result.converged());
    }
    assert!(h.store.writes().await.is_empty());
    Ok(())
}

/// Any single-key drift in the ConfigMap is repaired.
///
/// # GIVEN
/// A builder whose ConfigMap was edited out of band (key added, removed,
/// or changed)
///
/// # WHEN
/// It is reconciled
///
/// # THEN
/// The ConfigMap is overwritten with the expected data and the state is
/// `Updated`
#[tokio::test]
async fn test_config_drift_is_repaired() -> TestResult {
    type Edit = fn(&mut std::collections::BTreeMap<String, String>);
    let edits: [(&str, Edit); 3] = [
        ("added", |data| {
            data.insert("EXTRA".to_string(), "1".to_string());
        }),
        ("removed", |data| {
            data.remove("REPOSITORY");
        }),
        ("changed", |data| {
            data.insert("CHECKOUT".to_string(), "9.9.9".to_string());
        }),
    ];

    for (label, edit) in edits {
        let h = Harness::new().await?;
        h.start().await?;
        h.store
            .set_job_counters(&job_key(), JobCounters::new(1, 0, 0))
            .await?;
        h.reconciler.reconcile(&builder_key()).await?;
        let expected = h.store.get_config_map(&config_key()).await?.and_then(|cm| cm.data);

        h.store.edit_config_data(&config_key(), edit).await?;
        h.store.clear_writes().await;
        let result = h.reconciler.reconcile(&builder_key()).await?;

        assert!(
            result
                .actions_taken
                .contains(&ReconcileAction::UpdateConfig { key: config_key() }),
            "drift ({label}) was not repaired"
        );
        let repaired = h.store.get_config_map(&config_key()).await?.and_then(|cm| cm.data);
        assert_eq!(repaired, expected, "drift ({label}) left data behind");
        assert!(
            h.store.writes().await.contains(&StoreWrite::UpdateStatus {
                key: builder_key(),
                state: KoBuilderState::Updated
            }),
            "drift ({label}) did not mark the builder Updated"
        );
    }
    Ok(())
}

/// A finished builder is not rebuilt on its own.
///
/// # GIVEN
/// A builder whose Job succeeded and was deleted
///
/// # WHEN
/// It is reconciled again with an unchanged spec
///
/// # THEN
/// No Job is created and the state stays `Deployed`
#[tokio::test]
async fn test_no_job_after_terminal_state() -> TestResult {
    let h = Harness::new().await?;
    h.finish(JobCounters::new(0, 1, 0)).await?;

    let result = h.reconciler.reconcile(&builder_key()).await?;

    assert!(result.converged());
    assert!(h.store.get_job(&job_key()).await?.is_none());
    assert_eq!(h.state().await?, Some(KoBuilderState::Deployed));
    Ok(())
}

/// A spec change after a finished run triggers a new run.
///
/// # GIVEN
/// A builder whose Job failed and was deleted
///
/// # WHEN
/// Its checkout is changed and it is reconciled
///
/// # THEN
/// The ConfigMap is updated, the state is `Updated`, and a new Job exists
#[tokio::test]
async fn test_spec_change_reruns_build() -> TestResult {
    let h = Harness::new().await?;
    h.finish(JobCounters::new(0, 0, 1)).await?;

    let mut changed = spec();
    changed.checkout = "1.2.4".to_string();
    h.store.apply_builder(manifest(changed)).await?;
    let result = h.reconciler.reconcile(&builder_key()).await?;

    assert_eq!(
        result.actions_taken,
        vec![
            ReconcileAction::SetState {
                key: builder_key(),
                from: Some(KoBuilderState::ErrorDeploying),
                to: KoBuilderState::Updated,
            },
            ReconcileAction::UpdateConfig { key: config_key() },
            ReconcileAction::CreateJob { key: job_key() },
        ]
    );
    let data = h
        .store
        .get_config_map(&config_key())
        .await?
        .and_then(|cm| cm.data)
        .ok_or("ConfigMap has no data")?;
    assert_eq!(data.get("CHECKOUT").map(String::as_str), Some("1.2.4"));
    assert_eq!(h.state().await?, Some(KoBuilderState::Updated));
    Ok(())
}

/// A config update while a Job is still running keeps that Job.
///
/// # GIVEN
/// A builder whose Job is running
///
/// # WHEN
/// Its spec is changed and it is reconciled
///
/// # THEN
/// The ConfigMap is updated and the state returns to the running Job's
/// `Deploying` without a second Job
#[tokio::test]
async fn test_spec_change_during_run_keeps_job() -> TestResult {
    let h = Harness::new().await?;
    h.start().await?;
    h.store
        .set_job_counters(&job_key(), JobCounters::new(1, 0, 0))
        .await?;
    h.reconciler.reconcile(&builder_key()).await?;

    let mut changed = spec();
    changed.registry = "user/other".to_string();
    h.store.apply_builder(manifest(changed)).await?;
    h.store.clear_writes().await;
    h.reconciler.reconcile(&builder_key()).await?;

    assert_eq!(
        h.store.writes().await,
        vec![
            StoreWrite::UpdateStatus {
                key: builder_key(),
                state: KoBuilderState::Updated
            },
            StoreWrite::ReplaceConfigMap { key: config_key() },
            StoreWrite::UpdateStatus {
                key: builder_key(),
                state: KoBuilderState::Deploying
            },
        ]
    );
    Ok(())
}

/// A rerun survives a failed `Updated` write.
///
/// # GIVEN
/// A builder whose Job succeeded and was deleted, a changed checkout, and
/// a status write that fails once
///
/// # WHEN
/// It is reconciled twice
///
/// # THEN
/// The first pass fails without touching the ConfigMap, the second one
/// updates it and starts a new Job
#[tokio::test]
async fn test_failed_updated_write_still_reruns_build() -> TestResult {
    let h = Harness::new().await?;
    h.finish(JobCounters::new(0, 1, 0)).await?;

    let mut changed = spec();
    changed.checkout = "1.2.4".to_string();
    h.store.apply_builder(manifest(changed)).await?;
    h.store
        .fail_next(StoreOpKind::UpdateStatus, "etcdserver: request timed out")
        .await;

    assert!(h.reconciler.reconcile(&builder_key()).await.is_err());
    assert!(h.store.writes().await.is_empty());

    h.reconciler.reconcile(&builder_key()).await?;
    assert!(h.store.get_job(&job_key()).await?.is_some());
    assert_eq!(h.state().await?, Some(KoBuilderState::Updated));
    Ok(())
}

/// A rerun survives a failed ConfigMap replace.
///
/// # GIVEN
/// A builder whose Job failed and was deleted, a changed checkout, and a
/// ConfigMap replace that fails once
///
/// # WHEN
/// It is reconciled twice
///
/// # THEN
/// The second pass keeps `Updated` without rewriting it, replaces the
/// ConfigMap and starts a new Job
#[tokio::test]
async fn test_failed_config_replace_still_reruns_build() -> TestResult {
    let h = Harness::new().await?;
    h.finish(JobCounters::new(0, 0, 1)).await?;

    let mut changed = spec();
    changed.checkout = "1.2.4".to_string();
    h.store.apply_builder(manifest(changed)).await?;
    h.store
        .fail_next(StoreOpKind::ReplaceConfigMap, "connection reset by peer")
        .await;

    assert!(h.reconciler.reconcile(&builder_key()).await.is_err());
    h.store.clear_writes().await;

    let healed = h.reconciler.reconcile(&builder_key()).await?;
    assert_eq!(
        healed.actions_taken,
        vec![
            ReconcileAction::UpdateConfig { key: config_key() },
            ReconcileAction::CreateJob { key: job_key() },
        ]
    );
    assert_eq!(h.state().await?, Some(KoBuilderState::Updated));
    Ok(())
}

/// A store failure aborts the pass and the next pass completes it.
///
/// # GIVEN
/// A fresh builder and a Job create that fails once
///
/// # WHEN
/// It is reconciled twice
///
/// # THEN
/// The first pass returns the error after creating the ConfigMap, the
/// second creates only the Job
#[tokio::test]
async fn test_store_error_aborts_pass_and_heals() -> TestResult {
    let h = Harness::new().await?;
    h.store
        .fail_next(StoreOpKind::CreateJob, "connection refused")
        .await;

    let failed = h.reconciler.reconcile(&builder_key()).await;
    assert!(matches!(
        failed,
        Err(Error::Api {
            kind: ArtifactKind::Job,
            ..
        })
    ));
    assert_eq!(
        h.store.writes().await,
        vec![StoreWrite::CreateConfigMap { key: config_key() }]
    );

    h.store.clear_writes().await;
    let healed = h.reconciler.reconcile(&builder_key()).await?;
    assert_eq!(
        healed.actions_taken,
        vec![ReconcileAction::CreateJob { key: job_key() }]
    );
    Ok(())
}

/// A failed status write leaves the previous state in place.
///
/// # GIVEN
/// A started builder whose Job succeeded, and a status write that fails
///
/// # WHEN
/// It is reconciled
///
/// # THEN
/// The pass fails, the state is still `Unknown`, and the Job is kept for
/// the next pass
#[tokio::test]
async fn test_failed_status_write_keeps_job() -> TestResult {
    let h = Harness::new().await?;
    h.start().await?;
    h.store
        .set_job_counters(&job_key(), JobCounters::new(0, 1, 0))
        .await?;
    h.store
        .fail_next(StoreOpKind::UpdateStatus, "etcdserver: request timed out")
        .await;

    let result = h.reconciler.reconcile(&builder_key()).await;

    assert!(result.is_err());
    assert_eq!(h.state().await?, Some(KoBuilderState::Unknown));
    assert!(h.store.get_job(&job_key()).await?.is_some());
    Ok(())
}

/// A missing builder is not an error.
///
/// # GIVEN
/// An empty store
///
/// # WHEN
/// A key is reconciled
///
/// # THEN
/// The pass succeeds without writes
#[tokio::test]
async fn test_missing_builder_is_not_an_error() -> TestResult {
    let store = InMemoryStore::new_arc();
    let reconciler = Reconciler::new(store.clone(), ReconcilerConfig::default());

    let result = reconciler.reconcile(&builder_key()).await?;

    assert!(result.converged());
    assert!(store.writes().await.is_empty());
    Ok(())
}

/// Running Jobs are polled when a requeue interval is configured.
///
/// # GIVEN
/// A reconciler configured with a 30s requeue
///
/// # WHEN
/// The builder's Job is running, then finished
///
/// # THEN
/// Only the running pass asks for a requeue
#[tokio::test]
async fn test_requeue_only_while_job_runs() -> TestResult {
    let store = InMemoryStore::new_arc();
    store.apply_builder(manifest(spec())).await?;
    let reconciler = Reconciler::new(
        store.clone(),
        ReconcilerConfig {
            active_requeue: Some(Duration::from_secs(30)),
            ..ReconcilerConfig::default()
        },
    );

    reconciler.reconcile(&builder_key()).await?;
    store
        .set_job_counters(&job_key(), JobCounters::new(1, 0, 0))
        .await?;
    let running = reconciler.reconcile(&builder_key()).await?;
    assert_eq!(running.requeue_after, Some(Duration::from_secs(30)));

    store
        .set_job_counters(&job_key(), JobCounters::new(0, 1, 0))
        .await?;
    let finished = reconciler.reconcile(&builder_key()).await?;
    assert_eq!(finished.requeue_after, None);
    Ok(())
}
