//! Watch wiring: drives the `Reconciler` from KoBuilder, ConfigMap and Job
//! events.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::ConfigMap;
use ko_core::{KoBuilder, OperatorConfig};
use kube::api::ListParams;
use kube::runtime::controller::{Action, Controller};
use kube::runtime::watcher;
use kube::{Api, Client};
use tracing::{error, info, warn};

use crate::error::{Error, Result};
use crate::kube_store::KubeStore;
use crate::reconciler::{Reconciler, ReconcilerConfig};
use crate::types::{ArtifactKind, ObjectKey, ReconcileResult};

/// Shared state handed to every reconcile call.
pub struct Context {
    reconciler: Reconciler,
    error_requeue: Duration,
}

impl Context {
    pub const fn new(reconciler: Reconciler, error_requeue: Duration) -> Self {
        Self {
            reconciler,
            error_requeue,
        }
    }
}

/// Map a reconcile result onto the controller's requeue policy.
pub fn next_action(result: &ReconcileResult) -> Action {
    result
        .requeue_after
        .map_or_else(Action::await_change, Action::requeue)
}

async fn reconcile(builder: Arc<KoBuilder>, ctx: Arc<Context>) -> Result<Action> {
    let key = ObjectKey::of(builder.as_ref())?;
    let result = ctx.reconciler.reconcile(&key).await?;
    for action in &result.actions_taken {
        info!(
            kobuilder = %key,
            target = %action.key(),
            action = %action.description(),
            "Applied action"
        );
    }
    Ok(next_action(&result))
}

fn error_policy(builder: Arc<KoBuilder>, err: &Error, ctx: Arc<Context>) -> Action {
    warn!(
        kobuilder = %kube::ResourceExt::name_any(builder.as_ref()),
        error = %err,
        retry_in = ?ctx.error_requeue,
        "Reconcile failed"
    );
    Action::requeue(ctx.error_requeue)
}

fn api_for<K>(client: &Client, namespace: Option<&str>) -> Api<K>
where
    K: kube::Resource<Scope = k8s_openapi::NamespaceResourceScope, DynamicType = ()>,
{
    match namespace {
        Some(ns) => Api::namespaced(client.clone(), ns),
        None => Api::all(client.clone()),
    }
}

/// Run the controller until SIGINT or SIGTERM.
///
/// # Errors
///
/// Returns `Error::Api` if KoBuilder objects cannot be listed, which usually
/// means the CRD is not installed.
pub async fn run(client: Client, config: &OperatorConfig) -> Result<()> {
    let namespace = config.namespace.as_deref();
    let builders: Api<KoBuilder> = api_for(&client, namespace);

    builders
        .list(&ListParams::default().limit(1))
        .await
        .map_err(|e| {
            Error::api(
                "list",
                ArtifactKind::KoBuilder,
                &ObjectKey::new(namespace.unwrap_or("*"), "kobuilders"),
                format!("{e} (is the KoBuilder CRD installed?)"),
            )
        })?;

    let reconciler = Reconciler::new(
        Arc::new(KubeStore::new(client.clone())),
        ReconcilerConfig::from(config),
    );
    let ctx = Arc::new(Context::new(reconciler, config.controller.error_requeue()));

    info!(
        namespace = namespace.unwrap_or("<all>"),
        image = %config.job.image,
        "Starting KoBuilder controller"
    );

    Controller::new(builders, watcher::Config::default())
        .owns(api_for::<ConfigMap>(&client, namespace), watcher::Config::default())
        .owns(api_for::<Job>(&client, namespace), watcher::Config::default())
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx)
        .for_each(|outcome| async move {
            match outcome {
                Ok((object, _)) => tracing::debug!(kobuilder = %object, "Reconciled"),
                Err(e) => error!(error = %e, "Controller error"),
            }
        })
        .await;

    info!("KoBuilder controller stopped");
    Ok(())
}
