//! CLI command handlers.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

use std::fmt::Write as _;
use std::path::Path;

use anyhow::{Context, Result};
use ko_core::{KoBuilder, OperatorConfig};
use ko_reconciler::{
    ArtifactStore, InMemoryStore, ObjectKey, Reconciler, ReconcilerConfig, controller, desired,
};
use kube::CustomResourceExt;
use tracing::info;

use crate::cli::Commands;

/// Namespace used by `render` when neither the manifest nor the config
/// names one.
const DEFAULT_NAMESPACE: &str = "default";

/// Execute a CLI command.
pub async fn execute_command(command: Commands, config: OperatorConfig) -> Result<()> {
    match command {
        Commands::Run { namespace, .. } => cmd_run(config, namespace).await,
        Commands::Crd => cmd_crd(),
        Commands::Render { file, .. } => cmd_render(&file, &config).await,
    }
}

/// Run the controller until a shutdown signal arrives.
async fn cmd_run(mut config: OperatorConfig, namespace: Option<String>) -> Result<()> {
    if namespace.is_some() {
        config.namespace = namespace;
    }

    let client = kube::Client::try_default()
        .await
        .context("Failed to create Kubernetes client. Check your kubeconfig or in-cluster service account")?;

    controller::run(client, &config)
        .await
        .context("KoBuilder controller failed")?;

    info!("ko-operator stopped gracefully");
    Ok(())
}

/// Print the CustomResourceDefinition.
fn cmd_crd() -> Result<()> {
    print!("{}", crd_yaml()?);
    Ok(())
}

/// Print the objects a manifest converges onto.
async fn cmd_render(file: &Path, config: &OperatorConfig) -> Result<()> {
    let manifest = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read manifest {}", file.display()))?;
    print!("{}", render(&manifest, config).await?);
    Ok(())
}

/// The `KoBuilder` CRD as YAML.
///
/// # Errors
///
/// Returns error if the CRD cannot be serialized.
pub fn crd_yaml() -> Result<String> {
    serde_yaml::to_string(&KoBuilder::crd()).context("Failed to serialize KoBuilder CRD")
}

/// Reconcile `manifest` once against an empty in-memory cluster and return
/// the ConfigMap and Job it produced as multi-document YAML.
///
/// Server-assigned fields are stripped from the output; owner references
/// point at a placeholder uid.
///
/// # Errors
///
/// Returns error if the manifest is not a valid `KoBuilder` or the pass
/// fails.
pub async fn render(manifest: &str, config: &OperatorConfig) -> Result<String> {
    let mut builder = KoBuilder::from_yaml(manifest).context("Failed to parse KoBuilder manifest")?;
    if builder.metadata.namespace.is_none() {
        builder.metadata.namespace = Some(
            config
                .namespace
                .clone()
                .unwrap_or_else(|| DEFAULT_NAMESPACE.to_string()),
        );
    }

    let store = InMemoryStore::new_arc();
    let builder = store.apply_builder(builder).await?;
    let key = ObjectKey::of(&builder)?;
    Reconciler::new(store.clone(), ReconcilerConfig::from(config))
        .reconcile(&key)
        .await
        .with_context(|| format!("Failed to reconcile KoBuilder {key}"))?;

    let mut config_map = store
        .get_config_map(&key.sibling(desired::config_name(&key.name)))
        .await?
        .context("Reconcile produced no ConfigMap")?;
    let mut job = store
        .get_job(&key.sibling(desired::job_name(&key.name)))
        .await?
        .context("Reconcile produced no Job")?;

    for meta in [&mut config_map.metadata, &mut job.metadata] {
        meta.uid = None;
        meta.resource_version = None;
    }

    let mut out = serde_yaml::to_string(&config_map).context("Failed to serialize ConfigMap")?;
    write!(
        out,
        "---\n{}",
        serde_yaml::to_string(&job).context("Failed to serialize Job")?
    )?;
    Ok(out)
}
