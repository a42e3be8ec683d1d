//! `ArtifactStore` backed by the Kubernetes API server.

use async_trait::async_trait;
use k8s_openapi::NamespaceResourceScope;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::ConfigMap;
use ko_core::{KoBuilder, KoBuilderState, KoBuilderStatus};
use kube::api::{DeleteParams, PostParams};
use kube::{Api, Client, Resource};
use serde::de::DeserializeOwned;

use crate::error::{Error, Result};
use crate::store::ArtifactStore;
use crate::types::{ArtifactKind, ObjectKey};

/// API server store.
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
}

impl KubeStore {
    /// Create a store using `client`.
    pub const fn new(client: Client) -> Self {
        Self { client }
    }

    fn api<K>(&self, namespace: &str) -> Api<K>
    where
        K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>,
    {
        Api::namespaced(self.client.clone(), namespace)
    }
}

fn classify(operation: &'static str, kind: ArtifactKind, key: &ObjectKey, err: kube::Error) -> Error {
    match err {
        kube::Error::Api(response) if response.code == 409 && response.reason == "AlreadyExists" => {
            Error::already_exists(kind, key)
        }
        kube::Error::Api(response) if response.code == 409 => Error::conflict(kind, key),
        other => Error::api(operation, kind, key, other.to_string()),
    }
}

async fn get_opt<K>(api: Api<K>, kind: ArtifactKind, key: &ObjectKey) -> Result<Option<K>>
where
    K: Resource + Clone + DeserializeOwned + std::fmt::Debug,
{
    api.get_opt(&key.name)
        .await
        .map_err(|e| classify("get", kind, key, e))
}

#[async_trait]
impl ArtifactStore for KubeStore {
    async fn get_builder(&self, key: &ObjectKey) -> Result<Option<KoBuilder>> {
        get_opt(self.api(&key.namespace), ArtifactKind::KoBuilder, key).await
    }

    async fn update_builder_status(
        &self,
        builder: &KoBuilder,
        state: KoBuilderState,
    ) -> Result<KoBuilder> {
        let key = ObjectKey::of(builder)?;
        let mut updated = builder.clone();
        updated.status = Some(KoBuilderStatus { state: Some(state) });
        let body = serde_json::to_vec(&updated).map_err(|e| Error::serialization(e.to_string()))?;

        self.api::<KoBuilder>(&key.namespace)
            .replace_status(&key.name, &PostParams::default(), body)
            .await
            .map_err(|e| classify("update status of", ArtifactKind::KoBuilder, &key, e))
    }

    async fn get_config_map(&self, key: &ObjectKey) -> Result<Option<ConfigMap>> {
        get_opt(self.api(&key.namespace), ArtifactKind::ConfigMap, key).await
    }

    async fn create_config_map(&self, config: &ConfigMap) -> Result<ConfigMap> {
        let key = ObjectKey::of(config)?;
        self.api::<ConfigMap>(&key.namespace)
            .create(&PostParams::default(), config)
            .await
            .map_err(|e| classify("create", ArtifactKind::ConfigMap, &key, e))
    }

    async fn replace_config_map(&self, config: &ConfigMap) -> Result<ConfigMap> {
        let key = ObjectKey::of(config)?;
        self.api::<ConfigMap>(&key.namespace)
            .replace(&key.name, &PostParams::default(), config)
            .await
            .map_err(|e| classify("replace", ArtifactKind::ConfigMap, &key, e))
    }

    async fn get_job(&self, key: &ObjectKey) -> Result<Option<Job>> {
        get_opt(self.api(&key.namespace), ArtifactKind::Job, key).await
    }

    async fn create_job(&self, job: &Job) -> Result<Job> {
        let key = ObjectKey::of(job)?;
        self.api::<Job>(&key.namespace)
            .create(&PostParams::default(), job)
            .await
            .map_err(|e| classify("create", ArtifactKind::Job, &key, e))
    }

    async fn delete_job(&self, key: &ObjectKey) -> Result<()> {
        match self
            .api::<Job>(&key.namespace)
            .delete(&key.name, &DeleteParams::background())
            .await
        {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(response)) if response.code == 404 => Ok(()),
            Err(e) => Err(classify("delete", ArtifactKind::Job, key, e)),
        }
    }
}
