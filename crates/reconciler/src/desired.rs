//! Desired state of the objects owned by a `KoBuilder`.
//!
//! Everything here is pure: the same builder and job config always yield
//! the same ConfigMap and Job.

use std::collections::BTreeMap;

use k8s_openapi::api::batch::v1::{Job, JobSpec};
use k8s_openapi::api::core::v1::{
    ConfigMap, ConfigMapEnvSource, Container, DownwardAPIVolumeFile, DownwardAPIVolumeSource,
    EnvFromSource, ObjectFieldSelector, PodSpec, PodTemplateSpec, SecretVolumeSource, Volume,
    VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use ko_core::{JobConfig, KoBuilder};
use kube::{Resource, ResourceExt};

/// Name of the container running the build.
pub const CONTAINER_NAME: &str = "ko-builder";
/// Mount path of the credentials secret.
pub const CREDENTIALS_MOUNT_PATH: &str = "/etc/gcloud";
/// Mount path of the pod identity files.
pub const POD_INFO_MOUNT_PATH: &str = "/pod";

const CREDENTIALS_VOLUME: &str = "gcloud";
const POD_INFO_VOLUME: &str = "pod-info";

/// Name of the ConfigMap owned by the builder `name`.
pub fn config_name(name: &str) -> String {
    format!("{name}-config")
}

/// Name of the Job owned by the builder `name`.
pub fn job_name(name: &str) -> String {
    format!("{name}-job")
}

/// Controller reference from a child object to `builder`.
pub fn owner_reference(builder: &KoBuilder) -> OwnerReference {
    OwnerReference {
        api_version: KoBuilder::api_version(&()).into_owned(),
        kind: KoBuilder::kind(&()).into_owned(),
        name: builder.name_any(),
        uid: builder.uid().unwrap_or_default(),
        controller: Some(true),
        block_owner_deletion: Some(true),
    }
}

/// Point `meta` at its owning builder, replacing any previous references.
pub fn set_owner(meta: &mut ObjectMeta, builder: &KoBuilder) {
    meta.owner_references = Some(vec![owner_reference(builder)]);
}

/// Environment exposed to the build job.
pub fn config_data(builder: &KoBuilder) -> BTreeMap<String, String> {
    let spec = &builder.spec;
    [
        ("REGISTRY", spec.registry.clone()),
        ("SERVICE_ACCOUNT", spec.service_account.clone()),
        ("REPOSITORY", spec.repository.clone()),
        ("CHECKOUT", spec.checkout.clone()),
        ("CONFIG_PATH", spec.config_path.clone()),
        ("OWNER_APIVERSION", KoBuilder::api_version(&()).into_owned()),
        ("OWNER_CONTROLLER", "false".to_string()),
        ("OWNER_KIND", KoBuilder::kind(&()).into_owned()),
        ("OWNER_NAME", builder.name_any()),
        ("OWNER_UID", builder.uid().unwrap_or_default()),
    ]
    .into_iter()
    .map(|(key, value)| (key.to_string(), value))
    .collect()
}

/// Expected ConfigMap for `builder`.
pub fn build_config(builder: &KoBuilder) -> ConfigMap {
    ConfigMap {
        metadata: ObjectMeta {
            name: Some(config_name(&builder.name_any())),
            namespace: builder.namespace(),
            ..ObjectMeta::default()
        },
        data: Some(config_data(builder)),
        ..ConfigMap::default()
    }
}

/// Expected Job for `builder`, sourcing its environment from `config_name`.
pub fn build_job(builder: &KoBuilder, config_name: &str, job: &JobConfig) -> Job {
    let container = Container {
        name: CONTAINER_NAME.to_string(),
        image: Some(job.image.clone()),
        env_from: Some(vec![EnvFromSource {
            config_map_ref: Some(ConfigMapEnvSource {
                name: config_name.to_string().into(),
                ..ConfigMapEnvSource::default()
            }),
            ..EnvFromSource::default()
        }]),
        volume_mounts: Some(vec![
            VolumeMount {
                name: CREDENTIALS_VOLUME.to_string(),
                mount_path: CREDENTIALS_MOUNT_PATH.to_string(),
                read_only: Some(true),
                ..VolumeMount::default()
            },
            VolumeMount {
                name: POD_INFO_VOLUME.to_string(),
                mount_path: POD_INFO_MOUNT_PATH.to_string(),
                read_only: Some(true),
                ..VolumeMount::default()
            },
        ]),
        ..Container::default()
    };

    let volumes = vec![
        Volume {
            name: CREDENTIALS_VOLUME.to_string(),
            secret: Some(SecretVolumeSource {
                secret_name: Some(job.credentials_secret.clone()),
                ..SecretVolumeSource::default()
            }),
            ..Volume::default()
        },
        Volume {
            name: POD_INFO_VOLUME.to_string(),
            downward_api: Some(DownwardAPIVolumeSource {
                items: Some(vec![
                    field_file("name", "metadata.name"),
                    field_file("uid", "metadata.uid"),
                ]),
                ..DownwardAPIVolumeSource::default()
            }),
            ..Volume::default()
        },
    ];

    Job {
        metadata: ObjectMeta {
            name: Some(job_name(&builder.name_any())),
            namespace: builder.namespace(),
            ..ObjectMeta::default()
        },
        spec: Some(JobSpec {
            // One attempt, so the failed counter never exceeds 1.
            backoff_limit: Some(0),
            template: PodTemplateSpec {
                metadata: None,
                spec: Some(PodSpec {
                    service_account_name: Some(job.service_account.clone()),
                    restart_policy: Some("Never".to_string()),
                    containers: vec![container],
                    volumes: Some(volumes),
                    ..PodSpec::default()
                }),
            },
            ..JobSpec::default()
        }),
        ..Job::default()
    }
}

fn field_file(path: &str, field_path: &str) -> DownwardAPIVolumeFile {
    DownwardAPIVolumeFile {
        path: path.to_string(),
        field_ref: Some(ObjectFieldSelector {
            field_path: field_path.to_string(),
            ..ObjectFieldSelector::default()
        }),
        ..DownwardAPIVolumeFile::default()
    }
}
