//! Kubernetes 実装
//!
//! アーティファクトは ConfigMap、ジョブは再起動しない Pod として作成します。

use crate::artifact::{Artifact, encode_key};
use crate::cluster::{Cluster, ClusterError, ClusterResult, LogLines};
use crate::error::{BuildError, BuildResult};
use crate::launcher::JobSpec;
use async_trait::async_trait;
use futures_util::io::AsyncBufReadExt;
use futures_util::stream::{self, StreamExt};
use k8s_openapi::ByteString;
use k8s_openapi::api::core::v1::{
    ConfigMap, ConfigMapVolumeSource, Container, KeyToPath, Pod, PodSpec, Secret,
    SecretVolumeSource, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Api, DeleteParams, LogParams, PostParams};
use kube::config::Kubeconfig;
use kube::{Client, Config};
use std::collections::BTreeMap;
use tokio::sync::{mpsc, oneshot};

const BUILDER_CONTAINER: &str = "kaniko";
const ARTIFACT_VOLUME: &str = "build-context";
const CREDENTIAL_VOLUME: &str = "registry-credentials";

/// ログ転送チャネルの容量（行数）
const LOG_BUFFER: usize = 256;

impl From<kube::Error> for ClusterError {
    fn from(err: kube::Error) -> Self {
        match &err {
            kube::Error::Api(resp) if resp.code == 404 => {
                ClusterError::NotFound(resp.message.clone())
            }
            kube::Error::Api(resp) if resp.code == 409 => {
                ClusterError::AlreadyExists(resp.message.clone())
            }
            _ => ClusterError::Api(err.to_string()),
        }
    }
}

/// kube クライアントによる [`Cluster`] 実装
#[derive(Clone)]
pub struct KubeCluster {
    client: Client,
}

impl KubeCluster {
    /// kubeconfig (または in-cluster 設定) から接続する
    pub async fn connect() -> BuildResult<Self> {
        let config = Config::infer()
            .await
            .map_err(|e| BuildError::Config(e.to_string()))?;
        let client = Client::try_from(config).map_err(|e| BuildError::Config(e.to_string()))?;
        Ok(Self { client })
    }

    pub fn from_client(client: Client) -> Self {
        Self { client }
    }

    /// kubeconfig の current-context（読めなければ `None`）
    pub fn current_context() -> Option<String> {
        Kubeconfig::read().ok().and_then(|k| k.current_context)
    }

    fn pods(&self, namespace: &str) -> Api<Pod> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn config_maps(&self, namespace: &str) -> Api<ConfigMap> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

fn deleted(result: Result<(), kube::Error>) -> ClusterResult<bool> {
    match result {
        Ok(()) => Ok(true),
        Err(e) => match ClusterError::from(e) {
            ClusterError::NotFound(_) => Ok(false),
            other => Err(other),
        },
    }
}

#[async_trait]
impl Cluster for KubeCluster {
    async fn read_secret(
        &self,
        namespace: &str,
        name: &str,
    ) -> ClusterResult<Option<BTreeMap<String, Vec<u8>>>> {
        let secrets: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        let secret = secrets.get_opt(name).await?;

        Ok(secret.map(|s| {
            s.data
                .unwrap_or_default()
                .into_iter()
                .map(|(key, value)| (key, value.0))
                .collect()
        }))
    }

    async fn create_artifact(&self, namespace: &str, artifact: &Artifact) -> ClusterResult<()> {
        self.config_maps(namespace)
            .create(&PostParams::default(), &config_map_from_artifact(artifact))
            .await?;
        Ok(())
    }

    async fn create_job(&self, namespace: &str, spec: &JobSpec) -> ClusterResult<()> {
        let pod = self
            .pods(namespace)
            .create(&PostParams::default(), &pod_from_spec(spec))
            .await?;

        tracing::debug!(
            pod = %spec.name,
            phase = ?pod.status.and_then(|s| s.phase),
            "Pod created"
        );
        Ok(())
    }

    async fn job_phase(&self, namespace: &str, name: &str) -> ClusterResult<Option<String>> {
        let pod = self.pods(namespace).get(name).await?;
        Ok(pod.status.and_then(|s| s.phase))
    }

    async fn stream_logs(&self, namespace: &str, name: &str) -> ClusterResult<LogLines> {
        let pods = self.pods(namespace);
        let name = name.to_string();
        let (opened_tx, opened_rx) = oneshot::channel();
        let (line_tx, line_rx) = mpsc::channel(LOG_BUFFER);

        // ストリームは Api を借用するため、所有権ごとタスクに移して読む
        tokio::spawn(async move {
            let params = LogParams {
                follow: true,
                container: Some(BUILDER_CONTAINER.to_string()),
                ..Default::default()
            };

            let reader = match pods.log_stream(&name, &params).await {
                Ok(reader) => {
                    let _ = opened_tx.send(Ok(()));
                    reader
                }
                Err(e) => {
                    let _ = opened_tx.send(Err(ClusterError::from(e)));
                    return;
                }
            };

            let mut lines = std::pin::pin!(reader.lines());
            while let Some(line) = lines.next().await {
                let item = line.map_err(|e| ClusterError::Api(e.to_string()));
                let stop = item.is_err();
                if line_tx.send(item).await.is_err() || stop {
                    break;
                }
            }
        });

        opened_rx
            .await
            .map_err(|_| ClusterError::Api("log stream task ended unexpectedly".to_string()))??;

        Ok(stream::unfold(line_rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        })
        .boxed())
    }

    async fn delete_job(&self, namespace: &str, name: &str) -> ClusterResult<bool> {
        let result = self
            .pods(namespace)
            .delete(name, &DeleteParams::default())
            .await
            .map(|_| ());
        deleted(result)
    }

    async fn delete_artifact(&self, namespace: &str, name: &str) -> ClusterResult<bool> {
        let result = self
            .config_maps(namespace)
            .delete(name, &DeleteParams::default())
            .await
            .map(|_| ());
        deleted(result)
    }
}

/// アーティファクトを ConfigMap に変換する
///
/// UTF-8 として読める内容は `data`、それ以外は `binaryData` に入れる。
pub fn config_map_from_artifact(artifact: &Artifact) -> ConfigMap {
    let mut data = BTreeMap::new();
    let mut binary_data = BTreeMap::new();

    for (path, content) in artifact.files() {
        let key = encode_key(path);
        match std::str::from_utf8(content) {
            Ok(text) => {
                data.insert(key, text.to_string());
            }
            Err(_) => {
                binary_data.insert(key, ByteString(content.clone()));
            }
        }
    }

    ConfigMap {
        metadata: ObjectMeta {
            name: Some(artifact.name().to_string()),
            labels: (!artifact.labels().is_empty()).then(|| artifact.labels().clone()),
            ..Default::default()
        },
        data: (!data.is_empty()).then_some(data),
        binary_data: (!binary_data.is_empty()).then_some(binary_data),
        immutable: Some(true),
    }
}

/// ジョブ定義を Pod に変換する
pub fn pod_from_spec(spec: &JobSpec) -> Pod {
    let artifact_items: Vec<KeyToPath> = spec
        .artifact
        .artifact
        .items
        .iter()
        .map(|item| KeyToPath {
            key: item.key.clone(),
            path: item.path.clone(),
            mode: None,
        })
        .collect();

    Pod {
        metadata: ObjectMeta {
            name: Some(spec.name.clone()),
            labels: Some(spec.labels.clone()),
            ..Default::default()
        },
        spec: Some(PodSpec {
            containers: vec![Container {
                name: BUILDER_CONTAINER.to_string(),
                image: Some(spec.image.clone()),
                args: Some(spec.args.clone()),
                volume_mounts: Some(vec![
                    VolumeMount {
                        name: ARTIFACT_VOLUME.to_string(),
                        mount_path: spec.artifact.mount_path.clone(),
                        read_only: Some(true),
                        ..Default::default()
                    },
                    VolumeMount {
                        name: CREDENTIAL_VOLUME.to_string(),
                        mount_path: spec.credential.mount_path.clone(),
                        read_only: Some(true),
                        ..Default::default()
                    },
                ]),
                ..Default::default()
            }],
            restart_policy: Some(spec.restart_policy.as_str().to_string()),
            volumes: Some(vec![
                Volume {
                    name: ARTIFACT_VOLUME.to_string(),
                    config_map: Some(ConfigMapVolumeSource {
                        name: spec.artifact.artifact.name.clone(),
                        items: Some(artifact_items),
                        ..Default::default()
                    }),
                    ..Default::default()
                },
                Volume {
                    name: CREDENTIAL_VOLUME.to_string(),
                    secret: Some(SecretVolumeSource {
                        secret_name: Some(spec.credential.secret_name.clone()),
                        items: Some(vec![KeyToPath {
                            key: spec.credential.key.clone(),
                            path: spec.credential.file_name.clone(),
                            mode: None,
                        }]),
                        ..Default::default()
                    }),
                    ..Default::default()
                },
            ]),
            ..Default::default()
        }),
        ..Default::default()
    }
}
