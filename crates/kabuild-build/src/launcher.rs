//! ビルドジョブの定義と投入
//!
//! 配置済みのコンテキストと認証情報をマウントした Kaniko のジョブ定義を組み立て、
//! クラスタに 1 度だけ投入します。

use crate::artifact::ArtifactRef;
use crate::cluster::Cluster;
use crate::error::{BuildError, BuildResult};
use crate::naming::managed_labels;
use kabuild_config::KabuildConfig;
use std::collections::BTreeMap;

/// タグ未指定時の値
pub const DEFAULT_TAG: &str = "latest";

/// 呼び出し元からのビルド要求
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildRequest {
    repository: String,
    tag: String,
}

impl BuildRequest {
    /// タグが無い・空なら `latest`
    pub fn new(repository: impl Into<String>, tag: Option<&str>) -> BuildResult<Self> {
        let repository = repository.into();
        if repository.trim().is_empty() {
            return Err(BuildError::InvalidRequest(
                "リポジトリ名を指定してください".to_string(),
            ));
        }

        let tag = match tag {
            Some(t) if !t.is_empty() => t.to_string(),
            _ => DEFAULT_TAG.to_string(),
        };

        Ok(Self { repository, tag })
    }

    pub fn repository(&self) -> &str {
        &self.repository
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }
}

/// プッシュ先 `<identity>/<repo>:<tag>`
pub fn destination(identity: &str, repository: &str, tag: &str) -> String {
    format!("{}/{}:{}", identity, repository, tag)
}

/// ジョブの再起動方針。常に再起動しない
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartPolicy {
    Never,
}

impl RestartPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            RestartPolicy::Never => "Never",
        }
    }
}

/// 読み取り専用でマウントするアーティファクト
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactMount {
    pub artifact: ArtifactRef,
    pub mount_path: String,
}

/// Secret の 1 キーをファイルとして投影する
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialMount {
    pub secret_name: String,
    pub key: String,
    pub file_name: String,
    pub mount_path: String,
}

/// 投入するジョブの定義（コンテナは 1 つ）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSpec {
    pub name: String,
    pub image: String,
    pub args: Vec<String>,
    pub artifact: ArtifactMount,
    pub credential: CredentialMount,
    pub restart_policy: RestartPolicy,
    pub labels: BTreeMap<String, String>,
}

/// 投入済みジョブ
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobHandle {
    pub namespace: String,
    pub name: String,
}

#[derive(Debug, Clone)]
pub struct JobLauncher {
    image: String,
    workspace_path: String,
    dockerfile: String,
    secret_name: String,
    secret_key: String,
    credential_path: String,
    credential_file: String,
}

impl JobLauncher {
    pub fn from_config(config: &KabuildConfig) -> Self {
        Self {
            image: config.builder_image.clone(),
            workspace_path: config.workspace_path.clone(),
            dockerfile: config.dockerfile.clone(),
            secret_name: config.secret_name.clone(),
            secret_key: config.secret_key.clone(),
            credential_path: config.credential_path.clone(),
            credential_file: config.credential_file.clone(),
        }
    }

    /// ビルダーに渡す引数
    pub fn args(&self, identity: &str, request: &BuildRequest) -> Vec<String> {
        let workspace = self.workspace_path.trim_end_matches('/');
        vec![
            format!("--dockerfile={}/{}", workspace, self.dockerfile),
            format!("--context=dir://{}/", workspace),
            format!(
                "--destination={}",
                destination(identity, request.repository(), request.tag())
            ),
        ]
    }

    pub fn job_spec(
        &self,
        job_name: &str,
        artifact: &ArtifactRef,
        identity: &str,
        request: &BuildRequest,
    ) -> JobSpec {
        JobSpec {
            name: job_name.to_string(),
            image: self.image.clone(),
            args: self.args(identity, request),
            artifact: ArtifactMount {
                artifact: artifact.clone(),
                mount_path: self.workspace_path.clone(),
            },
            credential: CredentialMount {
                secret_name: self.secret_name.clone(),
                key: self.secret_key.clone(),
                file_name: self.credential_file.clone(),
                mount_path: self.credential_path.clone(),
            },
            restart_policy: RestartPolicy::Never,
            labels: managed_labels(job_name),
        }
    }

    /// ジョブを投入する。失敗時の再試行はしない
    pub async fn launch(
        &self,
        cluster: &dyn Cluster,
        namespace: &str,
        spec: &JobSpec,
    ) -> BuildResult<JobHandle> {
        tracing::debug!(job = %spec.name, args = ?spec.args, "Submitting build job");

        cluster
            .create_job(namespace, spec)
            .await
            .map_err(|e| BuildError::Submission {
                kind: "Pod",
                name: spec.name.clone(),
                message: e.to_string(),
            })?;

        tracing::info!(job = %spec.name, image = %spec.image, "Build job created");

        Ok(JobHandle {
            namespace: namespace.to_string(),
            name: spec.name.clone(),
        })
    }
}
