//! クラスタ API の抽象化
//!
//! コアロジックはこのトレイトだけに依存します。本番実装は [`crate::k8s::KubeCluster`]、
//! テストではメモリ上の実装に差し替えます。

use crate::artifact::Artifact;
use crate::launcher::JobSpec;
use async_trait::async_trait;
use futures_util::stream::BoxStream;
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClusterError {
    #[error("リソースが見つかりません: {0}")]
    NotFound(String),

    #[error("リソースが既に存在します: {0}")]
    AlreadyExists(String),

    #[error("Kubernetes APIエラー: {0}")]
    Api(String),
}

pub type ClusterResult<T> = std::result::Result<T, ClusterError>;

/// 追従中のログ（1要素 = 1行）
pub type LogLines = BoxStream<'static, ClusterResult<String>>;

#[async_trait]
pub trait Cluster: Send + Sync {
    /// Secret のペイロードを読む。存在しなければ `None`
    async fn read_secret(
        &self,
        namespace: &str,
        name: &str,
    ) -> ClusterResult<Option<BTreeMap<String, Vec<u8>>>>;

    async fn create_artifact(&self, namespace: &str, artifact: &Artifact) -> ClusterResult<()>;

    async fn create_job(&self, namespace: &str, spec: &JobSpec) -> ClusterResult<()>;

    /// ジョブの現在のフェーズ（未設定なら `None`）。毎回クラスタから読み直す
    async fn job_phase(&self, namespace: &str, name: &str) -> ClusterResult<Option<String>>;

    /// ジョブの出力を follow モードで開く
    async fn stream_logs(&self, namespace: &str, name: &str) -> ClusterResult<LogLines>;

    /// 削除できたら `true`、既に存在しなければ `false`
    async fn delete_job(&self, namespace: &str, name: &str) -> ClusterResult<bool>;

    async fn delete_artifact(&self, namespace: &str, name: &str) -> ClusterResult<bool>;
}
