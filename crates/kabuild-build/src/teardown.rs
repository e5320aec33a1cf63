//! ビルド後のリソース削除
//!
//! 監視とは独立した明示的な操作です。監視中に失敗してもここは呼ばれません。

use crate::cluster::{Cluster, ClusterResult};
use crate::error::{BuildError, BuildResult};

/// 1 リソースの削除結果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Removal {
    Deleted,
    AlreadyGone,
    Skipped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TeardownReport {
    pub job: Removal,
    pub artifact: Removal,
}

pub struct Teardown<'a> {
    cluster: &'a dyn Cluster,
    namespace: &'a str,
}

impl<'a> Teardown<'a> {
    pub fn new(cluster: &'a dyn Cluster, namespace: &'a str) -> Self {
        Self { cluster, namespace }
    }

    /// ジョブとアーティファクトを削除する
    ///
    /// 片方が失敗してももう片方は試みる。存在しないものは削除済み扱い。
    pub async fn run(&self, job: Option<&str>, artifact: Option<&str>) -> BuildResult<TeardownReport> {
        let job_result = match job {
            Some(name) => Some((name, self.cluster.delete_job(self.namespace, name).await)),
            None => None,
        };
        let artifact_result = match artifact {
            Some(name) => Some((
                name,
                self.cluster.delete_artifact(self.namespace, name).await,
            )),
            None => None,
        };

        let job = Self::settle("Pod", job_result)?;
        let artifact = Self::settle("ConfigMap", artifact_result)?;

        Ok(TeardownReport { job, artifact })
    }

    fn settle(
        kind: &'static str,
        result: Option<(&str, ClusterResult<bool>)>,
    ) -> BuildResult<Removal> {
        match result {
            None => Ok(Removal::Skipped),
            Some((name, Ok(true))) => {
                tracing::info!(kind, name, "Deleted");
                Ok(Removal::Deleted)
            }
            Some((name, Ok(false))) => {
                tracing::debug!(kind, name, "Already deleted");
                Ok(Removal::AlreadyGone)
            }
            Some((name, Err(e))) => Err(BuildError::CleanupFailed {
                kind,
                name: name.to_string(),
                message: e.to_string(),
            }),
        }
    }
}
