//! ビルド 1 回分のパイプライン
//!
//! 認証情報の解決 → コンテキストの配置 → ジョブ投入 → 監視 を順に実行します。
//! どの段階の失敗も即座に中断し、段階情報を付けて返します（再試行なし）。
//! 投入済みのリソースは失敗時も削除しません。

use crate::artifact::ArtifactStager;
use crate::cluster::Cluster;
use crate::credential::CredentialResolver;
use crate::error::{BuildError, BuildResult, Stage};
use crate::launcher::{BuildRequest, JobHandle, JobLauncher, destination};
use crate::naming::{artifact_name_for_dir, generate_job_name, managed_labels};
use crate::supervisor::{LifecycleObserver, NoopObserver, Phase, Supervisor, TerminalPhase};
use kabuild_config::{ArtifactNaming, KabuildConfig};
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// ビルドの結果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildOutcome {
    pub job: JobHandle,
    pub artifact: String,
    pub phase: TerminalPhase,
}

impl BuildOutcome {
    pub fn succeeded(&self) -> bool {
        self.phase == TerminalPhase::Succeeded
    }
}

/// パイプラインの進行状況の通知先
pub trait DispatchObserver: LifecycleObserver {
    /// ジョブとアーティファクトがクラスタに作成されたとき
    fn on_launched(&self, _job: &JobHandle, _artifact: &str) {}
}

impl DispatchObserver for NoopObserver {}

pub struct BuildDispatcher {
    cluster: Arc<dyn Cluster>,
    config: KabuildConfig,
    poll_interval: Duration,
    observer: Arc<dyn DispatchObserver>,
}

impl BuildDispatcher {
    pub fn new(cluster: Arc<dyn Cluster>, config: KabuildConfig) -> Self {
        Self {
            cluster,
            poll_interval: config.poll_interval(),
            config,
            observer: Arc::new(NoopObserver),
        }
    }

    /// 設定ファイルの秒単位より細かい間隔で監視する（テスト用）
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn DispatchObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn config(&self) -> &KabuildConfig {
        &self.config
    }

    pub fn cluster(&self) -> &dyn Cluster {
        self.cluster.as_ref()
    }

    /// `source_dir` をビルドコンテキストとしてビルドを 1 回実行する
    pub async fn dispatch(
        &self,
        request: &BuildRequest,
        source_dir: &Path,
        cancel: &CancellationToken,
    ) -> BuildResult<BuildOutcome> {
        let cluster = self.cluster.as_ref();
        let namespace = self.config.namespace.as_str();

        let resolver = CredentialResolver::new(&self.config.secret_name, &self.config.secret_key)
            .with_registries(self.config.registries.clone());
        let identity = cancellable(cancel, resolver.resolve(cluster, namespace))
            .await
            .map_err(|e| e.in_stage(Stage::ResolveCredential))?;

        let job_name = generate_job_name(&self.config.job_prefix, self.config.name_length);
        let artifact_name = match self.config.artifact_naming {
            ArtifactNaming::Job => job_name.clone(),
            ArtifactNaming::Directory => {
                let dir = std::fs::canonicalize(source_dir)
                    .unwrap_or_else(|_| source_dir.to_path_buf());
                artifact_name_for_dir(&dir)
            }
        };

        tracing::info!(
            job = %job_name,
            artifact = %artifact_name,
            destination = %destination(&identity, request.repository(), request.tag()),
            "Dispatching build"
        );

        let stager = ArtifactStager::new(&self.config.dockerfile);
        let artifact = cancellable(
            cancel,
            stager.stage(
                cluster,
                namespace,
                source_dir,
                &artifact_name,
                managed_labels(&job_name),
            ),
        )
        .await
        .map_err(|e| e.in_stage(Stage::StageArtifact))?;

        let launcher = JobLauncher::from_config(&self.config);
        let spec = launcher.job_spec(&job_name, &artifact, &identity, request);
        let job = cancellable(cancel, launcher.launch(cluster, namespace, &spec))
            .await
            .map_err(|e| e.in_stage(Stage::LaunchJob))?;

        self.observer.on_launched(&job, &artifact.name);

        let observer: Arc<dyn LifecycleObserver> = Arc::new(ObserverBridge(self.observer.clone()));
        let supervisor = Supervisor::new(self.poll_interval)
            .with_timeout(self.config.timeout())
            .with_observer(observer);

        let phase = supervisor
            .supervise(cluster, namespace, &job.name, cancel)
            .await
            .map_err(|e| {
                tracing::warn!(
                    job = %job.name,
                    artifact = %artifact.name,
                    "Supervision aborted; job and artifact are left in the cluster"
                );
                e.in_stage(Stage::Supervise)
            })?;

        Ok(BuildOutcome {
            job,
            artifact: artifact.name,
            phase,
        })
    }
}

/// `DispatchObserver` を監視側の `LifecycleObserver` として渡す
struct ObserverBridge(Arc<dyn DispatchObserver>);

impl LifecycleObserver for ObserverBridge {
    fn on_phase(&self, job: &str, phase: Phase) {
        self.0.on_phase(job, phase);
    }

    fn on_log_line(&self, job: &str, line: &str) {
        self.0.on_log_line(job, line);
    }

    fn on_log_end(&self, job: &str, error: Option<&str>) {
        self.0.on_log_end(job, error);
    }
}

async fn cancellable<T>(
    cancel: &CancellationToken,
    fut: impl Future<Output = BuildResult<T>>,
) -> BuildResult<T> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(BuildError::Cancelled),
        result = fut => result,
    }
}
