//! kabuild のビルド投入・監視
//!
//! ローカルのビルドコンテキストをクラスタに配置し、Kaniko の Pod を 1 つ起動して
//! 完了まで監視します。構成要素:
//! レジストリ認証情報の解決 ([`credential`])、コンテキストの配置 ([`artifact`])、
//! ジョブの投入 ([`launcher`])、監視 ([`supervisor`])、後片付け ([`teardown`])。

pub mod artifact;
pub mod cluster;
pub mod credential;
pub mod dispatch;
pub mod error;
pub mod k8s;
pub mod launcher;
pub mod naming;
pub mod supervisor;
pub mod teardown;

pub use artifact::{Artifact, ArtifactItem, ArtifactRef, ArtifactStager};
pub use cluster::{Cluster, ClusterError, ClusterResult, LogLines};
pub use credential::{CredentialResolver, extract_username};
pub use dispatch::{BuildDispatcher, BuildOutcome, DispatchObserver};
pub use error::{BuildError, BuildResult, Stage};
pub use k8s::KubeCluster;
pub use launcher::{BuildRequest, JobHandle, JobLauncher, JobSpec, destination};
pub use naming::generate_job_name;
pub use supervisor::{LifecycleObserver, NoopObserver, Phase, Supervisor, TerminalPhase};
pub use teardown::{Removal, Teardown, TeardownReport};

pub use tokio_util::sync::CancellationToken;
