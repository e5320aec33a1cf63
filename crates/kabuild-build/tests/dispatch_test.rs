mod common;

use common::{FakeCluster, RecordingObserver};
use kabuild_build::artifact::scan_dir;
use kabuild_build::{
    BuildDispatcher, BuildError, BuildRequest, CancellationToken, Stage, TerminalPhase,
};
use kabuild_config::{ArtifactNaming, KabuildConfig};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

fn build_context() -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("Dockerfile"), "FROM alpine\nCOPY . /app\n").unwrap();
    fs::create_dir_all(dir.path().join("src/nested")).unwrap();
    fs::write(dir.path().join("src/nested/main.rs"), "fn main() {}\n").unwrap();
    fs::write(dir.path().join("logo.png"), [0x89u8, 0x50, 0x4e, 0x47, 0xff]).unwrap();
    dir
}

fn dispatcher(cluster: Arc<FakeCluster>, config: KabuildConfig) -> BuildDispatcher {
    BuildDispatcher::new(cluster, config).with_poll_interval(Duration::from_millis(5))
}

async fn run(
    cluster: Arc<FakeCluster>,
    config: KabuildConfig,
    dir: &Path,
) -> Result<kabuild_build::BuildOutcome, BuildError> {
    let request = BuildRequest::new("myapp", None).unwrap();
    dispatcher(cluster, config)
        .dispatch(&request, dir, &CancellationToken::new())
        .await
}

#[tokio::test]
async fn test_dispatch_success() {
    let context = build_context();
    let cluster = Arc::new(
        FakeCluster::new()
            .with_docker_secret()
            .with_phases(&["Pending", "Running", "Succeeded"]),
    );
    let observer = Arc::new(RecordingObserver::default());

    let request = BuildRequest::new("myapp", Some("")).unwrap();
    let outcome = dispatcher(cluster.clone(), KabuildConfig::default())
        .with_observer(observer.clone())
        .dispatch(&request, context.path(), &CancellationToken::new())
        .await
        .unwrap();

    assert!(outcome.succeeded());
    assert_eq!(outcome.phase, TerminalPhase::Succeeded);
    assert!(outcome.job.name.starts_with("kaniko-pod-"));
    assert_eq!(outcome.job.namespace, "default");
    // 既定ではアーティファクト名はジョブ名
    assert_eq!(outcome.artifact, outcome.job.name);

    let state = cluster.state();
    let spec = &state.jobs[&outcome.job.name];
    assert!(
        spec.args
            .contains(&"--destination=alice/myapp:latest".to_string())
    );
    assert_eq!(spec.artifact.artifact.name, outcome.artifact);
    assert_eq!(state.log_opens, 1);

    assert_eq!(
        *observer.launched.lock().unwrap(),
        vec![(outcome.job.name.clone(), outcome.artifact.clone())]
    );
}

/// 配置したアーティファクトが元のディレクトリと完全に一致することを確認
#[tokio::test]
async fn test_dispatch_stages_exact_tree() {
    let context = build_context();
    let cluster = Arc::new(
        FakeCluster::new()
            .with_docker_secret()
            .with_phases(&["Succeeded"]),
    );

    let outcome = run(cluster.clone(), KabuildConfig::default(), context.path())
        .await
        .unwrap();

    let state = cluster.state();
    let artifact = &state.artifacts[&outcome.artifact];
    let keys: Vec<&str> = artifact.files().keys().map(String::as_str).collect();
    assert_eq!(keys, vec!["Dockerfile", "logo.png", "src/nested/main.rs"]);
    assert_eq!(artifact.files(), &scan_dir(context.path()).unwrap());
    assert_eq!(
        artifact.files()["logo.png"],
        vec![0x89u8, 0x50, 0x4e, 0x47, 0xff]
    );
    assert_eq!(
        artifact.labels()["kabuild.io/job"],
        outcome.job.name.as_str()
    );

    // マウント定義が全ファイルを元のパスに戻す
    let spec = &state.jobs[&outcome.job.name];
    let paths: Vec<&str> = spec
        .artifact
        .artifact
        .items
        .iter()
        .map(|i| i.path.as_str())
        .collect();
    assert_eq!(paths, keys);
}

#[tokio::test]
async fn test_dispatch_reports_failed_build() {
    let context = build_context();
    let cluster = Arc::new(
        FakeCluster::new()
            .with_docker_secret()
            .with_phases(&["Pending", "Running", "Failed"]),
    );

    let outcome = run(cluster.clone(), KabuildConfig::default(), context.path())
        .await
        .unwrap();

    assert!(!outcome.succeeded());
    assert_eq!(outcome.phase, TerminalPhase::Failed);
    // 失敗しても自動削除はしない
    let state = cluster.state();
    assert!(state.jobs.contains_key(&outcome.job.name));
    assert!(state.artifacts.contains_key(&outcome.artifact));
}

#[tokio::test]
async fn test_dispatch_missing_secret() {
    let context = build_context();
    let cluster = Arc::new(FakeCluster::new().with_phases(&["Succeeded"]));

    let err = run(cluster.clone(), KabuildConfig::default(), context.path())
        .await
        .unwrap_err();

    assert_eq!(err.stage(), Some(Stage::ResolveCredential));
    assert!(matches!(err.root(), BuildError::CredentialNotFound { .. }));

    let state = cluster.state();
    assert!(state.artifacts.is_empty());
    assert!(state.jobs.is_empty());
}

#[tokio::test]
async fn test_dispatch_malformed_secret() {
    let context = build_context();
    let cluster = Arc::new(FakeCluster::new().with_secret(
        "dockercred",
        ".dockerconfigjson",
        r#"{"credHelpers":{}}"#,
    ));

    let err = run(cluster, KabuildConfig::default(), context.path())
        .await
        .unwrap_err();

    assert!(matches!(err.root(), BuildError::MalformedCredential(_)));
}

#[tokio::test]
async fn test_dispatch_missing_dockerfile() {
    let context = tempfile::tempdir().unwrap();
    fs::write(context.path().join("README.md"), "no dockerfile here").unwrap();
    let cluster = Arc::new(FakeCluster::new().with_docker_secret());

    let err = run(cluster.clone(), KabuildConfig::default(), context.path())
        .await
        .unwrap_err();

    assert_eq!(err.stage(), Some(Stage::StageArtifact));
    assert!(matches!(err.root(), BuildError::Io { .. }));
    assert!(cluster.state().artifacts.is_empty());
}

#[tokio::test]
async fn test_dispatch_job_rejected() {
    let context = build_context();
    let cluster = Arc::new(
        FakeCluster::new()
            .with_docker_secret()
            .failing_job_creation(),
    );

    let err = run(cluster.clone(), KabuildConfig::default(), context.path())
        .await
        .unwrap_err();

    assert_eq!(err.stage(), Some(Stage::LaunchJob));
    assert!(matches!(
        err.root(),
        BuildError::Submission { kind: "Pod", .. }
    ));
    // アーティファクトは残る
    assert_eq!(cluster.state().artifacts.len(), 1);
    assert_eq!(cluster.state().phase_reads, 0);
}

#[tokio::test]
async fn test_dispatch_directory_naming() {
    let parent = tempfile::tempdir().unwrap();
    let context = parent.path().join("My_Service");
    fs::create_dir(&context).unwrap();
    fs::write(context.join("Dockerfile"), "FROM scratch\n").unwrap();

    let cluster = Arc::new(
        FakeCluster::new()
            .with_docker_secret()
            .with_phases(&["Succeeded"]),
    );
    let config = KabuildConfig {
        artifact_naming: ArtifactNaming::Directory,
        ..Default::default()
    };

    let outcome = run(cluster.clone(), config, &context).await.unwrap();

    assert_eq!(outcome.artifact, "my-service");
    assert!(cluster.state().artifacts.contains_key("my-service"));
}

/// 連続したビルドは名前が衝突しない
#[tokio::test]
async fn test_dispatch_repeated_builds_do_not_collide() {
    let context = build_context();
    let cluster = Arc::new(
        FakeCluster::new()
            .with_docker_secret()
            .with_phases(&["Succeeded"]),
    );

    let first = run(cluster.clone(), KabuildConfig::default(), context.path())
        .await
        .unwrap();
    let second = run(cluster.clone(), KabuildConfig::default(), context.path())
        .await
        .unwrap();

    assert_ne!(first.job.name, second.job.name);
    assert_eq!(cluster.state().artifacts.len(), 2);
}

#[tokio::test]
async fn test_dispatch_cancelled_before_start() {
    let context = build_context();
    let cluster = Arc::new(FakeCluster::new().with_docker_secret());
    let cancel = CancellationToken::new();
    cancel.cancel();

    let request = BuildRequest::new("myapp", None).unwrap();
    let err = dispatcher(cluster.clone(), KabuildConfig::default())
        .dispatch(&request, context.path(), &cancel)
        .await
        .unwrap_err();

    assert!(matches!(err.root(), BuildError::Cancelled));
    assert!(cluster.state().jobs.is_empty());
}

/// ディレクトリ名で命名すると同じディレクトリからの 2 回目は配置で拒否される
#[tokio::test]
async fn test_dispatch_directory_naming_collision() {
    let parent = tempfile::tempdir().unwrap();
    let context = parent.path().join("api");
    fs::create_dir(&context).unwrap();
    fs::write(context.join("Dockerfile"), "FROM scratch\n").unwrap();

    let cluster = Arc::new(
        FakeCluster::new()
            .with_docker_secret()
            .with_phases(&["Succeeded"]),
    );
    let config = KabuildConfig {
        artifact_naming: ArtifactNaming::Directory,
        ..Default::default()
    };

    let first = run(cluster.clone(), config.clone(), &context).await.unwrap();
    assert_eq!(first.artifact, "api");

    let err = run(cluster.clone(), config, &context).await.unwrap_err();

    assert_eq!(err.stage(), Some(Stage::StageArtifact));
    assert!(matches!(
        err.root(),
        BuildError::Submission { kind: "ConfigMap", name, .. } if name == "api"
    ));

    let state = cluster.state();
    assert_eq!(state.artifacts.len(), 1);
    assert_eq!(state.jobs.len(), 1);
    assert!(state.jobs.contains_key(&first.job.name));
}
