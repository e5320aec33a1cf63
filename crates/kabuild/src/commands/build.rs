use colored::Colorize;
use kabuild_build::{
    BuildDispatcher, BuildRequest, CancellationToken, Stage, Teardown, TerminalPhase,
};
use kabuild_config::CleanupPolicy;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use crate::console::ConsoleObserver;

pub struct BuildArgs<'a> {
    pub repo: &'a str,
    pub tag: Option<&'a str>,
    pub dir: &'a Path,
    pub cleanup: Option<CleanupPolicy>,
    pub timeout: Option<u64>,
}

/// ビルドを実行し、成功したかどうかを返す
pub async fn handle(args: BuildArgs<'_>, cancel: &CancellationToken) -> anyhow::Result<bool> {
    let request = BuildRequest::new(args.repo, args.tag)?;

    let (mut config, cluster) = super::connect().await?;
    if let Some(policy) = args.cleanup {
        config.cleanup = policy;
    }
    if let Some(secs) = args.timeout {
        config.timeout_secs = Some(secs);
    }
    let cleanup = config.cleanup;
    let namespace = config.namespace.clone();

    println!(
        "{} {}:{} をビルドします (コンテキスト: {})",
        "🔨".blue(),
        request.repository().bold(),
        request.tag(),
        args.dir.display()
    );

    let started = Instant::now();
    let dispatcher = BuildDispatcher::new(Arc::new(cluster), config)
        .with_observer(Arc::new(ConsoleObserver::new()));
    let outcome = dispatcher.dispatch(&request, args.dir, cancel).await?;
    let elapsed = started.elapsed().as_secs();

    match outcome.phase {
        TerminalPhase::Succeeded => println!(
            "{} ビルドが完了しました ({}秒)",
            "✓".green().bold(),
            elapsed
        ),
        TerminalPhase::Failed => println!(
            "{} ビルドが失敗しました ({}秒)",
            "✗".red().bold(),
            elapsed
        ),
    }

    if cleanup.applies(outcome.succeeded()) {
        let report = Teardown::new(dispatcher.cluster(), &namespace)
            .run(Some(outcome.job.name.as_str()), Some(outcome.artifact.as_str()))
            .await
            .map_err(|e| e.in_stage(Stage::Cleanup))?;
        tracing::debug!(?report, "Cleanup finished");
        println!(
            "{} ジョブ {} と ConfigMap {} を削除しました",
            "🧹".blue(),
            outcome.job.name,
            outcome.artifact
        );
    } else {
        println!(
            "  後片付け: {}",
            format!(
                "kabuild clean {} --artifact {}",
                outcome.job.name, outcome.artifact
            )
            .dimmed()
        );
    }

    Ok(outcome.succeeded())
}
