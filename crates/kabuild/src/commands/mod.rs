pub mod build;
pub mod clean;

use anyhow::Context;
use colored::Colorize;
use kabuild_build::{KubeCluster, Stage};
use kabuild_config::KabuildConfig;

/// 設定を読み込み、接続先を表示してクラスタに接続する
pub async fn connect() -> anyhow::Result<(KabuildConfig, KubeCluster)> {
    let config = KabuildConfig::load().context("設定の読み込みに失敗しました")?;

    let context = KubeCluster::current_context().unwrap_or_else(|| "(in-cluster)".to_string());
    println!(
        "クラスタ: {}  namespace: {}",
        context.cyan(),
        config.namespace.cyan()
    );

    let cluster = KubeCluster::connect()
        .await
        .map_err(|e| e.in_stage(Stage::Connect))?;

    Ok((config, cluster))
}
