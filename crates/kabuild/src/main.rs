mod commands;
mod console;
mod progress;

use clap::{Parser, Subcommand};
use colored::Colorize;
use kabuild_build::CancellationToken;
use kabuild_config::CleanupPolicy;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "kabuild")]
#[command(about = "手元のディレクトリを、クラスタの Kaniko でビルドする。", long_about = None)]
struct Cli {
    /// 詳細なログを出力
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// イメージをビルドしてレジストリへ push
    Build {
        /// リポジトリ名（push 先は <ユーザー名>/<リポジトリ>:<タグ>）
        #[arg(short, long)]
        repo: String,
        /// イメージタグ（省略時は latest）
        #[arg(short, long)]
        tag: Option<String>,
        /// ビルドコンテキストのディレクトリ
        #[arg(short, long, default_value = ".")]
        dir: PathBuf,
        /// 終了後の削除方針 (never, on-success, always)
        #[arg(long)]
        cleanup: Option<CleanupPolicy>,
        /// 監視のタイムアウト（秒）
        #[arg(long)]
        timeout: Option<u64>,
    },
    /// ビルドで作成した Pod と ConfigMap を削除
    Clean {
        /// ジョブ (Pod) 名
        job: String,
        /// 削除する ConfigMap 名
        #[arg(long)]
        artifact: Option<String>,
    },
    /// バージョン情報を表示
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::WARN
    };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into()),
        )
        .init();

    match run(cli).await {
        Ok(true) => Ok(()),
        Ok(false) => std::process::exit(1),
        Err(e) => {
            eprintln!("{} {:#}", "✗".red().bold(), e);
            std::process::exit(1);
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<bool> {
    match cli.command {
        Commands::Version => {
            println!("kabuild {}", env!("CARGO_PKG_VERSION"));
            Ok(true)
        }
        Commands::Build {
            repo,
            tag,
            dir,
            cleanup,
            timeout,
        } => {
            let cancel = CancellationToken::new();
            let trigger = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    eprintln!("{}", "中断しています...".yellow());
                    trigger.cancel();
                }
            });

            let args = commands::build::BuildArgs {
                repo: &repo,
                tag: tag.as_deref(),
                dir: &dir,
                cleanup,
                timeout,
            };
            commands::build::handle(args, &cancel).await
        }
        Commands::Clean { job, artifact } => {
            commands::clean::handle(&job, artifact.as_deref()).await?;
            Ok(true)
        }
    }
}
