use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// パイプラインの段階。エラーにどこで失敗したかを添えるために使う
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Connect,
    ResolveCredential,
    StageArtifact,
    LaunchJob,
    Supervise,
    Cleanup,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::Connect => "クラスタへの接続",
            Stage::ResolveCredential => "レジストリ認証情報の取得",
            Stage::StageArtifact => "ビルドコンテキストの配置",
            Stage::LaunchJob => "ビルドジョブの投入",
            Stage::Supervise => "ビルドジョブの監視",
            Stage::Cleanup => "リソースの削除",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Error)]
pub enum BuildError {
    #[error(
        "クラスタ設定を読み込めません: {0}\n\nヒント:\n  • kubeconfig (~/.kube/config または KUBECONFIG) を確認してください\n  • kubectl config current-context で接続先を確認してください"
    )]
    Config(String),

    #[error(
        "Secret '{secret}' (namespace: {namespace}) に認証情報 '{key}' が見つかりません\n\nヒント:\n  • kubectl create secret docker-registry {secret} ... で作成してください"
    )]
    CredentialNotFound {
        namespace: String,
        secret: String,
        key: String,
    },

    #[error("認証情報の形式が不正です: {0}")]
    MalformedCredential(String),

    #[error("認証情報にユーザー名が含まれていません")]
    UsernameNotFound,

    #[error("ファイルの読み込みに失敗しました: {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{kind} '{name}' の作成に失敗しました: {message}")]
    Submission {
        kind: &'static str,
        name: String,
        message: String,
    },

    #[error("ジョブ '{job}' の状態取得に失敗しました: {message}")]
    Poll { job: String, message: String },

    #[error("ジョブ '{job}' のログ取得に失敗しました: {message}")]
    LogStream { job: String, message: String },

    #[error("ジョブ '{job}' が不明なフェーズを報告しました: {phase}")]
    UnknownTerminalPhase { job: String, phase: String },

    #[error("不正なビルド要求: {0}")]
    InvalidRequest(String),

    #[error("ビルドがキャンセルされました")]
    Cancelled,

    #[error("ビルドが {0:?} 以内に完了しませんでした")]
    TimedOut(Duration),

    #[error("{kind} '{name}' の削除に失敗しました: {message}")]
    CleanupFailed {
        kind: &'static str,
        name: String,
        message: String,
    },

    #[error("{stage}に失敗しました")]
    Stage {
        stage: Stage,
        #[source]
        source: Box<BuildError>,
    },
}

impl BuildError {
    /// 段階情報を付与する。既に付与済みなら何もしない
    pub fn in_stage(self, stage: Stage) -> Self {
        match self {
            BuildError::Stage { .. } => self,
            other => BuildError::Stage {
                stage,
                source: Box::new(other),
            },
        }
    }

    /// 段階ラップを剥がした元のエラー
    pub fn root(&self) -> &BuildError {
        match self {
            BuildError::Stage { source, .. } => source.root(),
            other => other,
        }
    }

    /// 失敗した段階（付与されていれば）
    pub fn stage(&self) -> Option<Stage> {
        match self {
            BuildError::Stage { stage, .. } => Some(*stage),
            _ => None,
        }
    }
}

pub type BuildResult<T> = std::result::Result<T, BuildError>;
pub type Result<T> = BuildResult<T>;
