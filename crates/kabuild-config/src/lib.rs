//! kabuild の設定管理
//!
//! 設定ファイル (YAML) の探索・読み込み、環境変数による上書き、検証を行います。
//! 設定ファイルが存在しない場合はデフォルト値で動作します。

pub mod error;

pub use error::*;

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// 設定ファイルの候補（優先順）
const CANDIDATES: [&str; 4] = [
    "kabuild.local.yaml",
    ".kabuild.local.yaml",
    "kabuild.yaml",
    ".kabuild.yaml",
];

/// アーティファクト (ConfigMap) の命名方針
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ArtifactNaming {
    /// 生成したジョブ名をそのまま使う
    #[default]
    Job,
    /// 作業ディレクトリ名を使う（ディレクトリ単位で衝突しうる）
    Directory,
}

/// ビルド終了後のリソース削除方針
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CleanupPolicy {
    #[default]
    Never,
    OnSuccess,
    Always,
}

impl CleanupPolicy {
    /// ビルド結果に対して削除を行うべきか
    pub fn applies(&self, succeeded: bool) -> bool {
        match self {
            CleanupPolicy::Never => false,
            CleanupPolicy::OnSuccess => succeeded,
            CleanupPolicy::Always => true,
        }
    }
}

impl FromStr for CleanupPolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "never" => Ok(CleanupPolicy::Never),
            "on-success" => Ok(CleanupPolicy::OnSuccess),
            "always" => Ok(CleanupPolicy::Always),
            other => Err(format!(
                "unknown cleanup policy '{}' (expected never, on-success or always)",
                other
            )),
        }
    }
}

/// kabuild の設定
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct KabuildConfig {
    /// ジョブを投入する namespace
    pub namespace: String,
    /// レジストリ認証情報を持つ Secret 名
    pub secret_name: String,
    /// Secret 内の認証情報キー
    pub secret_key: String,
    /// ビルダーイメージ
    pub builder_image: String,
    /// アーティファクトのマウント先
    pub workspace_path: String,
    /// 認証情報のマウント先ディレクトリ
    pub credential_path: String,
    /// マウント先での認証情報ファイル名
    pub credential_file: String,
    /// ワークスペース内の Dockerfile のパス
    pub dockerfile: String,
    /// ジョブ名のプレフィックス
    pub job_prefix: String,
    /// ジョブ名のランダム部分の長さ
    pub name_length: usize,
    /// フェーズ確認の間隔（秒）
    pub poll_interval_secs: u64,
    /// 監視のタイムアウト（秒）。未指定なら無期限
    pub timeout_secs: Option<u64>,
    pub artifact_naming: ArtifactNaming,
    /// 優先するレジストリ（先頭から順に探す）
    pub registries: Vec<String>,
    pub cleanup: CleanupPolicy,
}

impl Default for KabuildConfig {
    fn default() -> Self {
        Self {
            namespace: "default".to_string(),
            secret_name: "dockercred".to_string(),
            secret_key: ".dockerconfigjson".to_string(),
            builder_image: "gcr.io/kaniko-project/executor:latest".to_string(),
            workspace_path: "/workspace".to_string(),
            credential_path: "/kaniko/.docker".to_string(),
            credential_file: "config.json".to_string(),
            dockerfile: "Dockerfile".to_string(),
            job_prefix: "kaniko-pod-".to_string(),
            name_length: 10,
            poll_interval_secs: 10,
            timeout_secs: None,
            artifact_naming: ArtifactNaming::Job,
            registries: Vec::new(),
            cleanup: CleanupPolicy::Never,
        }
    }
}

impl KabuildConfig {
    /// 設定ファイルを探索して読み込み、環境変数で上書きして検証する
    pub fn load() -> Result<Self> {
        let mut config = match find_config_file()? {
            Some(path) => {
                tracing::debug!(path = %path.display(), "Loading kabuild config");
                Self::from_file(&path)?
            }
            None => {
                tracing::debug!("No kabuild config file found, using defaults");
                Self::default()
            }
        };

        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// 指定したファイルから読み込む（環境変数は反映しない）
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content).map_err(|e| match e {
            ConfigError::Parse { message, .. } => ConfigError::Parse {
                path: path.to_path_buf(),
                message,
            },
            other => other,
        })
    }

    /// YAML 文字列から読み込む。空の文書はデフォルト扱い
    pub fn from_yaml(content: &str) -> Result<Self> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }

        serde_yaml::from_str(content).map_err(|e| ConfigError::Parse {
            path: PathBuf::new(),
            message: e.to_string(),
        })
    }

    /// KABUILD_* 環境変数による上書き
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(namespace) = std::env::var("KABUILD_NAMESPACE")
            && !namespace.is_empty()
        {
            self.namespace = namespace;
        }

        if let Ok(image) = std::env::var("KABUILD_BUILDER_IMAGE")
            && !image.is_empty()
        {
            self.builder_image = image;
        }

        if let Ok(interval) = std::env::var("KABUILD_POLL_INTERVAL") {
            self.poll_interval_secs =
                interval
                    .trim()
                    .parse()
                    .map_err(|_| ConfigError::Invalid {
                        key: "poll_interval_secs",
                        message: format!("KABUILD_POLL_INTERVAL は秒数で指定してください: {}", interval),
                    })?;
        }

        Ok(())
    }

    /// 値の妥当性を検証
    pub fn validate(&self) -> Result<()> {
        if self.name_length < 5 {
            return Err(ConfigError::Invalid {
                key: "name_length",
                message: format!("5 以上を指定してください (現在: {})", self.name_length),
            });
        }

        if self.poll_interval_secs == 0 {
            return Err(ConfigError::Invalid {
                key: "poll_interval_secs",
                message: "1 秒以上を指定してください".to_string(),
            });
        }

        let prefix_ok = self
            .job_prefix
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
            && self
                .job_prefix
                .chars()
                .next()
                .is_some_and(|c| c.is_ascii_lowercase());
        if !prefix_ok {
            return Err(ConfigError::Invalid {
                key: "job_prefix",
                message: format!(
                    "英小文字で始まり、英小文字・数字・'-' のみを含む必要があります: {:?}",
                    self.job_prefix
                ),
            });
        }

        // Pod 名は 63 文字以内
        if self.job_prefix.len() + self.name_length > 63 {
            return Err(ConfigError::Invalid {
                key: "name_length",
                message: "job_prefix と合わせて 63 文字以内にしてください".to_string(),
            });
        }

        for (key, value) in [
            ("namespace", &self.namespace),
            ("secret_name", &self.secret_name),
            ("secret_key", &self.secret_key),
            ("builder_image", &self.builder_image),
        ] {
            if value.is_empty() {
                return Err(ConfigError::Invalid {
                    key,
                    message: "空にはできません".to_string(),
                });
            }
        }

        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}

/// kabuild のグローバル設定ディレクトリ (~/.config/kabuild)
pub fn get_config_dir() -> Result<PathBuf> {
    Ok(dirs::config_dir()
        .ok_or(ConfigError::ConfigDirNotFound)?
        .join("kabuild"))
}

/// 設定ファイルを探す
///
/// 以下の優先順位で検索:
/// 1. 環境変数 KABUILD_CONFIG_PATH (直接パス指定、存在しなければエラー)
/// 2. カレントディレクトリ: kabuild.local.yaml, .kabuild.local.yaml, kabuild.yaml, .kabuild.yaml
/// 3. ~/.config/kabuild/config.yaml (グローバル設定)
///
/// どれも見つからなければ `Ok(None)`
pub fn find_config_file() -> Result<Option<PathBuf>> {
    if let Ok(config_path) = std::env::var("KABUILD_CONFIG_PATH") {
        let path = PathBuf::from(config_path);
        if path.exists() {
            return Ok(Some(path));
        }
        return Err(ConfigError::ExplicitFileNotFound(path));
    }

    let current_dir = std::env::current_dir()?;
    for filename in &CANDIDATES {
        let path = current_dir.join(filename);
        if path.exists() {
            return Ok(Some(path));
        }
    }

    if let Ok(config_dir) = get_config_dir() {
        let global_config = config_dir.join("config.yaml");
        if global_config.exists() {
            return Ok(Some(global_config));
        }
    }

    Ok(None)
}
