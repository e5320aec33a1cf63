use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("設定ディレクトリが見つかりません")]
    ConfigDirNotFound,

    #[error(
        "KABUILD_CONFIG_PATH で指定された設定ファイルが見つかりません: {0}\n\nヒント:\n  • パスを確認するか、環境変数を削除してください"
    )]
    ExplicitFileNotFound(PathBuf),

    #[error("設定ファイルのパースに失敗しました: {path}\n理由: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("無効な設定 '{key}': {message}")]
    Invalid { key: &'static str, message: String },

    #[error("設定ファイルを読み込めません")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ConfigError>;
