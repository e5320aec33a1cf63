//! ビルドコンテキストのアーティファクト化
//!
//! ローカルディレクトリを丸ごと読み込み、クラスタから参照できる
//! キー/値オブジェクト (ConfigMap) として登録します。

use crate::cluster::Cluster;
use crate::error::{BuildError, BuildResult};
use std::collections::{BTreeMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};

/// ConfigMap 1 つあたりの上限 (1MiB)
const CONFIGMAP_SIZE_LIMIT: usize = 1024 * 1024;

/// ディレクトリのスナップショット（相対パス -> 内容）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    name: String,
    labels: BTreeMap<String, String>,
    files: BTreeMap<String, Vec<u8>>,
}

/// アーティファクト内の 1 ファイルの、オブジェクトキーとマウント先相対パスの対応
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactItem {
    pub key: String,
    pub path: String,
}

/// 投入済みアーティファクトへの参照
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactRef {
    pub name: String,
    pub items: Vec<ArtifactItem>,
}

impl Artifact {
    pub fn new(name: impl Into<String>, files: BTreeMap<String, Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            labels: BTreeMap::new(),
            files,
        }
    }

    pub fn with_labels(mut self, labels: BTreeMap<String, String>) -> Self {
        self.labels = labels;
        self
    }

    /// `dir` を再帰的に走査してアーティファクトを作る
    pub fn from_dir(name: impl Into<String>, dir: &Path) -> BuildResult<Self> {
        Ok(Self::new(name, scan_dir(dir)?))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn labels(&self) -> &BTreeMap<String, String> {
        &self.labels
    }

    pub fn files(&self) -> &BTreeMap<String, Vec<u8>> {
        &self.files
    }

    pub fn total_size(&self) -> usize {
        self.files.values().map(Vec::len).sum()
    }

    /// キーとパスの対応（パス順）
    pub fn items(&self) -> Vec<ArtifactItem> {
        self.files
            .keys()
            .map(|path| ArtifactItem {
                key: encode_key(path),
                path: path.clone(),
            })
            .collect()
    }

    pub fn reference(&self) -> ArtifactRef {
        ArtifactRef {
            name: self.name.clone(),
            items: self.items(),
        }
    }
}

/// 相対パスを ConfigMap のキーとして使える形に変換
///
/// キーに使えるのは `[A-Za-z0-9.-_]` のみなので、それ以外のバイトと `_` 自体を
/// `_xx` (16進) にエスケープする。`/` は `_2f` になる。
pub fn encode_key(path: &str) -> String {
    let mut key = String::with_capacity(path.len());
    for b in path.bytes() {
        if b.is_ascii_alphanumeric() || b == b'.' || b == b'-' {
            key.push(b as char);
        } else {
            key.push_str(&format!("_{:02x}", b));
        }
    }
    key
}

/// [`encode_key`] の逆変換。不正なエスケープは `None`
pub fn decode_key(key: &str) -> Option<String> {
    let bytes = key.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'_' {
            let hex = key.get(i + 1..i + 3)?;
            out.push(u8::from_str_radix(hex, 16).ok()?);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).ok()
}

/// ディレクトリ配下の全通常ファイルを読み込む
///
/// キーは `dir` からの相対パス (`/` 区切り)。途中で 1 つでも読めなければ
/// 全体を失敗とする。
pub fn scan_dir(dir: &Path) -> BuildResult<BTreeMap<String, Vec<u8>>> {
    let mut files = BTreeMap::new();
    let mut ancestors = HashSet::new();
    visit_dir(dir, dir, &mut files, &mut ancestors)?;
    Ok(files)
}

fn io_error(path: &Path, source: io::Error) -> BuildError {
    BuildError::Io {
        path: path.to_path_buf(),
        source,
    }
}

fn visit_dir(
    root: &Path,
    dir: &Path,
    files: &mut BTreeMap<String, Vec<u8>>,
    ancestors: &mut HashSet<PathBuf>,
) -> BuildResult<()> {
    // 祖先を指すシンボリックリンクだけをループとみなす。
    // 同じディレクトリへの別名は両方とも取り込む
    let canonical_dir = dir.canonicalize().map_err(|e| io_error(dir, e))?;
    if !ancestors.insert(canonical_dir.clone()) {
        tracing::warn!(dir = %canonical_dir.display(), "Symlink loop detected, skipping");
        return Ok(());
    }

    let result = visit_entries(root, dir, files, ancestors);
    ancestors.remove(&canonical_dir);
    result
}

fn visit_entries(
    root: &Path,
    dir: &Path,
    files: &mut BTreeMap<String, Vec<u8>>,
    ancestors: &mut HashSet<PathBuf>,
) -> BuildResult<()> {
    let entries = std::fs::read_dir(dir).map_err(|e| io_error(dir, e))?;
    for entry in entries {
        let entry = entry.map_err(|e| io_error(dir, e))?;
        let path = entry.path();
        // シンボリックリンクは辿った先で判定する
        let metadata = std::fs::metadata(&path).map_err(|e| io_error(&path, e))?;

        if metadata.is_dir() {
            visit_dir(root, &path, files, ancestors)?;
        } else if metadata.is_file() {
            let content = std::fs::read(&path).map_err(|e| io_error(&path, e))?;
            files.insert(relative_key(root, &path)?, content);
        } else {
            tracing::debug!(path = %path.display(), "Skipping non-regular file");
        }
    }

    Ok(())
}

fn relative_key(root: &Path, path: &Path) -> BuildResult<String> {
    let rel = path.strip_prefix(root).map_err(|e| {
        io_error(
            path,
            io::Error::new(io::ErrorKind::InvalidInput, e.to_string()),
        )
    })?;

    let mut parts = Vec::new();
    for component in rel.components() {
        let part = component.as_os_str().to_str().ok_or_else(|| {
            io_error(
                path,
                io::Error::new(
                    io::ErrorKind::InvalidData,
                    "ファイル名が UTF-8 ではありません",
                ),
            )
        })?;
        parts.push(part);
    }
    Ok(parts.join("/"))
}

/// アーティファクトの作成と投入
#[derive(Debug, Clone)]
pub struct ArtifactStager {
    dockerfile: String,
}

impl ArtifactStager {
    /// `dockerfile` はコンテキストルートからの相対パス
    pub fn new(dockerfile: impl Into<String>) -> Self {
        Self {
            dockerfile: dockerfile.into(),
        }
    }

    /// `dir` をスナップショットして `name` のアーティファクトとして投入する
    ///
    /// 走査がすべて成功するまでクラスタには何も書き込まない。
    pub async fn stage(
        &self,
        cluster: &dyn Cluster,
        namespace: &str,
        dir: &Path,
        name: &str,
        labels: BTreeMap<String, String>,
    ) -> BuildResult<ArtifactRef> {
        tracing::debug!(dir = %dir.display(), artifact = name, "Scanning build context");

        let scan_root = dir.to_path_buf();
        let files = tokio::task::spawn_blocking(move || scan_dir(&scan_root))
            .await
            .map_err(|e| io_error(dir, io::Error::other(e)))??;

        if !files.contains_key(&self.dockerfile) {
            return Err(io_error(
                &dir.join(&self.dockerfile),
                io::Error::new(
                    io::ErrorKind::NotFound,
                    "Dockerfile がビルドコンテキストにありません",
                ),
            ));
        }

        let artifact = Artifact::new(name, files).with_labels(labels);
        Self::check_size(&artifact);

        cluster
            .create_artifact(namespace, &artifact)
            .await
            .map_err(|e| BuildError::Submission {
                kind: "ConfigMap",
                name: name.to_string(),
                message: e.to_string(),
            })?;

        tracing::info!(
            artifact = name,
            files = artifact.files().len(),
            bytes = artifact.total_size(),
            "Build context staged"
        );

        Ok(artifact.reference())
    }

    /// サイズの警告（制限はしない）
    fn check_size(artifact: &Artifact) {
        let size = artifact.total_size();
        if size > CONFIGMAP_SIZE_LIMIT {
            tracing::warn!(
                "ビルドコンテキストが大きすぎます（{}KB）。クラスタが ConfigMap を拒否する可能性があります",
                size / 1024
            );
        }
    }
}
