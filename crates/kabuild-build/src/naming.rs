//! ジョブ名・アーティファクト名の生成

use rand::Rng;
use std::collections::BTreeMap;
use std::path::Path;

const NAME_CHARS: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// ConfigMap 名の上限 (DNS-1123 subdomain)
const MAX_ARTIFACT_NAME: usize = 253;

/// ディレクトリ名が使えない場合のアーティファクト名
const FALLBACK_ARTIFACT_NAME: &str = "kabuild-context";

/// `prefix` に英小文字・数字 `length` 文字を付けたジョブ名を生成
///
/// 乱数は `rand::rng()` (OS エントロピーで seed される CSPRNG) から取るため、
/// マルチテナントのクラスタでも名前を推測されにくい。
pub fn generate_job_name(prefix: &str, length: usize) -> String {
    let mut rng = rand::rng();
    let mut name = String::with_capacity(prefix.len() + length);
    name.push_str(prefix);
    for _ in 0..length {
        let idx = rng.random_range(0..NAME_CHARS.len());
        name.push(NAME_CHARS[idx] as char);
    }
    name
}

/// ディレクトリのベース名から ConfigMap として有効な名前を作る
///
/// # Examples
/// - `/home/alice/My_App` -> `my-app`
/// - `/srv/api.v2` -> `api.v2`
pub fn artifact_name_for_dir(dir: &Path) -> String {
    let base = dir
        .file_name()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();

    let mut name: String = base
        .chars()
        .map(|c| {
            let c = c.to_ascii_lowercase();
            if c.is_ascii_lowercase() || c.is_ascii_digit() || c == '.' || c == '-' {
                c
            } else {
                '-'
            }
        })
        .collect();
    name.truncate(MAX_ARTIFACT_NAME);

    let trimmed = name.trim_matches(|c: char| c == '-' || c == '.');
    if trimmed.is_empty() {
        FALLBACK_ARTIFACT_NAME.to_string()
    } else {
        trimmed.to_string()
    }
}

/// kabuild が作成したリソースに付けるラベル
pub fn managed_labels(job_name: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (
            "app.kubernetes.io/managed-by".to_string(),
            "kabuild".to_string(),
        ),
        ("kabuild.io/job".to_string(), job_name.to_string()),
    ])
}
