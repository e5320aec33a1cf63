//! レジストリ認証情報の解決
//!
//! クラスタの Secret (`kubernetes.io/dockerconfigjson`) から、イメージの
//! プッシュ先に使うユーザー名を取り出します。

use crate::cluster::Cluster;
use crate::error::{BuildError, BuildResult};
use base64::Engine;
use serde_json::{Map, Value};

/// Secret からレジストリのユーザー名を取り出す
#[derive(Debug, Clone)]
pub struct CredentialResolver {
    secret_name: String,
    secret_key: String,
    /// 優先して探すレジストリ（先頭から）
    registries: Vec<String>,
}

impl CredentialResolver {
    pub fn new(secret_name: impl Into<String>, secret_key: impl Into<String>) -> Self {
        Self {
            secret_name: secret_name.into(),
            secret_key: secret_key.into(),
            registries: Vec::new(),
        }
    }

    pub fn with_registries(mut self, registries: Vec<String>) -> Self {
        self.registries = registries;
        self
    }

    /// Secret を 1 回だけ読み、ユーザー名を返す
    pub async fn resolve(&self, cluster: &dyn Cluster, namespace: &str) -> BuildResult<String> {
        let not_found = || BuildError::CredentialNotFound {
            namespace: namespace.to_string(),
            secret: self.secret_name.clone(),
            key: self.secret_key.clone(),
        };

        let data = cluster
            .read_secret(namespace, &self.secret_name)
            .await
            .map_err(|e| BuildError::Config(format!("Secret を読み込めません: {}", e)))?
            .ok_or_else(not_found)?;

        let payload = data.get(&self.secret_key).ok_or_else(not_found)?;
        let username = extract_username(payload, &self.registries)?;

        tracing::debug!(secret = %self.secret_name, username = %username, "Resolved registry identity");
        Ok(username)
    }
}

/// Docker config JSON (`{"auths": {<registry>: {...}}}`) からユーザー名を取り出す
///
/// 探索順は `registries` に挙げたレジストリが先、残りはホスト名の辞書順。
/// 各エントリは `username` を優先し、無ければ `auth` (base64 の
/// `username:password`) から取り出す。
pub fn extract_username(payload: &[u8], registries: &[String]) -> BuildResult<String> {
    let config: Value = serde_json::from_slice(payload)
        .map_err(|e| BuildError::MalformedCredential(format!("JSON として読めません: {}", e)))?;

    let auths = config
        .get("auths")
        .and_then(Value::as_object)
        .ok_or_else(|| {
            BuildError::MalformedCredential("auths が見つからないか、オブジェクトではありません".to_string())
        })?;

    for registry in selection_order(auths, registries) {
        let Some(entry) = auths.get(registry).and_then(Value::as_object) else {
            continue;
        };

        if let Some(username) = username_of(entry) {
            tracing::debug!(registry = %registry, "Using registry credentials");
            return Ok(username);
        }
    }

    Err(BuildError::UsernameNotFound)
}

fn selection_order<'a>(auths: &'a Map<String, Value>, registries: &'a [String]) -> Vec<&'a str> {
    let mut order: Vec<&str> = registries
        .iter()
        .map(String::as_str)
        .filter(|r| auths.contains_key(*r))
        .collect();

    let mut rest: Vec<&str> = auths
        .keys()
        .map(String::as_str)
        .filter(|r| !order.contains(r))
        .collect();
    rest.sort_unstable();

    order.extend(rest);
    order
}

fn username_of(entry: &Map<String, Value>) -> Option<String> {
    if let Some(username) = entry.get("username").and_then(Value::as_str)
        && !username.is_empty()
    {
        return Some(username.to_string());
    }

    let auth_b64 = entry.get("auth").and_then(Value::as_str)?;
    let decoded = base64::engine::general_purpose::STANDARD
        .decode(auth_b64)
        .ok()?;
    let auth_str = String::from_utf8(decoded).ok()?;
    let (username, _password) = auth_str.split_once(':')?;

    (!username.is_empty()).then(|| username.to_string())
}
