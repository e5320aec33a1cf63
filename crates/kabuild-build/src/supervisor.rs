//! ビルドジョブの監視
//!
//! 一定間隔でフェーズを読み直し、Running になったらログを 1 度だけ開いて
//! 追従し、Succeeded / Failed を観測した時点で結果を返します。
//! 間隔は固定（バックオフなし）、タイムアウトは指定した場合のみ。

use crate::cluster::{Cluster, LogLines};
use crate::error::{BuildError, BuildResult};
use futures_util::stream::StreamExt;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep};
use tokio_util::sync::CancellationToken;

/// ジョブのフェーズ
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Pending,
    Running,
    Succeeded,
    Failed,
    /// ノードと通信できない等で一時的に不明
    Unknown,
}

impl Phase {
    /// クラスタが報告したフェーズ文字列を解釈する
    ///
    /// 未設定はスケジュール前とみなして `Pending`。既知の値以外はエラー。
    pub fn parse(job: &str, raw: Option<&str>) -> BuildResult<Phase> {
        match raw {
            None | Some("") | Some("Pending") => Ok(Phase::Pending),
            Some("Running") => Ok(Phase::Running),
            Some("Succeeded") => Ok(Phase::Succeeded),
            Some("Failed") => Ok(Phase::Failed),
            Some("Unknown") => Ok(Phase::Unknown),
            Some(other) => Err(BuildError::UnknownTerminalPhase {
                job: job.to_string(),
                phase: other.to_string(),
            }),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Phase::Succeeded | Phase::Failed)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Phase::Pending => "Pending",
            Phase::Running => "Running",
            Phase::Succeeded => "Succeeded",
            Phase::Failed => "Failed",
            Phase::Unknown => "Unknown",
        };
        f.write_str(s)
    }
}

/// 終了フェーズ
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminalPhase {
    Succeeded,
    Failed,
}

impl From<TerminalPhase> for Phase {
    fn from(phase: TerminalPhase) -> Self {
        match phase {
            TerminalPhase::Succeeded => Phase::Succeeded,
            TerminalPhase::Failed => Phase::Failed,
        }
    }
}

/// 監視中の出来事の通知先
pub trait LifecycleObserver: Send + Sync {
    /// フェーズが変わったとき（最初の観測を含む）
    fn on_phase(&self, _job: &str, _phase: Phase) {}

    /// ログの 1 行
    fn on_log_line(&self, _job: &str, _line: &str) {}

    /// ログが終わったとき。途中で切れた場合は理由付き
    fn on_log_end(&self, _job: &str, _error: Option<&str>) {}
}

/// 何もしない通知先
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl LifecycleObserver for NoopObserver {}

/// ログ転送タスク。途中で監視を抜けたら Drop で止める
struct LogForwarder {
    handle: Option<JoinHandle<()>>,
}

impl LogForwarder {
    fn spawn(job: String, mut lines: LogLines, observer: Arc<dyn LifecycleObserver>) -> Self {
        let handle = tokio::spawn(async move {
            while let Some(line) = lines.next().await {
                match line {
                    Ok(line) => observer.on_log_line(&job, &line),
                    Err(e) => {
                        tracing::warn!(job = %job, error = %e, "Log stream interrupted");
                        observer.on_log_end(&job, Some(&e.to_string()));
                        return;
                    }
                }
            }
            observer.on_log_end(&job, None);
        });

        Self {
            handle: Some(handle),
        }
    }

    /// 残りのログを流し切るまで最大 `grace` 待つ
    async fn finish(mut self, grace: Duration) {
        if let Some(handle) = self.handle.take() {
            let abort = handle.abort_handle();
            if tokio::time::timeout(grace, handle).await.is_err() {
                tracing::debug!("Log forwarder did not drain in time, aborting");
                abort.abort();
            }
        }
    }
}

impl Drop for LogForwarder {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

pub struct Supervisor {
    interval: Duration,
    timeout: Option<Duration>,
    observer: Arc<dyn LifecycleObserver>,
}

impl Supervisor {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            timeout: None,
            observer: Arc::new(NoopObserver),
        }
    }

    /// 監視全体の上限
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn LifecycleObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// 終了フェーズになるまで監視する
    ///
    /// フェーズの読み取り失敗・ログのオープン失敗は即座にエラーで返す
    /// （ジョブ自体は動き続けている可能性がある）。
    pub async fn supervise(
        &self,
        cluster: &dyn Cluster,
        namespace: &str,
        job: &str,
        cancel: &CancellationToken,
    ) -> BuildResult<TerminalPhase> {
        let deadline = self.timeout.map(|t| Instant::now() + t);
        let mut last_phase: Option<Phase> = None;
        let mut logs: Option<LogForwarder> = None;

        loop {
            let raw = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(BuildError::Cancelled),
                raw = cluster.job_phase(namespace, job) => raw,
            };
            let raw = raw.map_err(|e| BuildError::Poll {
                job: job.to_string(),
                message: e.to_string(),
            })?;

            let phase = Phase::parse(job, raw.as_deref())?;

            if last_phase != Some(phase) {
                tracing::info!(job = %job, phase = %phase, "Job phase changed");
                self.observer.on_phase(job, phase);
                if phase == Phase::Unknown {
                    tracing::warn!(job = %job, "Job phase is Unknown, continuing to poll");
                }
                last_phase = Some(phase);
            }

            match phase {
                Phase::Succeeded | Phase::Failed => {
                    if let Some(forwarder) = logs.take() {
                        forwarder.finish(self.interval).await;
                    }
                    return Ok(if phase == Phase::Succeeded {
                        TerminalPhase::Succeeded
                    } else {
                        TerminalPhase::Failed
                    });
                }
                Phase::Running if logs.is_none() => {
                    let lines = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Err(BuildError::Cancelled),
                        lines = cluster.stream_logs(namespace, job) => lines,
                    };
                    let lines = lines.map_err(|e| BuildError::LogStream {
                        job: job.to_string(),
                        message: e.to_string(),
                    })?;

                    tracing::debug!(job = %job, "Streaming job logs");
                    logs = Some(LogForwarder::spawn(
                        job.to_string(),
                        lines,
                        self.observer.clone(),
                    ));
                }
                _ => {}
            }

            let wait = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(BuildError::TimedOut(self.timeout.unwrap_or_default()));
                    }
                    self.interval.min(deadline - now)
                }
                None => self.interval,
            };

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(BuildError::Cancelled),
                _ = sleep(wait) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_parse() {
        assert_eq!(Phase::parse("j", None).unwrap(), Phase::Pending);
        assert_eq!(Phase::parse("j", Some("Pending")).unwrap(), Phase::Pending);
        assert_eq!(Phase::parse("j", Some("Running")).unwrap(), Phase::Running);
        assert_eq!(Phase::parse("j", Some("Succeeded")).unwrap(), Phase::Succeeded);
        assert_eq!(Phase::parse("j", Some("Failed")).unwrap(), Phase::Failed);
        assert_eq!(Phase::parse("j", Some("Unknown")).unwrap(), Phase::Unknown);
    }

    #[test]
    fn test_phase_parse_unrecognized() {
        let err = Phase::parse("kaniko-pod-x", Some("Evicted")).unwrap_err();
        assert!(matches!(
            err,
            BuildError::UnknownTerminalPhase { ref phase, .. } if phase == "Evicted"
        ));
    }

    #[test]
    fn test_terminal_phases() {
        assert!(Phase::Succeeded.is_terminal());
        assert!(Phase::Failed.is_terminal());
        assert!(!Phase::Running.is_terminal());
        assert!(!Phase::Unknown.is_terminal());
        assert_eq!(Phase::from(TerminalPhase::Failed), Phase::Failed);
    }
}
