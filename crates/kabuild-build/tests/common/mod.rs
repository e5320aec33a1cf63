use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};
use kabuild_build::{
    Artifact, Cluster, ClusterError, ClusterResult, DispatchObserver, JobHandle, JobSpec,
    LifecycleObserver, LogLines, Phase,
};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

pub const DOCKER_CONFIG: &str = r#"{"auths":{"registry.example.com":{"username":"alice"}}}"#;

/// メモリ上のクラスタ
#[derive(Default)]
pub struct FakeCluster {
    state: Mutex<State>,
}

#[derive(Default)]
pub struct State {
    pub secrets: HashMap<String, BTreeMap<String, Vec<u8>>>,
    pub artifacts: BTreeMap<String, Artifact>,
    pub jobs: BTreeMap<String, JobSpec>,
    /// 順に返すフェーズ。尽きたら最後の値を返し続ける
    pub phases: VecDeque<Result<Option<String>, String>>,
    pub last_phase: Option<String>,
    pub phase_reads: usize,
    pub log_lines: Vec<String>,
    pub log_opens: usize,
    pub fail_log_open: bool,
    pub fail_create_job: bool,
    pub fail_delete: bool,
}

#[allow(dead_code)]
impl FakeCluster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_secret(self, name: &str, key: &str, payload: &str) -> Self {
        self.state()
            .secrets
            .entry(name.to_string())
            .or_default()
            .insert(key.to_string(), payload.as_bytes().to_vec());
        self
    }

    pub fn with_docker_secret(self) -> Self {
        self.with_secret("dockercred", ".dockerconfigjson", DOCKER_CONFIG)
    }

    pub fn with_phases(self, phases: &[&str]) -> Self {
        self.state()
            .phases
            .extend(phases.iter().map(|p| Ok(Some(p.to_string()))));
        self
    }

    pub fn with_poll_error(self, message: &str) -> Self {
        self.state().phases.push_back(Err(message.to_string()));
        self
    }

    pub fn with_log_lines(self, lines: &[&str]) -> Self {
        self.state().log_lines = lines.iter().map(|l| l.to_string()).collect();
        self
    }

    pub fn failing_log_stream(self) -> Self {
        self.state().fail_log_open = true;
        self
    }

    pub fn failing_job_creation(self) -> Self {
        self.state().fail_create_job = true;
        self
    }

    pub fn failing_deletes(self) -> Self {
        self.state().fail_delete = true;
        self
    }

    pub fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }
}

#[async_trait]
impl Cluster for FakeCluster {
    async fn read_secret(
        &self,
        _namespace: &str,
        name: &str,
    ) -> ClusterResult<Option<BTreeMap<String, Vec<u8>>>> {
        Ok(self.state().secrets.get(name).cloned())
    }

    async fn create_artifact(&self, _namespace: &str, artifact: &Artifact) -> ClusterResult<()> {
        let mut state = self.state();
        if state.artifacts.contains_key(artifact.name()) {
            return Err(ClusterError::AlreadyExists(artifact.name().to_string()));
        }
        state
            .artifacts
            .insert(artifact.name().to_string(), artifact.clone());
        Ok(())
    }

    async fn create_job(&self, _namespace: &str, spec: &JobSpec) -> ClusterResult<()> {
        let mut state = self.state();
        if state.fail_create_job {
            return Err(ClusterError::Api("exceeded quota".to_string()));
        }
        if state.jobs.contains_key(&spec.name) {
            return Err(ClusterError::AlreadyExists(spec.name.clone()));
        }
        state.jobs.insert(spec.name.clone(), spec.clone());
        Ok(())
    }

    async fn job_phase(&self, _namespace: &str, _name: &str) -> ClusterResult<Option<String>> {
        let mut state = self.state();
        state.phase_reads += 1;
        match state.phases.pop_front() {
            Some(Ok(phase)) => {
                state.last_phase = phase.clone();
                Ok(phase)
            }
            Some(Err(message)) => Err(ClusterError::Api(message)),
            None => Ok(state.last_phase.clone()),
        }
    }

    async fn stream_logs(&self, _namespace: &str, name: &str) -> ClusterResult<LogLines> {
        let mut state = self.state();
        if state.fail_log_open {
            return Err(ClusterError::NotFound(format!("container of {}", name)));
        }
        state.log_opens += 1;
        let lines: Vec<ClusterResult<String>> = state.log_lines.iter().cloned().map(Ok).collect();
        Ok(stream::iter(lines).boxed())
    }

    async fn delete_job(&self, _namespace: &str, name: &str) -> ClusterResult<bool> {
        let mut state = self.state();
        if state.fail_delete {
            return Err(ClusterError::Api("forbidden".to_string()));
        }
        Ok(state.jobs.remove(name).is_some())
    }

    async fn delete_artifact(&self, _namespace: &str, name: &str) -> ClusterResult<bool> {
        let mut state = self.state();
        if state.fail_delete {
            return Err(ClusterError::Api("forbidden".to_string()));
        }
        Ok(state.artifacts.remove(name).is_some())
    }
}

/// 通知を記録する
#[derive(Default)]
pub struct RecordingObserver {
    pub phases: Mutex<Vec<Phase>>,
    pub lines: Mutex<Vec<String>>,
    pub log_ends: Mutex<usize>,
    pub launched: Mutex<Vec<(String, String)>>,
}

impl LifecycleObserver for RecordingObserver {
    fn on_phase(&self, _job: &str, phase: Phase) {
        self.phases.lock().unwrap().push(phase);
    }

    fn on_log_line(&self, _job: &str, line: &str) {
        self.lines.lock().unwrap().push(line.to_string());
    }

    fn on_log_end(&self, _job: &str, _error: Option<&str>) {
        *self.log_ends.lock().unwrap() += 1;
    }
}

impl DispatchObserver for RecordingObserver {
    fn on_launched(&self, job: &JobHandle, artifact: &str) {
        self.launched
            .lock()
            .unwrap()
            .push((job.name.clone(), artifact.to_string()));
    }
}
