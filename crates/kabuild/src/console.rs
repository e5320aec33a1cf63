//! ビルドの進行をターミナルに表示する

use crate::progress::WaitProgress;
use colored::Colorize;
use kabuild_build::{DispatchObserver, JobHandle, LifecycleObserver, Phase};
use std::sync::Mutex;

#[derive(Default)]
pub struct ConsoleObserver {
    spinner: Mutex<Option<WaitProgress>>,
}

impl ConsoleObserver {
    pub fn new() -> Self {
        Self::default()
    }

    /// スピナーを止める。`message` があれば最後の行として残す
    ///
    /// スピナーが無ければ `message` を普通に表示する。
    fn stop_spinner(&self, message: Option<&str>) {
        let progress = self.spinner.lock().ok().and_then(|mut s| s.take());
        match (progress, message) {
            (Some(progress), Some(msg)) => progress.finish(msg),
            (Some(progress), None) => progress.clear(),
            (None, Some(msg)) => println!("{}", msg),
            (None, None) => {}
        }
    }
}

impl LifecycleObserver for ConsoleObserver {
    fn on_phase(&self, job: &str, phase: Phase) {
        match phase {
            Phase::Pending => {
                if let Ok(spinner) = self.spinner.lock()
                    && let Some(progress) = spinner.as_ref()
                {
                    progress.set_message(&format!("{} は Pending です...", job));
                }
            }
            Phase::Running => {
                let line = format!("{} {}", "▶".cyan(), format!("{} を実行中", job).bold());
                self.stop_spinner(Some(&line));
            }
            Phase::Unknown => {
                self.stop_spinner(None);
                println!(
                    "{} {} の状態が一時的に取得できません",
                    "⚠".yellow(),
                    job
                );
            }
            Phase::Succeeded | Phase::Failed => self.stop_spinner(None),
        }
    }

    fn on_log_line(&self, job: &str, line: &str) {
        println!("{} {}", format!("[{}]", job).cyan(), line);
    }

    fn on_log_end(&self, job: &str, error: Option<&str>) {
        if let Some(error) = error {
            eprintln!(
                "{} {} のログ受信が途中で終了しました: {}",
                "⚠".yellow(),
                job,
                error
            );
        }
    }
}

impl DispatchObserver for ConsoleObserver {
    fn on_launched(&self, job: &JobHandle, artifact: &str) {
        println!(
            "{} ジョブ {} を投入しました (namespace: {}, ConfigMap: {})",
            "✓".green(),
            job.name.cyan(),
            job.namespace,
            artifact
        );
        if let Ok(mut spinner) = self.spinner.lock() {
            *spinner = Some(WaitProgress::new(&job.name));
        }
    }
}
