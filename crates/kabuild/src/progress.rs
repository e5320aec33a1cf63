use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

/// ジョブ待機中のスピナー
pub struct WaitProgress {
    progress_bar: ProgressBar,
}

impl WaitProgress {
    pub fn new(job_name: &str) -> Self {
        let pb = ProgressBar::new_spinner();
        let style = ProgressStyle::default_spinner()
            .template("{spinner:.green} [{elapsed_precise}] {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner());
        pb.set_style(style);
        pb.set_message(format!("{} の起動を待っています...", job_name));
        pb.enable_steady_tick(Duration::from_millis(120));

        Self { progress_bar: pb }
    }

    pub fn set_message(&self, msg: &str) {
        self.progress_bar.set_message(msg.to_string());
    }

    /// スピナーを消して 1 行だけ残す
    pub fn finish(&self, message: &str) {
        self.progress_bar.finish_with_message(message.to_string());
    }

    pub fn clear(&self) {
        self.progress_bar.finish_and_clear();
    }
}
