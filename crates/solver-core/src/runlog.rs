//! Human-readable log of a run, returned to the front-end in `RunReport`.
//! Every line is also emitted through `tracing`.

use chrono::Local;
use tracing::{info, warn};

/// Lines longer than this are cut down to `TRUNCATED_LEN`
const MAX_LINE_LEN: usize = 1000;
const TRUNCATED_LEN: usize = 500;

#[derive(Debug, Default, Clone)]
pub struct RunLog {
    lines: Vec<String>,
}

impl RunLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn info(&mut self, message: impl AsRef<str>) {
        let line = clip(message.as_ref());
        info!("{}", line);
        self.push(line);
    }

    /// Absorbed or escalated failures
    pub fn warn(&mut self, message: impl AsRef<str>) {
        let line = clip(message.as_ref());
        warn!("{}", line);
        self.push(line);
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn into_lines(self) -> Vec<String> {
        self.lines
    }

    fn push(&mut self, line: String) {
        self.lines
            .push(format!("[{}] {}", Local::now().format("%H:%M:%S"), line));
    }
}

fn clip(message: &str) -> String {
    if message.chars().count() <= MAX_LINE_LEN {
        return message.to_string();
    }
    let head: String = message.chars().take(TRUNCATED_LEN).collect();
    format!("{}... [truncated]", head)
}
