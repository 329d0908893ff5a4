use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

const MAX_LOG_LINES: usize = 500;

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Line read from the child's stdout.
    Info,
    /// Line read from the child's stderr.
    Error,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Error => "error",
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct LogLine {
    #[serde(rename = "type")]
    pub level: LogLevel,
    pub message: String,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct StatusChange {
    pub running: bool,
    /// Exit code of the child; `None` while running or when the stop was
    /// requested by the supervisor.
    pub code: Option<i32>,
}

/// What subscribers of a role receive.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(untagged)]
pub enum ProcessEvent {
    Log(LogLine),
    Status(StatusChange),
}

pub enum LogLineEvent {
    Ready,
    Failure,
    Normal,
}

/// Recognizes the frps/frpc lines that mark a usable or a failed session.
pub fn classify_log_line(line: &str) -> LogLineEvent {
    let lower = line.to_lowercase();

    if lower.contains("login to server success")
        || lower.contains("frps started successfully")
        || lower.contains("start proxy success")
    {
        return LogLineEvent::Ready;
    }

    if lower.contains("[e]")
        || lower.contains("login to the server failed")
        || lower.contains("failed to parse")
        || lower.contains("address already in use")
        || lower.contains("authorization failed")
    {
        return LogLineEvent::Failure;
    }

    LogLineEvent::Normal
}

/// Bounded history of one child's output plus what it says about health.
#[derive(Default)]
pub struct ProcessLog {
    lines: VecDeque<LogLine>,
    pub ready: bool,
    pub error: Option<String>,
}

impl ProcessLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        self.lines.clear();
        self.ready = false;
        self.error = None;
    }

    pub fn push_line(&mut self, line: LogLine) {
        match classify_log_line(&line.message) {
            LogLineEvent::Ready => {
                if !self.ready {
                    log::info!("[detect] ready: {}", line.message);
                }
                self.ready = true;
            }
            LogLineEvent::Failure => {
                log::warn!("[detect] error: {}", line.message);
                if self.error.is_none() {
                    self.error = Some(line.message.clone());
                }
            }
            LogLineEvent::Normal => {}
        }

        self.lines.push_back(line);
        if self.lines.len() > MAX_LOG_LINES {
            self.lines.pop_front();
        }
    }

    pub fn lines(&self) -> Vec<LogLine> {
        self.lines.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(message: &str) -> LogLine {
        LogLine {
            level: LogLevel::Info,
            message: message.to_string(),
        }
    }

    #[test]
    fn test_history_is_bounded() {
        let mut log = ProcessLog::new();
        for index in 0..MAX_LOG_LINES + 20 {
            log.push_line(info(&format!("line {index}")));
        }
        assert_eq!(log.len(), MAX_LOG_LINES);
        assert_eq!(log.lines()[0].message, "line 20");
    }

    #[test]
    fn test_detects_login_and_first_error() {
        let mut log = ProcessLog::new();
        log.push_line(info("2024/01/01 10:00:00 [E] [service.go:1] login to the server failed: dial tcp: connection refused"));
        log.push_line(info("2024/01/01 10:00:05 [E] [service.go:1] something else"));
        log.push_line(info("2024/01/01 10:00:10 [I] [service.go:2] [abc] login to server success, get run id [abc]"));
        assert!(log.ready);
        assert!(log.error.as_deref().unwrap().contains("login to the server failed"));

        log.reset();
        assert!(log.is_empty());
        assert!(!log.ready);
        assert!(log.error.is_none());
    }

    #[test]
    fn test_event_wire_shape() {
        let event = ProcessEvent::Log(LogLine {
            level: LogLevel::Error,
            message: "boom".into(),
        });
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            serde_json::json!({ "type": "error", "message": "boom" })
        );
        let status = ProcessEvent::Status(StatusChange {
            running: false,
            code: Some(-1),
        });
        assert_eq!(
            serde_json::to_value(&status).unwrap(),
            serde_json::json!({ "running": false, "code": -1 })
        );
    }
}
