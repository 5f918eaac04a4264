use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;

use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use tracing::warn;

use crate::diff::{changed_paths, Change};

/// How status replies are written to the message log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageLogMode {
    /// Every status reply in full.
    Full,
    /// The first reply in full, then only the leaves that changed.
    Diffed,
}

#[derive(Serialize)]
#[serde(tag = "dir", rename_all = "lowercase")]
enum Entry<'a> {
    Req {
        method: &'a str,
        path: &'a str,
    },
    Cmd {
        command: &'a str,
        zone: Option<usize>,
        payload: &'a Value,
    },
    Status {
        full: bool,
        body: &'a Value,
    },
    Changes {
        changes: Vec<Change>,
    },
}

#[derive(Serialize)]
struct Line<'a> {
    ts: String,
    #[serde(flatten)]
    entry: Entry<'a>,
}

/// NDJSON record of the traffic with the cloud. Request bodies are never
/// written since they can carry credentials.
pub(crate) struct MessageLogger {
    mode: MessageLogMode,
    file: File,
    last_status: Option<Value>,
}

impl MessageLogger {
    pub fn new(mode: MessageLogMode, path: &Path) -> std::io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            mode,
            file,
            last_status: None,
        })
    }

    pub fn log_request(&mut self, method: &str, path: &str) {
        self.write(Entry::Req { method, path });
    }

    pub fn log_command(&mut self, command: &str, zone: Option<usize>, payload: &Value) {
        self.write(Entry::Cmd {
            command,
            zone,
            payload,
        });
    }

    pub fn log_status(&mut self, body: &Value) {
        match (self.mode, self.last_status.take()) {
            (MessageLogMode::Diffed, Some(previous)) => {
                let changes = changed_paths(&previous, body);
                self.write(Entry::Changes { changes });
            }
            (mode, _) => self.write(Entry::Status {
                full: mode == MessageLogMode::Diffed,
                body,
            }),
        }
        if self.mode == MessageLogMode::Diffed {
            self.last_status = Some(body.clone());
        }
    }

    fn write(&mut self, entry: Entry<'_>) {
        let line = Line {
            ts: Utc::now().to_rfc3339(),
            entry,
        };
        let result = serde_json::to_string(&line)
            .map_err(std::io::Error::from)
            .and_then(|text| writeln!(self.file, "{text}"));
        if let Err(e) = result {
            warn!("failed to write message log entry: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::NamedTempFile;

    fn lines(tmp: &NamedTempFile) -> Vec<Value> {
        std::fs::read_to_string(tmp.path())
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    #[test]
    fn request_entries_carry_no_body() {
        let tmp = NamedTempFile::new().unwrap();
        let mut logger = MessageLogger::new(MessageLogMode::Full, tmp.path()).unwrap();
        logger.log_request("POST", "/api/v0/client/user-devices");

        let line = &lines(&tmp)[0];
        assert_eq!(line["dir"], "req");
        assert_eq!(line["method"], "POST");
        assert_eq!(line["path"], "/api/v0/client/user-devices");
        assert!(line.get("body").is_none());
        assert!(line["ts"].as_str().is_some());
    }

    #[test]
    fn command_entries_name_the_zone() {
        let tmp = NamedTempFile::new().unwrap();
        let mut logger = MessageLogger::new(MessageLogMode::Full, tmp.path()).unwrap();
        let payload = json!({ "RemoteZoneInfo[2].TemperatureSetpoint_Cool_oC": 24.0 });
        logger.log_command("ZONE_COOL_SET_POINT", Some(2), &payload);

        let line = &lines(&tmp)[0];
        assert_eq!(line["dir"], "cmd");
        assert_eq!(line["command"], "ZONE_COOL_SET_POINT");
        assert_eq!(line["zone"], 2);
        assert_eq!(line["payload"], payload);
    }

    #[test]
    fn diffed_mode_logs_full_then_changes() {
        let tmp = NamedTempFile::new().unwrap();
        let mut logger = MessageLogger::new(MessageLogMode::Diffed, tmp.path()).unwrap();
        logger.log_status(&json!({ "MasterInfo": { "LiveTemp_oC": 23.0 } }));
        logger.log_status(&json!({ "MasterInfo": { "LiveTemp_oC": 23.5 } }));
        logger.log_status(&json!({ "MasterInfo": { "LiveTemp_oC": 23.5 } }));

        let lines = lines(&tmp);
        assert_eq!(lines[0]["dir"], "status");
        assert_eq!(lines[0]["full"], true);
        assert_eq!(lines[1]["dir"], "changes");
        assert_eq!(lines[1]["changes"][0]["path"], "MasterInfo.LiveTemp_oC");
        assert_eq!(lines[1]["changes"][0]["new"], 23.5);
        assert_eq!(lines[2]["changes"].as_array().unwrap().len(), 0);
    }

    #[test]
    fn full_mode_repeats_the_body() {
        let tmp = NamedTempFile::new().unwrap();
        let mut logger = MessageLogger::new(MessageLogMode::Full, tmp.path()).unwrap();
        let body = json!({ "isOnline": true });
        logger.log_status(&body);
        logger.log_status(&body);

        let lines = lines(&tmp);
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1]["full"], false);
        assert_eq!(lines[1]["body"], body);
    }
}
