//! File outbox notifier
//!
//! Stands in for an email provider: every message becomes one JSON file in
//! the outbox directory, named by timestamp so `ls` lists them in order.

use std::fs;
use std::path::PathBuf;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::result::{Error, Result};
use crate::ports::NotificationSender;

/// A message as written to the outbox
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboxMessage {
    pub to: String,
    pub subject: String,
    pub body: String,
    pub sent_at: String,
}

pub struct OutboxNotifier {
    dir: PathBuf,
}

impl OutboxNotifier {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    pub fn dir(&self) -> &PathBuf {
        &self.dir
    }

    /// Messages currently in the outbox, oldest first
    pub fn list(&self) -> Result<Vec<OutboxMessage>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let mut paths: Vec<PathBuf> = fs::read_dir(&self.dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.extension().map(|e| e == "json").unwrap_or(false))
            .collect();
        paths.sort();

        let mut messages = Vec::with_capacity(paths.len());
        for path in paths {
            let content = fs::read_to_string(&path)?;
            messages.push(serde_json::from_str(&content)?);
        }
        Ok(messages)
    }
}

impl NotificationSender for OutboxNotifier {
    fn send(&self, to: &str, subject: &str, body: &str) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .map_err(|e| Error::Notification(format!("outbox unavailable: {}", e)))?;

        let now = Utc::now();
        let message = OutboxMessage {
            to: to.to_string(),
            subject: subject.to_string(),
            body: body.to_string(),
            sent_at: now.to_rfc3339(),
        };
        let file_name = format!(
            "{}-{}.json",
            now.format("%Y%m%d%H%M%S%6f"),
            &Uuid::new_v4().simple().to_string()[..8]
        );
        let json = serde_json::to_string_pretty(&message)?;
        fs::write(self.dir.join(file_name), json)
            .map_err(|e| Error::Notification(format!("failed to write message: {}", e)))?;
        log::debug!("Queued '{}' for {}", subject, to);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_send_writes_message() {
        let temp = TempDir::new().unwrap();
        let outbox = OutboxNotifier::new(temp.path().join("outbox"));

        outbox.send("jane@example.com", "Your code", "123456").unwrap();
        outbox.send("jane@example.com", "Notice", "Transfer done").unwrap();

        let messages = outbox.list().unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].subject, "Your code");
        assert_eq!(messages[1].body, "Transfer done");
    }
}
