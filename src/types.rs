// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Bountyy Oy - ASM Domain Types
 * Shared data structures for the subdomain enumeration pipeline
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary
 */

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use uuid::Uuid;

/// Hostnames discovered per seed domain, first-occurrence order preserved
pub type ResultMap = HashMap<String, Vec<String>>;

/// A seed domain registered for scanning. Only the consumed shape:
/// the CRUD surface around domains lives in another service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Domain {
    pub id: Uuid,
    pub name: String,
    pub enabled: bool,
}

/// A hostname discovered under a seed domain
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Hostname {
    pub id: Uuid,
    pub name: String,
    #[serde(rename = "foundfirsttime")]
    pub found_first_time: DateTime<Utc>,
    pub live: bool,
    #[serde(rename = "domainid")]
    pub domain_id: Uuid,
    pub enabled: bool,
}

/// Scan behaviour toggles stored as JSONB in the settings table
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScanSettings {
    #[serde(rename = "scannewlyfoundhostname", default)]
    pub scan_newly_found_hostname: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralScanSettings {
    pub id: Uuid,
    pub settings: ScanSettings,
}

/// Terminal state of a scan session, computed exactly once before the
/// single finalize call publishes and ACK/NACKs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminalStatus {
    Complete,
    Warning,
    Incomplete,
}

impl TerminalStatus {
    /// Downstream handoff payload for sessions that ran the pipeline
    pub fn payload(&self) -> serde_json::Value {
        match self {
            TerminalStatus::Complete => json!({
                "status": "complete",
                "message": "ASMM8 scan run successfully!",
            }),
            TerminalStatus::Warning => json!({
                "status": "warning",
                "message": "ASMM8 scan is showing warnings. Please, check!",
            }),
            TerminalStatus::Incomplete => json!({
                "status": "incomplete",
                "message": "ASMM8 scan did not complete. Unexpected errors.",
            }),
        }
    }
}

/// Recipient role of a notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    Admin,
    User,
    System,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    Security,
    Error,
    Warning,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Security => "security",
            EventType::Error => "error",
            EventType::Warning => "warning",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelType {
    App,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationMetadata {
    pub severity: String,
    pub channeltype: ChannelType,
    pub eventtype: EventType,
}

/// Notification envelope published on the notification exchange with
/// routing key `app.<type>.<severity>`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub userrole: UserRole,
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub message: String,
    pub metadata: NotificationMetadata,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_status_payloads() {
        let complete = TerminalStatus::Complete.payload();
        assert_eq!(complete["status"], "complete");
        assert_eq!(complete["message"], "ASMM8 scan run successfully!");

        let warning = TerminalStatus::Warning.payload();
        assert_eq!(warning["status"], "warning");

        let incomplete = TerminalStatus::Incomplete.payload();
        assert_eq!(incomplete["status"], "incomplete");
    }

    #[test]
    fn notification_serializes_with_wire_names() {
        let notification = Notification {
            userrole: UserRole::Admin,
            event_type: EventType::Security,
            message: "New hostnames have been found".to_string(),
            metadata: NotificationMetadata {
                severity: "normal".to_string(),
                channeltype: ChannelType::App,
                eventtype: EventType::Security,
            },
        };

        let value = serde_json::to_value(&notification).unwrap();
        assert_eq!(value["userrole"], "admin");
        assert_eq!(value["type"], "security");
        assert_eq!(value["metadata"]["channeltype"], "app");
        assert_eq!(value["metadata"]["eventtype"], "security");
        assert_eq!(value["metadata"]["severity"], "normal");
    }

    #[test]
    fn scan_settings_default_is_disabled() {
        let settings: ScanSettings = serde_json::from_str("{}").unwrap();
        assert!(!settings.scan_newly_found_hostname);
    }
}
