// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Bountyy Oy - Notification Publisher
 * Security and system-error notifications on the notification
 * exchange, routing key `app.<type>.<severity>`.
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary
 */

use std::sync::Arc;
use tracing::error;

use crate::orchestrator::OrchestratorApi;
use crate::types::{ChannelType, EventType, Notification, NotificationMetadata, UserRole};

pub const NOTIFICATION_EXCHANGE: &str = "notification";

pub struct Notifier {
    orchestrator: Arc<dyn OrchestratorApi>,
    exchange: String,
}

impl Notifier {
    pub fn new(orchestrator: Arc<dyn OrchestratorApi>) -> Self {
        Self {
            orchestrator,
            exchange: NOTIFICATION_EXCHANGE.to_string(),
        }
    }

    async fn publish(&self, notification: Notification, severity: &str, source: &str) {
        let routing_key = format!(
            "app.{}.{}",
            notification.event_type.as_str(),
            severity
        );
        let payload = match serde_json::to_value(&notification) {
            Ok(value) => value,
            Err(e) => {
                error!(error = %e, "failed to serialize notification");
                return;
            }
        };
        // Notifications are fire-and-forget; a failed publish is logged
        // and never fails the operation that raised it.
        if let Err(e) = self
            .orchestrator
            .publish_to_exchange(&self.exchange, &routing_key, Some(payload), source)
            .await
        {
            error!(routing_key = %routing_key, error = %e, "failed to publish notification");
        }
    }

    pub async fn publish_security_notification_admin(
        &self,
        message: &str,
        severity: &str,
        source: &str,
    ) {
        self.publish(
            Notification {
                userrole: UserRole::Admin,
                event_type: EventType::Security,
                message: message.to_string(),
                metadata: NotificationMetadata {
                    severity: severity.to_string(),
                    channeltype: ChannelType::App,
                    eventtype: EventType::Security,
                },
            },
            severity,
            source,
        )
        .await;
    }

    pub async fn publish_security_notification_user(
        &self,
        message: &str,
        severity: &str,
        source: &str,
    ) {
        self.publish(
            Notification {
                userrole: UserRole::User,
                event_type: EventType::Security,
                message: message.to_string(),
                metadata: NotificationMetadata {
                    severity: severity.to_string(),
                    channeltype: ChannelType::App,
                    eventtype: EventType::Security,
                },
            },
            severity,
            source,
        )
        .await;
    }

    pub async fn publish_sys_error_notification(
        &self,
        message: &str,
        severity: &str,
        source: &str,
    ) {
        self.publish(
            Notification {
                userrole: UserRole::Admin,
                event_type: EventType::Error,
                message: message.to_string(),
                metadata: NotificationMetadata {
                    severity: severity.to_string(),
                    channeltype: ChannelType::App,
                    eventtype: EventType::Error,
                },
            },
            severity,
            source,
        )
        .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::AsmResult;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::BTreeMap;

    #[derive(Default)]
    struct RecordingOrchestrator {
        published: Mutex<Vec<(String, String, Option<serde_json::Value>, String)>>,
    }

    #[async_trait]
    impl OrchestratorApi for RecordingOrchestrator {
        async fn publish_to_exchange(
            &self,
            exchange: &str,
            routing_key: &str,
            payload: Option<serde_json::Value>,
            source_tag: &str,
        ) -> AsmResult<()> {
            self.published.lock().push((
                exchange.to_string(),
                routing_key.to_string(),
                payload,
                source_tag.to_string(),
            ));
            Ok(())
        }

        async fn ack_scan_completion(&self, _tag: u64, _completed: bool) -> AsmResult<()> {
            Ok(())
        }

        async fn nack_scan_message(&self, _tag: u64, _requeue: bool) -> AsmResult<()> {
            Ok(())
        }

        fn exist_queue(&self, _queue: &str, _args: &BTreeMap<String, serde_json::Value>) -> bool {
            true
        }

        fn exist_consumers_for_queue(
            &self,
            _queue: &str,
            _args: &BTreeMap<String, serde_json::Value>,
        ) -> bool {
            true
        }
    }

    #[tokio::test]
    async fn security_notification_routing_and_envelope() {
        let orch = Arc::new(RecordingOrchestrator::default());
        let notifier = Notifier::new(orch.clone());

        notifier
            .publish_security_notification_admin("New hostnames have been found", "normal", "asmm8")
            .await;

        let published = orch.published.lock();
        assert_eq!(published.len(), 1);
        let (exchange, routing_key, payload, source) = &published[0];
        assert_eq!(exchange, "notification");
        assert_eq!(routing_key, "app.security.normal");
        assert_eq!(source, "asmm8");

        let payload = payload.as_ref().unwrap();
        assert_eq!(payload["userrole"], "admin");
        assert_eq!(payload["type"], "security");
        assert_eq!(payload["message"], "New hostnames have been found");
        assert_eq!(payload["metadata"]["severity"], "normal");
    }

    #[tokio::test]
    async fn sys_error_notification_uses_error_type() {
        let orch = Arc::new(RecordingOrchestrator::default());
        let notifier = Notifier::new(orch.clone());

        notifier
            .publish_sys_error_notification("broker handoff failed", "urgent", "asmm8")
            .await;

        let published = orch.published.lock();
        let (_, routing_key, payload, _) = &published[0];
        assert_eq!(routing_key, "app.error.urgent");
        assert_eq!(payload.as_ref().unwrap()["type"], "error");
    }
}
