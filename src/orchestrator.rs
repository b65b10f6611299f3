// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Bountyy Oy - Broker Orchestrator
 * Declares the configured exchanges, queues and bindings, runs the
 * per-service consumers, and exposes publish/ACK/NACK plus the local
 * existence probes. Everything declared is mirrored into the shared
 * broker state.
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary
 */

use async_trait::async_trait;
use futures::StreamExt;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicPublishOptions, BasicQosOptions,
    ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
};
use lapin::types::{AMQPValue, FieldTable};
use lapin::BasicProperties;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use crate::broker::pool::Connector;
use crate::broker::{AmqpConnector, DeliveryHandler, InboundMessage, PoolManager, QueueInfo,
    SharedBrokerState};
use crate::config::AppConfig;
use crate::errors::{AsmError, AsmResult, BrokerError};

/// The broker surface the scan orchestrator and readiness probe depend
/// on; tests substitute a recording fake.
#[async_trait]
pub trait OrchestratorApi: Send + Sync {
    async fn publish_to_exchange(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: Option<serde_json::Value>,
        source_tag: &str,
    ) -> AsmResult<()>;

    /// ACK iff `completed`; NACK without requeue otherwise
    async fn ack_scan_completion(&self, delivery_tag: u64, completed: bool) -> AsmResult<()>;

    async fn nack_scan_message(&self, delivery_tag: u64, requeue: bool) -> AsmResult<()>;

    fn exist_queue(&self, queue: &str, args: &BTreeMap<String, serde_json::Value>) -> bool;

    fn exist_consumers_for_queue(
        &self,
        queue: &str,
        args: &BTreeMap<String, serde_json::Value>,
    ) -> bool;
}

/// Parsed `prefix.service.method.endpoint` routing key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutingKeyParts {
    pub prefix: String,
    pub service: String,
    pub method: String,
    pub endpoint: String,
}

pub fn parse_routing_key(key: &str) -> Result<RoutingKeyParts, BrokerError> {
    let parts: Vec<&str> = key.split('.').collect();
    if parts.len() != 4 || parts.iter().any(|part| part.is_empty()) {
        return Err(BrokerError::MalformedRoutingKey {
            key: key.to_string(),
        });
    }
    Ok(RoutingKeyParts {
        prefix: parts[0].to_string(),
        service: parts[1].to_string(),
        method: parts[2].to_string(),
        endpoint: parts[3].to_string(),
    })
}

fn to_field_table(args: &BTreeMap<String, serde_json::Value>) -> FieldTable {
    let mut table = FieldTable::default();
    for (key, value) in args {
        let amqp_value = match value {
            serde_json::Value::Bool(b) => AMQPValue::Boolean(*b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => AMQPValue::LongLongInt(i),
                None => AMQPValue::LongString(n.to_string().into()),
            },
            serde_json::Value::String(s) => match s.parse::<i64>() {
                Ok(i) => AMQPValue::LongLongInt(i),
                Err(_) => AMQPValue::LongString(s.clone().into()),
            },
            other => AMQPValue::LongString(other.to_string().into()),
        };
        table.insert(key.clone().into(), amqp_value);
    }
    table
}

fn to_exchange_kind(kind: &str) -> lapin::ExchangeKind {
    match kind {
        "direct" => lapin::ExchangeKind::Direct,
        "fanout" => lapin::ExchangeKind::Fanout,
        "headers" => lapin::ExchangeKind::Headers,
        "topic" => lapin::ExchangeKind::Topic,
        other => lapin::ExchangeKind::Custom(other.to_string()),
    }
}

/// Handler installed on consumed queues: the routing key names a local
/// HTTP endpoint, which is invoked with the delivery tag attached so
/// the endpoint can ACK/NACK that specific message later.
pub fn build_api_call_handler(
    services: BTreeMap<String, String>,
    http: reqwest::Client,
) -> DeliveryHandler {
    Arc::new(move |msg: InboundMessage| {
        let services = services.clone();
        let http = http.clone();
        Box::pin(async move {
            let parts = parse_routing_key(&msg.routing_key).map_err(AsmError::from)?;
            let base = services.get(&parts.service).ok_or_else(|| {
                AsmError::Config(format!("no service URL configured for `{}`", parts.service))
            })?;
            let url = format!("{}/{}", base.trim_end_matches('/'), parts.endpoint);

            let request = match parts.method.as_str() {
                "get" => http.get(&url),
                "post" => http.post(&url),
                "put" => http.put(&url),
                "delete" => http.delete(&url),
                _ => {
                    return Err(BrokerError::MalformedRoutingKey {
                        key: msg.routing_key.clone(),
                    }
                    .into())
                }
            };

            let response = request
                .header("X-RabbitMQ-Delivery-Tag", msg.delivery_tag.to_string())
                .send()
                .await
                .map_err(|e| BrokerError::Dispatch {
                    endpoint: url.clone(),
                    reason: e.to_string(),
                })?;

            info!(
                status = %response.status(),
                url = %url,
                delivery_tag = msg.delivery_tag,
                "api call dispatched from broker message"
            );
            Ok(())
        })
    })
}

pub struct Orchestrator {
    config: Arc<AppConfig>,
    state: Arc<SharedBrokerState>,
    pools: Arc<PoolManager>,
    /// Channel the service consumer runs on; ACK/NACK must go through
    /// the channel the delivery arrived on
    consumer_channel: RwLock<Option<lapin::Channel>>,
    http: reqwest::Client,
}

impl Orchestrator {
    pub fn new(
        config: Arc<AppConfig>,
        state: Arc<SharedBrokerState>,
        pools: Arc<PoolManager>,
    ) -> AsmResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| AsmError::Config(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            config,
            state,
            pools,
            consumer_channel: RwLock::new(None),
            http,
        })
    }

    /// Declare every configured exchange and mirror it into the state
    pub async fn init(&self) -> AsmResult<()> {
        let exchanges = self.config.orchestrator.exchanges.clone();
        self.pools
            .with_pooled_connection(|handle| {
                let exchanges = exchanges.clone();
                async move {
                    let channel = handle.connection().create_channel().await?;
                    for (name, kind) in &exchanges {
                        channel
                            .exchange_declare(
                                name,
                                to_exchange_kind(kind),
                                ExchangeDeclareOptions {
                                    durable: true,
                                    ..Default::default()
                                },
                                FieldTable::default(),
                            )
                            .await
                            .map_err(|e| BrokerError::Declare {
                                object: format!("exchange `{}`", name),
                                reason: e.to_string(),
                            })?;
                    }
                    Ok(())
                }
            })
            .await?;

        for (name, kind) in &self.config.orchestrator.exchanges {
            self.state.initialize_exchange(name);
            self.state.set_exchange(name, kind)?;
        }
        info!("[SUCCESS] broker exchanges declared");
        Ok(())
    }

    /// Declare the service's queue with its configured arguments and
    /// bind it to its routing keys
    pub async fn activate_queue_by_service(&self, service: &str) -> AsmResult<()> {
        let messaging = self.config.orchestrator.service_messaging(service)?.clone();
        let spec = messaging.queue_spec()?;
        let args = messaging.queue_arguments.clone();
        let routing_keys = messaging.routing_keys.clone();

        let (message_count, consumer_count) = {
            let spec = spec.clone();
            let routing_keys = routing_keys.clone();
            let table = to_field_table(&args);
            self.pools
                .with_pooled_connection(move |handle| async move {
                    let channel = handle.connection().create_channel().await?;
                    let queue = channel
                        .queue_declare(
                            &spec.name,
                            QueueDeclareOptions {
                                durable: spec.durable,
                                ..Default::default()
                            },
                            table,
                        )
                        .await
                        .map_err(|e| BrokerError::Declare {
                            object: format!("queue `{}`", spec.name),
                            reason: e.to_string(),
                        })?;
                    for key in &routing_keys {
                        channel
                            .queue_bind(
                                &spec.name,
                                &spec.exchange,
                                key,
                                QueueBindOptions::default(),
                                FieldTable::default(),
                            )
                            .await
                            .map_err(|e| BrokerError::Declare {
                                object: format!("binding `{}` -> `{}`", spec.name, key),
                                reason: e.to_string(),
                            })?;
                    }
                    Ok((queue.message_count(), queue.consumer_count()))
                })
                .await?
        };

        self.state.set_queue(
            &spec.exchange,
            &spec.name,
            QueueInfo {
                name: spec.name.clone(),
                message_count,
                consumer_count,
                args,
            },
        );
        self.state
            .set_bindings(&spec.exchange, &spec.name, routing_keys);
        info!(service, queue = %spec.name, "[SUCCESS] service queue activated");
        Ok(())
    }

    /// Start the service consumer on a dedicated connection, dispatch
    /// deliveries to the handler registered for the queue
    pub async fn activate_consumer_by_service(&self, service: &str) -> AsmResult<()> {
        let messaging = self.config.orchestrator.service_messaging(service)?.clone();
        let spec = messaging.consumer_spec()?;

        let conn = AmqpConnector
            .connect(&self.config.rabbitmq.url())
            .await
            .map_err(AsmError::from)?;
        let channel = conn.create_channel().await?;
        channel
            .basic_qos(1, BasicQosOptions::default())
            .await
            .map_err(BrokerError::from)?;
        let consumer = channel
            .basic_consume(
                &spec.queue,
                &spec.tag,
                BasicConsumeOptions {
                    no_ack: spec.no_ack,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| BrokerError::Consume {
                queue: spec.queue.clone(),
                reason: e.to_string(),
            })?;

        *self.consumer_channel.write().await = Some(channel);

        if self.state.handler(&spec.queue).is_none() {
            self.state.add_handler(
                &spec.queue,
                build_api_call_handler(self.config.orchestrator.services.clone(), self.http.clone()),
            );
        }
        self.state.add_consumer(&spec.queue, &spec.tag);

        let state = self.state.clone();
        let queue_name = spec.queue.clone();
        let tag = spec.tag.clone();
        tokio::spawn(async move {
            // the dedicated connection lives as long as the consumer
            let _dedicated = conn;
            let mut consumer = consumer;
            while let Some(delivery) = consumer.next().await {
                match delivery {
                    Ok(delivery) => {
                        let msg = InboundMessage {
                            delivery_tag: delivery.delivery_tag,
                            exchange: delivery.exchange.to_string(),
                            routing_key: delivery.routing_key.to_string(),
                            body: delivery.data,
                        };
                        debug!(
                            queue = %queue_name,
                            routing_key = %msg.routing_key,
                            delivery_tag = msg.delivery_tag,
                            "delivery received"
                        );
                        match state.handler(&queue_name) {
                            Some(handler) => {
                                if let Err(e) = handler(msg).await {
                                    error!(queue = %queue_name, error = %e, "delivery handler failed");
                                }
                            }
                            None => warn!(queue = %queue_name, "no handler registered for delivery"),
                        }
                    }
                    Err(e) => {
                        error!(queue = %queue_name, error = %e, "consumer stream error");
                        break;
                    }
                }
            }
            state.delete_consumer_by_tag(&tag);
            warn!(queue = %queue_name, consumer = %tag, "consumer stopped");
        });

        info!(service, queue = %spec.queue, consumer = %spec.tag, "[SUCCESS] consumer activated");
        Ok(())
    }
}

#[async_trait]
impl OrchestratorApi for Orchestrator {
    async fn publish_to_exchange(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: Option<serde_json::Value>,
        source_tag: &str,
    ) -> AsmResult<()> {
        if exchange.is_empty() || routing_key.is_empty() {
            return Err(BrokerError::MissingParams.into());
        }

        let body = match &payload {
            Some(value) => serde_json::to_vec(value).map_err(|e| BrokerError::Publish {
                exchange: exchange.to_string(),
                reason: format!("payload serialization failed: {}", e),
            })?,
            None => Vec::new(),
        };

        let exchange_name = exchange.to_string();
        let key = routing_key.to_string();
        let tag = source_tag.to_string();

        self.pools
            .with_pooled_connection(move |handle| async move {
                let channel = match handle.connection().create_channel().await {
                    Ok(channel) => channel,
                    Err(e) => {
                        handle.mark_unhealthy();
                        return Err(e.into());
                    }
                };
                let published = channel
                    .basic_publish(
                        &exchange_name,
                        &key,
                        BasicPublishOptions::default(),
                        &body,
                        BasicProperties::default()
                            .with_content_type("application/json".into())
                            .with_app_id(tag.into()),
                    )
                    .await;
                match published {
                    Ok(confirm) => {
                        confirm.await.map_err(|e| BrokerError::Publish {
                            exchange: exchange_name.clone(),
                            reason: e.to_string(),
                        })?;
                        debug!(exchange = %exchange_name, routing_key = %key, "message published");
                        Ok(())
                    }
                    Err(e) => {
                        handle.mark_unhealthy();
                        Err(BrokerError::Publish {
                            exchange: exchange_name.clone(),
                            reason: e.to_string(),
                        }
                        .into())
                    }
                }
            })
            .await
    }

    async fn ack_scan_completion(&self, delivery_tag: u64, completed: bool) -> AsmResult<()> {
        let guard = self.consumer_channel.read().await;
        let channel = guard.as_ref().ok_or(BrokerError::ChannelUnavailable)?;
        if completed {
            channel
                .basic_ack(delivery_tag, BasicAckOptions::default())
                .await
                .map_err(BrokerError::from)?;
            info!(delivery_tag, "scan trigger acknowledged");
        } else {
            channel
                .basic_nack(
                    delivery_tag,
                    BasicNackOptions {
                        requeue: false,
                        ..Default::default()
                    },
                )
                .await
                .map_err(BrokerError::from)?;
            info!(delivery_tag, "scan trigger rejected without requeue");
        }
        Ok(())
    }

    async fn nack_scan_message(&self, delivery_tag: u64, requeue: bool) -> AsmResult<()> {
        let guard = self.consumer_channel.read().await;
        let channel = guard.as_ref().ok_or(BrokerError::ChannelUnavailable)?;
        channel
            .basic_nack(
                delivery_tag,
                BasicNackOptions {
                    requeue,
                    ..Default::default()
                },
            )
            .await
            .map_err(BrokerError::from)?;
        info!(delivery_tag, requeue, "scan trigger negatively acknowledged");
        Ok(())
    }

    fn exist_queue(&self, queue: &str, args: &BTreeMap<String, serde_json::Value>) -> bool {
        self.state.exist_queue(queue, args)
    }

    fn exist_consumers_for_queue(
        &self,
        queue: &str,
        args: &BTreeMap<String, serde_json::Value>,
    ) -> bool {
        self.state.exist_consumers_for_queue(queue, args)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::test_config;
    use serde_json::json;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn orchestrator() -> Orchestrator {
        let config = Arc::new(test_config());
        let state = SharedBrokerState::new();
        let pools = PoolManager::new();
        Orchestrator::new(config, state, pools).unwrap()
    }

    #[test]
    fn parse_routing_key_valid_keys() {
        let cases = [
            ("cptm8.asmm8.get.scan", "asmm8", "get", "scan"),
            ("cptm8.asmm8.post.scan", "asmm8", "post", "scan"),
            ("cptm8.naabum8.get.domain", "naabum8", "get", "domain"),
        ];
        for (key, service, http_method, endpoint) in cases {
            let parts = parse_routing_key(key).unwrap();
            assert_eq!(parts.service, service);
            assert_eq!(parts.method, http_method);
            assert_eq!(parts.endpoint, endpoint);
        }
    }

    #[test]
    fn parse_routing_key_rejects_malformed_keys() {
        for key in ["", "cptm8", "cptm8.asmm8.get", "cptm8..get.scan", "a.b.c.d.e"] {
            assert!(parse_routing_key(key).is_err(), "key `{}` should fail", key);
        }
    }

    #[tokio::test]
    async fn publish_rejects_empty_exchange() {
        let orch = orchestrator();
        let err = orch
            .publish_to_exchange("", "routing.key", Some(json!({})), "asmm8")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Missing parameters"));
    }

    #[tokio::test]
    async fn publish_rejects_empty_routing_key() {
        let orch = orchestrator();
        let err = orch
            .publish_to_exchange("cptm8", "", None, "asmm8")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Missing parameters"));
    }

    #[tokio::test]
    async fn ack_without_consumer_channel_fails() {
        let orch = orchestrator();
        assert!(orch.ack_scan_completion(1, true).await.is_err());
        assert!(orch.nack_scan_message(1, false).await.is_err());
    }

    #[test]
    fn field_table_coerces_yaml_scalars() {
        let mut args = BTreeMap::new();
        args.insert("x-max-length".to_string(), json!("1"));
        args.insert("x-overflow".to_string(), json!("reject-publish"));
        let table = to_field_table(&args);

        let key = lapin::types::ShortString::from("x-max-length");
        assert_eq!(table.inner().get(&key), Some(&AMQPValue::LongLongInt(1)));
    }

    #[tokio::test]
    async fn api_call_handler_invokes_local_endpoint_with_delivery_tag() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/scan"))
            .and(header("X-RabbitMQ-Delivery-Tag", "42"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let mut services = BTreeMap::new();
        services.insert("asmm8".to_string(), server.uri());
        let handler = build_api_call_handler(services, reqwest::Client::new());

        handler(InboundMessage {
            delivery_tag: 42,
            exchange: "cptm8".to_string(),
            routing_key: "cptm8.asmm8.get.scan".to_string(),
            body: Vec::new(),
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn api_call_handler_rejects_malformed_key() {
        let handler = build_api_call_handler(BTreeMap::new(), reqwest::Client::new());
        let result = handler(InboundMessage {
            delivery_tag: 1,
            exchange: "cptm8".to_string(),
            routing_key: "not-a-key".to_string(),
            body: Vec::new(),
        })
        .await;
        assert!(result.is_err());
    }
}
