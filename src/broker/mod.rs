// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

pub mod manager;
pub mod pool;
pub mod state;

pub use manager::PoolManager;
pub use pool::{
    AmqpConnection, AmqpConnector, AmqpPool, ConnectionPool, ConnectionPoolConfig,
    ConnectionPoolStats, Connector, PoolableConnection, PooledHandle,
};
pub use state::{DeliveryHandler, InboundMessage, QueueInfo, SharedBrokerState};
