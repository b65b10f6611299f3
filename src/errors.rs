// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Bountyy Oy - ASM Service Error Types
 * Production-ready error handling with thiserror
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary
 */

use std::time::Duration;
use thiserror::Error;

/// Top-level error type for the ASM service
#[derive(Error, Debug)]
pub enum AsmError {
    /// Missing or invalid configuration keys; fatal at startup
    #[error("Configuration error: {0}")]
    Config(String),

    /// Broker-related errors
    #[error("Broker error: {0}")]
    Broker(#[from] BrokerError),

    /// Connection pool errors
    #[error("Pool error: {0}")]
    Pool(#[from] PoolError),

    /// Enumeration phase errors
    #[error("Enumeration error: {0}")]
    Enumeration(#[from] EnumError),

    /// Database errors
    #[error("Database error: {0}")]
    Db(#[from] DbError),

    /// Bad HTTP input
    #[error("Validation error: {0}")]
    Validation(String),
}

/// AMQP broker errors
#[derive(Error, Debug)]
pub enum BrokerError {
    #[error("Broker unreachable: {reason}")]
    Connect { reason: String },

    #[error("Failed to declare {object}: {reason}")]
    Declare { object: String, reason: String },

    #[error("Publish to exchange `{exchange}` failed: {reason}")]
    Publish { exchange: String, reason: String },

    #[error("Consume on queue `{queue}` failed: {reason}")]
    Consume { queue: String, reason: String },

    /// Publish attempted with empty exchange or routing key
    #[error("Missing parameters: exchange and routing key are required")]
    MissingParams,

    /// Precheck failed; the service queue is not available
    #[error("Broker not ready: queue `{queue}` is not available")]
    NotReady { queue: String },

    #[error("Exchange `{exchange}` already declared as `{existing}`, refusing `{requested}`")]
    ExchangeKindMismatch {
        exchange: String,
        existing: String,
        requested: String,
    },

    #[error("Malformed routing key `{key}`: expected `prefix.service.method.endpoint`")]
    MalformedRoutingKey { key: String },

    /// The API call derived from a consumed message could not be
    /// delivered to the local service
    #[error("Dispatch to `{endpoint}` failed: {reason}")]
    Dispatch { endpoint: String, reason: String },

    /// No consumer channel is active for ACK/NACK operations
    #[error("No consumer channel available")]
    ChannelUnavailable,

    #[error("AMQP error: {reason}")]
    Amqp { reason: String },
}

impl From<lapin::Error> for BrokerError {
    fn from(err: lapin::Error) -> Self {
        BrokerError::Amqp {
            reason: err.to_string(),
        }
    }
}

/// Connection pool errors
#[derive(Error, Debug)]
pub enum PoolError {
    /// Unrecoverable connect error while creating the initial connections
    #[error("Pool initialization failed: {reason}")]
    Init { reason: String },

    #[error("Connect failed after {attempts} attempts: {reason}")]
    Connect { attempts: u32, reason: String },

    /// No connection became available within the configured timeout
    #[error("Pool exhausted: no connection available within {waited:?}")]
    Exhausted { waited: Duration },

    #[error("Pool `{pool}` not found")]
    NotFound { pool: String },

    #[error("No default pool configured")]
    NoDefault,

    #[error("Pool is closed")]
    Closed,
}

/// Enumeration tool errors, collected per phase rather than propagated.
///
/// Clone-able on purpose: the first error of a phase is parked in the
/// shared register while the fan-out keeps draining.
#[derive(Error, Debug, Clone)]
pub enum EnumError {
    /// External tool exited non-zero or produced unusable output
    #[error("`{tool}` failed: {reason}")]
    Tool { tool: String, reason: String },

    /// A producer or collector task panicked
    #[error("Enumeration task panicked: {context}")]
    Panic { context: String },

    #[error("I/O error on `{path}`: {reason}")]
    Io { path: String, reason: String },
}

impl EnumError {
    pub fn is_panic(&self) -> bool {
        matches!(self, EnumError::Panic { .. })
    }
}

/// Database errors
#[derive(Error, Debug)]
pub enum DbError {
    #[error("Database connection failed: {reason}")]
    Connection { reason: String },

    #[error("Query failed: {reason}")]
    Query { reason: String },
}

impl From<tokio_postgres::Error> for DbError {
    fn from(err: tokio_postgres::Error) -> Self {
        DbError::Query {
            reason: err.to_string(),
        }
    }
}

impl From<deadpool_postgres::PoolError> for DbError {
    fn from(err: deadpool_postgres::PoolError) -> Self {
        DbError::Connection {
            reason: err.to_string(),
        }
    }
}

/// Result type for ASM service operations
pub type AsmResult<T> = Result<T, AsmError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enum_error_panic_detection() {
        let panic = EnumError::Panic {
            context: "brute force producer".to_string(),
        };
        let tool = EnumError::Tool {
            tool: "dnsx".to_string(),
            reason: "exit status 1".to_string(),
        };

        assert!(panic.is_panic());
        assert!(!tool.is_panic());
    }

    #[test]
    fn broker_error_display() {
        let err = BrokerError::MissingParams;
        assert!(err.to_string().contains("Missing parameters"));

        let err = BrokerError::MalformedRoutingKey {
            key: "cptm8.asmm8".to_string(),
        };
        assert!(err.to_string().contains("cptm8.asmm8"));
    }

    #[test]
    fn errors_convert_into_asm_error() {
        let err: AsmError = PoolError::NoDefault.into();
        assert!(matches!(err, AsmError::Pool(PoolError::NoDefault)));

        let err: AsmError = EnumError::Tool {
            tool: "subfinder".to_string(),
            reason: "not found".to_string(),
        }
        .into();
        assert!(matches!(err, AsmError::Enumeration(_)));
    }
}
