//! Broker Adapters
//!
//! `CommitLogBroker` implements `BrokerClient` over append-only segment
//! files. `RetryPolicy` bounds the startup connection attempts.

pub mod commit_log;
pub mod retry;

pub use commit_log::{CommitLogBroker, CommitLogConfig, MAX_TOPIC_LEN, validate_topic};
pub use retry::RetryPolicy;
