//! Chain access used by the orchestrator and the wiring phase.
//!
//! [`Network`] is the seam between scheduling logic and the chain. The orchestrator only
//! ever submits fully encoded payloads and awaits the resulting handles.

mod abi;
mod rpc;

use std::future::Future;

use alloy_core::primitives::{Address, Bytes};
use serde::{Deserialize, Serialize};

pub use abi::{
    coerce_arg, coerce_args, encode_call, encode_constructor, encode_initializer,
    resolve_initializer,
};
pub use rpc::{JsonRpcNetwork, json_rpc_call, wait_until_ready};

/// Default JSON-RPC endpoint, a local development node.
pub const DEFAULT_RPC_URL: &str = "http://127.0.0.1:8545";

/// Connection settings for a JSON-RPC node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// HTTP endpoint of the node.
    pub rpc_url: String,
    /// Sender account. Defaults to the node's first unlocked account.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<Address>,
    /// Gas limit for every transaction. Left to the node when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gas: Option<u64>,
    /// Interval between receipt polls, in milliseconds.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// How long to wait for the node to answer before giving up, in seconds.
    #[serde(default = "default_ready_timeout_secs")]
    pub ready_timeout_secs: u64,
}

fn default_poll_interval_ms() -> u64 {
    500
}

fn default_ready_timeout_secs() -> u64 {
    10
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            rpc_url: DEFAULT_RPC_URL.to_string(),
            from: None,
            gas: None,
            poll_interval_ms: default_poll_interval_ms(),
            ready_timeout_secs: default_ready_timeout_secs(),
        }
    }
}

/// Handle on a submitted transaction, durable enough to await from a later run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PendingHandle {
    pub tx_hash: String,
    /// Logic contract already deployed for a proxied component.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub implementation: Option<Address>,
}

impl PendingHandle {
    pub fn new(tx_hash: impl Into<String>) -> Self {
        Self {
            tx_hash: tx_hash.into(),
            implementation: None,
        }
    }

    pub fn with_implementation(mut self, implementation: Address) -> Self {
        self.implementation = Some(implementation);
        self
    }
}

/// Final outcome of a submitted transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Confirmation {
    pub success: bool,
    /// Created contract, for deployments.
    pub address: Option<Address>,
    pub error: Option<String>,
}

impl Confirmation {
    pub fn deployed(address: Address) -> Self {
        Self {
            success: true,
            address: Some(address),
            error: None,
        }
    }

    pub fn succeeded() -> Self {
        Self {
            success: true,
            address: None,
            error: None,
        }
    }

    pub fn reverted(reason: impl Into<String>) -> Self {
        Self {
            success: false,
            address: None,
            error: Some(reason.into()),
        }
    }
}

/// A contract creation, ready to send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploymentRequest {
    pub component: String,
    pub contract: String,
    /// Linked creation bytecode followed by the encoded constructor arguments.
    pub init_code: Bytes,
}

/// A state-changing call on a deployed contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallRequest {
    /// Human readable label, for logs.
    pub label: String,
    pub target: Address,
    pub calldata: Bytes,
}

/// Marks a failure worth retrying, such as a dropped connection.
#[derive(Debug, thiserror::Error)]
#[error("transient network failure: {0}")]
pub struct Transient(pub String);

/// Whether any error in the chain is [`Transient`].
pub fn is_transient(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| cause.is::<Transient>())
}

/// Submits transactions and reports their outcome.
pub trait Network: Send + Sync {
    /// Send a contract creation whose address is final.
    fn submit_deployment(
        &self,
        request: &DeploymentRequest,
    ) -> impl Future<Output = anyhow::Result<PendingHandle>> + Send;

    /// Deploy `logic`, then send the creation of a proxy in front of it that runs
    /// `init_data` on construction. The returned handle tracks the proxy creation and
    /// carries the logic address.
    fn submit_proxied_deployment(
        &self,
        logic: &DeploymentRequest,
        init_data: &Bytes,
    ) -> impl Future<Output = anyhow::Result<PendingHandle>> + Send;

    /// Send a call to an existing contract.
    fn submit_call(
        &self,
        request: &CallRequest,
    ) -> impl Future<Output = anyhow::Result<PendingHandle>> + Send;

    /// Wait until the transaction behind `handle` is mined.
    fn await_confirmation(
        &self,
        handle: &PendingHandle,
    ) -> impl Future<Output = anyhow::Result<Confirmation>> + Send;
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn test_transient_survives_context() {
        let err = Err::<(), _>(Transient("connection refused".into()))
            .context("Failed to send eth_sendTransaction request")
            .unwrap_err();
        assert!(is_transient(&err));

        let err = anyhow::anyhow!("RPC error: execution reverted");
        assert!(!is_transient(&err));
    }

    #[test]
    fn test_network_config_defaults() {
        let config: NetworkConfig = toml::from_str(r#"rpc_url = "http://localhost:8545""#)
            .expect("config should parse");
        assert_eq!(config.poll_interval_ms, 500);
        assert_eq!(config.from, None);
    }
}
