//! JSON-RPC implementation of [`Network`] for nodes with unlocked accounts.

use std::{sync::Arc, time::Duration};

use alloy_core::{
    dyn_abi::{DynSolValue, JsonAbiExt},
    primitives::{Address, Bytes},
};
use anyhow::Context;
use serde::{Deserialize, de::DeserializeOwned};
use serde_json::Value;
use url::Url;

use super::{
    CallRequest, Confirmation, DeploymentRequest, Network, NetworkConfig, PendingHandle,
    Transient, is_transient,
};
use crate::Artifact;

/// Default timeout for RPC requests.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default interval between polling attempts when waiting for readiness.
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Default bound on the logic contract receipt wait of a proxied deployment.
const DEFAULT_LOGIC_TIMEOUT: Duration = Duration::from_secs(120);

/// Create an HTTP client configured for JSON-RPC requests.
pub fn create_client() -> Result<reqwest::Client, anyhow::Error> {
    reqwest::Client::builder()
        .timeout(DEFAULT_TIMEOUT)
        .build()
        .context("Failed to create HTTP client")
}

/// Make a JSON-RPC call and deserialize the result.
///
/// Connection failures, timeouts and overloaded endpoints are reported as [`Transient`].
pub async fn json_rpc_call<T: DeserializeOwned>(
    client: &reqwest::Client,
    url: &str,
    method: &str,
    params: Vec<Value>,
) -> Result<T, anyhow::Error> {
    let response = match client
        .post(url)
        .json(&serde_json::json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": 1
        }))
        .send()
        .await
    {
        Ok(response) => response,
        Err(e) if e.is_connect() || e.is_timeout() => {
            return Err(anyhow::Error::new(Transient(e.to_string())))
                .with_context(|| format!("Failed to send {} request", method));
        }
        Err(e) => {
            return Err(e).with_context(|| format!("Failed to send {} request", method));
        }
    };

    let status = response.status();
    if status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        return Err(anyhow::Error::new(Transient(format!("HTTP {status}"))))
            .with_context(|| format!("{} request rejected", method));
    }

    let result: Value = response
        .json()
        .await
        .with_context(|| format!("Failed to parse {} response", method))?;

    if let Some(error) = result.get("error") {
        anyhow::bail!(
            "RPC error: {}",
            error
                .get("message")
                .and_then(|m| m.as_str())
                .unwrap_or("unknown")
        );
    }

    let result_value = result
        .get("result")
        .context("No result in response")?
        .clone();

    serde_json::from_value(result_value)
        .with_context(|| format!("Failed to deserialize {} result", method))
}

/// Wait for a service to be ready by repeatedly calling a check function.
pub async fn wait_until_ready<F, Fut>(
    name: &str,
    timeout_secs: u64,
    check_fn: F,
) -> Result<(), anyhow::Error>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = Result<(), anyhow::Error>>,
{
    let start = std::time::Instant::now();
    let max_duration = Duration::from_secs(timeout_secs);

    loop {
        match check_fn().await {
            Ok(()) => return Ok(()),
            Err(e) if start.elapsed() > max_duration => {
                return Err(e).with_context(|| format!("Timeout waiting for {} to be ready", name));
            }
            Err(e) => {
                tracing::trace!(error = %e, service = %name, "Readiness check failed, retrying...");
            }
        }

        tokio::time::sleep(DEFAULT_POLL_INTERVAL).await;
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TransactionReceipt {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    contract_address: Option<Address>,
}

impl TransactionReceipt {
    fn succeeded(&self) -> bool {
        // Pre-Byzantium receipts carry no status.
        self.status.as_deref().is_none_or(|s| s == "0x1")
    }
}

/// Talks to a node that signs with its own unlocked accounts (`eth_sendTransaction`).
#[derive(Debug, Clone)]
pub struct JsonRpcNetwork {
    client: reqwest::Client,
    url: Url,
    from: Address,
    gas: Option<u64>,
    poll_interval: Duration,
    /// Bound on the logic contract receipt wait inside a proxied deployment.
    logic_timeout: Duration,
    /// Proxy deployed in front of proxied components. Its constructor takes the logic
    /// address and the initializer calldata.
    proxy: Option<Arc<Artifact>>,
}

impl JsonRpcNetwork {
    /// Connect to the node, waiting for it to answer and picking the sender account.
    ///
    /// `proxy` is only needed when proxied components are deployed.
    pub async fn connect(config: &NetworkConfig, proxy: Option<Artifact>) -> anyhow::Result<Self> {
        let url = Url::parse(&config.rpc_url)
            .with_context(|| format!("Invalid RPC URL: {}", config.rpc_url))?;
        let client = create_client()?;

        let chain_id: String = {
            let client = &client;
            let url = url.as_str();
            wait_until_ready("RPC endpoint", config.ready_timeout_secs, || async move {
                json_rpc_call::<String>(client, url, "eth_chainId", vec![])
                    .await
                    .map(|_| ())
            })
            .await?;
            json_rpc_call(client, url, "eth_chainId", vec![]).await?
        };

        let from = match config.from {
            Some(from) => from,
            None => {
                let accounts: Vec<Address> =
                    json_rpc_call(&client, url.as_str(), "eth_accounts", vec![])
                        .await
                        .context("Failed to list node accounts")?;
                *accounts
                    .first()
                    .context("Node has no unlocked accounts; set `network.from`")?
            }
        };

        tracing::info!(url = %url, chain_id = %chain_id, from = %from, "Connected to network");

        Ok(Self {
            client,
            url,
            from,
            gas: config.gas,
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            logic_timeout: DEFAULT_LOGIC_TIMEOUT,
            proxy: proxy.map(Arc::new),
        })
    }

    /// Bound the logic contract receipt wait of proxied deployments, usually to the
    /// run's confirmation timeout.
    pub fn with_logic_timeout(mut self, timeout: Duration) -> Self {
        self.logic_timeout = timeout;
        self
    }

    /// Account every transaction is sent from.
    pub fn sender(&self) -> Address {
        self.from
    }

    async fn send_transaction(&self, to: Option<Address>, data: &[u8]) -> anyhow::Result<String> {
        let mut tx = serde_json::json!({
            "from": self.from,
            "data": format!("0x{}", hex::encode(data)),
        });
        if let Some(to) = to {
            tx["to"] = serde_json::json!(to);
        }
        if let Some(gas) = self.gas {
            tx["gas"] = serde_json::json!(format!("0x{:x}", gas));
        }

        json_rpc_call(&self.client, self.url.as_str(), "eth_sendTransaction", vec![tx]).await
    }

    async fn wait_for_receipt(&self, tx_hash: &str) -> anyhow::Result<TransactionReceipt> {
        loop {
            let receipt: anyhow::Result<Option<TransactionReceipt>> = json_rpc_call(
                &self.client,
                self.url.as_str(),
                "eth_getTransactionReceipt",
                vec![serde_json::json!(tx_hash)],
            )
            .await;

            match receipt {
                Ok(Some(receipt)) => return Ok(receipt),
                Ok(None) => {}
                Err(e) if is_transient(&e) => {
                    tracing::debug!(error = %e, tx_hash, "Receipt poll failed, retrying...");
                }
                Err(e) => return Err(e),
            }

            tokio::time::sleep(self.poll_interval).await;
        }
    }

    async fn deploy_logic(&self, request: &DeploymentRequest) -> anyhow::Result<Address> {
        let tx_hash = self.send_transaction(None, &request.init_code).await?;
        tracing::info!(component = %request.component, tx_hash = %tx_hash, "Logic contract submitted");

        self.logic_address(&tx_hash).await.map_err(settled)
    }

    async fn logic_address(&self, tx_hash: &str) -> anyhow::Result<Address> {
        let receipt = tokio::time::timeout(self.logic_timeout, self.wait_for_receipt(tx_hash))
            .await
            .map_err(|_| {
                anyhow::anyhow!(
                    "logic deployment {} not mined within {:?}",
                    tx_hash,
                    self.logic_timeout
                )
            })??;
        if !receipt.succeeded() {
            anyhow::bail!("logic deployment {} reverted", tx_hash);
        }
        receipt
            .contract_address
            .with_context(|| format!("Receipt of {} has no contract address", tx_hash))
    }
}

impl Network for JsonRpcNetwork {
    async fn submit_deployment(&self, request: &DeploymentRequest) -> anyhow::Result<PendingHandle> {
        let tx_hash = self.send_transaction(None, &request.init_code).await?;
        tracing::debug!(component = %request.component, tx_hash = %tx_hash, "Deployment submitted");
        Ok(PendingHandle::new(tx_hash))
    }

    async fn submit_proxied_deployment(
        &self,
        logic: &DeploymentRequest,
        init_data: &Bytes,
    ) -> anyhow::Result<PendingHandle> {
        let proxy = self
            .proxy
            .as_deref()
            .context("No proxy artifact configured for proxied deployments")?;
        let constructor = proxy
            .abi
            .constructor
            .as_ref()
            .with_context(|| format!("Proxy {} has no constructor", proxy.contract_name))?;

        let implementation = self.deploy_logic(logic).await?;
        tracing::info!(
            component = %logic.component,
            implementation = %implementation,
            "Logic contract deployed, creating proxy"
        );

        let mut code = proxy.link(&Default::default())?;
        code.extend(
            constructor
                .abi_encode_input(&[
                    DynSolValue::Address(implementation),
                    DynSolValue::Bytes(init_data.to_vec()),
                ])
                .context("Failed to encode proxy constructor")?,
        );

        let tx_hash = self
            .send_transaction(None, &code)
            .await
            .map_err(settled)
            .with_context(|| {
                format!("Proxy creation failed after logic contract {implementation} was deployed")
            })?;
        tracing::debug!(component = %logic.component, tx_hash = %tx_hash, "Proxy submitted");
        Ok(PendingHandle::new(tx_hash).with_implementation(implementation))
    }

    async fn submit_call(&self, request: &CallRequest) -> anyhow::Result<PendingHandle> {
        let tx_hash = self
            .send_transaction(Some(request.target), &request.calldata)
            .await?;
        tracing::debug!(call = %request.label, tx_hash = %tx_hash, "Call submitted");
        Ok(PendingHandle::new(tx_hash))
    }

    async fn await_confirmation(&self, handle: &PendingHandle) -> anyhow::Result<Confirmation> {
        let receipt = self.wait_for_receipt(&handle.tx_hash).await?;

        if !receipt.succeeded() {
            return Ok(Confirmation::reverted(format!(
                "transaction {} reverted",
                handle.tx_hash
            )));
        }

        Ok(match receipt.contract_address {
            Some(address) => Confirmation::deployed(address),
            None => Confirmation::succeeded(),
        })
    }
}

/// Drop the [`Transient`] marker from a failure that happened after the logic contract
/// was sent. Retrying the whole proxied deployment would create a second logic contract.
fn settled(err: anyhow::Error) -> anyhow::Error {
    if is_transient(&err) {
        anyhow::anyhow!("{err:#}")
    } else {
        err
    }
}
