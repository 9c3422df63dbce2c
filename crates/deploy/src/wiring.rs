//! Post-deployment configuration calls between deployed components.

use std::{fmt, time::Duration};

use alloy_core::primitives::{Address, Bytes};
use serde::Serialize;

use crate::{
    DeployError, DeploymentLedger, DeploymentPlan, WiringEdge,
    network::{CallRequest, Network, encode_call},
};

/// Outcome of one wiring edge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "kebab-case")]
pub enum WiringStatus {
    Applied { tx_hash: String },
    Failed { reason: String },
    /// Skipped because an earlier edge failed.
    NotAttempted,
}

impl fmt::Display for WiringStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Applied { .. } => write!(f, "applied"),
            Self::Failed { .. } => write!(f, "failed"),
            Self::NotAttempted => write!(f, "not attempted"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WiringResult {
    pub edge: WiringEdge,
    #[serde(flatten)]
    pub status: WiringStatus,
}

/// Per-edge outcomes, in declaration order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WiringReport {
    pub results: Vec<WiringResult>,
}

impl WiringReport {
    pub fn is_success(&self) -> bool {
        self.results
            .iter()
            .all(|r| matches!(r.status, WiringStatus::Applied { .. }))
    }

    /// The edge that halted the phase, if any.
    pub fn failure(&self) -> Option<&WiringResult> {
        self.results
            .iter()
            .find(|r| matches!(r.status, WiringStatus::Failed { .. }))
    }
}

/// Applies wiring edges once every component they touch is Confirmed.
pub struct WiringPhase<'a, N> {
    network: &'a N,
    plan: &'a DeploymentPlan,
    confirmation_timeout: Duration,
}

impl<'a, N: Network> WiringPhase<'a, N> {
    pub fn new(network: &'a N, plan: &'a DeploymentPlan, confirmation_timeout: Duration) -> Self {
        Self {
            network,
            plan,
            confirmation_timeout,
        }
    }

    /// Issue every setter call in order, halting at the first failure.
    ///
    /// All addresses are resolved before the first call, so an edge touching an
    /// unconfirmed component fails the phase with [`DeployError::UnresolvedAddress`]
    /// without any call being made.
    pub async fn apply(
        &self,
        edges: &[WiringEdge],
        ledger: &DeploymentLedger,
    ) -> Result<WiringReport, DeployError> {
        let resolve = |name: &str| {
            ledger
                .confirmed_address(name)
                .ok_or_else(|| DeployError::UnresolvedAddress(name.to_string()))
        };
        let resolved = edges
            .iter()
            .map(|edge| Ok((edge, resolve(&edge.source)?, resolve(&edge.target)?)))
            .collect::<Result<Vec<_>, DeployError>>()?;

        tracing::info!(edges = edges.len(), "Applying wiring");

        let mut report = WiringReport::default();
        let mut halted = false;

        for (edge, source, target) in resolved {
            let status = if halted {
                WiringStatus::NotAttempted
            } else {
                match self.apply_edge(edge, source, target).await {
                    Ok(tx_hash) => {
                        tracing::info!(edge = %edge, tx_hash = %tx_hash, "Wiring applied");
                        WiringStatus::Applied { tx_hash }
                    }
                    Err(err) => {
                        tracing::error!(edge = %edge, error = %err, "Wiring failed");
                        halted = true;
                        WiringStatus::Failed {
                            reason: err.to_string(),
                        }
                    }
                }
            };

            report.results.push(WiringResult {
                edge: edge.clone(),
                status,
            });
        }

        Ok(report)
    }

    async fn apply_edge(
        &self,
        edge: &WiringEdge,
        source: Address,
        target: Address,
    ) -> Result<String, DeployError> {
        let failed = |reason: String| DeployError::WiringFailed {
            edge: edge.to_string(),
            reason,
        };

        let step = self
            .plan
            .step(&edge.target)
            .ok_or_else(|| failed(format!("`{}` is not part of the plan", edge.target)))?;

        let calldata = encode_call(&step.artifact.abi, &edge.setter, &[source.to_string()])
            .map_err(|e| failed(format!("{e:#}")))?;

        let request = CallRequest {
            label: edge.to_string(),
            target,
            calldata: Bytes::from(calldata),
        };
        let handle = self
            .network
            .submit_call(&request)
            .await
            .map_err(|e| failed(format!("{e:#}")))?;

        match tokio::time::timeout(
            self.confirmation_timeout,
            self.network.await_confirmation(&handle),
        )
        .await
        {
            Err(_) => Err(DeployError::WiringTimeout {
                edge: edge.to_string(),
                timeout: self.confirmation_timeout,
            }),
            Ok(Err(e)) => Err(failed(format!("{e:#}"))),
            Ok(Ok(confirmation)) if !confirmation.success => Err(failed(
                confirmation
                    .error
                    .unwrap_or_else(|| format!("transaction {} reverted", handle.tx_hash)),
            )),
            Ok(Ok(_)) => Ok(handle.tx_hash),
        }
    }
}
