//! Executes a deployment plan against a [`Network`], one ledger transition at a time.
//!
//! A step is launched only once every dependency is Confirmed in the ledger. With the
//! default parallelism of one, steps run strictly in plan order. Any failure stops new
//! launches; steps already in flight are awaited so their outcome is recorded.

use std::{collections::BTreeMap, time::Duration};

use alloy_core::primitives::{Address, Bytes};
use backon::{ExponentialBuilder, Retryable};
use futures::{StreamExt, stream::FuturesUnordered};
use tokio::sync::watch;

use crate::{
    ArgSpec, Begin, DeployError, DeploymentKind, DeploymentLedger, DeploymentPlan,
    DeploymentStep, StepStatus,
    network::{
        Confirmation, DeploymentRequest, Network, PendingHandle, encode_constructor,
        encode_initializer, is_transient,
    },
};

/// Knobs for a deployment run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOptions {
    /// Upper bound on a single confirmation wait. Expiry fails the step.
    pub confirmation_timeout: Duration,
    /// Maximum number of independent steps in flight together.
    pub max_parallel: usize,
    /// Retries for submissions that fail with a transient network error.
    pub submit_retries: usize,
    /// First retry delay, doubled on every attempt.
    pub retry_min_delay: Duration,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            confirmation_timeout: Duration::from_secs(120),
            max_parallel: 1,
            submit_retries: 3,
            retry_min_delay: Duration::from_secs(1),
        }
    }
}

/// A step ready for submission.
struct Prepared {
    request: DeploymentRequest,
    /// Proxy initializer calldata, for proxied components.
    init_data: Option<Bytes>,
}

/// Drives deployment steps through submission and confirmation.
pub struct Orchestrator<'a, N> {
    network: &'a N,
    options: RunOptions,
    cancel: Option<watch::Receiver<bool>>,
}

impl<'a, N: Network> Orchestrator<'a, N> {
    pub fn new(network: &'a N, options: RunOptions) -> Self {
        Self {
            network,
            options,
            cancel: None,
        }
    }

    /// Stop launching steps once `true` is sent on the channel.
    pub fn with_cancellation(mut self, cancel: watch::Receiver<bool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(|rx| *rx.borrow())
    }

    /// Run every step of the plan that is not yet Confirmed.
    ///
    /// Returns the first step error. Already Confirmed steps are skipped and Submitted
    /// steps are awaited rather than resubmitted, so running the same plan against the
    /// same ledger again is safe.
    pub async fn run(
        &self,
        plan: &DeploymentPlan,
        ledger: &DeploymentLedger,
    ) -> Result<(), DeployError> {
        let max_parallel = self.options.max_parallel.max(1);
        let mut launched = vec![false; plan.len()];
        let mut in_flight = FuturesUnordered::new();
        let mut failure: Option<DeployError> = None;

        tracing::info!(steps = plan.len(), max_parallel, "Starting deployment run");

        loop {
            if failure.is_none() && self.is_cancelled() {
                tracing::warn!("Cancellation requested, no further steps will be launched");
                failure = Some(DeployError::Cancelled);
            }

            if failure.is_none() {
                for (idx, step) in plan.iter().enumerate() {
                    if in_flight.len() >= max_parallel {
                        break;
                    }
                    if launched[idx] {
                        continue;
                    }

                    let ready = step
                        .dependencies
                        .iter()
                        .all(|dep| ledger.status(dep) == StepStatus::Confirmed);
                    if !ready {
                        if max_parallel == 1 {
                            break;
                        }
                        continue;
                    }

                    launched[idx] = true;
                    in_flight.push(self.execute(step, plan, ledger));
                }
            }

            match in_flight.next().await {
                Some(Ok(())) => {}
                Some(Err(err)) => match &failure {
                    None => failure = Some(err),
                    Some(_) => {
                        tracing::error!(error = %err, "Additional step failure after halt");
                    }
                },
                None => break,
            }
        }

        if let Some(err) = failure {
            return Err(err);
        }

        // Only reachable if a dependency never reached Confirmed without failing.
        if let Some(step) = plan.iter().zip(&launched).find(|(_, l)| !**l).map(|(s, _)| s) {
            let missing = step
                .dependencies
                .iter()
                .find(|dep| ledger.status(dep) != StepStatus::Confirmed)
                .map_or_else(|| step.name().to_string(), Clone::clone);
            return Err(DeployError::UnresolvedAddress(missing));
        }

        tracing::info!(steps = plan.len(), "All components deployed");
        Ok(())
    }

    async fn execute(
        &self,
        step: &DeploymentStep,
        plan: &DeploymentPlan,
        ledger: &DeploymentLedger,
    ) -> Result<(), DeployError> {
        let name = step.name();

        match ledger.begin(name)? {
            Begin::Confirmed(entry) => {
                if entry
                    .fingerprint
                    .as_deref()
                    .is_some_and(|fp| fp != step.fingerprint)
                {
                    tracing::warn!(
                        component = name,
                        "Deployed component no longer matches its configuration; use a fresh ledger to redeploy it"
                    );
                }
                tracing::info!(component = name, address = ?entry.address, "Already deployed, skipping");
                return Ok(());
            }
            Begin::InFlight(handle) => {
                tracing::info!(
                    component = name,
                    tx_hash = %handle.tx_hash,
                    "Resuming submitted deployment"
                );
                return self.confirm(step, handle, ledger).await;
            }
            Begin::Fresh => {}
        }

        let prepared = match Self::prepare(step, plan, ledger) {
            Ok(prepared) => prepared,
            Err(err) => {
                ledger.release(name);
                return Err(err);
            }
        };

        tracing::info!(component = name, kind = %step.kind(), "Submitting deployment");
        let handle = match self.submit(&prepared).await {
            Ok(handle) => handle,
            Err(e) => {
                let err = DeployError::Submission {
                    component: name.to_string(),
                    reason: format!("{e:#}"),
                };
                tracing::error!(component = name, error = %err, "Deployment step failed");
                ledger.record_failed(name, None, err.to_string())?;
                return Err(err);
            }
        };

        ledger.record_submitted(name, handle.clone(), &step.fingerprint)?;
        self.confirm(step, handle, ledger).await
    }

    /// Resolve link addresses and reference arguments, then encode the payload.
    fn prepare(
        step: &DeploymentStep,
        plan: &DeploymentPlan,
        ledger: &DeploymentLedger,
    ) -> Result<Prepared, DeployError> {
        let confirmed = |dep: &str| {
            ledger
                .confirmed_address(dep)
                .ok_or_else(|| DeployError::UnresolvedAddress(dep.to_string()))
        };
        let invalid = |e: anyhow::Error| DeployError::InvalidArguments {
            component: step.name().to_string(),
            reason: format!("{e:#}"),
        };

        let mut libraries: BTreeMap<String, Address> = BTreeMap::new();
        for link in &step.component.links {
            let address = confirmed(link)?;
            // Link references name the library contract, not the component.
            if let Some(library) = plan.step(link) {
                libraries.insert(library.artifact.contract_name.clone(), address);
            }
            libraries.insert(link.clone(), address);
        }

        let args = step
            .component
            .args
            .iter()
            .map(|arg| match arg {
                ArgSpec::AddressOf { address_of } => confirmed(address_of).map(|a| a.to_string()),
                ArgSpec::Literal(value) => Ok(value.clone()),
            })
            .collect::<Result<Vec<_>, _>>()?;

        let mut init_code = step.artifact.link(&libraries)?;
        let init_data = match step.kind() {
            DeploymentKind::Direct => {
                init_code.extend(encode_constructor(&step.artifact.abi, &args).map_err(invalid)?);
                None
            }
            DeploymentKind::ProxiedUpgradeable => {
                init_code.extend(encode_constructor(&step.artifact.abi, &[]).map_err(invalid)?);
                let data = encode_initializer(
                    &step.artifact.abi,
                    step.component.initializer_name(),
                    &args,
                )
                .map_err(invalid)?;
                Some(Bytes::from(data))
            }
        };

        tracing::debug!(
            component = step.name(),
            libraries = libraries.len(),
            code_size = init_code.len(),
            "Deployment payload prepared"
        );

        Ok(Prepared {
            request: DeploymentRequest {
                component: step.name().to_string(),
                contract: step.artifact.contract_name.clone(),
                init_code: Bytes::from(init_code),
            },
            init_data,
        })
    }

    async fn submit(&self, prepared: &Prepared) -> anyhow::Result<PendingHandle> {
        let backoff = ExponentialBuilder::default()
            .with_min_delay(self.options.retry_min_delay)
            .with_max_times(self.options.submit_retries);

        (move || async move {
            match &prepared.init_data {
                None => self.network.submit_deployment(&prepared.request).await,
                Some(init_data) => {
                    self.network
                        .submit_proxied_deployment(&prepared.request, init_data)
                        .await
                }
            }
        })
        .retry(backoff)
        .when(is_transient)
        .notify(|err: &anyhow::Error, delay: Duration| {
            tracing::warn!(
                component = %prepared.request.component,
                error = %err,
                delay = ?delay,
                "Transient submission failure, retrying"
            );
        })
        .await
    }

    async fn confirm(
        &self,
        step: &DeploymentStep,
        handle: PendingHandle,
        ledger: &DeploymentLedger,
    ) -> Result<(), DeployError> {
        let name = step.name();
        let timeout = self.options.confirmation_timeout;
        let failed = |reason: String| DeployError::ConfirmationFailed {
            component: name.to_string(),
            reason,
        };

        let outcome =
            tokio::time::timeout(timeout, self.network.await_confirmation(&handle)).await;

        let err = match outcome {
            Err(_) => DeployError::ConfirmationTimeout {
                component: name.to_string(),
                timeout,
            },
            Ok(Err(e)) => failed(format!("{e:#}")),
            Ok(Ok(Confirmation { success: false, error, .. })) => {
                failed(error.unwrap_or_else(|| "transaction reverted".to_string()))
            }
            Ok(Ok(Confirmation { address: None, .. })) => {
                failed("receipt carries no contract address".to_string())
            }
            Ok(Ok(Confirmation {
                address: Some(address),
                ..
            })) => {
                ledger.record_confirmed(name, address, handle, &step.fingerprint)?;
                tracing::info!(component = name, address = %address, "Component deployed");
                return Ok(());
            }
        };

        tracing::error!(component = name, error = %err, "Deployment step failed");
        ledger.record_failed(name, Some(handle), err.to_string())?;
        Err(err)
    }
}
