//! Human-readable summary of a deployment run.

use std::fmt;

use alloy_core::primitives::Address;
use comfy_table::{Table, presets::UTF8_FULL};
use serde::Serialize;

use crate::{
    DeployError, DeploymentKind, DeploymentLedger, DeploymentPlan, StepStatus, WiringReport,
    WiringResult, WiringStatus,
};

/// Terminal state of one component.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ComponentReport {
    pub name: String,
    pub kind: DeploymentKind,
    pub status: StepStatus,
    pub address: Option<Address>,
    pub implementation: Option<Address>,
    pub error: Option<String>,
}

/// Every component and wiring edge with its final status, plus the error that stopped
/// the run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeploymentReport {
    pub components: Vec<ComponentReport>,
    pub wiring: Vec<WiringResult>,
    pub error: Option<String>,
}

impl DeploymentReport {
    /// Snapshot the plan's components from the ledger. Wiring edges start out as not
    /// attempted.
    pub fn new(plan: &DeploymentPlan, ledger: &DeploymentLedger) -> Self {
        let components = plan
            .iter()
            .map(|step| {
                let entry = ledger.entry(step.name());
                ComponentReport {
                    name: step.name().to_string(),
                    kind: step.kind(),
                    status: entry.as_ref().map_or(StepStatus::Pending, |e| e.status),
                    address: entry.as_ref().and_then(|e| e.address),
                    implementation: entry.as_ref().and_then(|e| e.implementation),
                    error: entry.and_then(|e| e.error),
                }
            })
            .collect();

        let wiring = plan
            .wiring()
            .iter()
            .map(|edge| WiringResult {
                edge: edge.clone(),
                status: WiringStatus::NotAttempted,
            })
            .collect();

        Self {
            components,
            wiring,
            error: None,
        }
    }

    pub fn with_wiring(mut self, wiring: WiringReport) -> Self {
        self.wiring = wiring.results;
        self
    }

    pub fn with_error(mut self, error: &DeployError) -> Self {
        self.error = Some(error.to_string());
        self
    }

    /// All components Confirmed, all edges applied and no run error.
    pub fn is_success(&self) -> bool {
        self.error.is_none()
            && self
                .components
                .iter()
                .all(|c| c.status == StepStatus::Confirmed)
            && self
                .wiring
                .iter()
                .all(|w| matches!(w.status, WiringStatus::Applied { .. }))
    }

    /// One line naming what failed, or `None` on success.
    pub fn failure_summary(&self) -> Option<String> {
        if self.is_success() {
            return None;
        }

        if let Some(failed) = self
            .components
            .iter()
            .find(|c| c.status == StepStatus::Failed)
        {
            return Some(format!(
                "component `{}` failed: {}",
                failed.name,
                failed.error.as_deref().unwrap_or("unknown error")
            ));
        }

        if let Some(WiringResult {
            status: WiringStatus::Failed { reason },
            ..
        }) = self
            .wiring
            .iter()
            .find(|w| matches!(w.status, WiringStatus::Failed { .. }))
        {
            // The reason already names the edge.
            return Some(reason.clone());
        }

        Some(match &self.error {
            Some(error) => format!("deployment incomplete: {error}"),
            None => "deployment incomplete".to_string(),
        })
    }

    fn components_table(&self) -> Table {
        let mut table = Table::new();
        table.load_preset(UTF8_FULL).set_header(vec![
            "Component",
            "Kind",
            "Status",
            "Address",
            "Implementation",
        ]);

        for component in &self.components {
            table.add_row(vec![
                component.name.clone(),
                component.kind.to_string(),
                component.status.to_string(),
                component.address.map(|a| a.to_string()).unwrap_or_default(),
                component
                    .implementation
                    .map(|a| a.to_string())
                    .unwrap_or_default(),
            ]);
        }
        table
    }

    fn wiring_table(&self) -> Table {
        let mut table = Table::new();
        table
            .load_preset(UTF8_FULL)
            .set_header(vec!["Wiring", "Status", "Detail"]);

        for result in &self.wiring {
            let detail = match &result.status {
                WiringStatus::Applied { tx_hash } => tx_hash.clone(),
                WiringStatus::Failed { reason } => reason.clone(),
                WiringStatus::NotAttempted => String::new(),
            };
            table.add_row(vec![
                result.edge.to_string(),
                result.status.to_string(),
                detail,
            ]);
        }
        table
    }
}

impl fmt::Display for DeploymentReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.components_table())?;
        if !self.wiring.is_empty() {
            writeln!(f, "{}", self.wiring_table())?;
        }
        match self.failure_summary() {
            Some(summary) => write!(f, "FAILED: {summary}"),
            None => write!(f, "OK: {} components deployed", self.components.len()),
        }
    }
}
