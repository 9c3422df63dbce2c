//! Append-only record of deployment outcomes.
//!
//! Every status transition is appended as one JSON line and synced before the in-memory
//! view changes, so a crash never loses a transaction handle that was already sent. The
//! last record for a component is its current entry. Confirmed entries are final.

use std::{
    collections::{HashMap, HashSet},
    fs::{File, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
    sync::{Mutex, MutexGuard, PoisonError},
};

use alloy_core::primitives::Address;
use anyhow::Context;
use fs2::FileExt;
use serde::{Deserialize, Serialize};

use crate::{DeployError, network::PendingHandle};

/// Lifecycle of a deployment step.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum StepStatus {
    /// Not submitted yet. Never persisted: a component without entry is pending.
    Pending,
    Submitted,
    Confirmed,
    Failed,
}

impl StepStatus {
    /// Transitions a new record may make from the current entry's status.
    pub fn can_transition_to(self, next: StepStatus) -> bool {
        use StepStatus::*;
        matches!(
            (self, next),
            (Pending, Submitted | Failed)
                | (Submitted, Confirmed | Failed)
                | (Failed, Submitted | Failed)
        )
    }
}

/// One persisted transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerRecord {
    pub component: String,
    pub status: StepStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<Address>,
    /// Logic contract behind a proxied component.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub implementation: Option<Address>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handle: Option<PendingHandle>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Unix timestamp, in seconds.
    pub timestamp: i64,
}

impl LedgerRecord {
    fn new(component: &str, status: StepStatus) -> Self {
        Self {
            component: component.to_string(),
            status,
            address: None,
            implementation: None,
            handle: None,
            fingerprint: None,
            error: None,
            timestamp: chrono::Utc::now().timestamp(),
        }
    }
}

/// Outcome of claiming a component before submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Begin {
    /// Nothing usable recorded; the caller now owns the submission.
    Fresh,
    /// Already deployed, nothing to do.
    Confirmed(LedgerRecord),
    /// A previous run submitted but never saw the outcome; await this handle.
    InFlight(PendingHandle),
}

#[derive(Debug, Default)]
struct LedgerState {
    order: Vec<String>,
    entries: HashMap<String, LedgerRecord>,
    claimed: HashSet<String>,
    file: Option<File>,
}

impl LedgerState {
    fn apply(&mut self, record: LedgerRecord) {
        if !self.entries.contains_key(&record.component) {
            self.order.push(record.component.clone());
        }
        self.entries.insert(record.component.clone(), record);
    }

    fn status(&self, name: &str) -> StepStatus {
        self.entries
            .get(name)
            .map_or(StepStatus::Pending, |e| e.status)
    }
}

/// Shared, durable record of component addresses and statuses.
///
/// All mutation goes through a single lock, so "read the status, then transition" is
/// atomic per component even when several steps run concurrently.
#[derive(Debug)]
pub struct DeploymentLedger {
    path: Option<PathBuf>,
    read_only: bool,
    state: Mutex<LedgerState>,
}

impl DeploymentLedger {
    /// A ledger that lives only as long as this value.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            read_only: false,
            state: Mutex::new(LedgerState::default()),
        }
    }

    /// Open (or create) a ledger file for a run, holding an exclusive lock on it until the
    /// ledger is dropped.
    pub fn open(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create ledger directory {}", parent.display()))?;
        }

        let file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(path)
            .with_context(|| format!("Failed to open ledger {}", path.display()))?;
        file.try_lock_exclusive()
            .with_context(|| format!("Ledger {} is locked by another run", path.display()))?;

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read ledger {}", path.display()))?;
        let mut state = Self::replay(&content)
            .with_context(|| format!("Failed to load ledger {}", path.display()))?;
        state.file = Some(file);

        tracing::info!(
            path = %path.display(),
            entries = state.entries.len(),
            "Deployment ledger opened"
        );

        Ok(Self {
            path: Some(path.to_path_buf()),
            read_only: false,
            state: Mutex::new(state),
        })
    }

    /// Load a read-only snapshot of a ledger file without locking it.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            anyhow::bail!("Ledger file does not exist: {}", path.display());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read ledger {}", path.display()))?;
        let state = Self::replay(&content)
            .with_context(|| format!("Failed to load ledger {}", path.display()))?;

        Ok(Self {
            path: Some(path.to_path_buf()),
            read_only: true,
            state: Mutex::new(state),
        })
    }

    fn replay(content: &str) -> anyhow::Result<LedgerState> {
        let mut state = LedgerState::default();

        for (line_no, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let record: LedgerRecord = serde_json::from_str(line)
                .with_context(|| format!("Malformed ledger record on line {}", line_no + 1))?;

            let current = state.status(&record.component);
            if !current.can_transition_to(record.status) {
                tracing::warn!(
                    component = %record.component,
                    from = %current,
                    to = %record.status,
                    line = line_no + 1,
                    "Ledger contains an unexpected transition"
                );
            }
            state.apply(record);
        }

        Ok(state)
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn state(&self) -> MutexGuard<'_, LedgerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current entry for a component.
    pub fn entry(&self, name: &str) -> Option<LedgerRecord> {
        self.state().entries.get(name).cloned()
    }

    /// Current status of a component, `Pending` if it has no entry.
    pub fn status(&self, name: &str) -> StepStatus {
        self.state().status(name)
    }

    /// Current entries, in the order components first appeared.
    pub fn entries(&self) -> Vec<LedgerRecord> {
        let state = self.state();
        state
            .order
            .iter()
            .filter_map(|name| state.entries.get(name).cloned())
            .collect()
    }

    /// Address of a component, only if its deployment is Confirmed.
    pub fn confirmed_address(&self, name: &str) -> Option<Address> {
        self.state()
            .entries
            .get(name)
            .filter(|e| e.status == StepStatus::Confirmed)
            .and_then(|e| e.address)
    }

    /// Atomically inspect a component and claim it for submission if needed.
    ///
    /// A claimed component cannot be claimed again until its outcome is recorded or the
    /// claim is released.
    pub fn begin(&self, name: &str) -> Result<Begin, DeployError> {
        let mut state = self.state();
        if state.claimed.contains(name) {
            return Err(DeployError::ConcurrentSubmission(name.to_string()));
        }

        let outcome = match state.entries.get(name) {
            Some(entry) if entry.status == StepStatus::Confirmed => {
                return Ok(Begin::Confirmed(entry.clone()));
            }
            Some(LedgerRecord {
                status: StepStatus::Submitted,
                handle: Some(handle),
                ..
            }) => Begin::InFlight(handle.clone()),
            _ => Begin::Fresh,
        };

        state.claimed.insert(name.to_string());
        Ok(outcome)
    }

    /// Drop a claim without recording an outcome.
    pub fn release(&self, name: &str) {
        self.state().claimed.remove(name);
    }

    pub fn record_submitted(
        &self,
        name: &str,
        handle: PendingHandle,
        fingerprint: &str,
    ) -> Result<(), DeployError> {
        let mut record = LedgerRecord::new(name, StepStatus::Submitted);
        record.implementation = handle.implementation;
        record.handle = Some(handle);
        record.fingerprint = Some(fingerprint.to_string());
        self.append(record)
    }

    pub fn record_confirmed(
        &self,
        name: &str,
        address: Address,
        handle: PendingHandle,
        fingerprint: &str,
    ) -> Result<(), DeployError> {
        let mut record = LedgerRecord::new(name, StepStatus::Confirmed);
        record.address = Some(address);
        record.implementation = handle.implementation;
        record.handle = Some(handle);
        record.fingerprint = Some(fingerprint.to_string());
        self.append(record)
    }

    pub fn record_failed(
        &self,
        name: &str,
        handle: Option<PendingHandle>,
        error: impl Into<String>,
    ) -> Result<(), DeployError> {
        let mut record = LedgerRecord::new(name, StepStatus::Failed);
        record.implementation = handle.as_ref().and_then(|h| h.implementation);
        record.handle = handle;
        record.error = Some(error.into());
        self.append(record)
    }

    fn append(&self, record: LedgerRecord) -> Result<(), DeployError> {
        if self.read_only {
            return Err(anyhow::anyhow!("Ledger was loaded read-only").into());
        }

        let mut state = self.state();
        let current = state.status(&record.component);
        if !current.can_transition_to(record.status) {
            return Err(DeployError::InvalidTransition {
                component: record.component,
                from: current,
                to: record.status,
            });
        }

        if let Some(file) = state.file.as_mut() {
            let mut line =
                serde_json::to_string(&record).context("Failed to serialize ledger record")?;
            line.push('\n');
            file.write_all(line.as_bytes())
                .context("Failed to append ledger record")?;
            file.sync_data().context("Failed to sync ledger")?;
        }

        tracing::debug!(
            component = %record.component,
            status = %record.status,
            "Ledger updated"
        );

        if record.status != StepStatus::Submitted {
            state.claimed.remove(&record.component);
        }
        state.apply(record);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempdir::TempDir;

    const TOKEN: &str = "0x5FbDB2315678afecb367f032d93F642f64180aa3";
    const LOGIC: &str = "0xe7f1725E7734CE288F8367e1Bb143E90bb3F0512";

    fn handle(tx: &str) -> PendingHandle {
        PendingHandle::new(tx)
    }

    #[test]
    fn test_transitions() {
        use StepStatus::*;
        assert!(Pending.can_transition_to(Submitted));
        assert!(Submitted.can_transition_to(Confirmed));
        assert!(Submitted.can_transition_to(Failed));
        assert!(Failed.can_transition_to(Submitted));
        assert!(!Confirmed.can_transition_to(Submitted));
        assert!(!Confirmed.can_transition_to(Failed));
        assert!(!Submitted.can_transition_to(Submitted));
        assert!(!Pending.can_transition_to(Confirmed));
    }

    #[test]
    fn test_confirmed_entry_is_immutable() {
        let ledger = DeploymentLedger::in_memory();
        let address: Address = TOKEN.parse().unwrap();

        assert_eq!(ledger.begin("Token").unwrap(), Begin::Fresh);
        ledger.record_submitted("Token", handle("0x01"), "fp").unwrap();
        ledger
            .record_confirmed("Token", address, handle("0x01"), "fp")
            .unwrap();

        assert!(matches!(
            ledger.record_failed("Token", None, "late failure"),
            Err(DeployError::InvalidTransition { from: StepStatus::Confirmed, .. })
        ));
        assert_eq!(ledger.confirmed_address("Token"), Some(address));
        assert!(matches!(ledger.begin("Token").unwrap(), Begin::Confirmed(_)));
    }

    #[test]
    fn test_double_claim_is_rejected() {
        let ledger = DeploymentLedger::in_memory();

        assert_eq!(ledger.begin("Token").unwrap(), Begin::Fresh);
        assert!(matches!(
            ledger.begin("Token"),
            Err(DeployError::ConcurrentSubmission(name)) if name == "Token"
        ));

        ledger.release("Token");
        assert_eq!(ledger.begin("Token").unwrap(), Begin::Fresh);
    }

    #[test]
    fn test_submitted_entry_resumes_in_flight() {
        let temp_dir = TempDir::new("kiln-ledger").expect("Failed to create temp dir");
        let path = temp_dir.path().join("ledger.jsonl");

        {
            let ledger = DeploymentLedger::open(&path).unwrap();
            ledger.begin("Token").unwrap();
            ledger.record_submitted("Token", handle("0xabc"), "fp").unwrap();
        }

        let ledger = DeploymentLedger::open(&path).unwrap();
        assert_eq!(ledger.status("Token"), StepStatus::Submitted);
        assert_eq!(
            ledger.begin("Token").unwrap(),
            Begin::InFlight(handle("0xabc"))
        );
        assert_eq!(ledger.confirmed_address("Token"), None);
    }

    #[test]
    fn test_failed_entry_can_be_retried() {
        let ledger = DeploymentLedger::in_memory();
        ledger.begin("Token").unwrap();
        ledger.record_failed("Token", None, "rejected").unwrap();

        assert_eq!(ledger.begin("Token").unwrap(), Begin::Fresh);
        ledger.record_submitted("Token", handle("0x02"), "fp").unwrap();
        assert_eq!(ledger.status("Token"), StepStatus::Submitted);
    }

    #[test]
    fn test_persisted_records_replay_in_order() {
        let temp_dir = TempDir::new("kiln-ledger").expect("Failed to create temp dir");
        let path = temp_dir.path().join("deployments/ledger.jsonl");
        let token: Address = TOKEN.parse().unwrap();
        let logic: Address = LOGIC.parse().unwrap();
        let proxied = PendingHandle::new("0x03").with_implementation(logic);

        let written = {
            let ledger = DeploymentLedger::open(&path).unwrap();
            ledger.begin("Token").unwrap();
            ledger.record_submitted("Token", handle("0x01"), "fp-token").unwrap();
            ledger.record_confirmed("Token", token, handle("0x01"), "fp-token").unwrap();
            ledger.begin("Sale").unwrap();
            ledger.record_submitted("Sale", proxied.clone(), "fp-sale").unwrap();
            ledger.record_failed("Sale", Some(proxied), "reverted").unwrap();
            ledger.entries()
        };

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 4, "one line per transition");

        let reloaded = DeploymentLedger::load(&path).unwrap();
        assert_eq!(reloaded.entries(), written);
        assert_eq!(written[0].component, "Token");
        assert_eq!(written[1].status, StepStatus::Failed);
        assert_eq!(written[1].implementation, Some(logic));
        assert_eq!(written[1].error.as_deref(), Some("reverted"));
    }

    #[test]
    fn test_open_is_exclusive() {
        let temp_dir = TempDir::new("kiln-ledger").expect("Failed to create temp dir");
        let path = temp_dir.path().join("ledger.jsonl");

        let _held = DeploymentLedger::open(&path).unwrap();
        assert!(DeploymentLedger::open(&path).is_err());
        // Read-only snapshots do not take the lock.
        assert!(DeploymentLedger::load(&path).is_ok());
    }

    #[test]
    fn test_read_only_ledger_rejects_writes() {
        let temp_dir = TempDir::new("kiln-ledger").expect("Failed to create temp dir");
        let path = temp_dir.path().join("ledger.jsonl");
        std::fs::write(&path, "").unwrap();

        let ledger = DeploymentLedger::load(&path).unwrap();
        assert!(matches!(
            ledger.record_failed("Token", None, "x"),
            Err(DeployError::Ledger(_))
        ));
    }

    #[test]
    fn test_corrupted_ledger_fails_to_load() {
        let temp_dir = TempDir::new("kiln-ledger").expect("Failed to create temp dir");
        let path = temp_dir.path().join("ledger.jsonl");
        std::fs::write(&path, "{ invalid json }\n").unwrap();

        let err = DeploymentLedger::load(&path).unwrap_err();
        assert!(format!("{err:#}").contains("line 1"));
    }

    #[test]
    fn test_load_missing_file() {
        let temp_dir = TempDir::new("kiln-ledger").expect("Failed to create temp dir");
        assert!(DeploymentLedger::load(temp_dir.path().join("nonexistent.jsonl")).is_err());
    }
}
