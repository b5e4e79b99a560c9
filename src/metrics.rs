//! Bridge metrics for monitoring and observability.
//!
//! Counters are updated from the dispatch path and can be read at any time
//! as a [`BridgeStats`] snapshot or exported in Prometheus text format.

use crate::error::ErrorCode;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Point-in-time view of a bridge
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BridgeStats {
    /// Commands dispatched, all kinds
    pub commands_total: u64,

    /// Events serialized and delivered to the module
    pub events_relayed: u64,

    /// Deferred callbacks invoked
    pub deferred_run: u64,

    /// Atoms ever allocated
    pub atoms_created: u64,

    /// Atoms freed by deletion
    pub atoms_freed: u64,

    /// Faults raised while relaying events
    pub faults: u64,

    /// Atoms currently live, mount included
    pub live_atoms: usize,

    /// Event registrations currently live
    pub registrations: usize,

    /// Callbacks waiting to run
    pub pending_deferred: usize,
}

/// Metrics collector for one bridge
pub struct BridgeMetrics {
    commands_total: AtomicU64,
    events_relayed: AtomicU64,
    deferred_run: AtomicU64,
    atoms_created: AtomicU64,
    atoms_freed: AtomicU64,
    faults: AtomicU64,
    commands: parking_lot::Mutex<HashMap<String, u64>>,
    fault_codes: parking_lot::Mutex<HashMap<String, u64>>,
}

impl BridgeMetrics {
    /// Create a new metrics collector
    pub fn new() -> Self {
        Self {
            commands_total: AtomicU64::new(0),
            events_relayed: AtomicU64::new(0),
            deferred_run: AtomicU64::new(0),
            atoms_created: AtomicU64::new(0),
            atoms_freed: AtomicU64::new(0),
            faults: AtomicU64::new(0),
            commands: parking_lot::Mutex::new(HashMap::new()),
            fault_codes: parking_lot::Mutex::new(HashMap::new()),
        }
    }

    /// Record a dispatched command
    pub fn record_command(&self, name: &str) {
        self.commands_total.fetch_add(1, Ordering::Relaxed);
        *self.commands.lock().entry(name.to_string()).or_insert(0) += 1;
    }

    /// Record a relayed event
    pub fn record_event(&self) {
        self.events_relayed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a deferred callback run
    pub fn record_deferred(&self) {
        self.deferred_run.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an atom allocation
    pub fn record_atom_created(&self) {
        self.atoms_created.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an atom being freed
    pub fn record_atom_freed(&self) {
        self.atoms_freed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a relay fault
    pub fn record_fault(&self, code: ErrorCode) {
        self.faults.fetch_add(1, Ordering::Relaxed);
        *self.fault_codes.lock().entry(code.to_string()).or_insert(0) += 1;
    }

    /// Times `name` was dispatched
    pub fn command_count(&self, name: &str) -> u64 {
        self.commands.lock().get(name).copied().unwrap_or(0)
    }

    /// Dispatch counts by command
    pub fn command_counts(&self) -> HashMap<String, u64> {
        self.commands.lock().clone()
    }

    /// Fault counts by code
    pub fn fault_counts(&self) -> HashMap<String, u64> {
        self.fault_codes.lock().clone()
    }

    /// Counter values; table sizes are left at zero
    pub fn snapshot(&self) -> BridgeStats {
        BridgeStats {
            commands_total: self.commands_total.load(Ordering::Relaxed),
            events_relayed: self.events_relayed.load(Ordering::Relaxed),
            deferred_run: self.deferred_run.load(Ordering::Relaxed),
            atoms_created: self.atoms_created.load(Ordering::Relaxed),
            atoms_freed: self.atoms_freed.load(Ordering::Relaxed),
            faults: self.faults.load(Ordering::Relaxed),
            ..BridgeStats::default()
        }
    }

    /// Reset all metrics
    pub fn reset(&self) {
        self.commands_total.store(0, Ordering::Relaxed);
        self.events_relayed.store(0, Ordering::Relaxed);
        self.deferred_run.store(0, Ordering::Relaxed);
        self.atoms_created.store(0, Ordering::Relaxed);
        self.atoms_freed.store(0, Ordering::Relaxed);
        self.faults.store(0, Ordering::Relaxed);
        self.commands.lock().clear();
        self.fault_codes.lock().clear();
    }

    /// Export Prometheus-format metrics
    pub fn to_prometheus(&self) -> String {
        let stats = self.snapshot();
        let mut output = String::new();

        output.push_str("# HELP blocks_bridge_commands_total Commands dispatched by name\n");
        output.push_str("# TYPE blocks_bridge_commands_total counter\n");
        let mut commands: Vec<_> = self.command_counts().into_iter().collect();
        commands.sort();
        for (name, count) in commands {
            output.push_str(&format!(
                "blocks_bridge_commands_total{{command=\"{}\"}} {}\n",
                name, count
            ));
        }

        output.push_str("\n# HELP blocks_bridge_events_relayed_total Events delivered to the module\n");
        output.push_str("# TYPE blocks_bridge_events_relayed_total counter\n");
        output.push_str(&format!(
            "blocks_bridge_events_relayed_total {}\n",
            stats.events_relayed
        ));

        output.push_str("\n# HELP blocks_bridge_deferred_total Deferred callbacks run\n");
        output.push_str("# TYPE blocks_bridge_deferred_total counter\n");
        output.push_str(&format!("blocks_bridge_deferred_total {}\n", stats.deferred_run));

        output.push_str("\n# HELP blocks_bridge_atoms_total Atom lifecycle\n");
        output.push_str("# TYPE blocks_bridge_atoms_total counter\n");
        output.push_str(&format!(
            "blocks_bridge_atoms_total{{op=\"created\"}} {}\n",
            stats.atoms_created
        ));
        output.push_str(&format!(
            "blocks_bridge_atoms_total{{op=\"freed\"}} {}\n",
            stats.atoms_freed
        ));

        // Faults
        output.push_str("\n# HELP blocks_bridge_faults_total Relay faults by code\n");
        output.push_str("# TYPE blocks_bridge_faults_total counter\n");
        let mut faults: Vec<_> = self.fault_counts().into_iter().collect();
        faults.sort();
        for (code, count) in faults {
            output.push_str(&format!(
                "blocks_bridge_faults_total{{code=\"{}\"}} {}\n",
                code, count
            ));
        }

        output
    }
}

impl Default for BridgeMetrics {
    fn default() -> Self {
        Self::new()
    }
}
