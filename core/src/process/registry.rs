//! Process-wide table of children that have not been reaped yet

use super::record::ProcessState;
use super::status::ExitStatus;
use nix::unistd::Pid;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::warn;

/// Maps pid to the state of every live child spawned by this process.
///
/// Only ever accessed through the reaper's mutex. A pid present here has not
/// been reaped, so the kernel cannot have recycled it for another process.
#[derive(Debug, Default)]
pub(crate) struct ReapRegistry {
    records: BTreeMap<Pid, Arc<ProcessState>>,
}

impl ReapRegistry {
    pub(crate) const fn new() -> Self {
        Self {
            records: BTreeMap::new(),
        }
    }

    pub(crate) fn insert(&mut self, state: Arc<ProcessState>) {
        let pid = state.raw_pid();
        if let Some(stale) = self.records.insert(pid, state) {
            // Only possible if someone else reaped our child and the pid was reused
            warn!(
                "Replaced stale registry entry for pid {} ({})",
                pid,
                stale.cmdline()
            );
        }
    }

    /// Remove `pid`, publishing `status` on its record while still holding
    /// the registry so removal and publication are observed together.
    pub(crate) fn complete(&mut self, pid: Pid, status: ExitStatus) -> Option<Arc<ProcessState>> {
        let state = self.records.remove(&pid)?;
        state.publish(status);
        Some(state)
    }

    /// Drop `state` if it is still registered under its pid
    pub(crate) fn forget(&mut self, state: &Arc<ProcessState>) -> bool {
        let pid = state.raw_pid();
        match self.records.get(&pid) {
            Some(current) if Arc::ptr_eq(current, state) => {
                self.records.remove(&pid);
                true
            }
            _ => false,
        }
    }

    #[cfg(test)]
    pub(crate) fn contains(&self, pid: Pid) -> bool {
        self.records.contains_key(&pid)
    }

    pub(crate) fn len(&self) -> usize {
        self.records.len()
    }

    #[cfg(test)]
    pub(crate) fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
