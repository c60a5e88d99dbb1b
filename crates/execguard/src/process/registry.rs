//! In-memory bookkeeping of supervised runs.

use crate::model::{RunId, RunRecord, RunState, TerminationReason};
use std::collections::{HashMap, VecDeque};
use std::time::{SystemTime, UNIX_EPOCH};

pub(crate) fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
}

/// Active runs plus a bounded FIFO of finalized ones.
///
/// Only the supervisor mutates it. Timestamps never move backwards and
/// states never regress.
#[derive(Debug)]
pub(crate) struct RunRegistry {
    active: HashMap<RunId, RunRecord>,
    exited: VecDeque<RunRecord>,
    max_exited: usize,
}

impl RunRegistry {
    pub(crate) fn new(max_exited: usize) -> Self {
        Self {
            active: HashMap::new(),
            exited: VecDeque::new(),
            max_exited,
        }
    }

    pub(crate) fn add(&mut self, record: RunRecord) {
        self.active.insert(record.run_id, record);
    }

    pub(crate) fn get(&self, run_id: RunId) -> Option<RunRecord> {
        self.active
            .get(&run_id)
            .or_else(|| self.exited.iter().rev().find(|r| r.run_id == run_id))
            .cloned()
    }

    pub(crate) fn touch_output(&mut self, run_id: RunId, at_ms: u64) {
        if let Some(record) = self.active.get_mut(&run_id) {
            record.last_output_at_ms = record.last_output_at_ms.max(at_ms);
            record.updated_at_ms = record.updated_at_ms.max(at_ms);
        }
    }

    /// Move to `state` if it is strictly later than the current one.
    pub(crate) fn update_state(&mut self, run_id: RunId, state: RunState, at_ms: u64) -> bool {
        let Some(record) = self.active.get_mut(&run_id) else {
            return false;
        };
        if state <= record.state {
            return false;
        }
        record.state = state;
        record.updated_at_ms = record.updated_at_ms.max(at_ms);
        if state == RunState::Running {
            record.started_at_ms = record.started_at_ms.max(at_ms);
        }
        true
    }

    pub(crate) fn set_pid(&mut self, run_id: RunId, pid: Option<u32>) {
        if let Some(record) = self.active.get_mut(&run_id) {
            record.pid = pid;
        }
    }

    /// Record a forced termination reason and enter `Exiting`.
    pub(crate) fn mark_exiting(&mut self, run_id: RunId, reason: TerminationReason, at_ms: u64) {
        if let Some(record) = self.active.get_mut(&run_id) {
            record.termination_reason.get_or_insert(reason);
        }
        self.update_state(run_id, RunState::Exiting, at_ms);
    }

    /// Move the run to `Exited` and out of the active set.
    ///
    /// Returns `None` when the run was already finalized.
    pub(crate) fn finalize(
        &mut self,
        run_id: RunId,
        reason: TerminationReason,
        exit_code: Option<i32>,
        exit_signal: Option<String>,
        at_ms: u64,
    ) -> Option<RunRecord> {
        let mut record = self.active.remove(&run_id)?;
        record.state = RunState::Exited;
        record.termination_reason = Some(reason);
        record.exit_code = exit_code;
        record.exit_signal = exit_signal;
        record.updated_at_ms = record.updated_at_ms.max(at_ms);

        if self.max_exited > 0 {
            while self.exited.len() >= self.max_exited {
                self.exited.pop_front();
            }
            self.exited.push_back(record.clone());
        }
        Some(record)
    }

    pub(crate) fn active_in_scope(&self, scope_key: &str) -> Vec<RunId> {
        self.active
            .values()
            .filter(|r| r.scope_key.as_deref() == Some(scope_key))
            .map(|r| r.run_id)
            .collect()
    }

    pub(crate) fn list_active(&self) -> Vec<RunRecord> {
        let mut records: Vec<RunRecord> = self.active.values().cloned().collect();
        records.sort_by_key(|r| r.created_at_ms);
        records
    }
}
