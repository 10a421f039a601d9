//! Stage gate: pass/fail bookkeeping for each pipeline step and the
//! readiness gates derived from it.
//!
//! Every status write publishes a [`StageEvent`] carrying the changed stage
//! and a fresh snapshot of all three gates, so subscribers never observe a
//! stale gate after a stage change.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;

/// Default broadcast channel capacity.
const DEFAULT_EVENT_CAPACITY: usize = 64;

/// One gated step of the pipeline, in pipeline order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Spreadsheet,
    Transport,
    Template,
    TestSend,
}

impl Stage {
    pub const ALL: [Stage; 4] = [
        Stage::Spreadsheet,
        Stage::Transport,
        Stage::Template,
        Stage::TestSend,
    ];
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Spreadsheet => "spreadsheet",
            Self::Transport => "transport",
            Self::Template => "template",
            Self::TestSend => "test_send",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    #[default]
    Pending,
    Success,
    Fail,
}

/// Current status of all four stages.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageState {
    pub spreadsheet: StageStatus,
    pub transport: StageStatus,
    pub template: StageStatus,
    pub test_send: StageStatus,
}

impl StageState {
    pub fn get(&self, stage: Stage) -> StageStatus {
        match stage {
            Stage::Spreadsheet => self.spreadsheet,
            Stage::Transport => self.transport,
            Stage::Template => self.template,
            Stage::TestSend => self.test_send,
        }
    }

    fn slot(&mut self, stage: Stage) -> &mut StageStatus {
        match stage {
            Stage::Spreadsheet => &mut self.spreadsheet,
            Stage::Transport => &mut self.transport,
            Stage::Template => &mut self.template,
            Stage::TestSend => &mut self.test_send,
        }
    }

    fn ok(&self, stage: Stage) -> bool {
        self.get(stage) == StageStatus::Success
    }

    pub fn ready_for_template_check(&self) -> bool {
        self.ok(Stage::Spreadsheet) && self.ok(Stage::Transport)
    }

    pub fn ready_for_test_send(&self) -> bool {
        self.ready_for_template_check() && self.ok(Stage::Template)
    }

    pub fn ready_for_bulk_send(&self) -> bool {
        self.ready_for_test_send() && self.ok(Stage::TestSend)
    }

    pub fn gates(&self) -> Gates {
        Gates {
            ready_for_template_check: self.ready_for_template_check(),
            ready_for_test_send: self.ready_for_test_send(),
            ready_for_bulk_send: self.ready_for_bulk_send(),
        }
    }
}

/// Derived readiness flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Gates {
    pub ready_for_template_check: bool,
    pub ready_for_test_send: bool,
    pub ready_for_bulk_send: bool,
}

/// Published on every stage write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageEvent {
    pub stage: Stage,
    pub status: StageStatus,
    pub gates: Gates,
}

/// Owner of the stage state. Single writer; any number of subscribers.
#[derive(Debug)]
pub struct StageGate {
    state: StageState,
    tx: broadcast::Sender<StageEvent>,
}

impl Default for StageGate {
    fn default() -> Self {
        Self::new()
    }
}

impl StageGate {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(DEFAULT_EVENT_CAPACITY);
        Self {
            state: StageState::default(),
            tx,
        }
    }

    /// Subscribe to stage events.
    pub fn subscribe(&self) -> broadcast::Receiver<StageEvent> {
        self.tx.subscribe()
    }

    pub fn state(&self) -> StageState {
        self.state
    }

    pub fn status(&self, stage: Stage) -> StageStatus {
        self.state.get(stage)
    }

    pub fn gates(&self) -> Gates {
        self.state.gates()
    }

    /// Record `status` for `stage` and notify subscribers.
    pub fn set(&mut self, stage: Stage, status: StageStatus) {
        *self.state.slot(stage) = status;
        let event = StageEvent {
            stage,
            status,
            gates: self.state.gates(),
        };
        debug!(stage = %stage, status = ?status, gates = ?event.gates, "Stage updated");
        // No subscribers is fine.
        let _ = self.tx.send(event);
    }

    /// Reset `stage` and every later stage to pending, e.g. after the inputs
    /// of `stage` changed.
    pub fn invalidate_from(&mut self, stage: Stage) {
        for later in Stage::ALL.into_iter().filter(|s| *s >= stage) {
            self.set(later, StageStatus::Pending);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn all_success() -> StageGate {
        let mut gate = StageGate::new();
        for stage in Stage::ALL {
            gate.set(stage, StageStatus::Success);
        }
        gate
    }

    #[test]
    fn starts_pending_with_closed_gates() {
        let gate = StageGate::new();
        for stage in Stage::ALL {
            assert_eq!(gate.status(stage), StageStatus::Pending);
        }
        assert_eq!(gate.gates(), Gates::default());
    }

    #[test]
    fn gates_open_progressively() {
        let mut gate = StageGate::new();
        gate.set(Stage::Spreadsheet, StageStatus::Success);
        assert!(!gate.gates().ready_for_template_check);

        gate.set(Stage::Transport, StageStatus::Success);
        assert!(gate.gates().ready_for_template_check);
        assert!(!gate.gates().ready_for_test_send);

        gate.set(Stage::Template, StageStatus::Success);
        assert!(gate.gates().ready_for_test_send);
        assert!(!gate.gates().ready_for_bulk_send);

        gate.set(Stage::TestSend, StageStatus::Success);
        assert!(gate.gates().ready_for_bulk_send);
    }

    #[test]
    fn reverting_spreadsheet_closes_every_gate() {
        let mut gate = all_success();
        assert_eq!(
            gate.gates(),
            Gates {
                ready_for_template_check: true,
                ready_for_test_send: true,
                ready_for_bulk_send: true,
            }
        );
        gate.set(Stage::Spreadsheet, StageStatus::Pending);
        assert_eq!(gate.gates(), Gates::default());
    }

    #[test]
    fn failure_closes_dependent_gates() {
        let mut gate = all_success();
        gate.set(Stage::Template, StageStatus::Fail);
        let gates = gate.gates();
        assert!(gates.ready_for_template_check);
        assert!(!gates.ready_for_test_send);
        assert!(!gates.ready_for_bulk_send);
    }

    #[tokio::test]
    async fn every_write_publishes_fresh_gates() {
        let mut gate = all_success();
        let mut rx = gate.subscribe();

        gate.set(Stage::Spreadsheet, StageStatus::Pending);
        let event = rx.recv().await.unwrap();
        assert_eq!(event.stage, Stage::Spreadsheet);
        assert_eq!(event.status, StageStatus::Pending);
        assert_eq!(event.gates, Gates::default());

        gate.set(Stage::Spreadsheet, StageStatus::Success);
        let event = rx.recv().await.unwrap();
        assert!(event.gates.ready_for_bulk_send);
    }

    #[tokio::test]
    async fn invalidate_from_resets_downstream_only() {
        let mut gate = all_success();
        let mut rx = gate.subscribe();

        gate.invalidate_from(Stage::Template);
        assert_eq!(gate.status(Stage::Spreadsheet), StageStatus::Success);
        assert_eq!(gate.status(Stage::Transport), StageStatus::Success);
        assert_eq!(gate.status(Stage::Template), StageStatus::Pending);
        assert_eq!(gate.status(Stage::TestSend), StageStatus::Pending);

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert_eq!(first.stage, Stage::Template);
        assert_eq!(second.stage, Stage::TestSend);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn invalidate_from_spreadsheet_resets_all() {
        let mut gate = all_success();
        gate.invalidate_from(Stage::Spreadsheet);
        assert_eq!(gate.state(), StageState::default());
    }
}
