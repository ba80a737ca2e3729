//! Controller phase state machine.

use serde::{Deserialize, Serialize};

/// A phase of the controller loop. See `ControllerLoop` for the transition
/// diagram; any phase may jump directly to `Bailout`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    Ingest,
    Detect,
    Setup,
    Baseline,
    RepairLoop,
    FinalVerify,
    EvidencePack,
    Bailout,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Ingest => "INGEST",
            Phase::Detect => "DETECT",
            Phase::Setup => "SETUP",
            Phase::Baseline => "BASELINE",
            Phase::RepairLoop => "REPAIR_LOOP",
            Phase::FinalVerify => "FINAL_VERIFY",
            Phase::EvidencePack => "EVIDENCE_PACK",
            Phase::Bailout => "BAILOUT",
        }
    }
}

/// A logged phase transition; emitted before any state change so consumers
/// can rely on "first log entry after this belongs to `to`".
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PhaseTransition {
    pub from: Phase,
    pub to: Phase,
    pub reason: String,
}

impl PhaseTransition {
    pub fn new(from: Phase, to: Phase, reason: impl Into<String>) -> Self {
        Self {
            from,
            to,
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_serde_roundtrip() {
        for phase in [
            Phase::Ingest,
            Phase::Detect,
            Phase::Setup,
            Phase::Baseline,
            Phase::RepairLoop,
            Phase::FinalVerify,
            Phase::EvidencePack,
            Phase::Bailout,
        ] {
            let json = serde_json::to_string(&phase).unwrap();
            let back: Phase = serde_json::from_str(&json).unwrap();
            assert_eq!(phase, back);
        }
    }

    #[test]
    fn test_phase_as_str() {
        assert_eq!(Phase::RepairLoop.as_str(), "REPAIR_LOOP");
        assert_eq!(Phase::EvidencePack.as_str(), "EVIDENCE_PACK");
    }

    #[test]
    fn test_phase_transition_fields() {
        let t = PhaseTransition::new(Phase::Baseline, Phase::RepairLoop, "tests failing");
        assert_eq!(t.from, Phase::Baseline);
        assert_eq!(t.to, Phase::RepairLoop);
        assert_eq!(t.reason, "tests failing");
    }
}
