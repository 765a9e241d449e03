//! Scripted fault injection for the simulator.
//!
//! A [`FaultScript`] names one adapter operation, the fault it should
//! produce, how many calls succeed before it fires and how many times it
//! fires. Scripts are checked in order; the first one that fires wins.

use deck_core::hardware::GripperErrorKind;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Adapter operations a fault can be attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum HardwareOperation {
    Home,
    MoveTo,
    MoveRel,
    PickUpTip,
    DropTip,
    Aspirate,
    Dispense,
    Grip,
    ProbeLiquid,
    ModuleCommand,
}

impl fmt::Display for HardwareOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            HardwareOperation::Home => "home",
            HardwareOperation::MoveTo => "moveTo",
            HardwareOperation::MoveRel => "moveRel",
            HardwareOperation::PickUpTip => "pickUpTip",
            HardwareOperation::DropTip => "dropTip",
            HardwareOperation::Aspirate => "aspirate",
            HardwareOperation::Dispense => "dispense",
            HardwareOperation::Grip => "grip",
            HardwareOperation::ProbeLiquid => "probeLiquid",
            HardwareOperation::ModuleCommand => "moduleCommand",
        };
        f.write_str(label)
    }
}

/// What goes wrong.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Fault {
    /// Pressure sensor trips during a plunger motion
    Overpressure,
    /// Probe reaches its limit without finding liquid
    LiquidNotFound,
    /// Gripper misses, drops or collides
    Gripper { kind: GripperErrorKind },
    /// A motor stalls
    Stall,
    /// The tip ejector fires but the tip stays on the nozzle
    TipStuck,
    /// The press completes but no tip is seated
    TipMissed,
    /// Firmware stops answering
    Communication { message: String },
}

/// One scripted fault.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FaultScript {
    pub operation: HardwareOperation,
    pub fault: Fault,
    /// Calls that succeed before the fault fires
    #[serde(default)]
    pub after: u32,
    /// Number of times the fault fires
    #[serde(default = "default_times")]
    pub times: u32,
}

fn default_times() -> u32 {
    1
}

impl FaultScript {
    /// Fire `fault` on the next call to `operation`.
    pub fn once(operation: HardwareOperation, fault: Fault) -> Self {
        Self {
            operation,
            fault,
            after: 0,
            times: 1,
        }
    }

    /// Let `after` calls succeed first.
    pub fn after(mut self, after: u32) -> Self {
        self.after = after;
        self
    }

    pub fn times(mut self, times: u32) -> Self {
        self.times = times;
        self
    }
}

#[derive(Debug, Clone)]
struct ScriptState {
    script: FaultScript,
    seen: u32,
    fired: u32,
}

/// Tracks every script's call count.
#[derive(Debug, Clone, Default)]
pub(crate) struct FaultInjector {
    scripts: Vec<ScriptState>,
}

impl FaultInjector {
    pub(crate) fn new(scripts: Vec<FaultScript>) -> Self {
        Self {
            scripts: scripts
                .into_iter()
                .map(|script| ScriptState {
                    script,
                    seen: 0,
                    fired: 0,
                })
                .collect(),
        }
    }

    pub(crate) fn push(&mut self, script: FaultScript) {
        self.scripts.push(ScriptState {
            script,
            seen: 0,
            fired: 0,
        });
    }

    /// Count a call to `operation` and return the fault it triggers, if any.
    pub(crate) fn check(&mut self, operation: HardwareOperation) -> Option<Fault> {
        let mut triggered = None;
        for state in self
            .scripts
            .iter_mut()
            .filter(|s| s.script.operation == operation)
        {
            state.seen += 1;
            if triggered.is_none()
                && state.seen > state.script.after
                && state.fired < state.script.times
            {
                state.fired += 1;
                triggered = Some(state.script.fault.clone());
            }
        }
        triggered
    }

    /// Whether every script has fired as often as it was asked to.
    pub(crate) fn exhausted(&self) -> bool {
        self.scripts.iter().all(|s| s.fired >= s.script.times)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fires_after_successful_calls() {
        let mut injector = FaultInjector::new(vec![
            FaultScript::once(HardwareOperation::Aspirate, Fault::Overpressure).after(2),
        ]);
        assert_eq!(injector.check(HardwareOperation::Aspirate), None);
        assert_eq!(injector.check(HardwareOperation::Dispense), None);
        assert_eq!(injector.check(HardwareOperation::Aspirate), None);
        assert_eq!(
            injector.check(HardwareOperation::Aspirate),
            Some(Fault::Overpressure)
        );
        assert_eq!(injector.check(HardwareOperation::Aspirate), None);
        assert!(injector.exhausted());
    }

    #[test]
    fn repeated_fault_fires_each_time() {
        let mut injector = FaultInjector::new(vec![
            FaultScript::once(HardwareOperation::MoveTo, Fault::Stall).times(2),
        ]);
        assert_eq!(injector.check(HardwareOperation::MoveTo), Some(Fault::Stall));
        assert_eq!(injector.check(HardwareOperation::MoveTo), Some(Fault::Stall));
        assert_eq!(injector.check(HardwareOperation::MoveTo), None);
    }

    #[test]
    fn script_parses_from_toml() {
        let script: FaultScript = toml::from_str(
            r#"
            operation = "grip"
            fault = { type = "gripper", kind = "labwareDropped" }
            "#,
        )
        .unwrap();
        assert_eq!(
            script.fault,
            Fault::Gripper {
                kind: GripperErrorKind::LabwareDropped
            }
        );

        let script: FaultScript = toml::from_str(
            r#"
            operation = "probeLiquid"
            fault = { type = "liquidNotFound" }
            after = 1
            "#,
        )
        .unwrap();
        assert_eq!(script.fault, Fault::LiquidNotFound);
        assert_eq!(script.after, 1);
        assert_eq!(script.times, 1);
    }
}
