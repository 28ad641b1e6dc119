//! The statements of the probe firmware and the instructions expected for them.

use crate::analysis::Analysis;
use crate::classify::OpClass;
use crate::target::{IsaFeatures, TargetVariant};
use avr_probe_config::ProbeAssertion;
use serde::Serialize;

#[derive(Debug, Clone, Copy)]
pub struct ProbeStep {
    pub statement: &'static str,
    /// Any of these realises the statement.
    pub classes: &'static [OpClass],
    /// Must show up in every build. Multiply and divide may become library
    /// calls and are only reported.
    pub required: bool,
}

pub const PROBE_STEPS: &[ProbeStep] = &[
    ProbeStep { statement: "result = a + b", classes: &[OpClass::Add], required: true },
    ProbeStep { statement: "result = a - b", classes: &[OpClass::Subtract], required: true },
    ProbeStep {
        statement: "result = a * b",
        classes: &[OpClass::Multiply, OpClass::RoutineCall],
        required: false,
    },
    ProbeStep { statement: "result = a / b", classes: &[OpClass::RoutineCall], required: false },
    ProbeStep { statement: "result = a & b", classes: &[OpClass::And], required: true },
    ProbeStep { statement: "result = a | b", classes: &[OpClass::Or], required: true },
    ProbeStep { statement: "result = a ^ b", classes: &[OpClass::Xor], required: true },
    ProbeStep { statement: "result = !a", classes: &[OpClass::Complement], required: true },
    ProbeStep { statement: "result = a << 1", classes: &[OpClass::ShiftLeft], required: true },
    ProbeStep { statement: "result = a >> 1", classes: &[OpClass::ShiftRight], required: true },
    ProbeStep {
        statement: "if a < b { result = 1 }",
        classes: &[OpClass::CompareBranch],
        required: true,
    },
    ProbeStep {
        statement: "wide += 5",
        classes: &[OpClass::WideAddImmediate],
        required: true,
    },
    ProbeStep {
        statement: "interrupt::disable()",
        classes: &[OpClass::InterruptDisable],
        required: true,
    },
    ProbeStep {
        statement: "interrupt::enable()",
        classes: &[OpClass::InterruptEnable],
        required: true,
    },
    ProbeStep { statement: "*ptr = 42", classes: &[OpClass::IndirectStore], required: true },
    ProbeStep { statement: "result = *ptr", classes: &[OpClass::IndirectLoad], required: true },
    ProbeStep { statement: "asm!(\"nop\")", classes: &[OpClass::NoOp], required: true },
    ProbeStep { statement: "asm!(\"wdr\")", classes: &[OpClass::WatchdogReset], required: true },
    ProbeStep {
        statement: "asm!(\"fmuls ...\")",
        classes: &[OpClass::FractionalMultiply],
        required: false,
    },
];

/// Mnemonic the fractional multiply block emits.
pub const FRACTIONAL_MULTIPLY: &str = "fmuls";

/// Substring of the mangled `core::panicking` routine names.
pub const PANIC_ROUTINE: &str = "panic";

#[derive(Debug, Clone, Serialize)]
pub struct StepOutcome {
    pub statement: String,
    pub classes: Vec<OpClass>,
    pub required: bool,
    /// First instruction realising the statement.
    pub found_at: Option<u32>,
    pub text: Option<String>,
}

/// The checks a probe build has to pass on `target`: every required class
/// present, no calls into panic paths, and `fmuls` exactly once where the
/// multiplier exists (absent otherwise, since the build must have left it out).
pub fn default_assertions(target: &TargetVariant) -> Vec<ProbeAssertion> {
    let mut assertions: Vec<ProbeAssertion> = PROBE_STEPS
        .iter()
        .filter(|s| s.required)
        .flat_map(|s| s.classes.iter())
        .map(|c| ProbeAssertion::require_class(c.name()))
        .collect();
    assertions.push(ProbeAssertion::forbid_call(PANIC_ROUTINE));

    if target.features().contains(IsaFeatures::MUL) {
        assertions.push(ProbeAssertion::mnemonic_count(FRACTIONAL_MULTIPLY, 1));
    } else {
        assertions.push(ProbeAssertion::forbid_mnemonic(FRACTIONAL_MULTIPLY));
    }
    assertions
}

pub fn step_outcomes(analysis: &Analysis) -> Vec<StepOutcome> {
    PROBE_STEPS
        .iter()
        .map(|step| {
            let hit = analysis
                .hits
                .iter()
                .find(|h| step.classes.contains(&h.class));
            StepOutcome {
                statement: step.statement.to_string(),
                classes: step.classes.to_vec(),
                required: step.required,
                found_at: hit.map(|h| h.addr),
                text: hit.map(|h| h.text.clone()),
            }
        })
        .collect()
}
