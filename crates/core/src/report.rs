use crate::analysis::{Analysis, RoutineCall, UnsupportedUse};
use crate::classify::OpClass;
use crate::probe::{self, StepOutcome};
use crate::ProbeResult;
use avr_probe_config::ProbeAssertion;
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Pass,
    Fail,
}

#[derive(Debug, Clone, Serialize)]
pub struct AssertionOutcome {
    pub name: String,
    pub passed: bool,
    pub detail: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProbeReport {
    pub status: Status,
    pub firmware: String,
    pub firmware_hash: String,
    pub symbol: String,
    pub target: String,
    pub family: String,
    pub start: u32,
    pub end: u32,
    pub instruction_count: usize,
    pub class_counts: BTreeMap<String, usize>,
    pub mnemonic_counts: BTreeMap<String, usize>,
    pub steps: Vec<StepOutcome>,
    pub assertions: Vec<AssertionOutcome>,
    pub routine_calls: Vec<RoutineCall>,
    pub unsupported: Vec<UnsupportedUse>,
}

fn check(assertion: &ProbeAssertion, analysis: &Analysis) -> ProbeResult<Option<AssertionOutcome>> {
    let outcome = match assertion {
        ProbeAssertion::RequireClass(a) => {
            let class: OpClass = a.require_class.parse()?;
            let count = analysis.class_count(class);
            AssertionOutcome {
                name: format!("require_class {}", class),
                passed: count > 0,
                detail: match analysis.first_hit(class) {
                    Some(hit) => format!("{} found, first at {:#06x}: {}", count, hit.addr, hit.text),
                    None => format!("no {} instruction emitted", class),
                },
            }
        }
        ProbeAssertion::MnemonicCount(a) => {
            let found = analysis.mnemonic_count(&a.mnemonic);
            AssertionOutcome {
                name: format!("mnemonic {} x{}", a.mnemonic, a.count),
                passed: found == a.count,
                detail: format!("expected {}, found {}", a.count, found),
            }
        }
        ProbeAssertion::ForbidMnemonic(a) => {
            let found = analysis.mnemonic_count(&a.forbid_mnemonic);
            AssertionOutcome {
                name: format!("forbid_mnemonic {}", a.forbid_mnemonic),
                passed: found == 0,
                detail: format!("found {}", found),
            }
        }
        ProbeAssertion::ForbidCall(a) => {
            let wanted = a.forbid_call.trim();
            let calls: Vec<String> = analysis
                .routine_calls
                .iter()
                .filter(|c| c.name.as_deref().is_some_and(|n| n.contains(wanted)))
                .map(|c| format!("{:#06x}", c.addr))
                .collect();
            AssertionOutcome {
                name: format!("forbid_call {}", wanted),
                passed: calls.is_empty(),
                detail: if calls.is_empty() {
                    "no matching calls".to_string()
                } else {
                    format!("called at {}", calls.join(", "))
                },
            }
        }
        ProbeAssertion::UnsupportedAllowed(_) => return Ok(None),
    };
    Ok(Some(outcome))
}

/// Evaluates `assertions` against an analysis. Instructions the target lacks
/// fail the report unless `unsupported_allowed` is set.
pub fn evaluate(
    analysis: &Analysis,
    assertions: &[ProbeAssertion],
    unsupported_allowed: bool,
    firmware: &str,
) -> ProbeResult<ProbeReport> {
    let mut outcomes = Vec::new();
    for assertion in assertions {
        if let Some(outcome) = check(assertion, analysis)? {
            tracing::debug!("{}: {} ({})", outcome.name, outcome.passed, outcome.detail);
            outcomes.push(outcome);
        }
    }

    if !unsupported_allowed {
        let detail = analysis
            .unsupported
            .iter()
            .map(|u| format!("{} at {:#06x} needs {}", u.mnemonic, u.addr, u.missing.join("|")))
            .collect::<Vec<_>>()
            .join(", ");
        outcomes.push(AssertionOutcome {
            name: format!("target_support {}", analysis.target.name),
            passed: analysis.unsupported.is_empty(),
            detail: if detail.is_empty() {
                "all instructions available".to_string()
            } else {
                detail
            },
        });
    }

    let status = if outcomes.iter().all(|o| o.passed) {
        Status::Pass
    } else {
        Status::Fail
    };

    Ok(ProbeReport {
        status,
        firmware: firmware.to_string(),
        firmware_hash: analysis.flash_hash.clone(),
        symbol: analysis.symbol.clone(),
        target: analysis.target.name.clone(),
        family: analysis.target.family.to_string(),
        start: analysis.start,
        end: analysis.end,
        instruction_count: analysis.listing.len(),
        class_counts: analysis
            .class_counts()
            .into_iter()
            .map(|(c, n)| (c.name().to_string(), n))
            .collect(),
        mnemonic_counts: analysis.mnemonic_counts(),
        steps: probe::step_outcomes(analysis),
        assertions: outcomes,
        routine_calls: analysis.routine_calls.clone(),
        unsupported: analysis.unsupported.clone(),
    })
}

fn xml_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

impl ProbeReport {
    pub fn failures(&self) -> impl Iterator<Item = &AssertionOutcome> {
        self.assertions.iter().filter(|a| !a.passed)
    }

    pub fn to_junit(&self) -> String {
        let failures = self.failures().count();
        let mut xml = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
        xml.push_str(&format!(
            "<testsuite name=\"avr-probe check\" tests=\"{}\" failures=\"{}\">\n",
            self.assertions.len(),
            failures
        ));
        for a in &self.assertions {
            let name = xml_escape(&a.name);
            let class = xml_escape(&format!("{}.{}", self.target, self.symbol));
            if a.passed {
                xml.push_str(&format!(
                    "  <testcase classname=\"{}\" name=\"{}\"/>\n",
                    class, name
                ));
            } else {
                xml.push_str(&format!(
                    "  <testcase classname=\"{}\" name=\"{}\">\n    <failure message=\"{}\"/>\n  </testcase>\n",
                    class,
                    name,
                    xml_escape(&a.detail)
                ));
            }
        }
        xml.push_str("</testsuite>\n");
        xml
    }
}
