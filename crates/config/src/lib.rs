use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const SCHEMA_VERSION: &str = "1.0";

/// A device variant described in YAML, for parts missing from the built-in table.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct TargetDescriptor {
    pub name: String,
    pub family: String, // e.g. "avr5", "avrxmega", "avrtiny"
    pub flash: String,  // e.g. "32KB"
}

impl TargetDescriptor {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let f = std::fs::File::open(&path)
            .with_context(|| format!("Failed to open target descriptor at {:?}", path.as_ref()))?;
        serde_yaml::from_reader(f).context("Failed to parse Target Descriptor")
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct ProbeInputs {
    pub firmware: String,
    /// Function to inspect; the CLI falls back to `instruction_probe`.
    #[serde(default)]
    pub symbol: Option<String>,
    /// MCU name (`atmega328p`) or a path to a [`TargetDescriptor`] file.
    #[serde(default)]
    pub target: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct RequireClassAssertion {
    pub require_class: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct MnemonicCountAssertion {
    pub mnemonic: String,
    pub count: usize,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ForbidMnemonicAssertion {
    pub forbid_mnemonic: String,
}

/// Matches resolved call targets by substring, e.g. `panic`.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ForbidCallAssertion {
    pub forbid_call: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct UnsupportedAllowedAssertion {
    pub unsupported_allowed: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(untagged)]
pub enum ProbeAssertion {
    RequireClass(RequireClassAssertion),
    MnemonicCount(MnemonicCountAssertion),
    ForbidMnemonic(ForbidMnemonicAssertion),
    ForbidCall(ForbidCallAssertion),
    UnsupportedAllowed(UnsupportedAllowedAssertion),
}

impl ProbeAssertion {
    pub fn require_class(class: &str) -> Self {
        Self::RequireClass(RequireClassAssertion {
            require_class: class.to_string(),
        })
    }

    pub fn mnemonic_count(mnemonic: &str, count: usize) -> Self {
        Self::MnemonicCount(MnemonicCountAssertion {
            mnemonic: mnemonic.to_string(),
            count,
        })
    }

    pub fn forbid_mnemonic(mnemonic: &str) -> Self {
        Self::ForbidMnemonic(ForbidMnemonicAssertion {
            forbid_mnemonic: mnemonic.to_string(),
        })
    }

    pub fn forbid_call(routine: &str) -> Self {
        Self::ForbidCall(ForbidCallAssertion {
            forbid_call: routine.to_string(),
        })
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct ProbeScript {
    pub schema_version: String,
    pub inputs: ProbeInputs,
    #[serde(default)]
    pub assertions: Vec<ProbeAssertion>,
}

impl ProbeScript {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let f = std::fs::File::open(&path)
            .with_context(|| format!("Failed to open probe script at {:?}", path.as_ref()))?;
        let script: Self =
            serde_yaml::from_reader(f).context("Failed to parse Probe Script YAML")?;
        script.validate()?;
        Ok(script)
    }

    pub fn validate(&self) -> Result<()> {
        if self.schema_version != SCHEMA_VERSION {
            anyhow::bail!(
                "Unsupported schema_version '{}'. Supported versions: '{}'",
                self.schema_version,
                SCHEMA_VERSION
            );
        }

        if self.inputs.firmware.trim().is_empty() {
            anyhow::bail!("Input 'firmware' path cannot be empty");
        }

        if let Some(symbol) = &self.inputs.symbol {
            if symbol.trim().is_empty() {
                anyhow::bail!("Input 'symbol' cannot be empty when given");
            }
        }

        for assertion in &self.assertions {
            match assertion {
                ProbeAssertion::RequireClass(a) if a.require_class.trim().is_empty() => {
                    anyhow::bail!("Assertion 'require_class' needs a class name");
                }
                ProbeAssertion::MnemonicCount(a) if a.mnemonic.trim().is_empty() => {
                    anyhow::bail!("Assertion 'mnemonic' needs a mnemonic");
                }
                ProbeAssertion::ForbidMnemonic(a) if a.forbid_mnemonic.trim().is_empty() => {
                    anyhow::bail!("Assertion 'forbid_mnemonic' needs a mnemonic");
                }
                ProbeAssertion::ForbidCall(a) if a.forbid_call.trim().is_empty() => {
                    anyhow::bail!("Assertion 'forbid_call' needs a routine name");
                }
                _ => {}
            }
        }

        Ok(())
    }

    /// Unsupported instructions are violations unless a script opts out.
    pub fn unsupported_allowed(&self) -> bool {
        self.assertions.iter().any(|a| {
            matches!(
                a,
                ProbeAssertion::UnsupportedAllowed(UnsupportedAllowedAssertion {
                    unsupported_allowed: true
                })
            )
        })
    }
}

pub fn parse_size(size_str: &str) -> Result<u64> {
    use human_size::{Byte, Size, SpecificSize};
    let s: Size = size_str
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid size format: {}", e))?;
    let bytes: SpecificSize<Byte> = s.into();
    Ok(bytes.value() as u64)
}
