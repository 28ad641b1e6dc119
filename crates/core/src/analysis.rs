use crate::classify::OpClass;
use crate::decoder::Instruction;
use crate::disasm::{self, ListingLine};
use crate::memory::FirmwareImage;
use crate::target::TargetVariant;
use crate::{ProbeError, ProbeResult};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClassHit {
    pub class: OpClass,
    pub addr: u32,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoutineCall {
    pub addr: u32,
    pub target: u32,
    pub name: Option<String>,
}

/// An instruction the selected variant does not implement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnsupportedUse {
    pub addr: u32,
    pub mnemonic: String,
    pub missing: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct Analysis {
    pub symbol: String,
    pub start: u32,
    pub end: u32,
    pub target: TargetVariant,
    pub flash_hash: String,
    pub flash_size: u32,
    pub listing: Vec<ListingLine>,
    pub hits: Vec<ClassHit>,
    pub routine_calls: Vec<RoutineCall>,
    pub unsupported: Vec<UnsupportedUse>,
}

impl Analysis {
    pub fn class_count(&self, class: OpClass) -> usize {
        self.hits.iter().filter(|h| h.class == class).count()
    }

    pub fn first_hit(&self, class: OpClass) -> Option<&ClassHit> {
        self.hits.iter().find(|h| h.class == class)
    }

    pub fn mnemonic_count(&self, mnemonic: &str) -> usize {
        let wanted = mnemonic.trim().to_ascii_lowercase();
        self.listing
            .iter()
            .filter(|l| l.instruction.mnemonic() == wanted)
            .count()
    }

    pub fn class_counts(&self) -> BTreeMap<OpClass, usize> {
        let mut counts = BTreeMap::new();
        for hit in &self.hits {
            *counts.entry(hit.class).or_insert(0) += 1;
        }
        counts
    }

    pub fn mnemonic_counts(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for line in &self.listing {
            *counts
                .entry(line.instruction.mnemonic().to_string())
                .or_insert(0) += 1;
        }
        counts
    }

    /// Hit classes of the instruction at `addr`, for annotated listings.
    pub fn classes_at(&self, addr: u32) -> Vec<OpClass> {
        self.hits
            .iter()
            .filter(|h| h.addr == addr)
            .map(|h| h.class)
            .collect()
    }
}

/// Hex SHA-256 of a flash image.
pub fn flash_hash(flash: &[u8]) -> String {
    format!("{:x}", Sha256::digest(flash))
}

fn is_compare(inst: &Instruction) -> bool {
    matches!(
        inst,
        Instruction::Cp { .. } | Instruction::Cpc { .. } | Instruction::Cpi { .. }
    )
}

/// Disassembles `symbol` and classifies every instruction in it.
pub fn analyze(image: &FirmwareImage, symbol: &str, target: &TargetVariant) -> ProbeResult<Analysis> {
    let (start, end) = image.function_range(symbol)?;
    let flash = image.flash();
    info!(
        "Analyzing '{}' at {:#06x}..{:#06x} for {} ({})",
        symbol, start, end, target.name, target.family
    );

    if flash.len() as u64 > target.flash_bytes {
        warn!(
            "Image is {} bytes but {} has only {} bytes of flash",
            flash.len(),
            target.name,
            target.flash_bytes
        );
    }

    let listing = disasm::disassemble_range(&flash, start, end)?;
    if listing.is_empty() {
        return Err(ProbeError::EmptyRange(symbol.to_string()));
    }

    let mut hits = Vec::new();
    let mut routine_calls = Vec::new();
    let mut unsupported = Vec::new();

    for (i, line) in listing.iter().enumerate() {
        let inst = &line.instruction;
        let text = line.text();

        if let Some(class) = OpClass::of(inst) {
            hits.push(ClassHit {
                class,
                addr: line.addr,
                text: text.clone(),
            });
        }

        // cpse compares and skips in one instruction
        let paired = match inst {
            Instruction::Cpse { .. } => true,
            _ if is_compare(inst) => listing
                .get(i + 1)
                .and_then(|next| OpClass::of(&next.instruction))
                .is_some_and(|c| c == OpClass::ConditionalBranch),
            _ => false,
        };
        if paired {
            hits.push(ClassHit {
                class: OpClass::CompareBranch,
                addr: line.addr,
                text: text.clone(),
            });
        }

        let call_target = match *inst {
            Instruction::Call { k } => Some(k * 2),
            Instruction::Rcall { k } => Some((line.addr as i64 + 2 + k as i64 * 2) as u32),
            _ => None,
        };
        if let Some(target_addr) = call_target {
            let name = image.symbol_at(target_addr).map(|s| s.name.clone());
            debug!("Call at {:#06x} to {:#06x} ({:?})", line.addr, target_addr, name);
            routine_calls.push(RoutineCall {
                addr: line.addr,
                target: target_addr,
                name,
            });
        }

        let missing = target.missing_features(inst);
        if !missing.is_empty() {
            warn!(
                "{:#06x}: '{}' needs {:?}, not available on {}",
                line.addr,
                text,
                missing.names(),
                target.name
            );
            unsupported.push(UnsupportedUse {
                addr: line.addr,
                mnemonic: inst.mnemonic().to_string(),
                missing: missing.names(),
            });
        }
    }

    info!(
        "{} instructions, {} classified, {} calls, {} unsupported",
        listing.len(),
        hits.len(),
        routine_calls.len(),
        unsupported.len()
    );

    Ok(Analysis {
        symbol: symbol.to_string(),
        start,
        end,
        target: target.clone(),
        flash_hash: flash_hash(&flash),
        flash_size: flash.len() as u32,
        listing,
        hits,
        routine_calls,
        unsupported,
    })
}
