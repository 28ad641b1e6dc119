//! avr-objdump style disassembly.

use crate::decoder::{self, AddrMode, Instruction, PtrReg};
use crate::{ProbeError, ProbeResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingLine {
    /// Byte address.
    pub addr: u32,
    pub words: Vec<u16>,
    pub instruction: Instruction,
}

impl ListingLine {
    pub fn size_bytes(&self) -> u32 {
        self.words.len() as u32 * 2
    }

    pub fn text(&self) -> String {
        disassemble(&self.instruction, self.addr)
    }

    /// `   1a:\t0f 89      \tadd r24, r25`-like line without the tabs.
    pub fn render(&self) -> String {
        let raw: Vec<String> = self
            .words
            .iter()
            .map(|w| format!("{:02x} {:02x}", w & 0xFF, w >> 8))
            .collect();
        format!("{:6x}:  {:<12} {}", self.addr, raw.join(" "), self.text())
    }
}

fn ptr(p: PtrReg) -> char {
    match p {
        PtrReg::X => 'X',
        PtrReg::Y => 'Y',
        PtrReg::Z => 'Z',
    }
}

fn indirect(p: PtrReg, mode: AddrMode) -> String {
    match mode {
        AddrMode::Plain => format!("{}", ptr(p)),
        AddrMode::PostInc => format!("{}+", ptr(p)),
        AddrMode::PreDec => format!("-{}", ptr(p)),
        AddrMode::Disp(q) => format!("{}+{}", ptr(p), q),
    }
}

fn relative(k: i32, addr: u32) -> String {
    let offset = k * 2;
    let target = (addr as i64 + 2 + offset as i64) as u32;
    format!(".{:+} ; 0x{:x}", offset, target)
}

/// Formats one instruction. `addr` is its byte address, used to resolve
/// relative branch targets.
pub fn disassemble(inst: &Instruction, addr: u32) -> String {
    let m = inst.mnemonic();
    match *inst {
        Instruction::Add { d, r } if d == r => format!("{} r{}", m, d),
        Instruction::Adc { d, r } if d == r => format!("{} r{}", m, d),
        Instruction::And { d, r } if d == r => format!("{} r{}", m, d),
        Instruction::Eor { d, r } if d == r => format!("{} r{}", m, d),
        Instruction::Add { d, r }
        | Instruction::Adc { d, r }
        | Instruction::Sub { d, r }
        | Instruction::Sbc { d, r }
        | Instruction::And { d, r }
        | Instruction::Or { d, r }
        | Instruction::Eor { d, r }
        | Instruction::Mul { d, r }
        | Instruction::Muls { d, r }
        | Instruction::Mulsu { d, r }
        | Instruction::Fmul { d, r }
        | Instruction::Fmuls { d, r }
        | Instruction::Fmulsu { d, r }
        | Instruction::Cp { d, r }
        | Instruction::Cpc { d, r }
        | Instruction::Cpse { d, r }
        | Instruction::Mov { d, r }
        | Instruction::Movw { d, r } => format!("{} r{}, r{}", m, d, r),
        Instruction::Subi { d, k }
        | Instruction::Sbci { d, k }
        | Instruction::Andi { d, k }
        | Instruction::Ori { d, k }
        | Instruction::Cpi { d, k }
        | Instruction::Ldi { d, k } => format!("{} r{}, 0x{:02X}", m, d, k),
        Instruction::Adiw { d, k } | Instruction::Sbiw { d, k } => {
            format!("{} r{}, 0x{:02X}", m, d, k)
        }
        Instruction::Com { d }
        | Instruction::Neg { d }
        | Instruction::Inc { d }
        | Instruction::Dec { d }
        | Instruction::Lsr { d }
        | Instruction::Asr { d }
        | Instruction::Ror { d }
        | Instruction::Swap { d }
        | Instruction::Pop { d } => format!("{} r{}", m, d),
        Instruction::Push { r } => format!("{} r{}", m, r),
        Instruction::Xch { d }
        | Instruction::Las { d }
        | Instruction::Lac { d }
        | Instruction::Lat { d } => format!("{} Z, r{}", m, d),
        Instruction::Des { k } => format!("{} 0x{:02X}", m, k),
        Instruction::Rjmp { k } | Instruction::Rcall { k } => {
            format!("{} {}", m, relative(k as i32, addr))
        }
        Instruction::Brbs { k, .. } | Instruction::Brbc { k, .. } => {
            format!("{} {}", m, relative(k as i32, addr))
        }
        Instruction::Jmp { k } | Instruction::Call { k } => format!("{} 0x{:x}", m, k * 2),
        Instruction::Sbrc { r, b } | Instruction::Sbrs { r, b } => format!("{} r{}, {}", m, r, b),
        Instruction::Bst { d, b } | Instruction::Bld { d, b } => format!("{} r{}, {}", m, d, b),
        Instruction::Sbic { a, b }
        | Instruction::Sbis { a, b }
        | Instruction::Sbi { a, b }
        | Instruction::Cbi { a, b } => format!("{} 0x{:02x}, {}", m, a, b),
        Instruction::In { d, a } => format!("{} r{}, 0x{:02x}", m, d, a),
        Instruction::Out { a, r } => format!("{} 0x{:02x}, r{}", m, a, r),
        Instruction::Lds { d, k } => format!("{} r{}, 0x{:04X}", m, d, k),
        Instruction::Sts { k, r } => format!("{} 0x{:04X}, r{}", m, k, r),
        Instruction::Ld { d, ptr: p, mode } => format!("{} r{}, {}", m, d, indirect(p, mode)),
        Instruction::St { r, ptr: p, mode } => format!("{} {}, r{}", m, indirect(p, mode), r),
        Instruction::Lpm { d, post_inc } | Instruction::Elpm { d, post_inc } => {
            format!("{} r{}, Z{}", m, d, if post_inc { "+" } else { "" })
        }
        Instruction::SpmZInc => format!("{} Z+", m),
        Instruction::Unknown(w) => format!("{} 0x{:04x}", m, w),
        _ => m.to_string(),
    }
}

/// Disassembles flash bytes `[start, end)`. `start` is aligned down to a
/// word boundary.
pub fn disassemble_range(flash: &[u8], start: u32, end: u32) -> ProbeResult<Vec<ListingLine>> {
    let word_at = |addr: usize| -> Option<u16> {
        let lo = *flash.get(addr)?;
        let hi = *flash.get(addr + 1)?;
        Some(u16::from_le_bytes([lo, hi]))
    };

    let end = end.min(flash.len() as u32);
    let mut lines = Vec::new();
    let mut addr = start & !1;
    while addr + 1 < end {
        let Some(word) = word_at(addr as usize) else {
            break;
        };
        let next = word_at(addr as usize + 2).unwrap_or(0xFFFF);
        let (instruction, size) = decoder::decode(word, next);
        if size == 2 && addr + 4 > end {
            return Err(ProbeError::Truncated(addr));
        }

        let words = if size == 2 { vec![word, next] } else { vec![word] };
        tracing::trace!("{:#06x}: {:?}", addr, instruction);
        lines.push(ListingLine {
            addr,
            words,
            instruction,
        });
        addr += size as u32 * 2;
    }
    Ok(lines)
}
