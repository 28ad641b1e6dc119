use crate::decoder::{AddrMode, Instruction, SREG_I};
use crate::{ProbeError, ProbeResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Kind of operation an emitted instruction realises.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpClass {
    Add,
    Subtract,
    Multiply,
    And,
    Or,
    Xor,
    Complement,
    ShiftLeft,
    ShiftRight,
    Compare,
    ConditionalBranch,
    /// A compare immediately followed by a conditional branch or skip.
    CompareBranch,
    WideAddImmediate,
    InterruptDisable,
    InterruptEnable,
    IndirectStore,
    IndirectLoad,
    NoOp,
    WatchdogReset,
    FractionalMultiply,
    RoutineCall,
}

impl OpClass {
    pub const ALL: [OpClass; 21] = [
        OpClass::Add,
        OpClass::Subtract,
        OpClass::Multiply,
        OpClass::And,
        OpClass::Or,
        OpClass::Xor,
        OpClass::Complement,
        OpClass::ShiftLeft,
        OpClass::ShiftRight,
        OpClass::Compare,
        OpClass::ConditionalBranch,
        OpClass::CompareBranch,
        OpClass::WideAddImmediate,
        OpClass::InterruptDisable,
        OpClass::InterruptEnable,
        OpClass::IndirectStore,
        OpClass::IndirectLoad,
        OpClass::NoOp,
        OpClass::WatchdogReset,
        OpClass::FractionalMultiply,
        OpClass::RoutineCall,
    ];

    pub fn name(self) -> &'static str {
        match self {
            OpClass::Add => "add",
            OpClass::Subtract => "subtract",
            OpClass::Multiply => "multiply",
            OpClass::And => "and",
            OpClass::Or => "or",
            OpClass::Xor => "xor",
            OpClass::Complement => "complement",
            OpClass::ShiftLeft => "shift_left",
            OpClass::ShiftRight => "shift_right",
            OpClass::Compare => "compare",
            OpClass::ConditionalBranch => "conditional_branch",
            OpClass::CompareBranch => "compare_branch",
            OpClass::WideAddImmediate => "wide_add_immediate",
            OpClass::InterruptDisable => "interrupt_disable",
            OpClass::InterruptEnable => "interrupt_enable",
            OpClass::IndirectStore => "indirect_store",
            OpClass::IndirectLoad => "indirect_load",
            OpClass::NoOp => "no_op",
            OpClass::WatchdogReset => "watchdog_reset",
            OpClass::FractionalMultiply => "fractional_multiply",
            OpClass::RoutineCall => "routine_call",
        }
    }

    /// Class of a single instruction. `CompareBranch` is never returned here;
    /// it needs the following instruction and is paired up by the analysis.
    pub fn of(inst: &Instruction) -> Option<OpClass> {
        let class = match *inst {
            Instruction::Add { d, r } if d == r => OpClass::ShiftLeft,
            Instruction::Add { .. } => OpClass::Add,
            Instruction::Adc { d, r } if d != r => OpClass::Add,
            Instruction::Sub { .. }
            | Instruction::Subi { .. }
            | Instruction::Sbc { .. }
            | Instruction::Sbci { .. } => OpClass::Subtract,
            Instruction::Mul { .. } | Instruction::Muls { .. } | Instruction::Mulsu { .. } => {
                OpClass::Multiply
            }
            Instruction::Fmul { .. } | Instruction::Fmuls { .. } | Instruction::Fmulsu { .. } => {
                OpClass::FractionalMultiply
            }
            Instruction::And { d, r } if d != r => OpClass::And,
            Instruction::Andi { .. } => OpClass::And,
            Instruction::Or { .. } | Instruction::Ori { .. } => OpClass::Or,
            Instruction::Eor { d, r } if d != r => OpClass::Xor,
            Instruction::Com { .. } => OpClass::Complement,
            Instruction::Lsr { .. } | Instruction::Asr { .. } => OpClass::ShiftRight,
            Instruction::Cp { .. } | Instruction::Cpc { .. } | Instruction::Cpi { .. } => {
                OpClass::Compare
            }
            Instruction::Brbs { .. }
            | Instruction::Brbc { .. }
            | Instruction::Sbrc { .. }
            | Instruction::Sbrs { .. }
            | Instruction::Sbic { .. }
            | Instruction::Sbis { .. } => OpClass::ConditionalBranch,
            Instruction::Adiw { .. } => OpClass::WideAddImmediate,
            Instruction::Bclr { s } if s == SREG_I => OpClass::InterruptDisable,
            Instruction::Bset { s } if s == SREG_I => OpClass::InterruptEnable,
            Instruction::St { .. } => OpClass::IndirectStore,
            Instruction::Ld { .. } => OpClass::IndirectLoad,
            Instruction::Nop => OpClass::NoOp,
            Instruction::Wdr => OpClass::WatchdogReset,
            Instruction::Call { .. } | Instruction::Rcall { .. } => OpClass::RoutineCall,
            _ => return None,
        };
        Some(class)
    }
}

impl fmt::Display for OpClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for OpClass {
    type Err = ProbeError;

    fn from_str(s: &str) -> ProbeResult<Self> {
        let wanted = s.trim().to_ascii_lowercase().replace('-', "_");
        OpClass::ALL
            .iter()
            .copied()
            .find(|c| c.name() == wanted)
            .ok_or_else(|| ProbeError::UnknownClass(s.to_string()))
    }
}

const SREG_SET: [&str; 8] = ["sec", "sez", "sen", "sev", "ses", "seh", "set", "sei"];
const SREG_CLEAR: [&str; 8] = ["clc", "clz", "cln", "clv", "cls", "clh", "clt", "cli"];
const BRANCH_SET: [&str; 8] = ["brcs", "breq", "brmi", "brvs", "brlt", "brhs", "brts", "brie"];
const BRANCH_CLEAR: [&str; 8] = ["brcc", "brne", "brpl", "brvc", "brge", "brhc", "brtc", "brid"];

impl Instruction {
    /// Lower-case mnemonic with the usual assembler aliases applied.
    pub fn mnemonic(&self) -> &'static str {
        match *self {
            Instruction::Nop => "nop",
            Instruction::Add { d, r } if d == r => "lsl",
            Instruction::Add { .. } => "add",
            Instruction::Adc { d, r } if d == r => "rol",
            Instruction::Adc { .. } => "adc",
            Instruction::Adiw { .. } => "adiw",
            Instruction::Sub { .. } => "sub",
            Instruction::Subi { .. } => "subi",
            Instruction::Sbc { .. } => "sbc",
            Instruction::Sbci { .. } => "sbci",
            Instruction::Sbiw { .. } => "sbiw",
            Instruction::And { d, r } if d == r => "tst",
            Instruction::And { .. } => "and",
            Instruction::Andi { .. } => "andi",
            Instruction::Or { .. } => "or",
            Instruction::Ori { .. } => "ori",
            Instruction::Eor { d, r } if d == r => "clr",
            Instruction::Eor { .. } => "eor",
            Instruction::Com { .. } => "com",
            Instruction::Neg { .. } => "neg",
            Instruction::Inc { .. } => "inc",
            Instruction::Dec { .. } => "dec",
            Instruction::Mul { .. } => "mul",
            Instruction::Muls { .. } => "muls",
            Instruction::Mulsu { .. } => "mulsu",
            Instruction::Fmul { .. } => "fmul",
            Instruction::Fmuls { .. } => "fmuls",
            Instruction::Fmulsu { .. } => "fmulsu",
            Instruction::Des { .. } => "des",
            Instruction::Cp { .. } => "cp",
            Instruction::Cpc { .. } => "cpc",
            Instruction::Cpi { .. } => "cpi",
            Instruction::Rjmp { .. } => "rjmp",
            Instruction::Rcall { .. } => "rcall",
            Instruction::Jmp { .. } => "jmp",
            Instruction::Call { .. } => "call",
            Instruction::Ijmp => "ijmp",
            Instruction::Eijmp => "eijmp",
            Instruction::Icall => "icall",
            Instruction::Eicall => "eicall",
            Instruction::Ret => "ret",
            Instruction::Reti => "reti",
            Instruction::Cpse { .. } => "cpse",
            Instruction::Sbrc { .. } => "sbrc",
            Instruction::Sbrs { .. } => "sbrs",
            Instruction::Sbic { .. } => "sbic",
            Instruction::Sbis { .. } => "sbis",
            Instruction::Brbs { s, .. } => BRANCH_SET[(s & 7) as usize],
            Instruction::Brbc { s, .. } => BRANCH_CLEAR[(s & 7) as usize],
            Instruction::Mov { .. } => "mov",
            Instruction::Movw { .. } => "movw",
            Instruction::Ldi { .. } => "ldi",
            Instruction::Lds { .. } => "lds",
            Instruction::Sts { .. } => "sts",
            Instruction::Ld { mode: AddrMode::Disp(_), .. } => "ldd",
            Instruction::Ld { .. } => "ld",
            Instruction::St { mode: AddrMode::Disp(_), .. } => "std",
            Instruction::St { .. } => "st",
            Instruction::LpmR0 | Instruction::Lpm { .. } => "lpm",
            Instruction::ElpmR0 | Instruction::Elpm { .. } => "elpm",
            Instruction::Spm | Instruction::SpmZInc => "spm",
            Instruction::Xch { .. } => "xch",
            Instruction::Las { .. } => "las",
            Instruction::Lac { .. } => "lac",
            Instruction::Lat { .. } => "lat",
            Instruction::Push { .. } => "push",
            Instruction::Pop { .. } => "pop",
            Instruction::In { .. } => "in",
            Instruction::Out { .. } => "out",
            Instruction::Lsr { .. } => "lsr",
            Instruction::Asr { .. } => "asr",
            Instruction::Ror { .. } => "ror",
            Instruction::Swap { .. } => "swap",
            Instruction::Sbi { .. } => "sbi",
            Instruction::Cbi { .. } => "cbi",
            Instruction::Bst { .. } => "bst",
            Instruction::Bld { .. } => "bld",
            Instruction::Bset { s } => SREG_SET[(s & 7) as usize],
            Instruction::Bclr { s } => SREG_CLEAR[(s & 7) as usize],
            Instruction::Break => "break",
            Instruction::Sleep => "sleep",
            Instruction::Wdr => "wdr",
            Instruction::Unknown(_) => ".word",
        }
    }
}
