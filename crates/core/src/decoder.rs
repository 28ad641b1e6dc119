//! AVR instruction decoder.
//!
//! Covers the full AVRe+/XMEGA instruction set as emitted by avr-gcc and the
//! LLVM AVR backend. Register fields are absolute register numbers (0-31),
//! I/O addresses are raw I/O space (0-63) and relative offsets are in words.

/// Pointer register used by indirect loads and stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PtrReg {
    X,
    Y,
    Z,
}

/// Addressing mode of an indirect load or store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddrMode {
    Plain,
    PostInc,
    PreDec,
    /// `Y+q` / `Z+q`, q in 1..=63. A zero displacement decodes as `Plain`.
    Disp(u8),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Instruction {
    Nop,
    // Arithmetic and logic
    Add { d: u8, r: u8 },
    Adc { d: u8, r: u8 },
    Adiw { d: u8, k: u8 },
    Sub { d: u8, r: u8 },
    Subi { d: u8, k: u8 },
    Sbc { d: u8, r: u8 },
    Sbci { d: u8, k: u8 },
    Sbiw { d: u8, k: u8 },
    And { d: u8, r: u8 },
    Andi { d: u8, k: u8 },
    Or { d: u8, r: u8 },
    Ori { d: u8, k: u8 },
    Eor { d: u8, r: u8 },
    Com { d: u8 },
    Neg { d: u8 },
    Inc { d: u8 },
    Dec { d: u8 },
    Mul { d: u8, r: u8 },
    Muls { d: u8, r: u8 },
    Mulsu { d: u8, r: u8 },
    Fmul { d: u8, r: u8 },
    Fmuls { d: u8, r: u8 },
    Fmulsu { d: u8, r: u8 },
    Des { k: u8 },
    // Compare
    Cp { d: u8, r: u8 },
    Cpc { d: u8, r: u8 },
    Cpi { d: u8, k: u8 },
    // Branch and skip
    Rjmp { k: i16 },
    Rcall { k: i16 },
    Jmp { k: u32 },
    Call { k: u32 },
    Ijmp,
    Eijmp,
    Icall,
    Eicall,
    Ret,
    Reti,
    Cpse { d: u8, r: u8 },
    Sbrc { r: u8, b: u8 },
    Sbrs { r: u8, b: u8 },
    Sbic { a: u8, b: u8 },
    Sbis { a: u8, b: u8 },
    Brbs { s: u8, k: i8 },
    Brbc { s: u8, k: i8 },
    // Data transfer
    Mov { d: u8, r: u8 },
    Movw { d: u8, r: u8 },
    Ldi { d: u8, k: u8 },
    Lds { d: u8, k: u16 },
    Sts { k: u16, r: u8 },
    Ld { d: u8, ptr: PtrReg, mode: AddrMode },
    St { r: u8, ptr: PtrReg, mode: AddrMode },
    /// `lpm` with implicit `r0, Z`.
    LpmR0,
    Lpm { d: u8, post_inc: bool },
    ElpmR0,
    Elpm { d: u8, post_inc: bool },
    Spm,
    SpmZInc,
    Xch { d: u8 },
    Las { d: u8 },
    Lac { d: u8 },
    Lat { d: u8 },
    Push { r: u8 },
    Pop { d: u8 },
    In { d: u8, a: u8 },
    Out { a: u8, r: u8 },
    // Bit and bit-test
    Lsr { d: u8 },
    Asr { d: u8 },
    Ror { d: u8 },
    Swap { d: u8 },
    Sbi { a: u8, b: u8 },
    Cbi { a: u8, b: u8 },
    Bst { d: u8, b: u8 },
    Bld { d: u8, b: u8 },
    /// Set SREG bit `s` (`sec`, `sez`, ... `sei`).
    Bset { s: u8 },
    /// Clear SREG bit `s` (`clc`, `clz`, ... `cli`).
    Bclr { s: u8 },
    // MCU control
    Break,
    Sleep,
    Wdr,
    Unknown(u16),
}

/// SREG bit index of the global interrupt flag.
pub const SREG_I: u8 = 7;

/// Decodes one instruction. `next` is the following flash word, consumed only
/// by the 32-bit forms. Returns the instruction and its size in words.
pub fn decode(word: u16, next: u16) -> (Instruction, usize) {
    // 32-bit forms: JMP/CALL 1001 010k kkkk 11xk, LDS/STS 1001 00xd dddd 0000
    if word & 0xFE0C == 0x940C {
        let k = ((((word as u32) >> 3) & 0x3E) | (word as u32 & 1)) << 16 | next as u32;
        let inst = if word & 0x0002 == 0 {
            Instruction::Jmp { k }
        } else {
            Instruction::Call { k }
        };
        return (inst, 2);
    }
    if word & 0xFC0F == 0x9000 {
        let reg = field_d5(word);
        let inst = if word & 0x0200 == 0 {
            Instruction::Lds { d: reg, k: next }
        } else {
            Instruction::Sts { k: next, r: reg }
        };
        return (inst, 2);
    }

    let inst = match word >> 12 {
        0x0 => decode_0000(word),
        0x1 => {
            let (d, r) = field_d5_r5(word);
            match (word >> 10) & 3 {
                0 => Instruction::Cpse { d, r },
                1 => Instruction::Cp { d, r },
                2 => Instruction::Sub { d, r },
                _ => Instruction::Adc { d, r },
            }
        }
        0x2 => {
            let (d, r) = field_d5_r5(word);
            match (word >> 10) & 3 {
                0 => Instruction::And { d, r },
                1 => Instruction::Eor { d, r },
                2 => Instruction::Or { d, r },
                _ => Instruction::Mov { d, r },
            }
        }
        0x3 => {
            let (d, k) = field_d4_k8(word);
            Instruction::Cpi { d, k }
        }
        0x4 => {
            let (d, k) = field_d4_k8(word);
            Instruction::Sbci { d, k }
        }
        0x5 => {
            let (d, k) = field_d4_k8(word);
            Instruction::Subi { d, k }
        }
        0x6 => {
            let (d, k) = field_d4_k8(word);
            Instruction::Ori { d, k }
        }
        0x7 => {
            let (d, k) = field_d4_k8(word);
            Instruction::Andi { d, k }
        }
        // LDD/STD: 10q0 qqsd dddd yqqq
        0x8 | 0xA => decode_displacement(word),
        0x9 => decode_1001(word),
        // IN/OUT: 1011 sAAd dddd AAAA
        0xB => {
            let reg = field_d5(word);
            let a = (((word >> 5) & 0x30) | (word & 0x0F)) as u8;
            if word & 0x0800 == 0 {
                Instruction::In { d: reg, a }
            } else {
                Instruction::Out { a, r: reg }
            }
        }
        0xC => Instruction::Rjmp {
            k: sign_extend_12(word),
        },
        0xD => Instruction::Rcall {
            k: sign_extend_12(word),
        },
        0xE => {
            let (d, k) = field_d4_k8(word);
            Instruction::Ldi { d, k }
        }
        0xF => decode_1111(word),
        _ => Instruction::Unknown(word),
    };

    (inst, 1)
}

// 0000 xxxx: NOP, MOVW, MULS, MULSU, FMUL*, CPC, SBC, ADD
fn decode_0000(word: u16) -> Instruction {
    match (word >> 8) & 0x0F {
        0x0 if word == 0x0000 => Instruction::Nop,
        0x0 => Instruction::Unknown(word),
        // MOVW: 0000 0001 dddd rrrr (register pairs)
        0x1 => Instruction::Movw {
            d: (((word >> 4) & 0x0F) * 2) as u8,
            r: ((word & 0x0F) * 2) as u8,
        },
        // MULS: 0000 0010 dddd rrrr (r16..r31)
        0x2 => Instruction::Muls {
            d: (((word >> 4) & 0x0F) + 16) as u8,
            r: ((word & 0x0F) + 16) as u8,
        },
        // MULSU/FMUL/FMULS/FMULSU: 0000 0011 xddd xrrr (r16..r23)
        0x3 => {
            let d = (((word >> 4) & 0x07) + 16) as u8;
            let r = ((word & 0x07) + 16) as u8;
            match word & 0x0088 {
                0x0000 => Instruction::Mulsu { d, r },
                0x0008 => Instruction::Fmul { d, r },
                0x0080 => Instruction::Fmuls { d, r },
                _ => Instruction::Fmulsu { d, r },
            }
        }
        _ => {
            let (d, r) = field_d5_r5(word);
            match (word >> 10) & 3 {
                1 => Instruction::Cpc { d, r },
                2 => Instruction::Sbc { d, r },
                _ => Instruction::Add { d, r },
            }
        }
    }
}

fn decode_displacement(word: u16) -> Instruction {
    let q = ((((word >> 13) & 1) << 5) | (((word >> 10) & 3) << 3) | (word & 7)) as u8;
    let reg = field_d5(word);
    let ptr = if word & 0x0008 != 0 { PtrReg::Y } else { PtrReg::Z };
    let mode = if q == 0 {
        AddrMode::Plain
    } else {
        AddrMode::Disp(q)
    };

    if word & 0x0200 == 0 {
        Instruction::Ld { d: reg, ptr, mode }
    } else {
        Instruction::St { r: reg, ptr, mode }
    }
}

// 1001 xxxx: single-register ops, indirect LD/ST, LPM/ELPM, PUSH/POP, SREG,
// MCU control, word immediates, bit I/O, MUL
fn decode_1001(word: u16) -> Instruction {
    let reg = field_d5(word);

    match (word >> 9) & 0x07 {
        // Loads: 1001 000d dddd xxxx
        0b000 => match word & 0x0F {
            0x1 => Instruction::Ld { d: reg, ptr: PtrReg::Z, mode: AddrMode::PostInc },
            0x2 => Instruction::Ld { d: reg, ptr: PtrReg::Z, mode: AddrMode::PreDec },
            0x4 => Instruction::Lpm { d: reg, post_inc: false },
            0x5 => Instruction::Lpm { d: reg, post_inc: true },
            0x6 => Instruction::Elpm { d: reg, post_inc: false },
            0x7 => Instruction::Elpm { d: reg, post_inc: true },
            0x9 => Instruction::Ld { d: reg, ptr: PtrReg::Y, mode: AddrMode::PostInc },
            0xA => Instruction::Ld { d: reg, ptr: PtrReg::Y, mode: AddrMode::PreDec },
            0xC => Instruction::Ld { d: reg, ptr: PtrReg::X, mode: AddrMode::Plain },
            0xD => Instruction::Ld { d: reg, ptr: PtrReg::X, mode: AddrMode::PostInc },
            0xE => Instruction::Ld { d: reg, ptr: PtrReg::X, mode: AddrMode::PreDec },
            0xF => Instruction::Pop { d: reg },
            _ => Instruction::Unknown(word),
        },
        // Stores and read-modify-write: 1001 001r rrrr xxxx
        0b001 => match word & 0x0F {
            0x1 => Instruction::St { r: reg, ptr: PtrReg::Z, mode: AddrMode::PostInc },
            0x2 => Instruction::St { r: reg, ptr: PtrReg::Z, mode: AddrMode::PreDec },
            0x4 => Instruction::Xch { d: reg },
            0x5 => Instruction::Las { d: reg },
            0x6 => Instruction::Lac { d: reg },
            0x7 => Instruction::Lat { d: reg },
            0x9 => Instruction::St { r: reg, ptr: PtrReg::Y, mode: AddrMode::PostInc },
            0xA => Instruction::St { r: reg, ptr: PtrReg::Y, mode: AddrMode::PreDec },
            0xC => Instruction::St { r: reg, ptr: PtrReg::X, mode: AddrMode::Plain },
            0xD => Instruction::St { r: reg, ptr: PtrReg::X, mode: AddrMode::PostInc },
            0xE => Instruction::St { r: reg, ptr: PtrReg::X, mode: AddrMode::PreDec },
            0xF => Instruction::Push { r: reg },
            _ => Instruction::Unknown(word),
        },
        // 1001 010x xxxx xxxx
        0b010 => decode_1001_010(word, reg),
        // ADIW/SBIW: 1001 011x KKdd KKKK (r24, r26, r28, r30)
        0b011 => {
            let d = (((word >> 4) & 3) * 2 + 24) as u8;
            let k = ((((word >> 6) & 3) << 4) | (word & 0x0F)) as u8;
            if word & 0x0100 == 0 {
                Instruction::Adiw { d, k }
            } else {
                Instruction::Sbiw { d, k }
            }
        }
        // CBI/SBIC/SBI/SBIS: 1001 10xx AAAA Abbb
        0b100 | 0b101 => {
            let a = ((word >> 3) & 0x1F) as u8;
            let b = (word & 7) as u8;
            match (word >> 8) & 3 {
                0 => Instruction::Cbi { a, b },
                1 => Instruction::Sbic { a, b },
                2 => Instruction::Sbi { a, b },
                _ => Instruction::Sbis { a, b },
            }
        }
        // MUL: 1001 11rd dddd rrrr
        _ => {
            let (d, r) = field_d5_r5(word);
            Instruction::Mul { d, r }
        }
    }
}

fn decode_1001_010(word: u16, reg: u8) -> Instruction {
    match word & 0x0F {
        0x0 => Instruction::Com { d: reg },
        0x1 => Instruction::Neg { d: reg },
        0x2 => Instruction::Swap { d: reg },
        0x3 => Instruction::Inc { d: reg },
        0x5 => Instruction::Asr { d: reg },
        0x6 => Instruction::Lsr { d: reg },
        0x7 => Instruction::Ror { d: reg },
        0xA => Instruction::Dec { d: reg },
        // BSET/BCLR: 1001 0100 xsss 1000, then the 1001 0101 xxxx 1000 group
        0x8 if word & 0x0100 == 0 => {
            let s = ((word >> 4) & 7) as u8;
            if word & 0x0080 == 0 {
                Instruction::Bset { s }
            } else {
                Instruction::Bclr { s }
            }
        }
        0x8 => match word {
            0x9508 => Instruction::Ret,
            0x9518 => Instruction::Reti,
            0x9588 => Instruction::Sleep,
            0x9598 => Instruction::Break,
            0x95A8 => Instruction::Wdr,
            0x95C8 => Instruction::LpmR0,
            0x95D8 => Instruction::ElpmR0,
            0x95E8 => Instruction::Spm,
            0x95F8 => Instruction::SpmZInc,
            _ => Instruction::Unknown(word),
        },
        0x9 => match word {
            0x9409 => Instruction::Ijmp,
            0x9419 => Instruction::Eijmp,
            0x9509 => Instruction::Icall,
            0x9519 => Instruction::Eicall,
            _ => Instruction::Unknown(word),
        },
        // DES: 1001 0100 KKKK 1011
        0xB if word & 0x0100 == 0 => Instruction::Des {
            k: ((word >> 4) & 0x0F) as u8,
        },
        _ => Instruction::Unknown(word),
    }
}

// 1111 xxxx: BRBS/BRBC, BLD/BST, SBRC/SBRS
fn decode_1111(word: u16) -> Instruction {
    let s = (word & 7) as u8;
    let reg = field_d5(word);
    match (word >> 9) & 7 {
        0b000 | 0b001 => Instruction::Brbs {
            s,
            k: sign_extend_7(word),
        },
        0b010 | 0b011 => Instruction::Brbc {
            s,
            k: sign_extend_7(word),
        },
        // The remaining forms require bit 3 clear.
        _ if word & 0x0008 != 0 => Instruction::Unknown(word),
        0b100 => Instruction::Bld { d: reg, b: s },
        0b101 => Instruction::Bst { d: reg, b: s },
        0b110 => Instruction::Sbrc { r: reg, b: s },
        _ => Instruction::Sbrs { r: reg, b: s },
    }
}

/// xxxx xxxd dddd xxxx
#[inline(always)]
fn field_d5(word: u16) -> u8 {
    ((word >> 4) & 0x1F) as u8
}

/// xxxx xxrd dddd rrrr
#[inline(always)]
fn field_d5_r5(word: u16) -> (u8, u8) {
    let d = field_d5(word);
    let r = ((word & 0x0F) | ((word >> 5) & 0x10)) as u8;
    (d, r)
}

/// xxxx KKKK dddd KKKK, d in r16..r31
#[inline(always)]
fn field_d4_k8(word: u16) -> (u8, u8) {
    let d = (((word >> 4) & 0x0F) + 16) as u8;
    let k = (((word >> 4) & 0xF0) | (word & 0x0F)) as u8;
    (d, k)
}

#[inline(always)]
fn sign_extend_12(word: u16) -> i16 {
    ((word << 4) as i16) >> 4
}

#[inline(always)]
fn sign_extend_7(word: u16) -> i8 {
    ((((word >> 3) & 0x7F) as u8) << 1) as i8 >> 1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_nop_and_erased_flash() {
        assert_eq!(decode(0x0000, 0), (Instruction::Nop, 1));
        assert_eq!(decode(0xFFFF, 0), (Instruction::Unknown(0xFFFF), 1));
    }

    #[test]
    fn test_decode_add_and_lsl() {
        // ADD r24, r25 => 0000 1111 1000 1001
        assert_eq!(decode(0x0F89, 0).0, Instruction::Add { d: 24, r: 25 });
        // LSL r24 is ADD r24, r24 => 0000 1111 1000 1000
        assert_eq!(decode(0x0F88, 0).0, Instruction::Add { d: 24, r: 24 });
    }

    #[test]
    fn test_decode_fractional_multiply() {
        // FMULS r16, r17 => 0000 0011 1000 0001
        assert_eq!(decode(0x0381, 0).0, Instruction::Fmuls { d: 16, r: 17 });
        // FMUL r23, r23 => 0000 0011 0111 1111
        assert_eq!(decode(0x037F, 0).0, Instruction::Fmul { d: 23, r: 23 });
        // FMULSU r16, r16 => 0000 0011 1000 1000
        assert_eq!(decode(0x0388, 0).0, Instruction::Fmulsu { d: 16, r: 16 });
        // MULSU r17, r18 => 0000 0011 0001 0010
        assert_eq!(decode(0x0312, 0).0, Instruction::Mulsu { d: 17, r: 18 });
    }

    #[test]
    fn test_decode_movw() {
        // MOVW r24, r0 => 0000 0001 1100 0000
        assert_eq!(decode(0x01C0, 0).0, Instruction::Movw { d: 24, r: 0 });
    }

    #[test]
    fn test_decode_adiw() {
        // ADIW r24, 5 => 1001 0110 0000 0101
        assert_eq!(decode(0x9605, 0).0, Instruction::Adiw { d: 24, k: 5 });
        // ADIW r30, 48 => 1001 0110 1111 0000
        assert_eq!(decode(0x96F0, 0).0, Instruction::Adiw { d: 30, k: 48 });
        // SBIW r28, 1 => 1001 0111 0010 0001
        assert_eq!(decode(0x9721, 0).0, Instruction::Sbiw { d: 28, k: 1 });
    }

    #[test]
    fn test_decode_sreg() {
        assert_eq!(decode(0x94F8, 0).0, Instruction::Bclr { s: SREG_I });
        assert_eq!(decode(0x9478, 0).0, Instruction::Bset { s: SREG_I });
        assert_eq!(decode(0x9408, 0).0, Instruction::Bset { s: 0 });
        assert_eq!(decode(0x95A8, 0).0, Instruction::Wdr);
        assert_eq!(decode(0x9508, 0).0, Instruction::Ret);
    }

    #[test]
    fn test_decode_displacement() {
        // STD Y+1, r24 => 1000 0011 1000 1001
        assert_eq!(
            decode(0x8389, 0).0,
            Instruction::St { r: 24, ptr: PtrReg::Y, mode: AddrMode::Disp(1) }
        );
        // LDD r31, Y+63 => 1010 1101 1111 1111
        assert_eq!(
            decode(0xADFF, 0).0,
            Instruction::Ld { d: 31, ptr: PtrReg::Y, mode: AddrMode::Disp(63) }
        );
        // LD r24, Z => 1000 0001 1000 0000
        assert_eq!(
            decode(0x8180, 0).0,
            Instruction::Ld { d: 24, ptr: PtrReg::Z, mode: AddrMode::Plain }
        );
    }

    #[test]
    fn test_decode_pointer_forms() {
        // ST X+, r0 => 1001 0010 0000 1101
        assert_eq!(
            decode(0x920D, 0).0,
            Instruction::St { r: 0, ptr: PtrReg::X, mode: AddrMode::PostInc }
        );
        // LD r1, -Z => 1001 0000 0001 0010
        assert_eq!(
            decode(0x9012, 0).0,
            Instruction::Ld { d: 1, ptr: PtrReg::Z, mode: AddrMode::PreDec }
        );
        assert_eq!(decode(0x93CF, 0).0, Instruction::Push { r: 28 });
        assert_eq!(decode(0x91CF, 0).0, Instruction::Pop { d: 28 });
    }

    #[test]
    fn test_decode_32bit() {
        assert_eq!(decode(0x940C, 0x0034), (Instruction::Jmp { k: 0x34 }, 2));
        assert_eq!(decode(0x940E, 0x0020), (Instruction::Call { k: 0x20 }, 2));
        // CALL with k bit 16 set => 1001 0100 0000 1111
        assert_eq!(decode(0x940F, 0x0000), (Instruction::Call { k: 0x10000 }, 2));
        // LDS r24, 0x0100 / STS 0x0100, r24
        assert_eq!(decode(0x9180, 0x0100), (Instruction::Lds { d: 24, k: 0x100 }, 2));
        assert_eq!(decode(0x9380, 0x0100), (Instruction::Sts { k: 0x100, r: 24 }, 2));
    }

    #[test]
    fn test_decode_branches() {
        // BRCC .+2 => 1111 0100 0000 1000
        assert_eq!(decode(0xF408, 0).0, Instruction::Brbc { s: 0, k: 1 });
        // BREQ .-2 => 1111 0011 1111 1001
        assert_eq!(decode(0xF3F9, 0).0, Instruction::Brbs { s: 1, k: -1 });
        assert_eq!(decode(0xCFFF, 0).0, Instruction::Rjmp { k: -1 });
        assert_eq!(decode(0xD002, 0).0, Instruction::Rcall { k: 2 });
    }

    #[test]
    fn test_decode_io() {
        // OUT 0x3f, r0 => 1011 1110 0000 1111
        assert_eq!(decode(0xBE0F, 0).0, Instruction::Out { a: 0x3F, r: 0 });
        // IN r24, 0x3d => 1011 0111 1000 1101
        assert_eq!(decode(0xB78D, 0).0, Instruction::In { d: 24, a: 0x3D });
        // SBI 0x05, 5 => 1001 1010 0010 1101
        assert_eq!(decode(0x9A2D, 0).0, Instruction::Sbi { a: 0x05, b: 5 });
    }

    #[test]
    fn test_decode_xmega_only() {
        assert_eq!(decode(0x9419, 0).0, Instruction::Eijmp);
        assert_eq!(decode(0x94AB, 0).0, Instruction::Des { k: 10 });
        assert_eq!(decode(0x9304, 0).0, Instruction::Xch { d: 16 });
        assert_eq!(decode(0x95F8, 0).0, Instruction::SpmZInc);
    }
}
