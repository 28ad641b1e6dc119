//! Device families and the instruction subsets they implement.
//!
//! Family names follow the `-mmcu` architecture groups used by avr-gcc and
//! binutils (`avr5`, `avrxmega`, ...).

use crate::decoder::{AddrMode, Instruction};
use crate::{ProbeError, ProbeResult};
use avr_probe_config::TargetDescriptor;
use bitflags::bitflags;
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

bitflags! {
    /// Optional instruction groups. Everything not listed here exists on
    /// every family.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct IsaFeatures: u32 {
        const ADIW_SBIW    = 1 << 0;
        const LDS_STS32    = 1 << 1;
        const DISPLACEMENT = 1 << 2;
        const MOVW         = 1 << 3;
        const LPMX         = 1 << 4;
        const SPM          = 1 << 5;
        const BREAK        = 1 << 6;
        const JMP_CALL     = 1 << 7;
        const MUL          = 1 << 8;
        const ELPM         = 1 << 9;
        const ELPMX        = 1 << 10;
        const EIJMP        = 1 << 11;
        const DES          = 1 << 12;
        const RMW          = 1 << 13;
        const SPMX         = 1 << 14;
    }
}

impl IsaFeatures {
    /// Flag names, e.g. `["MUL"]`.
    pub fn names(self) -> Vec<String> {
        self.iter_names().map(|(name, _)| name.to_string()).collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CoreFamily {
    Avr1,
    Avr2,
    Avr25,
    Avr3,
    Avr31,
    Avr35,
    Avr4,
    Avr5,
    Avr51,
    Avr6,
    AvrXmega,
    /// megaAVR 0-series and tinyAVR 0/1/2-series (AVRxt core).
    AvrXmega3,
    AvrTiny,
}

impl CoreFamily {
    pub fn name(self) -> &'static str {
        match self {
            CoreFamily::Avr1 => "avr1",
            CoreFamily::Avr2 => "avr2",
            CoreFamily::Avr25 => "avr25",
            CoreFamily::Avr3 => "avr3",
            CoreFamily::Avr31 => "avr31",
            CoreFamily::Avr35 => "avr35",
            CoreFamily::Avr4 => "avr4",
            CoreFamily::Avr5 => "avr5",
            CoreFamily::Avr51 => "avr51",
            CoreFamily::Avr6 => "avr6",
            CoreFamily::AvrXmega => "avrxmega",
            CoreFamily::AvrXmega3 => "avrxmega3",
            CoreFamily::AvrTiny => "avrtiny",
        }
    }

    pub fn features(self) -> IsaFeatures {
        use IsaFeatures as F;
        let classic = F::ADIW_SBIW | F::LDS_STS32 | F::DISPLACEMENT;
        let enhanced = F::MOVW | F::LPMX | F::SPM | F::BREAK;
        match self {
            CoreFamily::Avr1 => F::empty(),
            CoreFamily::Avr2 => classic,
            CoreFamily::Avr25 => classic | enhanced,
            CoreFamily::Avr3 => classic | F::JMP_CALL,
            CoreFamily::Avr31 => classic | F::JMP_CALL | F::ELPM | F::ELPMX,
            CoreFamily::Avr35 => classic | enhanced | F::JMP_CALL,
            CoreFamily::Avr4 => classic | enhanced | F::MUL,
            CoreFamily::Avr5 => classic | enhanced | F::MUL | F::JMP_CALL,
            CoreFamily::Avr51 => classic | enhanced | F::MUL | F::JMP_CALL | F::ELPM | F::ELPMX,
            CoreFamily::Avr6 => {
                classic | enhanced | F::MUL | F::JMP_CALL | F::ELPM | F::ELPMX | F::EIJMP
            }
            CoreFamily::AvrXmega => F::all(),
            // No extended addressing, DES or read-modify-write.
            CoreFamily::AvrXmega3 => classic | enhanced | F::MUL | F::JMP_CALL | F::SPMX,
            CoreFamily::AvrTiny => F::BREAK,
        }
    }
}

impl fmt::Display for CoreFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for CoreFamily {
    type Err = ProbeError;

    fn from_str(s: &str) -> ProbeResult<Self> {
        let family = match s.trim().to_ascii_lowercase().as_str() {
            "avr1" => CoreFamily::Avr1,
            "avr2" => CoreFamily::Avr2,
            "avr25" => CoreFamily::Avr25,
            "avr3" => CoreFamily::Avr3,
            "avr31" => CoreFamily::Avr31,
            "avr35" => CoreFamily::Avr35,
            "avr4" => CoreFamily::Avr4,
            "avr5" => CoreFamily::Avr5,
            "avr51" => CoreFamily::Avr51,
            "avr6" => CoreFamily::Avr6,
            "avrxmega" | "xmega" => CoreFamily::AvrXmega,
            "avrxmega3" => CoreFamily::AvrXmega3,
            "avrtiny" => CoreFamily::AvrTiny,
            _ => return Err(ProbeError::UnknownFamily(s.to_string())),
        };
        Ok(family)
    }
}

// (mcu, family, flash KiB)
const KNOWN_MCUS: &[(&str, CoreFamily, u64)] = &[
    ("at90s1200", CoreFamily::Avr1, 1),
    ("at90s8515", CoreFamily::Avr2, 8),
    ("attiny13a", CoreFamily::Avr25, 1),
    ("attiny2313", CoreFamily::Avr25, 2),
    ("attiny85", CoreFamily::Avr25, 8),
    ("atmega103", CoreFamily::Avr31, 128),
    ("at90usb162", CoreFamily::Avr35, 16),
    ("atmega8", CoreFamily::Avr4, 8),
    ("atmega168", CoreFamily::Avr5, 16),
    ("atmega328", CoreFamily::Avr5, 32),
    ("atmega328p", CoreFamily::Avr5, 32),
    ("atmega32u4", CoreFamily::Avr5, 32),
    ("atmega1280", CoreFamily::Avr51, 128),
    ("atmega1284p", CoreFamily::Avr51, 128),
    ("atmega2560", CoreFamily::Avr6, 256),
    ("atxmega128a1", CoreFamily::AvrXmega, 128),
    ("atmega4809", CoreFamily::AvrXmega3, 48),
    ("attiny1614", CoreFamily::AvrXmega3, 16),
    ("attiny10", CoreFamily::AvrTiny, 1),
];

/// The device a probe was built for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TargetVariant {
    pub name: String,
    pub family: CoreFamily,
    pub flash_bytes: u64,
}

impl TargetVariant {
    pub fn new(name: &str, family: CoreFamily, flash_bytes: u64) -> Self {
        Self {
            name: name.to_string(),
            family,
            flash_bytes,
        }
    }

    /// Looks up a device in the built-in table.
    pub fn lookup(mcu: &str) -> ProbeResult<Self> {
        let wanted = mcu.trim().to_ascii_lowercase();
        KNOWN_MCUS
            .iter()
            .find(|(name, _, _)| *name == wanted)
            .map(|&(name, family, kib)| Self::new(name, family, kib * 1024))
            .ok_or_else(|| ProbeError::UnknownTarget(mcu.to_string()))
    }

    pub fn from_descriptor(desc: &TargetDescriptor) -> ProbeResult<Self> {
        let family = desc.family.parse()?;
        let flash_bytes = avr_probe_config::parse_size(&desc.flash)
            .map_err(|_| ProbeError::InvalidSize(desc.flash.clone()))?;
        Ok(Self::new(&desc.name, family, flash_bytes))
    }

    pub fn known_names() -> impl Iterator<Item = &'static str> {
        KNOWN_MCUS.iter().map(|(name, _, _)| *name)
    }

    pub fn features(&self) -> IsaFeatures {
        self.family.features()
    }

    /// Features `inst` needs that this variant lacks. Empty when supported.
    pub fn missing_features(&self, inst: &Instruction) -> IsaFeatures {
        inst.required_features() - self.features()
    }

    pub fn supports(&self, inst: &Instruction) -> bool {
        self.missing_features(inst).is_empty()
    }
}

impl Default for TargetVariant {
    fn default() -> Self {
        Self::new("atmega328p", CoreFamily::Avr5, 32 * 1024)
    }
}

impl Instruction {
    pub fn required_features(&self) -> IsaFeatures {
        match *self {
            Instruction::Mul { .. }
            | Instruction::Muls { .. }
            | Instruction::Mulsu { .. }
            | Instruction::Fmul { .. }
            | Instruction::Fmuls { .. }
            | Instruction::Fmulsu { .. } => IsaFeatures::MUL,
            Instruction::Movw { .. } => IsaFeatures::MOVW,
            Instruction::Adiw { .. } | Instruction::Sbiw { .. } => IsaFeatures::ADIW_SBIW,
            Instruction::Lds { .. } | Instruction::Sts { .. } => IsaFeatures::LDS_STS32,
            Instruction::Ld { mode: AddrMode::Disp(_), .. }
            | Instruction::St { mode: AddrMode::Disp(_), .. } => IsaFeatures::DISPLACEMENT,
            Instruction::Jmp { .. } | Instruction::Call { .. } => IsaFeatures::JMP_CALL,
            Instruction::Lpm { .. } => IsaFeatures::LPMX,
            Instruction::ElpmR0 => IsaFeatures::ELPM,
            Instruction::Elpm { .. } => IsaFeatures::ELPMX,
            Instruction::Eijmp | Instruction::Eicall => IsaFeatures::EIJMP,
            Instruction::Spm => IsaFeatures::SPM,
            Instruction::SpmZInc => IsaFeatures::SPM | IsaFeatures::SPMX,
            Instruction::Break => IsaFeatures::BREAK,
            Instruction::Des { .. } => IsaFeatures::DES,
            Instruction::Xch { .. }
            | Instruction::Las { .. }
            | Instruction::Lac { .. }
            | Instruction::Lat { .. } => IsaFeatures::RMW,
            _ => IsaFeatures::empty(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup() {
        let t = TargetVariant::lookup("ATmega328P").unwrap();
        assert_eq!(t.family, CoreFamily::Avr5);
        assert_eq!(t.flash_bytes, 32 * 1024);
        assert!(matches!(
            TargetVariant::lookup("z80"),
            Err(ProbeError::UnknownTarget(_))
        ));
    }

    #[test]
    fn test_fmuls_support() {
        let fmuls = Instruction::Fmuls { d: 16, r: 17 };
        assert!(TargetVariant::lookup("atmega328p").unwrap().supports(&fmuls));
        assert!(TargetVariant::lookup("atmega8").unwrap().supports(&fmuls));

        let tiny = TargetVariant::lookup("attiny85").unwrap();
        assert!(!tiny.supports(&fmuls));
        assert_eq!(tiny.missing_features(&fmuls), IsaFeatures::MUL);
        assert_eq!(tiny.missing_features(&fmuls).names(), vec!["MUL".to_string()]);
    }

    #[test]
    fn test_generic_instructions_everywhere() {
        let generic = [
            Instruction::Add { d: 24, r: 25 },
            Instruction::Bclr { s: 7 },
            Instruction::Wdr,
            Instruction::Nop,
        ];
        for mcu in TargetVariant::known_names() {
            let target = TargetVariant::lookup(mcu).unwrap();
            for inst in &generic {
                assert!(target.supports(inst), "{} should support {:?}", mcu, inst);
            }
        }
    }

    #[test]
    fn test_family_ordering() {
        assert!(CoreFamily::Avr6.features().contains(CoreFamily::Avr5.features()));
        assert!(CoreFamily::Avr5.features().contains(CoreFamily::Avr4.features()));
        assert!(!CoreFamily::AvrTiny.features().contains(IsaFeatures::ADIW_SBIW));
        assert!(CoreFamily::AvrXmega.features().contains(IsaFeatures::DES));
    }

    #[test]
    fn test_xmega3_parts_lack_extended_instructions() {
        let m4809 = TargetVariant::lookup("atmega4809").unwrap();
        assert_eq!(m4809.family, CoreFamily::AvrXmega3);
        assert_eq!("avrxmega3".parse::<CoreFamily>().unwrap(), CoreFamily::AvrXmega3);

        assert!(m4809.supports(&Instruction::Fmuls { d: 16, r: 17 }));
        assert!(m4809.supports(&Instruction::Call { k: 0x20 }));
        assert!(!m4809.supports(&Instruction::Des { k: 0 }));
        assert!(!m4809.supports(&Instruction::Eicall));
        assert!(!m4809.supports(&Instruction::ElpmR0));
        assert!(!m4809.supports(&Instruction::Xch { d: 24 }));

        let tiny = TargetVariant::lookup("attiny1614").unwrap();
        assert_eq!(tiny.missing_features(&Instruction::Las { d: 24 }), IsaFeatures::RMW);
        assert!(TargetVariant::lookup("atxmega128a1").unwrap().supports(&Instruction::Des { k: 0 }));
    }

    #[test]
    fn test_from_descriptor() {
        let desc = TargetDescriptor {
            name: "custom".into(),
            family: "avr25".into(),
            flash: "8KiB".into(),
        };
        let t = TargetVariant::from_descriptor(&desc).unwrap();
        assert_eq!(t.family, CoreFamily::Avr25);
        assert_eq!(t.flash_bytes, 8192);

        let bad = TargetDescriptor {
            family: "pdp11".into(),
            ..desc
        };
        assert!(matches!(
            TargetVariant::from_descriptor(&bad),
            Err(ProbeError::UnknownFamily(_))
        ));
    }
}
