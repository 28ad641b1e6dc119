pub mod analysis;
pub mod classify;
pub mod decoder;
pub mod disasm;
pub mod memory;
pub mod probe;
pub mod report;
pub mod target;


pub use analysis::{analyze, Analysis};
pub use classify::OpClass;
pub use decoder::Instruction;
pub use memory::FirmwareImage;
pub use report::{evaluate, ProbeReport, Status};
pub use target::{CoreFamily, IsaFeatures, TargetVariant};

/// Function the probe firmware exports.
pub const DEFAULT_SYMBOL: &str = "instruction_probe";

#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error("Symbol '{0}' not found in firmware")]
    SymbolNotFound(String),
    #[error("Symbol '{0}' covers no instructions")]
    EmptyRange(String),
    #[error("Instruction truncated at end of flash at {0:#06x}")]
    Truncated(u32),
    #[error("Unknown target variant '{0}'")]
    UnknownTarget(String),
    #[error("Unknown core family '{0}'")]
    UnknownFamily(String),
    #[error("Unknown instruction class '{0}'")]
    UnknownClass(String),
    #[error("Invalid size '{0}'")]
    InvalidSize(String),
}

pub type ProbeResult<T> = Result<T, ProbeError>;
