use anyhow::{anyhow, bail, Context, Result};
use avr_probe_core::memory::FirmwareImage;
use goblin::elf::program_header::PT_LOAD;
use goblin::elf::section_header::SHF_EXECINSTR;
use goblin::elf::sym::{STT_FUNC, STT_NOTYPE};
use goblin::elf::Elf;
use std::fs;
use std::path::Path;
use tracing::{debug, info, warn};

#[cfg(any(test, feature = "fixtures"))]
pub mod fixture;

pub const EM_AVR: u16 = 83;

/// avr-ld places data space at this offset in the ELF address space.
pub const DATA_SPACE_OFFSET: u64 = 0x80_0000;

pub fn load_elf(path: &Path) -> Result<FirmwareImage> {
    let buffer = fs::read(path).with_context(|| format!("Failed to read ELF file: {:?}", path))?;
    load_elf_bytes(&buffer)
}

pub fn load_elf_bytes(buffer: &[u8]) -> Result<FirmwareImage> {
    let elf = Elf::parse(buffer).context("Failed to parse ELF binary")?;

    if elf.header.e_machine != EM_AVR {
        bail!(
            "Not an AVR binary (e_machine = {}, expected {})",
            elf.header.e_machine,
            EM_AVR
        );
    }

    info!("ELF Entry Point: {:#x}", elf.entry);

    let mut image = FirmwareImage::new(elf.entry as u32);

    for ph in &elf.program_headers {
        if ph.p_type != PT_LOAD {
            continue;
        }
        // Load address (LMA): .data initialisers live in flash too.
        let start_addr = ph.p_paddr;
        let size = ph.p_filesz as usize;
        let offset = ph.p_offset as usize;

        if size == 0 {
            continue;
        }
        if start_addr >= DATA_SPACE_OFFSET {
            debug!("Skipping data-space segment at {:#x}", start_addr);
            continue;
        }

        debug!(
            "Found Loadable Segment: Addr={:#x}, Size={} bytes, Offset={:#x}",
            start_addr, size, offset
        );

        if offset + size > buffer.len() {
            return Err(anyhow!("Segment out of bounds in ELF file"));
        }

        image.add_segment(start_addr as u32, buffer[offset..offset + size].to_vec());
    }

    if image.segments.is_empty() {
        warn!("No loadable flash segments found in ELF file");
    }

    for sym in elf.syms.iter() {
        let kind = sym.st_type();
        if kind != STT_FUNC && kind != STT_NOTYPE {
            continue;
        }
        let in_text = elf
            .section_headers
            .get(sym.st_shndx)
            .is_some_and(|sh| sh.sh_flags & u64::from(SHF_EXECINSTR) != 0);
        if !in_text {
            continue;
        }
        let Some(name) = elf.strtab.get_at(sym.st_name) else {
            continue;
        };
        if name.is_empty() || name.starts_with('.') {
            continue;
        }
        image.add_symbol(name, sym.st_value as u32, sym.st_size as u32);
    }

    debug!("Collected {} code symbols", image.symbols.len());
    Ok(image)
}

pub struct SourceLocation {
    pub file: String,
    pub line: Option<u32>,
    pub function: Option<String>,
}

/// Maps flash addresses back to source lines through the DWARF line table.
pub struct SymbolProvider {
    context: addr2line::Context<gimli::EndianRcSlice<gimli::RunTimeEndian>>,
}

impl SymbolProvider {
    pub fn new(path: &Path) -> Result<Self> {
        let data =
            fs::read(path).with_context(|| format!("Failed to read ELF for symbols: {:?}", path))?;
        Self::from_bytes(&data)
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let object = object::File::parse(data).context("Failed to parse ELF for symbols")?;
        // The context copies the DWARF sections it needs.
        let context =
            addr2line::Context::new(&object).context("Failed to create addr2line context")?;
        Ok(Self { context })
    }

    pub fn lookup(&self, addr: u64) -> Option<SourceLocation> {
        let mut frames = match self.context.find_frames(addr) {
            addr2line::LookupResult::Output(Ok(frames)) => frames,
            _ => return None,
        };

        let frame = frames.next().ok()??;
        let file = frame.location.as_ref().and_then(|l| l.file)?.to_string();
        let line = frame.location.as_ref().and_then(|l| l.line);
        let function = frame
            .function
            .as_ref()
            .and_then(|f| f.demangle().ok())
            .map(|s| s.into_owned());

        Some(SourceLocation {
            file,
            line,
            function,
        })
    }
}
