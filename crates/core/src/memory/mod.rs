use crate::{ProbeError, ProbeResult};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Segment {
    pub start_addr: u32,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Symbol {
    pub name: String,
    /// Byte address in flash.
    pub addr: u32,
    pub size: u32,
}

/// Flash contents and function symbols of a firmware ELF.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FirmwareImage {
    pub entry_point: u32,
    pub segments: Vec<Segment>,
    /// Sorted by address.
    pub symbols: Vec<Symbol>,
}

impl FirmwareImage {
    pub fn new(entry_point: u32) -> Self {
        Self {
            entry_point,
            segments: Vec::new(),
            symbols: Vec::new(),
        }
    }

    pub fn add_segment(&mut self, start_addr: u32, data: Vec<u8>) {
        self.segments.push(Segment { start_addr, data });
    }

    pub fn add_symbol(&mut self, name: &str, addr: u32, size: u32) {
        let at = self.symbols.partition_point(|s| s.addr <= addr);
        self.symbols.insert(
            at,
            Symbol {
                name: name.to_string(),
                addr,
                size,
            },
        );
    }

    /// Flattens all segments into one image starting at address 0. Gaps read
    /// as erased flash (0xFF).
    pub fn flash(&self) -> Vec<u8> {
        let end = self
            .segments
            .iter()
            .map(|s| s.start_addr as usize + s.data.len())
            .max()
            .unwrap_or(0);
        let mut flash = vec![0xFF; end];
        for segment in &self.segments {
            let start = segment.start_addr as usize;
            flash[start..start + segment.data.len()].copy_from_slice(&segment.data);
        }
        flash
    }

    pub fn function(&self, name: &str) -> Option<&Symbol> {
        self.symbols.iter().find(|s| s.name == name)
    }

    /// Byte range `[start, end)` covered by `name`. Symbols without a size
    /// extend to the next symbol or to the end of flash.
    pub fn function_range(&self, name: &str) -> ProbeResult<(u32, u32)> {
        let sym = self
            .function(name)
            .ok_or_else(|| ProbeError::SymbolNotFound(name.to_string()))?;

        let end = if sym.size > 0 {
            sym.addr + sym.size
        } else {
            self.symbols
                .iter()
                .map(|s| s.addr)
                .find(|&addr| addr > sym.addr)
                .unwrap_or(self.flash_len())
        };

        if end <= sym.addr {
            return Err(ProbeError::EmptyRange(name.to_string()));
        }
        Ok((sym.addr, end))
    }

    /// Symbol containing `addr`, or starting exactly at it.
    pub fn symbol_at(&self, addr: u32) -> Option<&Symbol> {
        self.symbols
            .iter()
            .rev()
            .find(|s| s.addr == addr || (s.addr < addr && addr < s.addr + s.size))
    }

    fn flash_len(&self) -> u32 {
        self.segments
            .iter()
            .map(|s| s.start_addr + s.data.len() as u32)
            .max()
            .unwrap_or(0)
    }
}
