//! Writes just enough of an AVR ELF32 image for goblin to read back: a
//! program header per segment, `.text`, `.symtab`, `.strtab` and `.shstrtab`.

use std::io;
use std::path::Path;

/// An `-Os` build of the instruction probe, one word per entry.
pub const PROBE_WORDS: &[u16] = &[
    0x93CF, // push r28
    0xE08A, // ldi r24, 0x0A
    0x8389, // std Y+1, r24
    0x8189, // ldd r24, Y+1
    0x819A, // ldd r25, Y+2
    0x0F89, // add r24, r25
    0x1B89, // sub r24, r25
    0x9F89, // mul r24, r25
    0x940E, 0x0020, // call 0x40
    0x2389, // and r24, r25
    0x2B89, // or r24, r25
    0x2789, // eor r24, r25
    0x9580, // com r24
    0x0F88, // lsl r24
    0x9586, // lsr r24
    0x1789, // cp r24, r25
    0xF408, // brcc .+2
    0xE081, // ldi r24, 0x01
    0x9605, // adiw r24, 0x05
    0x94F8, // cli
    0x9478, // sei
    0x8380, // st Z, r24
    0x8180, // ld r24, Z
    0x0000, // nop
    0x95A8, // wdr
    0x0381, // fmuls r16, r17
    0x01C0, // movw r24, r0
    0x2411, // clr r1
    0x91CF, // pop r28
    0x9508, // ret
];

pub const PROBE_SYMBOL: &str = "instruction_probe";
pub const DIVIDE_ROUTINE: &str = "__udivmodqi4";
pub const DIVIDE_ROUTINE_ADDR: u32 = 0x40;

const EHDR_SIZE: usize = 52;
const PHDR_SIZE: usize = 32;
const SHDR_SIZE: usize = 40;
const SYM_SIZE: usize = 16;
const EM_AVR: u16 = 83;

struct FixtureSymbol {
    name: String,
    addr: u32,
    size: u32,
}

pub struct AvrElfBuilder {
    machine: u16,
    text: Vec<u8>,
    symbols: Vec<FixtureSymbol>,
    ram: Option<(u32, Vec<u8>)>,
}

impl Default for AvrElfBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl AvrElfBuilder {
    pub fn new() -> Self {
        Self {
            machine: EM_AVR,
            text: Vec::new(),
            symbols: Vec::new(),
            ram: None,
        }
    }

    /// The stock probe listing followed by a one-word division routine.
    pub fn probe() -> Self {
        Self::probe_with(PROBE_WORDS)
    }

    /// `words` as `instruction_probe` at address 0; the call target stays at 0x40.
    pub fn probe_with(words: &[u16]) -> Self {
        let mut text: Vec<u8> = words.iter().flat_map(|w| w.to_le_bytes()).collect();
        let probe_len = text.len() as u32;
        let routine = DIVIDE_ROUTINE_ADDR as usize;
        if text.len() < routine {
            text.resize(routine, 0x00);
        }
        let routine_addr = text.len() as u32;
        text.extend_from_slice(&0x9508u16.to_le_bytes()); // ret

        Self::new()
            .text(text)
            .symbol(PROBE_SYMBOL, 0, probe_len)
            .symbol(DIVIDE_ROUTINE, routine_addr, 2)
    }

    pub fn machine(mut self, machine: u16) -> Self {
        self.machine = machine;
        self
    }

    pub fn text(mut self, text: Vec<u8>) -> Self {
        self.text = text;
        self
    }

    pub fn symbol(mut self, name: &str, addr: u32, size: u32) -> Self {
        self.symbols.push(FixtureSymbol {
            name: name.to_string(),
            addr,
            size,
        });
        self
    }

    /// Adds a second load segment, e.g. `.data` at its data-space address.
    pub fn ram_segment(mut self, addr: u32, data: Vec<u8>) -> Self {
        self.ram = Some((addr, data));
        self
    }

    pub fn write_to(&self, path: &Path) -> io::Result<()> {
        std::fs::write(path, self.build())
    }

    pub fn build(&self) -> Vec<u8> {
        let phnum = if self.ram.is_some() { 2 } else { 1 };
        let text_off = EHDR_SIZE + PHDR_SIZE * phnum;
        let ram_off = text_off + self.text.len();
        let ram_len = self.ram.as_ref().map_or(0, |(_, d)| d.len());

        let symtab_off = align4(ram_off + ram_len);
        let symtab_len = SYM_SIZE * (self.symbols.len() + 1);

        let mut strtab = vec![0u8];
        let mut name_offsets = Vec::with_capacity(self.symbols.len());
        for sym in &self.symbols {
            name_offsets.push(strtab.len() as u32);
            strtab.extend_from_slice(sym.name.as_bytes());
            strtab.push(0);
        }
        let strtab_off = symtab_off + symtab_len;

        let mut shstrtab = vec![0u8];
        let mut section_name = |name: &str| {
            let off = shstrtab.len() as u32;
            shstrtab.extend_from_slice(name.as_bytes());
            shstrtab.push(0);
            off
        };
        let text_name = section_name(".text");
        let symtab_name = section_name(".symtab");
        let strtab_name = section_name(".strtab");
        let shstrtab_name = section_name(".shstrtab");
        let shstrtab_off = strtab_off + strtab.len();

        let shoff = align4(shstrtab_off + shstrtab.len());
        let shnum = 5;

        let mut out = Vec::with_capacity(shoff + SHDR_SIZE * shnum);

        // ELF header
        out.extend_from_slice(&[0x7F, b'E', b'L', b'F', 1, 1, 1, 0]);
        out.extend_from_slice(&[0; 8]);
        put16(&mut out, 2); // ET_EXEC
        put16(&mut out, self.machine);
        put32(&mut out, 1);
        put32(&mut out, 0); // entry
        put32(&mut out, EHDR_SIZE as u32);
        put32(&mut out, shoff as u32);
        put32(&mut out, 5); // avr5
        put16(&mut out, EHDR_SIZE as u16);
        put16(&mut out, PHDR_SIZE as u16);
        put16(&mut out, phnum as u16);
        put16(&mut out, SHDR_SIZE as u16);
        put16(&mut out, shnum as u16);
        put16(&mut out, 4);

        // Program headers
        let text_len = self.text.len() as u32;
        for v in [1, text_off as u32, 0, 0, text_len, text_len, 5, 2] {
            put32(&mut out, v);
        }
        if let Some((addr, data)) = &self.ram {
            let len = data.len() as u32;
            for v in [1, ram_off as u32, *addr, *addr, len, len, 6, 1] {
                put32(&mut out, v);
            }
        }

        out.extend_from_slice(&self.text);
        if let Some((_, data)) = &self.ram {
            out.extend_from_slice(data);
        }
        out.resize(symtab_off, 0);

        // Symbol table, entry 0 is the null symbol.
        out.extend_from_slice(&[0; SYM_SIZE]);
        for (sym, name) in self.symbols.iter().zip(name_offsets) {
            put32(&mut out, name);
            put32(&mut out, sym.addr);
            put32(&mut out, sym.size);
            out.push(0x12); // STB_GLOBAL | STT_FUNC
            out.push(0);
            put16(&mut out, 1); // .text
        }

        out.extend_from_slice(&strtab);
        out.extend_from_slice(&shstrtab);
        out.resize(shoff, 0);

        // Section headers
        out.extend_from_slice(&[0; SHDR_SIZE]);
        section(&mut out, [text_name, 1, 6, 0, text_off as u32, text_len, 0, 0, 2, 0]);
        section(
            &mut out,
            [
                symtab_name,
                2,
                0,
                0,
                symtab_off as u32,
                symtab_len as u32,
                3,
                1,
                4,
                SYM_SIZE as u32,
            ],
        );
        section(
            &mut out,
            [strtab_name, 3, 0, 0, strtab_off as u32, strtab.len() as u32, 0, 0, 1, 0],
        );
        section(
            &mut out,
            [
                shstrtab_name,
                3,
                0,
                0,
                shstrtab_off as u32,
                shstrtab.len() as u32,
                0,
                0,
                1,
                0,
            ],
        );

        out
    }
}

fn align4(n: usize) -> usize {
    (n + 3) & !3
}

fn put16(out: &mut Vec<u8>, v: u16) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn put32(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn section(out: &mut Vec<u8>, fields: [u32; 10]) {
    for v in fields {
        put32(out, v);
    }
}
