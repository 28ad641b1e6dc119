//! Instruction-set manual comparison over extracted manual text.
//!
//! Instruction sections open with a heading such as `6.2 ADD – Add without
//! Carry` (an alternate name may follow in parentheses, `6.60 LD (LDD) – …`),
//! continue with their `6.2.1 Description` subsection and end the description
//! at an `Operation:` line. Table-of-contents entries lack the subsection and
//! are not counted.
//!
//! Inputs are plain text, PDF files or `http(s)` URLs of either.

use anyhow::{anyhow, Context, Result};
use regex::Regex;
use std::collections::BTreeSet;
use std::fmt::Write as _;
use std::path::Path;
use tracing::{debug, info};

pub const OLD_URL: &str =
    "https://ww1.microchip.com/downloads/en/DeviceDoc/AVR-InstructionSet-Manual-DS40002198.pdf";
pub const NEW_URL: &str = "https://ww1.microchip.com/downloads/aemDocuments/documents/MCU08/ProductDocuments/ReferenceManuals/AVR-InstructionSet-Manual-DS40002198.pdf";

/// Instructions the probe firmware relies on.
pub const KEY_INSTRUCTIONS: &[&str] = &[
    "ADD", "SUB", "MUL", "AND", "OR", "EOR", "LSL", "LSR", "CLI", "SEI", "NOP", "WDR", "FMULS",
    "MOVW", "ADIW",
];

/// Parenthesised core names that are not instruction aliases.
const CORE_TAGS: &[&str] = &["AVRe", "AVRrc"];

const HEADING: &str = r"^(6\.\d{1,3})\s+(\w+)\s+(?:\((\w+)\)\s+)?[-\x{2013}]\s+(.+?)\s*$";
const DESCRIPTION: &str = r"^(6\.\d{1,3})\.1\s+Description\b";
const OPERATION: &str = "Operation:";

/// Lists shorter than this are printed in full.
const PREVIEW_LIMIT: usize = 20;

#[derive(Debug, PartialEq, Eq)]
struct Heading<'a> {
    section: &'a str,
    mnemonic: &'a str,
    alternate: Option<&'a str>,
}

pub struct ManualParser {
    heading: Regex,
    description: Regex,
}

impl ManualParser {
    pub fn new() -> Result<Self> {
        Ok(Self {
            heading: Regex::new(HEADING).context("Invalid heading pattern")?,
            description: Regex::new(DESCRIPTION).context("Invalid description pattern")?,
        })
    }

    fn heading<'a>(&self, line: &'a str) -> Option<Heading<'a>> {
        let caps = self.heading.captures(line.trim())?;
        Some(Heading {
            section: caps.get(1)?.as_str(),
            mnemonic: caps.get(2)?.as_str(),
            alternate: caps.get(3).map(|m| m.as_str()),
        })
    }

    fn opens_description(&self, line: &str, section: &str) -> bool {
        self.description
            .captures(line.trim())
            .and_then(|caps| caps.get(1))
            .is_some_and(|m| m.as_str() == section)
    }

    /// Every mnemonic with a full instruction section in `text`.
    pub fn collect_mnemonics(&self, text: &str) -> BTreeSet<String> {
        let lines: Vec<&str> = text.lines().collect();
        let mut found = BTreeSet::new();

        for (i, line) in lines.iter().enumerate() {
            let Some(heading) = self.heading(line) else {
                continue;
            };
            let Some(offset) = lines[i + 1..].iter().position(|l| !l.trim().is_empty()) else {
                continue;
            };
            let desc = i + 1 + offset;
            if !self.opens_description(lines[desc], heading.section) {
                continue;
            }
            // The description runs until `Operation:`, never into the next heading.
            let operation = lines[desc + 1..]
                .iter()
                .take_while(|l| self.heading(l).is_none())
                .any(|l| l.contains(OPERATION));
            if !operation {
                debug!("{} {} has no operation", heading.section, heading.mnemonic);
                continue;
            }

            found.insert(heading.mnemonic.to_string());
            if let Some(alt) = heading.alternate {
                if !CORE_TAGS.contains(&alt) {
                    found.insert(alt.to_string());
                }
            }
        }
        found
    }
}

fn is_url(source: &str) -> bool {
    source.starts_with("http://") || source.starts_with("https://")
}

fn fetch(source: &str) -> Result<Vec<u8>> {
    if is_url(source) {
        info!("Downloading manual from {}", source);
        let bytes = reqwest::blocking::get(source)
            .and_then(|r| r.error_for_status())
            .and_then(|r| r.bytes())
            .with_context(|| format!("Failed to download {}", source))?;
        return Ok(bytes.to_vec());
    }
    std::fs::read(source).with_context(|| format!("Failed to read {}", source))
}

/// Text of a manual given as a text file, a PDF or a URL of either.
pub fn load_text(source: &str) -> Result<String> {
    let bytes = fetch(source)?;
    let pdf = bytes.starts_with(b"%PDF")
        || Path::new(source)
            .extension()
            .is_some_and(|e| e.eq_ignore_ascii_case("pdf"));
    if pdf {
        info!("Extracting text from {} ({} bytes)", source, bytes.len());
        return pdf_extract::extract_text_from_mem(&bytes)
            .map_err(|e| anyhow!("Failed to extract text from {}: {}", source, e));
    }
    String::from_utf8(bytes).with_context(|| format!("{} is neither PDF nor UTF-8 text", source))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyCheck {
    pub mnemonic: &'static str,
    pub in_old: bool,
    pub in_new: bool,
}

impl KeyCheck {
    pub fn changed(&self) -> bool {
        self.in_old != self.in_new
    }
}

#[derive(Debug, Default)]
pub struct ManualDiff {
    pub old: BTreeSet<String>,
    pub new: BTreeSet<String>,
}

/// `Instructions found:` line, eliding the middle of long lists.
fn preview(set: &BTreeSet<String>) -> String {
    let names: Vec<&str> = set.iter().map(String::as_str).collect();
    if names.len() <= PREVIEW_LIMIT {
        return names.join(", ");
    }
    let mut shown = names[..10].to_vec();
    shown.push("...");
    shown.extend_from_slice(&names[names.len() - 10..]);
    shown.join(", ")
}

impl ManualDiff {
    pub fn new(old_text: &str, new_text: &str) -> Result<Self> {
        let parser = ManualParser::new()?;
        Ok(Self {
            old: parser.collect_mnemonics(old_text),
            new: parser.collect_mnemonics(new_text),
        })
    }

    pub fn common(&self) -> Vec<&str> {
        self.old.intersection(&self.new).map(String::as_str).collect()
    }

    pub fn added(&self) -> Vec<&str> {
        self.new.difference(&self.old).map(String::as_str).collect()
    }

    pub fn removed(&self) -> Vec<&str> {
        self.old.difference(&self.new).map(String::as_str).collect()
    }

    pub fn key_checks(&self) -> Vec<KeyCheck> {
        KEY_INSTRUCTIONS
            .iter()
            .map(|&m| KeyCheck {
                mnemonic: m,
                in_old: self.old.contains(m),
                in_new: self.new.contains(m),
            })
            .collect()
    }

    /// True when the newer manual still documents every key instruction.
    pub fn keys_present(&self) -> bool {
        self.key_checks().iter().all(|k| k.in_new)
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        for (label, set) in [("old", &self.old), ("new", &self.new)] {
            let _ = writeln!(out, "Found {} unique instructions in {} manual", set.len(), label);
            let _ = writeln!(out, "Instructions found: {}\n", preview(set));
        }

        let _ = writeln!(out, "Instructions in old manual: {}", self.old.len());
        let _ = writeln!(out, "Instructions in new manual: {}", self.new.len());
        let _ = writeln!(out, "Common instructions: {}", self.common().len());
        let _ = writeln!(out, "Instructions in new manual only: {}", self.added().len());
        let _ = writeln!(out, "Instructions in old manual only: {}", self.removed().len());

        if !self.added().is_empty() {
            let _ = writeln!(out, "\nNEW INSTRUCTIONS: {}", self.added().join(", "));
        }
        if !self.removed().is_empty() {
            let _ = writeln!(out, "\nREMOVED INSTRUCTIONS: {}", self.removed().join(", "));
        }

        let _ = writeln!(out, "\nKey instruction check:");
        for check in self.key_checks() {
            let mark = if check.in_new { "\u{2713}" } else { "\u{2717}" };
            let change = if check.changed() { " (CHANGED)" } else { "" };
            let _ = writeln!(out, "{} {}{}", mark, check.mnemonic, change);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const OLD: &str = "\
6.1 ADC \u{2013} Add with Carry .......... 30
6.2 ADD \u{2013} Add without Carry ....... 31

6.1 ADC \u{2013} Add with Carry
6.1.1 Description
Adds two registers and the contents of the C flag.
Operation:

6.2 ADD \u{2013} Add without Carry

6.2.1 Description
Adds two registers without the C flag.
Operation:

6.60 LD (LDD) - Load Indirect from Data Space using Index Y
6.60.1 Description
Operation:

6.97 LDS (AVRrc) \u{2013} Load Direct from Data Space
6.97.1 Description
Operation:
";

    fn collect(text: &str) -> BTreeSet<String> {
        ManualParser::new().unwrap().collect_mnemonics(text)
    }

    #[test]
    fn test_collects_described_sections_only() {
        let found = collect(OLD);
        let names: Vec<&str> = found.iter().map(String::as_str).collect();
        assert_eq!(names, vec!["ADC", "ADD", "LD", "LDD", "LDS"]);
    }

    #[test]
    fn test_toc_entry_without_description_ignored() {
        let text = "6.99 FOO \u{2013} Foo\n6.100 BAR \u{2013} Bar\n6.100.1 Description\nOperation:\n";
        let found = collect(text);
        assert!(!found.contains("FOO"));
        assert!(found.contains("BAR"));
    }

    #[test]
    fn test_description_must_reach_operation() {
        // BAZ's description runs into the next heading.
        let text = "\
6.5 BAZ \u{2013} Baz
6.5.1 Description
Does baz.
6.6 QUX \u{2013} Qux
6.6.1 Description
Does qux.
Operation:
";
        let names: Vec<String> = collect(text).into_iter().collect();
        assert_eq!(names, vec!["QUX".to_string()]);

        // A description of another section does not count.
        assert!(collect("6.7 ABC \u{2013} Abc\n6.8.1 Description\nOperation:\n").is_empty());
    }

    #[test]
    fn test_rejects_other_chapters_and_malformed_headings() {
        let parser = ManualParser::new().unwrap();
        assert!(parser.heading("5.2 ADD \u{2013} Add").is_none());
        assert!(parser.heading("6.1234 ADD \u{2013} Add").is_none());
        assert!(parser.heading("6.2 ADD Add without Carry").is_none());
        assert!(parser.heading("6.2 ADD \u{2013}").is_none());
        assert!(parser.heading("6.2 ADD (x-y) \u{2013} Add").is_none());

        let h = parser.heading("  6.60 LD (LDD) - Load Indirect").unwrap();
        assert_eq!((h.section, h.mnemonic, h.alternate), ("6.60", "LD", Some("LDD")));
    }

    #[test]
    fn test_preview_elides_long_lists() {
        let short: BTreeSet<String> = ["ADD", "SUB"].iter().map(|s| s.to_string()).collect();
        assert_eq!(preview(&short), "ADD, SUB");

        let long: BTreeSet<String> = (0..25).map(|i| format!("I{:02}", i)).collect();
        let text = preview(&long);
        assert!(text.starts_with("I00, I01,"));
        assert!(text.contains("I09, ..., I15"));
        assert!(text.ends_with("I24"));
        assert!(!text.contains("I10,"));
    }

    #[test]
    fn test_diff_and_key_check() {
        let new = format!(
            "{}\n6.120 FMULS \u{2013} Fractional Multiply Signed\n6.120.1 Description\nOperation:\n",
            OLD.replace("6.1 ADC", "6.1 ADCX")
        );
        let diff = ManualDiff::new(OLD, &new).unwrap();

        assert_eq!(diff.added(), vec!["ADCX", "FMULS"]);
        assert_eq!(diff.removed(), vec!["ADC"]);
        assert_eq!(diff.common().len(), 4);

        let fmuls = diff
            .key_checks()
            .into_iter()
            .find(|k| k.mnemonic == "FMULS")
            .unwrap();
        assert!(fmuls.changed());
        assert!(!diff.keys_present());

        let text = diff.render();
        assert!(text.contains("Found 5 unique instructions in old manual"));
        assert!(text.contains("Instructions found: ADC, ADD, LD, LDD, LDS"));
        assert!(text.contains("Common instructions: 4"));
        assert!(text.contains("\u{2713} FMULS (CHANGED)"));
        assert!(text.contains("\u{2717} SUB"));
    }
}
