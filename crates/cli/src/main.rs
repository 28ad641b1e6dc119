mod manual;

use anyhow::{bail, Context, Result};
use avr_probe_config::{ProbeAssertion, ProbeScript, TargetDescriptor};
use avr_probe_core::analysis::Analysis;
use avr_probe_core::probe::default_assertions;
use avr_probe_core::{analyze, evaluate, FirmwareImage, Status, TargetVariant, DEFAULT_SYMBOL};
use avr_probe_loader::SymbolProvider;
use clap::{Parser, Subcommand};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{error, info, warn};

const EXIT_PASS: u8 = 0;
const EXIT_ASSERT_FAIL: u8 = 1;
const EXIT_CONFIG_ERROR: u8 = 2;

#[derive(Parser, Debug)]
#[command(author, version, about = "AVR toolchain instruction probe", long_about = None)]
struct Cli {
    /// Enable debug-level logging
    #[arg(short, long, global = true)]
    trace: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Args, Debug)]
struct TargetArgs {
    /// MCU name from the built-in table (default: atmega328p)
    #[arg(long)]
    target: Option<String>,

    /// Target descriptor (YAML) for parts missing from the built-in table
    #[arg(long, conflicts_with = "target")]
    target_file: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Analyse the probe function and evaluate assertions
    Check {
        /// Path to the firmware ELF file
        #[arg(short, long)]
        firmware: Option<PathBuf>,

        /// Probe script (YAML) with inputs and assertions
        #[arg(short, long)]
        script: Option<PathBuf>,

        /// Function to inspect
        #[arg(long)]
        symbol: Option<String>,

        #[command(flatten)]
        target: TargetArgs,

        /// Directory receiving result.json and junit.xml
        #[arg(short, long)]
        output_dir: Option<PathBuf>,

        /// Additional JUnit XML output path
        #[arg(long)]
        junit: Option<PathBuf>,
    },
    /// Print the annotated listing of the probe function
    Disasm {
        /// Path to the firmware ELF file
        #[arg(short, long)]
        firmware: PathBuf,

        /// Function to list
        #[arg(long, default_value = DEFAULT_SYMBOL)]
        symbol: String,

        #[command(flatten)]
        target: TargetArgs,

        /// Interleave source lines from DWARF debug info
        #[arg(long)]
        source: bool,
    },
    /// Check that two builds produced the same code
    Compare {
        first: PathBuf,
        second: PathBuf,

        /// Function to compare
        #[arg(long, default_value = DEFAULT_SYMBOL)]
        symbol: String,
    },
    /// Compare the instruction sections of two instruction-set manuals
    ManualDiff {
        /// Older manual: text file, PDF or URL
        #[arg(default_value = manual::OLD_URL)]
        old: String,

        /// Newer manual: text file, PDF or URL
        #[arg(default_value = manual::NEW_URL)]
        new: String,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = if cli.trace {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();

    let result = match cli.command {
        Command::Check {
            firmware,
            script,
            symbol,
            target,
            output_dir,
            junit,
        } => run_check(CheckRequest {
            firmware,
            script,
            symbol,
            target,
            output_dir,
            junit,
        }),
        Command::Disasm {
            firmware,
            symbol,
            target,
            source,
        } => run_disasm(&firmware, &symbol, &target, source),
        Command::Compare {
            first,
            second,
            symbol,
        } => run_compare(&first, &second, &symbol),
        Command::ManualDiff { old, new } => run_manual_diff(&old, &new),
    };

    match result {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            error!("{:#}", e);
            ExitCode::from(EXIT_CONFIG_ERROR)
        }
    }
}

struct CheckRequest {
    firmware: Option<PathBuf>,
    script: Option<PathBuf>,
    symbol: Option<String>,
    target: TargetArgs,
    output_dir: Option<PathBuf>,
    junit: Option<PathBuf>,
}

/// Relative script inputs resolve against the script's directory.
fn resolve_relative(base: &Path, value: &str) -> PathBuf {
    let path = PathBuf::from(value);
    if path.is_absolute() {
        path
    } else {
        base.join(path)
    }
}

fn target_from_args(args: &TargetArgs) -> Result<Option<TargetVariant>> {
    if let Some(path) = &args.target_file {
        let desc = TargetDescriptor::from_file(path)?;
        return Ok(Some(TargetVariant::from_descriptor(&desc)?));
    }
    if let Some(mcu) = &args.target {
        return Ok(Some(TargetVariant::lookup(mcu)?));
    }
    Ok(None)
}

/// A script target is either an MCU name or a descriptor file.
fn target_from_script(value: &str, base: &Path) -> Result<TargetVariant> {
    if value.ends_with(".yaml") || value.ends_with(".yml") {
        let desc = TargetDescriptor::from_file(resolve_relative(base, value))?;
        Ok(TargetVariant::from_descriptor(&desc)?)
    } else {
        Ok(TargetVariant::lookup(value)?)
    }
}

fn load(firmware: &Path) -> Result<FirmwareImage> {
    info!("Loading firmware: {:?}", firmware);
    avr_probe_loader::load_elf(firmware)
}

fn run_check(req: CheckRequest) -> Result<u8> {
    let script = match &req.script {
        Some(path) => {
            info!("Loading probe script: {:?}", path);
            Some(ProbeScript::from_file(path)?)
        }
        None => None,
    };
    let base = req
        .script
        .as_deref()
        .and_then(Path::parent)
        .unwrap_or_else(|| Path::new("."))
        .to_path_buf();

    let firmware = match (&req.firmware, &script) {
        (Some(path), _) => path.clone(),
        (None, Some(s)) => resolve_relative(&base, &s.inputs.firmware),
        (None, None) => bail!("No firmware given: pass --firmware or a --script with inputs.firmware"),
    };

    let symbol = req
        .symbol
        .clone()
        .or_else(|| script.as_ref().and_then(|s| s.inputs.symbol.clone()))
        .unwrap_or_else(|| DEFAULT_SYMBOL.to_string());

    let target = match target_from_args(&req.target)? {
        Some(t) => t,
        None => match script.as_ref().and_then(|s| s.inputs.target.as_deref()) {
            Some(value) => target_from_script(value, &base)?,
            None => TargetVariant::default(),
        },
    };

    let image = load(&firmware)?;
    let analysis = analyze(&image, &symbol, &target)?;

    let explicit: Vec<ProbeAssertion> = script
        .as_ref()
        .map(|s| {
            s.assertions
                .iter()
                .filter(|a| !matches!(a, ProbeAssertion::UnsupportedAllowed(_)))
                .cloned()
                .collect()
        })
        .unwrap_or_default();
    let assertions = if explicit.is_empty() {
        info!("Using default probe assertions for {}", target.name);
        default_assertions(&target)
    } else {
        explicit
    };
    let unsupported_allowed = script.as_ref().is_some_and(|s| s.unsupported_allowed());

    let report = evaluate(
        &analysis,
        &assertions,
        unsupported_allowed,
        &firmware.display().to_string(),
    )?;

    for outcome in &report.assertions {
        let mark = if outcome.passed { "PASS" } else { "FAIL" };
        println!("{} {} ({})", mark, outcome.name, outcome.detail);
    }
    for step in report.steps.iter().filter(|s| s.found_at.is_none()) {
        warn!("No instruction found for '{}'", step.statement);
    }

    if let Some(dir) = &req.output_dir {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create output directory {:?}", dir))?;
        let json = serde_json::to_string_pretty(&report).context("Failed to serialise report")?;
        std::fs::write(dir.join("result.json"), json).context("Failed to write result.json")?;
        std::fs::write(dir.join("junit.xml"), report.to_junit())
            .context("Failed to write junit.xml")?;
        info!("Wrote result.json and junit.xml to {:?}", dir);
    }
    if let Some(path) = &req.junit {
        std::fs::write(path, report.to_junit())
            .with_context(|| format!("Failed to write JUnit report {:?}", path))?;
    }

    info!(
        "Probe check {:?}: {} of {} assertions failed",
        report.status,
        report.failures().count(),
        report.assertions.len()
    );
    Ok(match report.status {
        Status::Pass => EXIT_PASS,
        Status::Fail => EXIT_ASSERT_FAIL,
    })
}

fn annotation(analysis: &Analysis, addr: u32) -> String {
    let mut notes: Vec<String> = analysis
        .classes_at(addr)
        .iter()
        .map(|c| c.to_string())
        .collect();
    if let Some(call) = analysis.routine_calls.iter().find(|c| c.addr == addr) {
        if let Some(name) = &call.name {
            notes.push(format!("<{}>", name));
        }
    }
    if let Some(u) = analysis.unsupported.iter().find(|u| u.addr == addr) {
        notes.push(format!("unsupported: needs {}", u.missing.join("|")));
    }
    if notes.is_empty() {
        String::new()
    } else {
        format!("\t; {}", notes.join(", "))
    }
}

fn run_disasm(firmware: &Path, symbol: &str, target: &TargetArgs, source: bool) -> Result<u8> {
    let target = target_from_args(target)?.unwrap_or_default();
    let image = load(firmware)?;
    let analysis = analyze(&image, symbol, &target)?;

    let symbols = if source {
        match SymbolProvider::new(firmware) {
            Ok(provider) => Some(provider),
            Err(e) => {
                warn!("No source information: {:#}", e);
                None
            }
        }
    } else {
        None
    };

    println!("{:08x} <{}>:", analysis.start, analysis.symbol);
    let mut last_location = None;
    for line in &analysis.listing {
        if let Some(loc) = symbols.as_ref().and_then(|s| s.lookup(u64::from(line.addr))) {
            let key = (loc.file.clone(), loc.line);
            if last_location.as_ref() != Some(&key) {
                match loc.line {
                    Some(n) => println!("{}:{}", loc.file, n),
                    None => println!("{}", loc.file),
                }
                last_location = Some(key);
            }
        }
        println!("{}{}", line.render(), annotation(&analysis, line.addr));
    }
    Ok(EXIT_PASS)
}

fn file_hash(path: &Path) -> Result<String> {
    let bytes = std::fs::read(path).with_context(|| format!("Failed to read {:?}", path))?;
    Ok(format!("{:x}", Sha256::digest(&bytes)))
}

fn run_compare(first: &Path, second: &Path, symbol: &str) -> Result<u8> {
    let target = TargetVariant::default();
    let a = analyze(&load(first)?, symbol, &target)?;
    let b = analyze(&load(second)?, symbol, &target)?;

    let (elf_a, elf_b) = (file_hash(first)?, file_hash(second)?);

    if a.flash_hash == b.flash_hash {
        println!("identical flash {}", a.flash_hash);
        if elf_a == elf_b {
            println!("identical elf {}", elf_a);
            return Ok(EXIT_PASS);
        }
        // Symbols, debug info or embedded paths changed between builds.
        println!("elf differs: {} vs {}", elf_a, elf_b);
        return Ok(EXIT_ASSERT_FAIL);
    }

    println!("flash differs: {} vs {}", a.flash_hash, b.flash_hash);
    let pair = a
        .listing
        .iter()
        .zip(&b.listing)
        .find(|(x, y)| x.addr != y.addr || x.words != y.words);
    match pair {
        Some((x, y)) => {
            println!("first difference in '{}' at {:#06x}", symbol, x.addr);
            println!("  {}", x.render());
            println!("  {}", y.render());
        }
        None if a.listing.len() != b.listing.len() => {
            println!(
                "'{}' has {} instructions vs {}",
                symbol,
                a.listing.len(),
                b.listing.len()
            );
        }
        None => println!("'{}' is identical; the difference is elsewhere in flash", symbol),
    }
    Ok(EXIT_ASSERT_FAIL)
}

fn run_manual_diff(old: &str, new: &str) -> Result<u8> {
    let old_text = manual::load_text(old)?;
    let new_text = manual::load_text(new)?;

    let diff = manual::ManualDiff::new(&old_text, &new_text)?;
    if diff.old.is_empty() || diff.new.is_empty() {
        bail!("No instruction sections found; is this an instruction-set manual?");
    }
    print!("{}", diff.render());

    Ok(if diff.keys_present() {
        EXIT_PASS
    } else {
        EXIT_ASSERT_FAIL
    })
}
