use avr_probe_loader::fixture::{AvrElfBuilder, PROBE_WORDS};
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let nonce = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    let dir = std::env::temp_dir()
        .join("avr-probe-tests")
        .join(format!("{}-{}", prefix, nonce));
    std::fs::create_dir_all(&dir).expect("Failed to create temp dir");
    dir
}

fn write_elf(dir: &Path, name: &str, builder: AvrElfBuilder) -> PathBuf {
    let path = dir.join(name);
    builder.write_to(&path).expect("Failed to write ELF");
    path
}

fn run(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_avr-probe"))
        .args(args)
        .output()
        .expect("Failed to execute command")
}

#[test]
fn test_check_script_writes_outputs() {
    let dir = temp_dir("outputs");
    write_elf(&dir, "probe.elf", AvrElfBuilder::probe());

    // Relative firmware paths resolve against the script
    let script_path = dir.join("script.yaml");
    std::fs::write(
        &script_path,
        r#"
schema_version: "1.0"
inputs:
  firmware: "probe.elf"
  target: "atmega328p"
assertions:
  - require_class: fractional_multiply
  - mnemonic: fmuls
    count: 1
  - forbid_mnemonic: break
"#,
    )
    .unwrap();

    let output_dir = dir.join("artifacts");
    let output = run(&[
        "check",
        "--script",
        script_path.to_str().unwrap(),
        "--output-dir",
        output_dir.to_str().unwrap(),
    ]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    let junit = std::fs::read_to_string(output_dir.join("junit.xml")).unwrap();
    assert!(junit.contains("<testsuite"));
    assert!(junit.contains("<testcase"));

    let result: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(output_dir.join("result.json")).unwrap())
            .unwrap();
    assert_eq!(result["status"], "pass");
    assert_eq!(result["symbol"], "instruction_probe");
    assert_eq!(result["assertions"].as_array().unwrap().len(), 4);
    assert_eq!(result["mnemonic_counts"]["fmuls"], 1);
    assert_eq!(result["routine_calls"][0]["name"], "__udivmodqi4");
    assert_eq!(result["firmware_hash"].as_str().unwrap().len(), 64);
    assert!(result["firmware"].as_str().unwrap().contains("probe.elf"));

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn test_check_default_assertions_and_junit_flag() {
    let dir = temp_dir("junit");
    let elf = write_elf(&dir, "probe.elf", AvrElfBuilder::probe());
    let junit_path = dir.join("probe-junit.xml");

    let output = run(&[
        "check",
        "--firmware",
        elf.to_str().unwrap(),
        "--junit",
        junit_path.to_str().unwrap(),
    ]);
    assert!(output.status.success());

    let stdout = String::from_utf8(output.stdout).unwrap();
    assert!(stdout.contains("PASS require_class compare_branch"));
    assert!(!stdout.contains("FAIL"));

    let junit = std::fs::read_to_string(&junit_path).unwrap();
    assert!(junit.contains("avr-probe check"));
    assert!(junit.contains("failures=\"0\""));

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn test_check_missing_instruction_fails() {
    let dir = temp_dir("missing-wdr");
    let words: Vec<u16> = PROBE_WORDS
        .iter()
        .map(|&w| if w == 0x95A8 { 0x0000 } else { w })
        .collect();
    let elf = write_elf(&dir, "probe.elf", AvrElfBuilder::probe_with(&words));

    let output = run(&["check", "--firmware", elf.to_str().unwrap()]);
    assert_eq!(output.status.code(), Some(1)); // EXIT_ASSERT_FAIL
    let stdout = String::from_utf8(output.stdout).unwrap();
    assert!(stdout.contains("FAIL require_class watchdog_reset"));

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn test_check_variant_without_multiplier_fails() {
    let dir = temp_dir("attiny");
    let elf = write_elf(&dir, "probe.elf", AvrElfBuilder::probe());

    let output = run(&[
        "check",
        "--firmware",
        elf.to_str().unwrap(),
        "--target",
        "attiny85",
    ]);
    assert_eq!(output.status.code(), Some(1));
    let stdout = String::from_utf8(output.stdout).unwrap();
    assert!(stdout.contains("FAIL forbid_mnemonic fmuls"));
    assert!(stdout.contains("FAIL target_support attiny85"));

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn test_check_target_file() {
    let dir = temp_dir("target-file");
    let elf = write_elf(&dir, "probe.elf", AvrElfBuilder::probe());
    let target = dir.join("board.yaml");
    std::fs::write(&target, "name: custom-m328\nfamily: avr5\nflash: 32KB\n").unwrap();

    let output_dir = dir.join("artifacts");
    let output = run(&[
        "check",
        "--firmware",
        elf.to_str().unwrap(),
        "--target-file",
        target.to_str().unwrap(),
        "--output-dir",
        output_dir.to_str().unwrap(),
    ]);
    assert!(output.status.success());

    let result: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(output_dir.join("result.json")).unwrap())
            .unwrap();
    assert_eq!(result["target"], "custom-m328");
    assert_eq!(result["family"], "avr5");

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn test_check_config_errors() {
    let dir = temp_dir("config-errors");
    let elf = write_elf(&dir, "probe.elf", AvrElfBuilder::probe());

    let script = dir.join("bad.yaml");
    std::fs::write(
        &script,
        "schema_version: \"2.0\"\ninputs:\n  firmware: \"probe.elf\"\n",
    )
    .unwrap();
    let output = run(&["check", "--script", script.to_str().unwrap()]);
    assert_eq!(output.status.code(), Some(2)); // EXIT_CONFIG_ERROR

    let output = run(&[
        "check",
        "--firmware",
        elf.to_str().unwrap(),
        "--symbol",
        "no_such_function",
    ]);
    assert_eq!(output.status.code(), Some(2));

    let output = run(&[
        "check",
        "--firmware",
        elf.to_str().unwrap(),
        "--target",
        "atmega9999",
    ]);
    assert_eq!(output.status.code(), Some(2));

    let output = run(&["check"]);
    assert_eq!(output.status.code(), Some(2));

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn test_disasm_annotates_listing() {
    let dir = temp_dir("disasm");
    let elf = write_elf(&dir, "probe.elf", AvrElfBuilder::probe());

    let output = run(&["disasm", "--firmware", elf.to_str().unwrap(), "--source"]);
    assert!(output.status.success());

    let stdout = String::from_utf8(output.stdout).unwrap();
    assert!(stdout.starts_with("00000000 <instruction_probe>:"));
    assert!(stdout.contains("lsl r24\t; shift_left"));
    assert!(stdout.contains("<__udivmodqi4>"));
    assert!(stdout.contains("fmuls r16, r17\t; fractional_multiply"));
    assert_eq!(stdout.lines().count(), 1 + 30);

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn test_compare_builds() {
    let dir = temp_dir("compare");
    let a = write_elf(&dir, "a.elf", AvrElfBuilder::probe());
    let b = write_elf(&dir, "b.elf", AvrElfBuilder::probe());

    let mut words = PROBE_WORDS.to_vec();
    words[1] = 0xE08B; // ldi r24, 0x0B
    let c = write_elf(&dir, "c.elf", AvrElfBuilder::probe_with(&words));

    let same = run(&["compare", a.to_str().unwrap(), b.to_str().unwrap()]);
    assert!(same.status.success());
    assert!(String::from_utf8(same.stdout).unwrap().starts_with("identical flash"));

    let differs = run(&["compare", a.to_str().unwrap(), c.to_str().unwrap()]);
    assert_eq!(differs.status.code(), Some(1));
    let stdout = String::from_utf8(differs.stdout).unwrap();
    assert!(stdout.contains("first difference in 'instruction_probe' at 0x0002"));

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn test_compare_same_flash_different_elf() {
    let dir = temp_dir("compare-elf");
    let a = write_elf(&dir, "a.elf", AvrElfBuilder::probe());
    let b = write_elf(
        &dir,
        "b.elf",
        AvrElfBuilder::probe().symbol("extra", 0x40, 0),
    );

    let output = run(&["compare", a.to_str().unwrap(), b.to_str().unwrap()]);
    assert_eq!(output.status.code(), Some(1)); // EXIT_ASSERT_FAIL
    let stdout = String::from_utf8(output.stdout).unwrap();
    assert!(stdout.starts_with("identical flash"));
    let line = stdout.lines().find(|l| l.starts_with("elf differs: ")).unwrap();
    let hashes: Vec<&str> = line["elf differs: ".len()..].split(" vs ").collect();
    assert_eq!(hashes.len(), 2);
    assert_eq!(hashes[0].len(), 64);
    assert_ne!(hashes[0], hashes[1]);

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn test_manual_diff() {
    let dir = temp_dir("manual");
    let old = dir.join("old.txt");
    let new = dir.join("new.txt");

    let mut old_text = String::new();
    for (i, m) in [
        "ADD", "SUB", "MUL", "AND", "OR", "EOR", "LSL", "LSR", "CLI", "SEI", "NOP", "WDR",
        "FMULS", "MOVW", "ADIW",
    ]
    .iter()
    .enumerate()
    {
        old_text.push_str(&format!(
            "6.{n} {m} \u{2013} Instruction\n6.{n}.1 Description\nOperation:\n",
            n = i + 1,
            m = m
        ));
    }
    let new_text = format!(
        "{}6.99 XCH \u{2013} Exchange\n6.99.1 Description\nOperation:\n",
        old_text
    );
    std::fs::write(&old, &old_text).unwrap();
    std::fs::write(&new, &new_text).unwrap();

    let output = run(&["manual-diff", old.to_str().unwrap(), new.to_str().unwrap()]);
    assert!(output.status.success());
    let stdout = String::from_utf8(output.stdout).unwrap();
    assert!(stdout.contains("Found 15 unique instructions in old manual"));
    assert!(stdout.contains("Instructions found: ADD, ADIW, AND, CLI, EOR"));
    assert!(stdout.contains("Common instructions: 15"));
    assert!(stdout.contains("NEW INSTRUCTIONS: XCH"));
    assert!(!stdout.contains("CHANGED"));

    // A key instruction dropped from the newer manual
    let output = run(&["manual-diff", new.to_str().unwrap(), old.to_str().unwrap()]);
    assert!(output.status.success());
    std::fs::write(&new, old_text.replace("FMULS", "FMULX")).unwrap();
    let output = run(&["manual-diff", old.to_str().unwrap(), new.to_str().unwrap()]);
    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8(output.stdout)
        .unwrap()
        .contains("\u{2717} FMULS (CHANGED)"));

    let _ = std::fs::remove_dir_all(&dir);
}

/// Single-page PDF showing `lines` in Helvetica, one line per text row.
fn text_pdf(lines: &[&str]) -> Vec<u8> {
    let mut content = String::from("BT\n/F1 1 Tf\n1.6 TL\n10 0 0 10 50 800 Tm\n");
    for line in lines {
        let escaped = line
            .replace('\\', "\\\\")
            .replace('(', "\\(")
            .replace(')', "\\)");
        content.push_str(&format!("({}) Tj T*\n", escaped));
    }
    content.push_str("ET\n");

    let objects = [
        "<< /Type /Catalog /Pages 2 0 R >>".to_string(),
        "<< /Type /Pages /Kids [3 0 R] /Count 1 >>".to_string(),
        "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 612 842] \
         /Resources << /Font << /F1 4 0 R >> >> /Contents 5 0 R >>"
            .to_string(),
        "<< /Type /Font /Subtype /Type1 /BaseFont /Helvetica /Encoding /WinAnsiEncoding >>"
            .to_string(),
        format!("<< /Length {} >>\nstream\n{}endstream", content.len(), content),
    ];

    let mut pdf = b"%PDF-1.4\n".to_vec();
    let mut offsets = Vec::new();
    for (i, body) in objects.iter().enumerate() {
        offsets.push(pdf.len());
        pdf.extend_from_slice(format!("{} 0 obj\n{}\nendobj\n", i + 1, body).as_bytes());
    }
    let xref = pdf.len();
    let mut table = format!("xref\n0 {}\n0000000000 65535 f \n", objects.len() + 1);
    for offset in offsets {
        table.push_str(&format!("{:010} 00000 n \n", offset));
    }
    table.push_str(&format!(
        "trailer\n<< /Size {} /Root 1 0 R >>\nstartxref\n{}\n%%EOF\n",
        objects.len() + 1,
        xref
    ));
    pdf.extend_from_slice(table.as_bytes());
    pdf
}

#[test]
fn test_manual_diff_reads_pdf() {
    let dir = temp_dir("manual-pdf");
    let old = dir.join("old.pdf");
    let new = dir.join("new.txt");

    std::fs::write(
        &old,
        text_pdf(&[
            "6.1 ADD - Add without Carry",
            "6.1.1 Description",
            "Adds two registers without the C flag.",
            "Operation:",
            "6.2 LD (LDD) - Load Indirect",
            "6.2.1 Description",
            "Operation:",
            "6.3 FMULS - Fractional Multiply Signed",
            "6.3.1 Description",
            "Operation:",
        ]),
    )
    .unwrap();

    let mut new_text = String::new();
    for (i, m) in [
        "ADD", "SUB", "MUL", "AND", "OR", "EOR", "LSL", "LSR", "CLI", "SEI", "NOP", "WDR",
        "FMULS", "MOVW", "ADIW",
    ]
    .iter()
    .enumerate()
    {
        new_text.push_str(&format!(
            "6.{n} {m} - Instruction\n6.{n}.1 Description\nOperation:\n",
            n = i + 1,
            m = m
        ));
    }
    std::fs::write(&new, &new_text).unwrap();

    let output = run(&["manual-diff", old.to_str().unwrap(), new.to_str().unwrap()]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    let stdout = String::from_utf8(output.stdout).unwrap();
    assert!(stdout.contains("Instructions in old manual: 4"));
    assert!(stdout.contains("Instructions found: ADD, FMULS, LD, LDD"));
    assert!(stdout.contains("REMOVED INSTRUCTIONS: LD, LDD"));
    assert!(stdout.contains("\u{2713} SUB (CHANGED)"));

    let _ = std::fs::remove_dir_all(&dir);
}
