use std::process::Command;

#[test]
fn test_cli_help() {
    let output = Command::new(env!("CARGO_BIN_EXE_avr-probe"))
        .arg("--help")
        .output()
        .expect("Failed to execute command");

    assert!(output.status.success());
    let stdout = String::from_utf8(output.stdout).unwrap();
    assert!(stdout.contains("AVR toolchain instruction probe"));
    for sub in ["check", "disasm", "compare", "manual-diff"] {
        assert!(stdout.contains(sub), "help lists '{}'", sub);
    }
}

#[test]
fn test_cli_load_missing_file() {
    let output = Command::new(env!("CARGO_BIN_EXE_avr-probe"))
        .args(["check", "-f", "non_existent_file.elf"])
        .output()
        .expect("Failed to execute command");

    // It should fail because file is missing
    assert_eq!(output.status.code(), Some(2));
}
