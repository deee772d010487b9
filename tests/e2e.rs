use std::process::Command;

fn run_with(fixture: &str, env: &[(&str, &str)]) -> (String, String, bool) {
    let path = format!("tests/fixtures/{fixture}");
    let output = Command::new(env!("CARGO_BIN_EXE_mlm-eng"))
        .arg(&path)
        .env("RUST_LOG", "warn")
        .envs(env.iter().copied())
        .output()
        .expect("failed to run binary");

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

fn run(fixture: &str) -> (String, String, bool) {
    run_with(fixture, &[])
}

#[test]
fn placement_scenario() {
    let (stdout, stderr, success) = run("scenario.csv");

    assert!(success);
    assert!(stderr.is_empty(), "unexpected stderr: {stderr}");

    let lines: Vec<&str> = stdout.lines().collect();
    assert_eq!(
        lines,
        vec![
            "member,status,rank,balance,total_earned,parent,level,position",
            "1,partner,1,150.00,150.00,,0,0",
            "2,partner,0,250.00,250.00,1,1,1",
            "3,partner,0,0.00,0.00,1,1,2",
            "4,partner,0,100.00,100.00,3,2,1",
            "5,partner,0,0.00,0.00,2,2,1",
            "6,partner,0,0.00,0.00,4,3,1",
        ]
    );
}

#[test]
fn errors_warn_but_do_not_block() {
    let (stdout, stderr, success) = run("with_errors.csv");

    assert!(success);
    assert!(stderr.contains("unrecognized command type"));
    assert!(stderr.contains("missing amount"));

    let lines: Vec<&str> = stdout.lines().collect();
    assert_eq!(
        lines,
        vec![
            "member,status,rank,balance,total_earned,parent,level,position",
            "1,partner,0,50.00,150.00,,0,0",
            "2,partner,0,50.00,50.00,1,1,1",
            "4,participant,0,0.00,0.00,,,",
            "5,partner,0,0.00,0.00,1,1,2",
        ]
    );
}

#[test]
fn bonus_amounts_follow_environment() {
    let (stdout, _, success) = run_with(
        "scenario.csv",
        &[("MLM_FIRST_SLOT_BONUS", "10"), ("MLM_SPILLOVER_BONUS", "0.5")],
    );

    assert!(success);
    let lines: Vec<&str> = stdout.lines().collect();
    // first 10 + second 50 for the root; 0.50 + 100 + 10 for member 2
    assert_eq!(lines[1], "1,partner,1,60.00,60.00,,0,0");
    assert_eq!(lines[2], "2,partner,0,110.50,110.50,1,1,1");
}

#[test]
fn invalid_settings_abort() {
    let (stdout, stderr, success) = run_with("scenario.csv", &[("MLM_CAPACITY", "5")]);

    assert!(!success);
    assert!(stdout.is_empty());
    assert!(stderr.contains("invalid bonus settings"));
}

#[test]
fn missing_file_fails() {
    let (_, stderr, success) = run("does_not_exist.csv");

    assert!(!success);
    assert!(stderr.contains("failed to open csv file"));
}
