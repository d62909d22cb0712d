use serde_json::Value;
use std::fs;
use std::path::Path;
use std::process::{Command, Output};
use tempfile::TempDir;

fn abundfit(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_abundfit"))
        .args(args)
        .env_remove("RUST_LOG")
        .output()
        .expect("abundfit should run")
}

fn write_file(path: &Path, content: &str) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("parent directory should be created");
    }
    fs::write(path, content).expect("file should be written");
}

/// Lays out a one-line run with a Gaussian dip of abundance 7.6 at 5000 A.
fn write_run(root: &Path) -> std::path::PathBuf {
    let depth = 10f64.powf(7.6 - 8.0);
    let mut spectrum = String::new();
    for step in 0..=2000 {
        let x = 4990.0 + step as f64 * 0.01;
        let d = (x - 5000.0) / 0.2;
        let flux = 1.0 - depth * (-4.0 * std::f64::consts::LN_2 * d * d).exp();
        spectrum.push_str(&format!("{x:.4} {flux:.8}\n"));
    }
    write_file(&root.join("data/star.txt"), &spectrum);
    write_file(&root.join("data/lines.csv"), "element,wavelength\nFe1,5000.0\n");
    write_file(&root.join("data/references.csv"), "Fe,7.5\n");

    let config = root.join("run.json");
    write_file(
        &config,
        r#"{
            "line_list": "data/lines.csv",
            "references": "data/references.csv",
            "spectra": [{"path": "data/star.txt", "delimiter": "whitespace"}],
            "output_dir": "out",
            "synthesis": {"kind": "analytic"},
            "fit": {"repeat_rounds": 1}
        }"#,
    );
    config
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

#[test]
fn fit_command_writes_ledger_log_and_report() {
    let temp = TempDir::new().expect("tempdir should be created");
    let config = write_run(temp.path());
    let report_path = temp.path().join("reports/run.json");

    let output = abundfit(&[
        "fit",
        "--config",
        config.to_str().expect("utf-8 path"),
        "--json-report",
        report_path.to_str().expect("utf-8 path"),
    ]);
    assert!(
        output.status.success(),
        "fit should succeed, stderr: {}",
        stderr(&output)
    );
    let printed = stdout(&output);
    assert!(printed.contains("Synthesis back-end: analytic"));
    assert!(printed.contains("fitted 1, skipped 0, failed 0, already resolved 0"));
    assert!(printed.contains("JSON report: "));

    let ledger = fs::read_to_string(temp.path().join("out/found_values.csv"))
        .expect("ledger should be written");
    assert_eq!(ledger.lines().count(), 2);
    assert!(ledger.lines().nth(1).is_some_and(|row| row.starts_with("Fe1,5000")));
    assert!(temp.path().join("out/log.txt").exists());

    let report: Value = serde_json::from_str(
        &fs::read_to_string(&report_path).expect("report should be written"),
    )
    .expect("report should be valid json");
    assert_eq!(report["backend"], "analytic");
    assert_eq!(report["spectra"][0]["fitted"], 1);
    assert_eq!(report["cancelled"], false);

    let rerun = abundfit(&["fit", "--config", config.to_str().expect("utf-8 path")]);
    assert!(rerun.status.success());
    assert!(stdout(&rerun).contains("fitted 0, skipped 0, failed 0, already resolved 1"));

    let restarted = abundfit(&[
        "fit",
        "--config",
        config.to_str().expect("utf-8 path"),
        "--restart",
    ]);
    assert!(restarted.status.success());
    assert!(stdout(&restarted).contains("fitted 1, skipped 0, failed 0, already resolved 0"));
}

#[test]
fn curves_command_rewrites_fitted_line_curves() {
    let temp = TempDir::new().expect("tempdir should be created");
    let config = write_run(temp.path());
    let config_arg = config.to_str().expect("utf-8 path");

    let fit = abundfit(&["fit", "--config", config_arg]);
    assert!(fit.status.success(), "fit stderr: {}", stderr(&fit));

    let output = abundfit(&["curves", "--config", config_arg]);
    assert!(
        output.status.success(),
        "curves should succeed, stderr: {}",
        stderr(&output)
    );
    assert!(stdout(&output).contains("Curve files written: 5"));
    assert!(
        temp.path()
            .join("out/line_curves/fit_Fe1_5000.0_ang_1.csv")
            .exists()
    );

    let out_of_range = abundfit(&["curves", "--config", config_arg, "--spectrum-index", "3"]);
    assert_eq!(out_of_range.status.code(), Some(2));
    assert!(stderr(&out_of_range).contains("ERROR: [INPUT.SPECTRUM_INDEX]"));
}

#[test]
fn synth_command_prints_or_writes_a_curve() {
    let temp = TempDir::new().expect("tempdir should be created");
    let config = write_run(temp.path());
    let config_arg = config.to_str().expect("utf-8 path");

    let output = abundfit(&[
        "synth",
        "--config",
        config_arg,
        "--element",
        "Fe",
        "--wavelength",
        "5000",
        "--abundance",
        "7.6",
        "--convolution",
        "0.2",
    ]);
    assert!(
        output.status.success(),
        "synth should succeed, stderr: {}",
        stderr(&output)
    );
    let printed = stdout(&output);
    let rows: Vec<&str> = printed.lines().collect();
    assert_eq!(rows.len(), 1000);
    assert!(rows[0].starts_with("4999.5"));

    let curve = temp.path().join("curves/manual.csv");
    let written = abundfit(&[
        "synth",
        "--config",
        config_arg,
        "--element",
        "Fe",
        "--wavelength",
        "5000",
        "--abundance",
        "7.6",
        "--half-width",
        "2",
        "--output",
        curve.to_str().expect("utf-8 path"),
    ]);
    assert!(written.status.success(), "stderr: {}", stderr(&written));
    let content = fs::read_to_string(&curve).expect("curve should be written");
    assert!(content.starts_with("4998"));
}

#[cfg(unix)]
#[test]
fn synth_command_puts_the_script_abundance_back() {
    let temp = TempDir::new().expect("tempdir should be created");
    let script = temp.path().join("synth.sh");
    write_file(
        &script,
        r##"# set lam_min    = '4995.0'
# set lam_max    = '5005.0'
# foreach Fe_ab (7.5)
lo=$(sed -n "s/^# set lam_min *= '\(.*\)'.*/\1/p" synth.sh)
hi=$(sed -n "s/^# set lam_max *= '\(.*\)'.*/\1/p" synth.sh)
awk -v lo="$lo" -v hi="$hi" 'BEGIN {
  for (i = 0; i <= 100; i++) printf "%.5f %.8f\n", lo + (hi - lo) * i / 100, 1
}' > out.spec
"##,
    );
    let config = temp.path().join("run.json");
    write_file(
        &config,
        &serde_json::json!({
            "line_list": "lines.csv",
            "references": "references.csv",
            "spectra": [{"path": "star.txt"}],
            "output_dir": "out",
            "synthesis": {
                "kind": "external",
                "config_file": script,
                "output_file": "out.spec",
                "program": "/bin/sh",
                "args": ["synth.sh"],
                "timeout_secs": 30.0
            }
        })
        .to_string(),
    );

    let output = abundfit(&[
        "synth",
        "--config",
        config.to_str().expect("utf-8 path"),
        "--element",
        "Fe",
        "--wavelength",
        "5000",
        "--abundance",
        "8.1",
        "--half-width",
        "1",
    ]);
    assert!(
        output.status.success(),
        "synth should succeed, stderr: {}",
        stderr(&output)
    );
    assert_eq!(stdout(&output).lines().count(), 101);
    let content = fs::read_to_string(&script).expect("script should be readable");
    assert!(content.contains("# foreach Fe_ab (7.5)"), "script: {content}");
    assert!(content.contains("# set lam_min    = '4999.0'"), "script: {content}");
}

#[test]
fn continuum_command_reports_the_level() {
    let temp = TempDir::new().expect("tempdir should be created");
    write_run(temp.path());

    let output = abundfit(&[
        "continuum",
        "--spectrum",
        temp.path()
            .join("data/star.txt")
            .to_str()
            .expect("utf-8 path"),
        "--center",
        "5000",
        "--delimiter",
        "whitespace",
    ]);
    assert!(
        output.status.success(),
        "continuum should succeed, stderr: {}",
        stderr(&output)
    );
    let printed = stdout(&output);
    let level = printed
        .lines()
        .find_map(|line| line.strip_prefix("Continuum level: "))
        .and_then(|value| value.trim().parse::<f64>().ok())
        .expect("continuum level should be printed");
    assert!((level - 1.0).abs() < 1e-3, "level {level}");
}

#[test]
fn missing_config_exits_with_io_code() {
    let temp = TempDir::new().expect("tempdir should be created");
    let missing = temp.path().join("missing.json");

    let output = abundfit(&["fit", "--config", missing.to_str().expect("utf-8 path")]);
    assert_eq!(output.status.code(), Some(3));
    let message = stderr(&output);
    assert!(message.contains("ERROR: [IO.RUN_CONFIG]"));
    assert!(message.contains("FATAL EXIT CODE: 3"));
}

#[test]
fn bad_arguments_exit_with_usage_code() {
    let output = abundfit(&["continuum", "--center", "5000"]);
    assert_eq!(output.status.code(), Some(2));
    assert!(stderr(&output).contains("ERROR: [INPUT.CLI_USAGE]"));

    let help = abundfit(&["--help"]);
    assert!(help.status.success());
    assert!(stdout(&help).contains("fit"));
}
