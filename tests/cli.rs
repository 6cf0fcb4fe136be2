//! Command line handling that happens before MPI is initialized
//!
//! Errors found this early exit with status 2. Once MPI runs, fatal errors go through `MPI_Abort`
//! with status 1, so the status tells which side of initialization a failure happened on.

use assert_cmd::Command;

fn conformance() -> Command {
    Command::cargo_bin("mpi-conformance").unwrap()
}

fn stderr_of(command: &mut Command, code: i32) -> String {
    let out = command.assert().code(code).get_output().stderr.clone();
    String::from_utf8(out).unwrap()
}

#[test]
fn help_works() {
    conformance().arg("--help").assert().success();
}

#[test]
fn version_works() {
    conformance().arg("--version").assert().success();
}

#[test]
fn unknown_test_fails_before_mpi_starts() {
    let stderr = stderr_of(conformance().args(["-t", "Ring,No such test"]), 2);
    assert!(stderr.contains("not recognized"), "stderr was: {stderr}");
    assert!(stderr.contains("No such test"), "stderr was: {stderr}");
}

#[test]
fn unknown_deselection_fails_before_mpi_starts() {
    let stderr = stderr_of(conformance().args(["-t", "^Nope"]), 2);
    assert!(stderr.contains("not recognized"), "stderr was: {stderr}");
}

#[test]
fn invalid_configuration_fails_before_mpi_starts() {
    let stderr = stderr_of(conformance().args(["-n", "0"]), 2);
    assert!(stderr.contains("number of values"), "stderr was: {stderr}");
    stderr_of(conformance().args(["-j", "0"]), 2);
}

#[test]
fn unknown_option_values_are_usage_errors() {
    conformance().args(["-x", "lenient"]).assert().failure();
}
