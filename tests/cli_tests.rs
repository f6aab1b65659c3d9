//! Command-line surface of the `speaker-broker` binary

use assert_cmd::Command;
use predicates::prelude::*;

fn broker_command() -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_speaker-broker"));
    // Keep the host environment from leaking into the parsed config
    for var in [
        "HOST",
        "PORT",
        "BACKEND_URL",
        "RECONNECT_DELAY_MS",
        "MAX_MESSAGE_SIZE",
        "HEARTBEAT_INTERVAL_SECS",
        "RUST_LOG",
    ] {
        cmd.env_remove(var);
    }
    cmd
}

#[test]
fn test_help_lists_config_flags() {
    broker_command()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--backend-url"))
        .stdout(predicate::str::contains("--port"))
        .stdout(predicate::str::contains("BACKEND_URL"));
}

#[test]
fn test_version() {
    broker_command()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn test_rejects_non_websocket_backend_url() {
    broker_command()
        .args(["--port", "0", "--backend-url", "http://localhost:5001"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("INVALID_CONFIG"));
}

#[test]
fn test_backend_url_from_environment_is_validated() {
    broker_command()
        .args(["--port", "0"])
        .env("BACKEND_URL", "tcp://localhost:5001")
        .assert()
        .failure()
        .stderr(predicate::str::contains("must start with ws://"));
}

#[test]
fn test_zero_reconnect_delay_rejected() {
    broker_command()
        .args(["--port", "0", "--reconnect-delay-ms", "0"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("reconnect delay"));
}

#[test]
fn test_unknown_flag_fails() {
    broker_command()
        .arg("--no-such-flag")
        .assert()
        .failure()
        .stderr(predicate::str::contains("unexpected argument"));
}
