use std::process::Command;

fn emsbus() -> Command {
    Command::new(env!("CARGO_BIN_EXE_emsbus"))
}

/// Basic smoke tests for CLI functionality
#[test]
fn test_cli_help() {
    let output = emsbus()
        .arg("--help")
        .output()
        .expect("Failed to execute emsbus binary");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Usage: emsbus"));
}

#[test]
fn test_cli_list_ports_json() {
    let output = emsbus()
        .arg("--list-ports")
        .arg("--json")
        .output()
        .expect("Failed to execute emsbus binary");

    assert!(output.status.success());
    let ports: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("port list is not JSON");
    assert!(ports.is_array());
}

#[test]
fn test_cli_list_devices_json() {
    let output = emsbus()
        .args(["--list-devices", "--json"])
        .output()
        .expect("Failed to execute emsbus binary");

    assert!(output.status.success());
    let tables: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("device tables are not JSON");
    assert_eq!(tables["boilers"][0]["product_id"], 72);
    assert!(tables["thermostats"]
        .as_array()
        .is_some_and(|rows| rows.iter().any(|row| row["name"] == "RC35")));
}

#[test]
fn test_cli_checksum() {
    let output = emsbus()
        .args(["--checksum", "0B 88 02 00"])
        .output()
        .expect("Failed to execute emsbus binary");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("CRC=0x4E"));
    assert!(stdout.contains("0B 88 02 00 4E"));
}

#[test]
fn test_cli_serve_without_port_fails() {
    let output = emsbus().output().expect("Failed to execute emsbus binary");
    assert!(!output.status.success());
}
