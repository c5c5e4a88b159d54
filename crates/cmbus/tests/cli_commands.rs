#![cfg(all(unix, feature = "cli"))]

use std::io;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Output, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use cmbus_plugin::connect;

fn unique_temp_dir(tag: &str) -> PathBuf {
    let dir = PathBuf::from(format!(
        "/tmp/cmbuscli-{tag}-{}-{}",
        std::process::id(),
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("time should be after epoch")
            .as_nanos()
    ));
    std::fs::create_dir_all(&dir).expect("temp dir should be creatable");
    dir
}

fn wait_for_connect(path: &Path, timeout: Duration) -> io::Result<()> {
    let start = Instant::now();
    loop {
        match connect(path) {
            Ok(_) => return Ok(()),
            Err(err) => {
                if start.elapsed() >= timeout {
                    return Err(io::Error::other(format!("connect timeout: {err}")));
                }
                thread::sleep(Duration::from_millis(25));
            }
        }
    }
}

fn spawn_server(sock_path: &Path, extra: &[&str]) -> Child {
    let child = Command::new(env!("CARGO_BIN_EXE_cmbus"))
        .arg("--log-level")
        .arg("error")
        .arg("serve")
        .arg(sock_path)
        .args(extra)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .expect("serve command should start");
    wait_for_connect(sock_path, Duration::from_secs(3)).expect("server should accept connections");
    child
}

fn send(sock_path: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_cmbus"))
        .arg("--format")
        .arg("json")
        .arg("send")
        .arg(sock_path)
        .args(args)
        .output()
        .expect("send command should run")
}

fn stop(mut child: Child, dir: &Path) {
    let _ = child.kill();
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(dir);
}

#[test]
fn send_wait_prints_echoed_reply() {
    let dir = unique_temp_dir("echo");
    let sock_path = dir.join("bus.sock");
    let server = spawn_server(&sock_path, &[]);

    let output = send(
        &sock_path,
        &["--tag", "echo.hi", "--json", r#"{"x":1}"#, "--data", "payload", "--wait"],
    );
    assert_eq!(output.status.code(), Some(0));

    let stdout = String::from_utf8(output.stdout).expect("stdout should be utf8");
    let value: serde_json::Value =
        serde_json::from_str(stdout.trim()).expect("reply should print as json");
    assert_eq!(value["tag"], "echo.hi");
    assert_eq!(value["nak"], false);
    assert_eq!(value["json"]["x"], 1);
    assert_eq!(value["data"], "payload");

    stop(server, &dir);
}

#[test]
fn unclaimed_tag_exits_with_nak_code() {
    let dir = unique_temp_dir("nak");
    let sock_path = dir.join("bus.sock");
    let server = spawn_server(&sock_path, &[]);

    let output = send(&sock_path, &["--tag", "kvs.get", "--wait"]);
    assert_eq!(output.status.code(), Some(2));

    let stdout = String::from_utf8(output.stdout).expect("stdout should be utf8");
    let value: serde_json::Value =
        serde_json::from_str(stdout.trim()).expect("reply should print as json");
    assert_eq!(value["tag"], "kvs.get.NAK");
    assert_eq!(value["nak"], true);

    stop(server, &dir);
}

#[test]
fn heartbeat_reports_its_epoch() {
    let dir = unique_temp_dir("hb");
    let sock_path = dir.join("bus.sock");
    let server = spawn_server(&sock_path, &["--plugins", "hb"]);

    let output = send(&sock_path, &["--tag", "hb.get", "--wait"]);
    assert_eq!(output.status.code(), Some(0));

    let stdout = String::from_utf8(output.stdout).expect("stdout should be utf8");
    let value: serde_json::Value =
        serde_json::from_str(stdout.trim()).expect("reply should print as json");
    assert_eq!(value["tag"], "hb.get");
    assert!(value["json"]["epoch"].is_u64());

    // echo is not loaded, so its tags go unclaimed.
    let output = send(&sock_path, &["--tag", "echo.hi", "--wait"]);
    assert_eq!(output.status.code(), Some(2));

    stop(server, &dir);
}

#[test]
fn interrupt_shuts_down_cleanly() {
    let dir = unique_temp_dir("sigint");
    let sock_path = dir.join("bus.sock");
    let mut server = spawn_server(&sock_path, &[]);

    let status = Command::new("kill")
        .arg("-INT")
        .arg(server.id().to_string())
        .status()
        .expect("kill should run");
    assert!(status.success());

    let start = Instant::now();
    let exit = loop {
        if let Some(exit) = server.try_wait().expect("server status should be readable") {
            break exit;
        }
        assert!(
            start.elapsed() < Duration::from_secs(5),
            "server did not exit after SIGINT"
        );
        thread::sleep(Duration::from_millis(25));
    };
    assert_eq!(exit.code(), Some(0));
    assert!(!sock_path.exists());

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn unknown_plugin_is_config_error() {
    let dir = unique_temp_dir("unknown");
    let sock_path = dir.join("bus.sock");

    let output = Command::new(env!("CARGO_BIN_EXE_cmbus"))
        .arg("serve")
        .arg(&sock_path)
        .arg("--plugins")
        .arg("nope")
        .output()
        .expect("serve command should run");
    assert_eq!(output.status.code(), Some(78));

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn send_without_server_fails() {
    let dir = unique_temp_dir("noserver");
    let sock_path = dir.join("missing.sock");

    let output = send(&sock_path, &["--tag", "echo.hi"]);
    assert_eq!(output.status.code(), Some(1));

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn version_reports_package_version() {
    let output = Command::new(env!("CARGO_BIN_EXE_cmbus"))
        .arg("version")
        .output()
        .expect("version command should run");
    assert_eq!(output.status.code(), Some(0));

    let stdout = String::from_utf8(output.stdout).expect("stdout should be utf8");
    assert_eq!(stdout.trim(), format!("cmbus {}", env!("CARGO_PKG_VERSION")));
}
