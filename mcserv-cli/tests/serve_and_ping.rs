use std::os::unix::net::UnixListener;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::thread::sleep;
use std::time::{Duration, Instant};

use assert_cmd::prelude::*;
use predicates::str::contains;
use tempfile::TempDir;

fn mcserv_cmd() -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("mcserv"));
    cmd.env_remove("MCSERV_SOCKET").env("RUST_LOG", "debug");
    cmd
}

struct ServeProcess {
    child: Child,
}

impl ServeProcess {
    fn start(socket: &Path, game: &[&str]) -> Self {
        let child = mcserv_cmd()
            .arg("serve")
            .arg("--socket")
            .arg(socket)
            .args(game)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .expect("spawn mcserv serve");
        Self { child }
    }

    fn interrupt(&self) {
        let status = Command::new("kill")
            .args(["-INT", &self.child.id().to_string()])
            .status()
            .expect("send SIGINT");
        assert!(status.success(), "kill -INT failed");
    }

    fn wait_exit(&mut self, timeout: Duration) -> Option<std::process::ExitStatus> {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if let Ok(Some(status)) = self.child.try_wait() {
                return Some(status);
            }
            sleep(Duration::from_millis(50));
        }
        None
    }
}

impl Drop for ServeProcess {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        sleep(Duration::from_millis(50));
    }
    false
}

fn socket_in(dir: &TempDir) -> PathBuf {
    dir.path().join("mcserv.sock")
}

#[test]
fn serve_answers_ping_and_stops_cleanly_on_sigint() {
    let dir = TempDir::new().expect("temp dir");
    let socket = socket_in(&dir);
    let mut serve = ServeProcess::start(&socket, &["sleep", "30"]);

    assert!(
        wait_until(Duration::from_secs(5), || socket.exists()),
        "control socket never appeared"
    );

    mcserv_cmd()
        .args(["ping", "--socket"])
        .arg(&socket)
        .assert()
        .success()
        .stdout(contains("\"ok\": true"));

    mcserv_cmd()
        .arg("ping")
        .env("MCSERV_SOCKET", &socket)
        .assert()
        .success();

    serve.interrupt();
    let status = serve
        .wait_exit(Duration::from_secs(5))
        .expect("mcserv did not exit after SIGINT");
    assert!(status.success(), "expected clean exit, got {status}");
    assert!(!socket.exists(), "socket must be removed on shutdown");
}

#[test]
fn failing_game_server_stops_everything_and_exits_nonzero() {
    let dir = TempDir::new().expect("temp dir");
    let socket = socket_in(&dir);

    mcserv_cmd()
        .arg("serve")
        .arg("--socket")
        .arg(&socket)
        .arg("false")
        .assert()
        .failure()
        .stderr(contains("GameServer{command: false}"))
        .stderr(contains("exited unexpectedly"));

    assert!(!socket.exists(), "socket must be removed after fail-fast shutdown");
}

#[test]
fn occupied_socket_fails_fast() {
    let dir = TempDir::new().expect("temp dir");
    let socket = socket_in(&dir);
    let _occupant = UnixListener::bind(&socket).expect("bind occupant");

    mcserv_cmd()
        .arg("serve")
        .arg("--socket")
        .arg(&socket)
        .args(["sleep", "30"])
        .assert()
        .failure()
        .stderr(contains("already in use"));

    assert!(socket.exists(), "occupant's socket must not be removed");
}

#[test]
fn ping_without_daemon_reports_not_running() {
    let dir = TempDir::new().expect("temp dir");
    let socket = socket_in(&dir);

    mcserv_cmd()
        .args(["ping", "--socket"])
        .arg(&socket)
        .assert()
        .failure()
        .stdout(contains("\"ok\": false"))
        .stderr(contains("not reachable"));
}
