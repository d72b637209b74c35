// End-to-end scenarios driven over real TCP connections against a real
// `aptaskd` subprocess (which in turn spawns real `aptask-worker`
// subprocesses). Black-box at the subprocess level, since the daemon's own
// process boundary is the thing under test.

use serde_json::Value;
use std::io::{Read, Write};
use std::net::{Shutdown, TcpStream};
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicU16, Ordering};
use std::time::Duration;

static NEXT_PORT: AtomicU16 = AtomicU16::new(19100);

struct Daemon {
    child: Child,
    port: u16,
}

impl Daemon {
    fn start(users: &[&str]) -> Self {
        Self::start_with_watchdog_ms(users, None)
    }

    fn start_with_watchdog_ms(users: &[&str], watchdog_ms: Option<u64>) -> Self {
        let port = NEXT_PORT.fetch_add(1, Ordering::SeqCst);
        let config_path = std::env::temp_dir().join(format!("aptaskd-scenarios-{}.json", port));
        let users_json = users
            .iter()
            .map(|u| format!("\"{}\"", u))
            .collect::<Vec<_>>()
            .join(",");
        let config = format!(
            r#"{{"host":"127.0.0.1","port":{port},"num_procs":2,"keys":{{"users":[{users}]}}}}"#,
            port = port,
            users = users_json,
        );
        std::fs::write(&config_path, config).expect("write test config");

        let mut command = Command::new(env!("CARGO_BIN_EXE_aptaskd"));
        command
            .arg("--config")
            .arg(&config_path)
            .arg("--tick-interval-ms")
            .arg("10")
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        // the worker subprocess inherits this from aptaskd, which inherits
        // it from us, letting the watchdog test pin a short grace period
        // instead of the 60s production default.
        if let Some(ms) = watchdog_ms {
            command.env("APTASK_WATCHDOG_MS", ms.to_string());
        }
        let child = command.spawn().expect("failed to spawn aptaskd");

        // give the listener a moment to bind before the first connection.
        std::thread::sleep(Duration::from_millis(200));

        Daemon { child, port }
    }

    fn request(&self, body: &str) -> Value {
        let mut stream =
            TcpStream::connect(("127.0.0.1", self.port)).expect("connect to aptaskd");
        stream.write_all(body.as_bytes()).expect("write request");
        stream.shutdown(Shutdown::Write).expect("shutdown write half");
        let mut response = String::new();
        stream.read_to_string(&mut response).expect("read response");
        serde_json::from_str(&response).expect("response is valid json")
    }
}

impl Drop for Daemon {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

fn wait_for<F: Fn() -> bool>(condition: F, timeout: Duration) -> bool {
    let start = std::time::Instant::now();
    while start.elapsed() < timeout {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(20));
    }
    false
}

#[test]
fn index_lists_the_dev_routine() {
    let daemon = Daemon::start(&["u"]);
    let resp = daemon.request(r#"{"key":"u","request":"index"}"#);
    assert_eq!(resp["status"], "ok");
    let index = resp["index"].as_array().unwrap();
    let dev = index.iter().find(|e| e["name"] == "dev").expect("dev routine listed");
    assert_eq!(dev["arguments"][0]["name"], "loops");
    assert_eq!(dev["arguments"][0]["default"], 10);
}

#[test]
fn authorized_start_reaches_done_and_is_reaped() {
    let daemon = Daemon::start(&["u"]);
    let start = daemon.request(r#"{"key":"u","request":"start","name":"dev","arguments":[4]}"#);
    assert_eq!(start["status"], "ok");
    assert_eq!(start["taskid"], 1);

    let reached_done = wait_for(
        || {
            let active = daemon.request(r#"{"key":"u","request":"active"}"#);
            active["active"]
                .as_array()
                .map(|entries| entries.is_empty())
                .unwrap_or(false)
        },
        Duration::from_secs(5),
    );
    assert!(reached_done, "task was not reaped within the timeout");
}

#[test]
fn unknown_routine_is_rejected_without_growing_the_fifo() {
    let daemon = Daemon::start(&["u"]);
    let resp = daemon.request(r#"{"key":"u","request":"start","name":"nope","arguments":[]}"#);
    assert_eq!(resp["status"], "error");
    assert_eq!(resp["response"], "start");
    assert_eq!(resp["message"], "invalid task name");

    let active = daemon.request(r#"{"key":"u","request":"active"}"#);
    assert_eq!(active["active"].as_array().unwrap().len(), 0);
}

#[test]
fn stop_before_start_window_removes_the_queued_task() {
    let daemon = Daemon::start(&["u"]);
    for _ in 0..3 {
        let resp = daemon.request(r#"{"key":"u","request":"start","name":"sleep","arguments":[]}"#);
        assert_eq!(resp["status"], "ok");
    }

    let active = daemon.request(r#"{"key":"u","request":"active"}"#);
    let entries = active["active"].as_array().unwrap();
    assert_eq!(entries.len(), 3);
    let third = entries
        .iter()
        .find(|e| e["position"] == 2)
        .expect("third task present");
    assert_eq!(third["state"], "inactive");
    let third_id = third["taskid"].as_u64().unwrap();

    let stop = daemon.request(&format!(r#"{{"key":"u","request":"stop","taskid":{}}}"#, third_id));
    assert_eq!(stop["status"], "ok");

    let removed = wait_for(
        || {
            let active = daemon.request(r#"{"key":"u","request":"active"}"#);
            !active["active"]
                .as_array()
                .unwrap()
                .iter()
                .any(|e| e["taskid"].as_u64() == Some(third_id))
        },
        Duration::from_secs(5),
    );
    assert!(removed, "stopped queued task was not removed");

    let remaining = daemon.request(r#"{"key":"u","request":"active"}"#);
    let positions: Vec<u64> = remaining["active"]
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["position"].as_u64().unwrap())
        .collect();
    assert_eq!(positions, vec![0, 1]);
}

#[test]
fn unauthorized_key_is_rejected() {
    let daemon = Daemon::start(&["u"]);
    let resp = daemon.request(r#"{"key":"x","request":"active"}"#);
    assert_eq!(resp["status"], "error");
    assert_eq!(resp["message"], "invalid auth key");
}

#[test]
fn group_isolation_limits_visibility_to_the_requesters_key() {
    let daemon = Daemon::start(&["u1", "u2"]);
    daemon.request(r#"{"key":"u1","request":"start","name":"sleep","arguments":[]}"#);
    daemon.request(r#"{"key":"u2","request":"start","name":"sleep","arguments":[]}"#);

    let resp = daemon.request(r#"{"key":"u1","request":"active"}"#);
    assert_eq!(resp["active"].as_array().unwrap().len(), 1);
}

// `sleep`'s `abort()` acknowledges but never reports DONE (see
// `aptask-routines/src/sleep.rs`), so stopping a running `sleep` task only
// ever gets reaped once the watchdog forces the subprocess down. A short
// `APTASK_WATCHDOG_MS` keeps this test from waiting on the 60s production
// default.
#[test]
fn watchdog_reaps_a_running_task_whose_abort_never_completes() {
    let daemon = Daemon::start_with_watchdog_ms(&["u"], Some(200));
    let start = daemon.request(r#"{"key":"u","request":"start","name":"sleep","arguments":[]}"#);
    assert_eq!(start["status"], "ok");
    let taskid = start["taskid"].as_u64().unwrap();

    let became_active = wait_for(
        || {
            let active = daemon.request(r#"{"key":"u","request":"active"}"#);
            active["active"]
                .as_array()
                .unwrap()
                .iter()
                .any(|e| e["taskid"].as_u64() == Some(taskid) && e["state"] == "active")
        },
        Duration::from_secs(5),
    );
    assert!(became_active, "sleep task never started running");

    let stop = daemon.request(&format!(r#"{{"key":"u","request":"stop","taskid":{}}}"#, taskid));
    assert_eq!(stop["status"], "ok");

    let reaped = wait_for(
        || {
            let active = daemon.request(r#"{"key":"u","request":"active"}"#);
            !active["active"]
                .as_array()
                .unwrap()
                .iter()
                .any(|e| e["taskid"].as_u64() == Some(taskid))
        },
        Duration::from_secs(5),
    );
    assert!(reaped, "watchdog never forced the stuck worker down");
}
