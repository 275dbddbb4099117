//! End-to-end check of the sidecar process itself: spawn the binary,
//! drive it over stdin/stdout with newline-delimited JSON, and make sure
//! the envelope contract holds for good, bad and unknown requests.

use serde_json::{json, Value};
use std::io::{BufRead, BufReader, Write};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

struct Sidecar {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
}

impl Sidecar {
    fn spawn() -> Sidecar {
        let mut child = Command::new(env!("CARGO_BIN_EXE_reviewportald"))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .expect("spawn sidecar");
        let stdin = child.stdin.take().expect("stdin");
        let stdout = BufReader::new(child.stdout.take().expect("stdout"));
        Sidecar {
            child,
            stdin,
            stdout,
        }
    }

    fn send_raw(&mut self, line: &str) -> Value {
        writeln!(self.stdin, "{}", line).expect("write request");
        self.stdin.flush().expect("flush");
        let mut resp = String::new();
        self.stdout.read_line(&mut resp).expect("read response");
        serde_json::from_str(&resp).expect("parse response")
    }

    fn send(&mut self, id: &str, method: &str, params: Value) -> Value {
        self.send_raw(
            &json!({ "id": id, "method": method, "params": params }).to_string(),
        )
    }
}

impl Drop for Sidecar {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

fn temp_workspace() -> String {
    let p = std::env::temp_dir().join(format!(
        "portal-smoke-{}",
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p.to_string_lossy().into_owned()
}

#[test]
fn envelope_contract_over_the_wire() {
    let mut sidecar = Sidecar::spawn();

    // health works before any workspace is selected.
    let resp = sidecar.send("1", "health", json!({}));
    assert_eq!(resp["id"], "1");
    assert_eq!(resp["ok"], true);

    // Anything else needs a workspace first.
    let resp = sidecar.send("2", "scopes.create", json!({ "name": "Batch" }));
    assert_eq!(resp["ok"], false);
    assert_eq!(resp["error"]["code"], "no_workspace");

    let resp = sidecar.send("3", "workspace.select", json!({ "path": temp_workspace() }));
    assert_eq!(resp["ok"], true);

    let resp = sidecar.send("4", "scopes.create", json!({ "name": "Batch" }));
    assert_eq!(resp["ok"], true);
    assert!(resp["result"]["scopeId"].is_string());

    // Unknown method and malformed JSON both keep the stream alive.
    let resp = sidecar.send("5", "no.such.method", json!({}));
    assert_eq!(resp["ok"], false);
    assert_eq!(resp["error"]["code"], "not_implemented");

    let resp = sidecar.send_raw("this is not json");
    assert_eq!(resp["ok"], false);
    assert_eq!(resp["error"]["code"], "bad_json");

    let resp = sidecar.send("6", "health", json!({}));
    assert_eq!(resp["id"], "6");
    assert_eq!(resp["ok"], true);
}
