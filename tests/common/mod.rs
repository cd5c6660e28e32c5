#![allow(dead_code)]

use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use tempfile::TempDir;

pub struct Sidecar {
    child: Child,
    stdin: ChildStdin,
    reader: BufReader<ChildStdout>,
    next_id: u64,
}

impl Sidecar {
    pub fn spawn() -> Self {
        let exe = env!("CARGO_BIN_EXE_sheetd");
        let mut child = Command::new(exe)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .expect("spawn sheetd");
        let stdin = child.stdin.take().expect("child stdin");
        let stdout = child.stdout.take().expect("child stdout");
        Self {
            child,
            stdin,
            reader: BufReader::new(stdout),
            next_id: 0,
        }
    }

    /// Spawn, select a fresh workspace and set a session on `branch`.
    pub fn with_workspace(branch: &str) -> (Self, TempDir) {
        let workspace = tempfile::tempdir().expect("temp workspace");
        let mut sidecar = Self::spawn();
        sidecar.ok(
            "workspace.select",
            json!({ "path": workspace.path().to_string_lossy() }),
        );
        sidecar.ok(
            "session.set",
            json!({ "branchId": branch, "actor": "staff@test" }),
        );
        (sidecar, workspace)
    }

    pub fn request(&mut self, method: &str, params: serde_json::Value) -> serde_json::Value {
        self.next_id += 1;
        let id = self.next_id.to_string();
        let payload = json!({
            "id": id,
            "method": method,
            "params": params,
        });
        writeln!(self.stdin, "{}", payload).expect("write request");
        self.stdin.flush().expect("flush request");

        let mut line = String::new();
        self.reader.read_line(&mut line).expect("read response line");
        assert!(!line.trim().is_empty(), "empty response for {}", method);
        let value: serde_json::Value =
            serde_json::from_str(line.trim()).expect("parse response json");
        assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id.as_str()));
        value
    }

    /// Write raw bytes as one line and read the single reply.
    pub fn send_raw(&mut self, bytes: &[u8]) -> serde_json::Value {
        self.stdin.write_all(bytes).expect("write raw line");
        self.stdin.flush().expect("flush raw line");
        let mut line = String::new();
        self.reader.read_line(&mut line).expect("read response line");
        assert!(!line.trim().is_empty(), "no reply to raw line");
        serde_json::from_str(line.trim()).expect("parse response json")
    }

    pub fn ok(&mut self, method: &str, params: serde_json::Value) -> serde_json::Value {
        let value = self.request(method, params);
        assert!(
            value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
            "{} failed: {}",
            method,
            value
        );
        value.get("result").cloned().unwrap_or_else(|| json!({}))
    }

    /// Expect an error response and return its code.
    pub fn err_code(&mut self, method: &str, params: serde_json::Value) -> String {
        let value = self.request(method, params);
        assert_eq!(
            value.get("ok").and_then(|v| v.as_bool()),
            Some(false),
            "{} unexpectedly succeeded: {}",
            method,
            value
        );
        value
            .pointer("/error/code")
            .and_then(|v| v.as_str())
            .expect("error code")
            .to_string()
    }
}

impl Drop for Sidecar {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

pub fn str_at<'a>(value: &'a serde_json::Value, pointer: &str) -> &'a str {
    value
        .pointer(pointer)
        .and_then(|v| v.as_str())
        .unwrap_or_else(|| panic!("missing string at {pointer}: {value}"))
}

/// Creates a class with the given students (last, first) and returns
/// (class id, student ids in roster order).
pub fn seed_class(
    sidecar: &mut Sidecar,
    name: &str,
    students: &[(&str, &str)],
) -> (String, Vec<String>) {
    let class = sidecar.ok("classes.create", json!({ "name": name }));
    let class_id = str_at(&class, "/classId").to_string();
    let ids = students
        .iter()
        .map(|(last, first)| {
            let created = sidecar.ok(
                "students.create",
                json!({ "classId": class_id, "lastName": last, "firstName": first }),
            );
            str_at(&created, "/studentId").to_string()
        })
        .collect();
    (class_id, ids)
}

pub fn open_attendance(
    sidecar: &mut Sidecar,
    class_id: &str,
    date: &str,
) -> (String, serde_json::Value) {
    let view = sidecar.ok(
        "sheet.open",
        json!({ "scope": { "kind": "attendance", "classId": class_id, "date": date } }),
    );
    (str_at(&view, "/sheetId").to_string(), view)
}

pub fn row_field<'a>(
    view: &'a serde_json::Value,
    row_id: &str,
    field: &str,
) -> &'a serde_json::Value {
    view.get("rows")
        .and_then(|v| v.as_array())
        .and_then(|rows| {
            rows.iter()
                .find(|r| r.get("rowId").and_then(|v| v.as_str()) == Some(row_id))
        })
        .and_then(|r| r.get("fields"))
        .and_then(|f| f.get(field))
        .unwrap_or(&serde_json::Value::Null)
}
