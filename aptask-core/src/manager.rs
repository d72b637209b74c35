use crate::fifo::Fifo;
use crate::routine::{ArgError, ArgValue, RoutineDescriptor, RoutineRegistry};
use crate::worker::{WorkerHandle, WorkerState};
use serde::Deserialize;
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;

/// Loosely-typed view of a request frame: every request shares `key` and
/// `request`; the remaining fields are only meaningful for specific request
/// kinds, hence all-optional here and validated per-kind in
/// `Manager::handle_request`.
#[derive(Debug, Deserialize)]
struct RawRequest {
    key: Option<String>,
    request: Option<String>,
    name: Option<String>,
    #[serde(default)]
    arguments: Vec<ArgValue>,
    taskid: Option<u64>,
}

/// The request dispatcher. Drives FIFO transitions and exposes the
/// synchronous `handle_request` plus the per-tick maintenance pass.
pub struct Manager {
    fifo: Fifo<WorkerHandle>,
    registry: Arc<RoutineRegistry>,
    users: Option<Vec<String>>,
    #[allow(dead_code)] // reserved for an admin-only request class, currently empty
    admins: Option<Vec<String>>,
    worker_bin: PathBuf,
}

impl Manager {
    pub fn new(
        num_procs: usize,
        registry: Arc<RoutineRegistry>,
        users: Option<Vec<String>>,
        admins: Option<Vec<String>>,
        worker_bin: PathBuf,
    ) -> Self {
        Manager {
            fifo: Fifo::new(num_procs),
            registry,
            users,
            admins,
            worker_bin,
        }
    }

    /// A missing or empty allow-list acts as allow-all.
    fn is_authorized(&self, key: &str) -> bool {
        match &self.users {
            None => true,
            Some(list) if list.is_empty() => true,
            Some(list) => list.iter().any(|k| k == key),
        }
    }

    /// Parses and dispatches one request frame, producing the response
    /// frame. Synchronous: it never touches a client socket itself, so the
    /// caller is free to write the response back however it likes.
    pub fn handle_request(&mut self, frame: &str) -> String {
        let raw: RawRequest = match serde_json::from_str(frame) {
            Ok(raw) => raw,
            Err(_) => return malformed(),
        };

        let key = match &raw.key {
            Some(key) => key.clone(),
            None => return malformed(),
        };
        let request = match &raw.request {
            Some(request) => request.clone(),
            None => return malformed(),
        };

        if !self.is_authorized(&key) {
            return error_response("invalid auth key", None);
        }

        let response = match request.as_str() {
            "index" => self.handle_index(),
            "start" => self.handle_start(&key, raw.name.as_deref(), &raw.arguments),
            "stop" => self.handle_stop(raw.taskid),
            "active" => self.handle_active(&key),
            _ => return malformed(),
        };
        response.to_string()
    }

    fn handle_index(&self) -> Value {
        let index: Vec<Value> = self
            .registry
            .index()
            .into_iter()
            .map(|info| {
                json!({
                    "name": info.name,
                    "arguments": info.arguments,
                    "help": info.help,
                })
            })
            .collect();
        json!({"status": "ok", "response": "index", "index": index})
    }

    fn handle_start(&mut self, key: &str, name: Option<&str>, arguments: &[ArgValue]) -> Value {
        let name = match name {
            Some(name) => name,
            None => return json!({"status": "error", "response": "start", "message": "invalid task name"}),
        };

        let resolved = match self.registry.resolve_arguments(name, arguments) {
            Ok(resolved) => resolved,
            Err(ArgError::UnknownRoutine) => {
                return json!({"status": "error", "response": "start", "message": "invalid task name"})
            }
            Err(ArgError::MissingRequired(arg)) => {
                return json!({
                    "status": "error",
                    "response": "start",
                    "message": format!("missing required argument: {}", arg),
                })
            }
            Err(ArgError::TooManyArguments) => {
                return json!({"status": "error", "response": "start", "message": "too many arguments"})
            }
        };

        let descriptor = RoutineDescriptor {
            name: name.to_string(),
            arguments: resolved,
        };
        let handle = WorkerHandle::new(0, descriptor, Some(key.to_string()), self.worker_bin.clone());
        let taskid = self.fifo.add(handle);
        // the handle's own `id` field is set at construction before the id
        // is known; keep them in sync so worker argv reflects the real id.
        if let Some(handle) = self.fifo.get_mut(taskid) {
            handle.id = taskid;
        }
        json!({"status": "ok", "response": "start", "taskid": taskid})
    }

    fn handle_stop(&mut self, taskid: Option<u64>) -> Value {
        let taskid = match taskid {
            Some(taskid) => taskid,
            None => return json!({"status": "error", "response": "stop", "taskid": Value::Null}),
        };
        let still_queued = match self.fifo.get_mut(taskid) {
            None => return json!({"status": "error", "response": "stop", "taskid": taskid}),
            Some(handle) => {
                if handle.state() == WorkerState::Stopping {
                    // a second stop is a no-op error, not destructive.
                    return json!({"status": "error", "response": "stop", "taskid": taskid});
                }
                let was_init = handle.state() == WorkerState::Init;
                handle.stop();
                was_init
            }
        };
        if still_queued {
            // the handle never spawned a subprocess, so there is nothing for
            // `tick()`'s active-window loop to reap later — remove it now.
            self.fifo.remove(Some(taskid));
        }
        json!({"status": "ok", "response": "stop", "taskid": taskid})
    }

    fn handle_active(&self, key: &str) -> Value {
        let active: Vec<Value> = self
            .fifo
            .iter()
            .filter(|(_, handle)| handle.group.as_deref() == Some(key))
            .map(|(id, handle)| {
                let position = self.fifo.position(id).unwrap_or(0);
                let state = if handle.is_active() { "active" } else { "inactive" };
                let mut entry = match handle.cached_report() {
                    Some(report) => json!({
                        "status": report.status,
                        "progress": report.progress,
                        "message": report.message,
                    }),
                    None => json!({}),
                };
                entry["position"] = json!(position);
                entry["taskid"] = json!(id);
                entry["state"] = json!(state);
                entry
            })
            .collect();
        json!({"status": "ok", "response": "active", "active": active})
    }

    /// Called at the daemon's poll cadence:
    /// 1. drain status from every handle;
    /// 2. for every id in the active window, advance its state machine.
    pub async fn tick(&mut self) {
        for id in self.fifo.all_ids() {
            if let Some(handle) = self.fifo.get_mut(id) {
                handle.get_status();
            }
        }

        for id in self.fifo.active_ids() {
            let action = match self.fifo.get_mut(id) {
                Some(handle) => classify(handle),
                None => continue,
            };
            match action {
                TickAction::Start => {
                    if let Some(handle) = self.fifo.get_mut(id) {
                        if let Err(e) = handle.start() {
                            tracing::warn!("[manager] failed to start worker {}: {:?}", id, e);
                        }
                    }
                }
                TickAction::ReapIfExited => {
                    // STOPPING only reaps once the subprocess has actually
                    // exited, bounded by the worker's own watchdog — never
                    // block the tick waiting on it.
                    let exited = self.fifo.get_mut(id).map(|h| h.has_exited()).unwrap_or(true);
                    if exited {
                        if let Some(mut handle) = self.fifo.remove(Some(id)) {
                            let _ = handle.join().await;
                        }
                    }
                }
                TickAction::ReapDone => {
                    // a DONE/ERROR report means the routine finished; the
                    // subprocess is expected to exit on its own, so join()
                    // unconditionally.
                    if let Some(mut handle) = self.fifo.remove(Some(id)) {
                        let _ = handle.join().await;
                    }
                }
                TickAction::None => {}
            }
        }
    }

    /// `stop()`: for every handle, if active call `stop()` else `remove`;
    /// then for every remaining handle `join()` and `remove`. Guarantees no
    /// orphan subprocesses.
    pub async fn stop(&mut self) {
        for id in self.fifo.all_ids() {
            match self.fifo.get_mut(id) {
                Some(handle) if handle.is_active() => handle.stop(),
                _ => {
                    self.fifo.remove(Some(id));
                }
            }
        }
        for id in self.fifo.all_ids() {
            if let Some(mut handle) = self.fifo.remove(Some(id)) {
                let _ = handle.join().await;
            }
        }
    }
}

enum TickAction {
    Start,
    ReapIfExited,
    ReapDone,
    None,
}

fn classify(handle: &mut WorkerHandle) -> TickAction {
    match handle.state() {
        WorkerState::Init => TickAction::Start,
        WorkerState::Stopping => TickAction::ReapIfExited,
        WorkerState::Running => {
            if handle.cached_report().map(|r| r.is_done()).unwrap_or(false) {
                TickAction::ReapDone
            } else {
                TickAction::None
            }
        }
    }
}

/// The "malformed request" response body, shared by `Manager::handle_request`
/// and anything else on the wire boundary (e.g. the net frontend's own
/// oversized-request rejection) that needs to produce the same error shape
/// without going through a full request parse.
pub fn malformed() -> String {
    json!({"status": "error", "message": "malformed request"}).to_string()
}

fn error_response(message: &str, response: Option<&str>) -> String {
    match response {
        Some(response) => json!({"status": "error", "response": response, "message": message}).to_string(),
        None => json!({"status": "error", "message": message}).to_string(),
    }
}
