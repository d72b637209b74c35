use serde::{Deserialize, Serialize};

/// `status = DONE ⇒ progress = 1.0`; `status = ERROR ⇒ progress = 1.0`;
/// `status = INIT ⇒ progress = 0.0`; `RUNNING ⇒ 0.0 < progress < 1.0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Status {
    Error = -1,
    Init = 0,
    Running = 1,
    Done = 2,
}

/// A worker-owned snapshot transmitted by value across the IPC boundary.
/// Created by a worker; mutated only by the worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub status: Status,
    pub progress: f64,
    pub message: Option<String>,
}

impl Report {
    pub fn init() -> Self {
        Report {
            status: Status::Init,
            progress: 0.0,
            message: None,
        }
    }

    pub fn running(progress: f64) -> Self {
        Report {
            status: Status::Running,
            progress,
            message: None,
        }
    }

    pub fn done() -> Self {
        Report {
            status: Status::Done,
            progress: 1.0,
            message: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Report {
            status: Status::Error,
            progress: 1.0,
            message: Some(message.into()),
        }
    }

    pub fn is_done(&self) -> bool {
        matches!(self.status, Status::Done | Status::Error)
    }
}

impl Default for Report {
    fn default() -> Self {
        Report::init()
    }
}

/// The tagged reporting channel described in the design notes: a routine's
/// iteration step may return a structured `Report` or one of a handful of
/// primitives, which the worker normalizes via `apply_to`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Update {
    Progress(f64),
    Exit(i64),
    Message(String),
    Full(Report),
}

impl Update {
    /// Normalizes `self` into `report`, following the returned-value table.
    pub fn apply_to(self, report: &mut Report) {
        match self {
            Update::Exit(0) => {
                report.status = Status::Done;
                report.progress = 1.0;
            }
            Update::Exit(n) if n > 0 => {
                report.status = Status::Error;
                report.progress = 1.0;
            }
            // negative integers are reserved; treat as DONE
            Update::Exit(_) => {
                report.status = Status::Done;
                report.progress = 1.0;
            }
            Update::Progress(p) if p == 0.0 => {
                report.status = Status::Init;
                report.progress = 0.0;
            }
            Update::Progress(p) if p > 0.0 && p < 1.0 => {
                report.status = Status::Running;
                report.progress = p;
            }
            Update::Progress(p) if p >= 1.0 => {
                report.status = Status::Done;
                report.progress = 1.0;
            }
            // p < 0.0
            Update::Progress(_) => {
                report.status = Status::Error;
                report.progress = 1.0;
            }
            Update::Message(msg) => {
                report.status = Status::Done;
                report.progress = 1.0;
                report.message = Some(msg);
            }
            Update::Full(r) => {
                *report = r;
            }
        }
    }
}

/// A routine operation's outcome: either it isn't implemented (the worker
/// loop treats this as a no-op, or as "fall through to forced termination"
/// for `abort`), or it produced an `Update` to fold into the live report.
#[derive(Debug, Clone)]
pub enum Capability {
    NotImplemented,
    Update(Update),
}
