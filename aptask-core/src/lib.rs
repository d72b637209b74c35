// This module contains the `Report`/`Update`/`Capability` types that make up
// the routine status-reporting contract.
pub mod report;

// This module contains the `Routine` trait, argument specs, and the
// compiled-in routine registry.
pub mod routine;

// This module contains the task FIFO.
pub mod fifo;

// This module contains the worker handle state machine and the host/worker
// IPC framing.
pub mod worker;

// This module contains the scheduler/manager: request handling and `tick()`.
pub mod manager;

// This module contains the JSON configuration format consumed at startup.
pub mod config;

// This module contains the `tracing` subscriber setup shared by both
// binaries.
pub mod logging;

// This module contains the top-level error alias.
pub mod error;

pub use config::Config;
pub use error::{DaemonError, DaemonResult};
pub use fifo::Fifo;
pub use manager::{malformed, Manager};
pub use report::{Capability, Report, Status, Update};
pub use routine::{ArgSpec, ArgValue, Routine, RoutineDescriptor, RoutineInfo, RoutineRegistry};
pub use worker::{Command, WorkerHandle, WorkerState};
