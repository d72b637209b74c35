// This module contains the `dev` routine used throughout the scheduling
// scenarios: `_arguments = [("loops", 10)]`, yields `i / loops`.
mod dev;

// This module contains the `sleep` routine: never reaches `DONE` on its own,
// and its `abort()` acknowledges but never completes, exercising the
// worker's watchdog.
mod sleep;

// This module contains the compiled-in registry wiring both routines above.
mod registry;

pub use registry::build;
