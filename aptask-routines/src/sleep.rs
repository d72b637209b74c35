use aptask_core::{ArgValue, Capability, Routine, Update};

/// A routine that never finishes on its own and whose `abort()` only
/// acknowledges the request without ever driving the report to `DONE`,
/// used to exercise the worker's watchdog-forced termination after a
/// stuck abort.
pub struct Sleep;

impl Sleep {
    pub fn new(_args: &[ArgValue]) -> Box<dyn Routine> {
        Box::new(Sleep)
    }
}

impl Routine for Sleep {
    fn process(&mut self) -> Capability {
        Capability::Update(Update::Progress(0.5))
    }

    fn abort(&mut self) -> Capability {
        // acknowledges the abort (so the worker loop does not immediately
        // break) but deliberately never reports DONE
        Capability::Update(Update::Progress(0.9))
    }
}
