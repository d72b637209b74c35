use aptask_core::{ArgValue, Capability, Routine, Update};

/// `_arguments = [("loops", 10)]`; yields `i / loops` for `i` in `1..=loops`,
/// reaching `1.0` (hence `DONE`) on the `loops`-th call to `process`.
pub struct Dev {
    loops: i64,
    i: i64,
}

impl Dev {
    pub fn new(args: &[ArgValue]) -> Box<dyn Routine> {
        let loops = match args.first() {
            Some(ArgValue::Int(n)) if *n > 0 => *n,
            _ => 10,
        };
        Box::new(Dev { loops, i: 0 })
    }
}

impl Routine for Dev {
    fn process(&mut self) -> Capability {
        self.i += 1;
        let progress = self.i as f64 / self.loops as f64;
        Capability::Update(Update::Progress(progress))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aptask_core::report::{Report, Status};

    #[test]
    fn progress_reaches_one_after_loops_calls() {
        let mut dev = Dev::new(&[ArgValue::Int(4)]);
        let mut report = Report::init();
        let mut seen = Vec::new();
        for _ in 0..4 {
            if let Capability::Update(update) = dev.process() {
                update.apply_to(&mut report);
            }
            seen.push(report.progress);
        }
        assert_eq!(seen, vec![0.25, 0.5, 0.75, 1.0]);
        assert_eq!(report.status, Status::Done);
    }
}
