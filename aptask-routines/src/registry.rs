use crate::dev::Dev;
use crate::sleep::Sleep;
use aptask_core::routine::{ArgSpec, ArgValue, RoutineInfo};
use aptask_core::RoutineRegistry;

/// Builds the compiled-in registry both `aptaskd` (for `index`) and
/// `aptask-worker` (for construction at spawn time) share.
pub fn build() -> RoutineRegistry {
    RoutineRegistry::builder()
        .register(
            RoutineInfo {
                name: "dev".to_string(),
                arguments: vec![ArgSpec::with_default("loops", ArgValue::Int(10))],
                help: "development routine: yields i/loops once per tick".to_string(),
            },
            Dev::new,
        )
        .register(
            RoutineInfo {
                name: "sleep".to_string(),
                arguments: vec![],
                help: "never completes on its own; used to exercise the abort watchdog".to_string(),
            },
            Sleep::new,
        )
        .build()
}
