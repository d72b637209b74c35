use crate::report::Capability;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// A positional argument value. Routines bind arguments by index, never by
/// name, so this stays a plain value type with no identity of its own.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ArgValue {
    Int(i64),
    Float(f64),
    Str(String),
    Bool(bool),
}

impl fmt::Display for ArgValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgValue::Int(v) => write!(f, "{}", v),
            ArgValue::Float(v) => write!(f, "{}", v),
            ArgValue::Str(v) => write!(f, "{}", v),
            ArgValue::Bool(v) => write!(f, "{}", v),
        }
    }
}

/// One declared parameter of a routine's signature. `default: None` marks a
/// required parameter: there is no string sentinel to compare against, just
/// the absence of a value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArgSpec {
    pub name: String,
    pub default: Option<ArgValue>,
}

impl ArgSpec {
    pub fn required(name: impl Into<String>) -> Self {
        ArgSpec {
            name: name.into(),
            default: None,
        }
    }

    pub fn with_default(name: impl Into<String>, default: ArgValue) -> Self {
        ArgSpec {
            name: name.into(),
            default: Some(default),
        }
    }
}

/// The immutable, per-task descriptor resolved by the host at `start` time
/// and handed to the worker across the spawn boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutineDescriptor {
    pub name: String,
    pub arguments: Vec<ArgValue>,
}

/// An entry in the task index returned by the `index` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutineInfo {
    pub name: String,
    pub arguments: Vec<ArgSpec>,
    pub help: String,
}

/// Failure modes of argument resolution, surfaced to `Manager::handle_request`
/// as validation errors, never as a panic.
#[derive(Debug, Clone)]
pub enum ArgError {
    UnknownRoutine,
    MissingRequired(String),
    TooManyArguments,
}

/// A routine is polymorphic over three optional capabilities. The host makes
/// no assumption that any of them exist; the default implementations are the
/// "not implemented" fallback the worker loop translates into a no-op (for
/// `initialize`/`process`) or a forced termination (for `abort`).
pub trait Routine: Send {
    fn initialize(&mut self) -> Capability {
        Capability::NotImplemented
    }

    fn process(&mut self) -> Capability {
        Capability::NotImplemented
    }

    fn abort(&mut self) -> Capability {
        Capability::NotImplemented
    }
}

type Constructor = Box<dyn Fn(&[ArgValue]) -> Box<dyn Routine> + Send + Sync>;

struct Entry {
    info: RoutineInfo,
    ctor: Constructor,
}

/// The host's compiled-in replacement for scanning a user-supplied routine
/// directory. Populated once at process start by both `aptaskd` (to answer
/// `index`) and `aptask-worker` (to construct the routine named in its
/// handshake).
pub struct RoutineRegistry {
    entries: HashMap<String, Entry>,
}

impl RoutineRegistry {
    pub fn builder() -> RoutineRegistryBuilder {
        RoutineRegistryBuilder {
            entries: HashMap::new(),
        }
    }

    pub fn index(&self) -> Vec<RoutineInfo> {
        let mut infos: Vec<RoutineInfo> = self.entries.values().map(|e| e.info.clone()).collect();
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        infos
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Binds `supplied` positionally against the routine's declared argument
    /// spec, filling missing trailing positions from their declared
    /// defaults. Rejects `start` requests that leave a required position
    /// unfilled.
    pub fn resolve_arguments(
        &self,
        name: &str,
        supplied: &[ArgValue],
    ) -> Result<Vec<ArgValue>, ArgError> {
        let entry = self.entries.get(name).ok_or(ArgError::UnknownRoutine)?;
        if supplied.len() > entry.info.arguments.len() {
            return Err(ArgError::TooManyArguments);
        }
        let mut resolved = Vec::with_capacity(entry.info.arguments.len());
        for (i, spec) in entry.info.arguments.iter().enumerate() {
            if let Some(value) = supplied.get(i) {
                resolved.push(value.clone());
            } else if let Some(default) = &spec.default {
                resolved.push(default.clone());
            } else {
                return Err(ArgError::MissingRequired(spec.name.clone()));
            }
        }
        Ok(resolved)
    }

    pub fn construct(&self, name: &str, arguments: &[ArgValue]) -> Result<Box<dyn Routine>, ArgError> {
        let entry = self.entries.get(name).ok_or(ArgError::UnknownRoutine)?;
        Ok((entry.ctor)(arguments))
    }
}

pub struct RoutineRegistryBuilder {
    entries: HashMap<String, Entry>,
}

impl RoutineRegistryBuilder {
    pub fn register<F>(mut self, info: RoutineInfo, ctor: F) -> Self
    where
        F: Fn(&[ArgValue]) -> Box<dyn Routine> + Send + Sync + 'static,
    {
        let name = info.name.clone();
        self.entries.insert(
            name,
            Entry {
                info,
                ctor: Box::new(ctor),
            },
        );
        self
    }

    pub fn build(self) -> RoutineRegistry {
        RoutineRegistry {
            entries: self.entries,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Noop;
    impl Routine for Noop {}

    fn registry() -> RoutineRegistry {
        RoutineRegistry::builder()
            .register(
                RoutineInfo {
                    name: "dev".to_string(),
                    arguments: vec![ArgSpec::with_default("loops", ArgValue::Int(10))],
                    help: "development routine".to_string(),
                },
                |_args| Box::new(Noop),
            )
            .build()
    }

    #[test]
    fn resolves_defaults_when_nothing_supplied() {
        let reg = registry();
        let args = reg.resolve_arguments("dev", &[]).unwrap();
        assert_eq!(args, vec![ArgValue::Int(10)]);
    }

    #[test]
    fn resolves_supplied_overrides_default() {
        let reg = registry();
        let args = reg.resolve_arguments("dev", &[ArgValue::Int(4)]).unwrap();
        assert_eq!(args, vec![ArgValue::Int(4)]);
    }

    #[test]
    fn unknown_routine_is_an_error() {
        let reg = registry();
        assert!(matches!(
            reg.resolve_arguments("nope", &[]),
            Err(ArgError::UnknownRoutine)
        ));
    }

    #[test]
    fn missing_required_argument_is_rejected() {
        let reg = RoutineRegistry::builder()
            .register(
                RoutineInfo {
                    name: "needs_arg".to_string(),
                    arguments: vec![ArgSpec::required("path")],
                    help: String::new(),
                },
                |_args| Box::new(Noop),
            )
            .build();
        assert!(matches!(
            reg.resolve_arguments("needs_arg", &[]),
            Err(ArgError::MissingRequired(_))
        ));
    }
}
