use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;

use super::{ERROR_ARG, EVENT_ARGS};
use crate::errors::{FlowError, StepError};
use crate::trigger::{Payload, Trigger};

/// Servicio inyectable (cliente, repositorio, contador compartido...).
pub type Service = Arc<dyn Any + Send + Sync>;
pub type Services = HashMap<String, Service>;

/// Un argumento ya resuelto.
#[derive(Clone)]
pub enum Arg {
    Trigger(Trigger),
    Value(Value),
    Service(Service),
    Error(FlowError),
    /// Parámetro opcional (`name?`) sin valor.
    Missing,
}

impl fmt::Debug for Arg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arg::Trigger(t) => write!(f, "Trigger({})", t.trigger_type()),
            Arg::Value(v) => write!(f, "Value({v})"),
            Arg::Service(_) => f.write_str("Service(..)"),
            Arg::Error(e) => write!(f, "Error({e})"),
            Arg::Missing => f.write_str("Missing"),
        }
    }
}

/// Argumentos de un step, en el orden declarado.
#[derive(Debug, Clone)]
pub struct Args {
    step: String,
    entries: Vec<(String, Arg)>,
}

impl Args {
    pub fn new(step: impl Into<String>, entries: Vec<(String, Arg)>) -> Self {
        Self { step: step.into(),
               entries }
    }

    pub fn step(&self) -> &str {
        &self.step
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(n, _)| n.as_str())
    }

    /// Acceso posicional.
    pub fn at(&self, index: usize) -> Option<&Arg> {
        self.entries.get(index).map(|(_, a)| a)
    }

    pub fn arg(&self, name: &str) -> Option<&Arg> {
        self.entries.iter().find(|(n, _)| n == name).map(|(_, a)| a)
    }

    /// El trigger en curso; el step debe declarar `event` o `trigger`.
    pub fn trigger(&self) -> Result<&Trigger, StepError> {
        self.entries
            .iter()
            .find_map(|(_, a)| match a {
                Arg::Trigger(t) => Some(t),
                _ => None,
            })
            .ok_or_else(|| format!("step '{}' did not declare 'event'", self.step).into())
    }

    pub fn value(&self, name: &str) -> Option<&Value> {
        match self.arg(name) {
            Some(Arg::Value(v)) => Some(v),
            _ => None,
        }
    }

    /// Deserializa el valor `name` al tipo pedido.
    pub fn get<T: DeserializeOwned>(&self, name: &str) -> Result<T, StepError> {
        let value = self.value(name)
                        .ok_or_else(|| format!("step '{}' has no value for '{name}'", self.step))?;
        Ok(serde_json::from_value(value.clone())?)
    }

    pub fn service<T: Any + Send + Sync>(&self, name: &str) -> Option<Arc<T>> {
        match self.arg(name) {
            Some(Arg::Service(s)) => Arc::clone(s).downcast::<T>().ok(),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&FlowError> {
        self.entries.iter().find_map(|(_, a)| match a {
                               Arg::Error(e) => Some(e),
                               _ => None,
                           })
    }
}

/// Resuelve `names` para el step `step`.
pub fn resolve_args(step: &str,
                    names: &[String],
                    trigger: &Trigger,
                    scope: &Payload,
                    services: &Services)
                    -> Result<Args, FlowError> {
    let mut entries = Vec::with_capacity(names.len());
    for raw in names {
        let (name, optional) = match raw.strip_suffix('?') {
            Some(n) => (n, true),
            None => (raw.as_str(), false),
        };

        let arg = if EVENT_ARGS.contains(&name) {
            Arg::Trigger(trigger.clone())
        } else if name == ERROR_ARG {
            trigger.last_error().map(Arg::Error).unwrap_or(Arg::Missing)
        } else if let Some(v) = scope.get(name) {
            Arg::Value(v.clone())
        } else if let Some(v) = trigger.get(name) {
            Arg::Value(v)
        } else if let Some(s) = services.get(name) {
            Arg::Service(Arc::clone(s))
        } else if optional {
            Arg::Missing
        } else {
            return Err(FlowError::UnresolvedArgument { step: step.to_string(),
                                                       name: name.to_string() });
        };
        entries.push((name.to_string(), arg));
    }
    Ok(Args::new(step, entries))
}
