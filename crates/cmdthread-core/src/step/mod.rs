//! Definiciones relacionadas a Steps.
//!
//! Un `Step` es una unidad de trabajo dentro de un pipeline:
//! - `Function`: un `Command` (closure síncrona, closure asíncrona o tipo
//!   propio) con sus parámetros declarados.
//! - `TriggerRef`: lanza un trigger hijo y espera su resultado terminal.
//! - `ForEach`: ejecuta un cuerpo por cada elemento de una colección del
//!   payload, en secuencia o en paralelo.
//!
//! Los steps son inmutables una vez construidos; clonarlos es barato.

pub mod command;

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use crate::errors::StepError;
use crate::trigger::Payload;

pub use command::{Command, CommandResult, FnCommand, TaskCommand};

use crate::injection::Args;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepKind {
    Function,
    TriggerRef,
    ForEach,
    ForEachParallel,
}

#[derive(Clone)]
pub struct FunctionStep {
    name: Option<String>,
    command: Arc<dyn Command>,
}

impl FunctionStep {
    pub fn name(&self) -> &str {
        self.name.as_deref().unwrap_or_else(|| self.command.name())
    }

    pub fn command(&self) -> &Arc<dyn Command> {
        &self.command
    }

    pub fn params(&self) -> &[String] {
        self.command.params()
    }
}

type DetailBuilder = dyn Fn(Args) -> Result<Payload, StepError> + Send + Sync;

/// Detail calculado al lanzar el hijo: los `params` se resuelven contra el
/// trigger padre (y el scope de la iteración) igual que en un step `Function`.
#[derive(Clone)]
pub struct DynamicDetail {
    params: Vec<String>,
    build: Arc<DetailBuilder>,
}

impl DynamicDetail {
    pub fn new<F>(params: &[&str], build: F) -> Self
        where F: Fn(Args) -> Result<Payload, StepError> + Send + Sync + 'static
    {
        Self { params: params.iter().map(|p| p.to_string()).collect(),
               build: Arc::new(build) }
    }

    pub fn params(&self) -> &[String] {
        &self.params
    }

    pub fn build(&self, args: Args) -> Result<Payload, StepError> {
        (self.build)(args)
    }
}

impl fmt::Debug for DynamicDetail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DynamicDetail").field("params", &self.params).finish()
    }
}

/// Referencia a otro tipo de trigger. `detail` (y luego lo que devuelva
/// `dynamic`) se fusiona sobre el payload heredado del trigger padre.
#[derive(Debug, Clone)]
pub struct TriggerRef {
    pub trigger_type: String,
    pub detail: Payload,
    pub dynamic: Option<DynamicDetail>,
}

#[derive(Debug, Clone)]
pub struct ForEach {
    pub collection_key: String,
    pub item_alias: String,
    pub body: Box<Step>,
    pub parallel: bool,
}

#[derive(Clone)]
pub enum Step {
    Function(FunctionStep),
    TriggerRef(TriggerRef),
    ForEach(ForEach),
}

impl Step {
    /// Step síncrono con los parámetros `params`.
    pub fn function<F>(params: &[&str], f: F) -> Self
        where F: Fn(Args) -> CommandResult + Send + Sync + 'static
    {
        Self::command(FnCommand::new("function", params, f))
    }

    /// Step asíncrono: el thread espera al future devuelto.
    pub fn task<F, Fut>(params: &[&str], f: F) -> Self
        where F: Fn(Args) -> Fut + Send + Sync + 'static,
              Fut: Future<Output = CommandResult> + Send + 'static
    {
        Self::command(TaskCommand::new("task", params, f))
    }

    pub fn command(command: impl Command + 'static) -> Self {
        Step::Function(FunctionStep { name: None,
                                      command: Arc::new(command) })
    }

    pub fn trigger(trigger_type: impl Into<String>) -> Self {
        Self::trigger_with(trigger_type, Payload::new())
    }

    pub fn trigger_with(trigger_type: impl Into<String>, detail: Payload) -> Self {
        Step::TriggerRef(TriggerRef { trigger_type: trigger_type.into(),
                                      detail,
                                      dynamic: None })
    }

    /// `TriggerRef` cuyo detail se calcula a partir de los argumentos
    /// declarados en `params`.
    pub fn trigger_from<F>(trigger_type: impl Into<String>, params: &[&str], build: F) -> Self
        where F: Fn(Args) -> Result<Payload, StepError> + Send + Sync + 'static
    {
        Step::TriggerRef(TriggerRef { trigger_type: trigger_type.into(),
                                      detail: Payload::new(),
                                      dynamic: Some(DynamicDetail::new(params, build)) })
    }

    /// Nombre para logs y errores. Sólo aplica a steps `Function`.
    pub fn named(self, name: impl Into<String>) -> Self {
        match self {
            Step::Function(f) => Step::Function(FunctionStep { name: Some(name.into()),
                                                               ..f }),
            other => other,
        }
    }

    pub fn name(&self) -> String {
        match self {
            Step::Function(f) => f.name().to_string(),
            Step::TriggerRef(r) => format!("trigger:{}", r.trigger_type),
            Step::ForEach(fe) => {
                let kind = if fe.parallel { "forEachParallel" } else { "forEach" };
                format!("{kind}({} as {})", fe.collection_key, fe.item_alias)
            }
        }
    }

    pub fn kind(&self) -> StepKind {
        match self {
            Step::Function(_) => StepKind::Function,
            Step::TriggerRef(_) => StepKind::TriggerRef,
            Step::ForEach(fe) if fe.parallel => StepKind::ForEachParallel,
            Step::ForEach(_) => StepKind::ForEach,
        }
    }
}

/// Ejecuta `body` por cada elemento de `collection_key`, uno detrás de otro.
pub fn for_each(collection_key: impl Into<String>, item_alias: impl Into<String>, body: impl Into<Step>) -> Step {
    Step::ForEach(ForEach { collection_key: collection_key.into(),
                            item_alias: item_alias.into(),
                            body: Box::new(body.into()),
                            parallel: false })
}

/// Como `for_each`, pero arranca todas las iteraciones a la vez.
pub fn for_each_parallel(collection_key: impl Into<String>,
                         item_alias: impl Into<String>,
                         body: impl Into<Step>)
                         -> Step {
    Step::ForEach(ForEach { collection_key: collection_key.into(),
                            item_alias: item_alias.into(),
                            body: Box::new(body.into()),
                            parallel: true })
}

impl From<&str> for Step {
    fn from(trigger_type: &str) -> Self {
        Step::trigger(trigger_type)
    }
}

impl From<String> for Step {
    fn from(trigger_type: String) -> Self {
        Step::trigger(trigger_type)
    }
}

impl From<TriggerRef> for Step {
    fn from(r: TriggerRef) -> Self {
        Step::TriggerRef(r)
    }
}

impl From<ForEach> for Step {
    fn from(fe: ForEach) -> Self {
        Step::ForEach(fe)
    }
}

impl From<FnCommand> for Step {
    fn from(c: FnCommand) -> Self {
        Step::command(c)
    }
}

impl From<TaskCommand> for Step {
    fn from(c: TaskCommand) -> Self {
        Step::command(c)
    }
}

impl fmt::Debug for FunctionStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionStep")
         .field("name", &self.name())
         .field("params", &self.params())
         .finish()
    }
}

impl fmt::Debug for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Step::Function(s) => s.fmt(f),
            Step::TriggerRef(r) => r.fmt(f),
            Step::ForEach(fe) => fe.fmt(f),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strings_become_trigger_refs() {
        let s: Step = "itemEvent".into();
        assert_eq!(s.kind(), StepKind::TriggerRef);
        assert_eq!(s.name(), "trigger:itemEvent");
    }

    #[test]
    fn combinators_keep_their_body() {
        let s = for_each_parallel("items", "item", Step::function(&["item"], |_| Ok(())).named("push"));
        assert_eq!(s.kind(), StepKind::ForEachParallel);
        assert_eq!(s.name(), "forEachParallel(items as item)");
        let Step::ForEach(fe) = s else { panic!("expected ForEach") };
        assert_eq!(fe.body.name(), "push");
        assert_eq!(fe.body.kind(), StepKind::Function);
    }

    #[test]
    fn trigger_from_keeps_declared_params() {
        let s = Step::trigger_from("notify", &["order_id"], |_| Ok(Payload::new()));
        assert_eq!(s.kind(), StepKind::TriggerRef);
        let Step::TriggerRef(r) = s else { panic!("expected TriggerRef") };
        assert_eq!(r.dynamic.map(|d| d.params().to_vec()), Some(vec!["order_id".to_string()]));
    }

    #[test]
    fn named_only_applies_to_functions() {
        assert_eq!(Step::trigger("x").named("ignored").name(), "trigger:x");
        assert_eq!(for_each("a", "b", "x").kind(), StepKind::ForEach);
    }
}
