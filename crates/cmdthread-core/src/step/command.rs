//! `Command`: la unidad de trabajo que ejecuta un step `Function`.
//!
//! Las closures síncronas y asíncronas se adaptan con `FnCommand` y
//! `TaskCommand`; los comandos con estado implementan el trait directamente.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;

use crate::errors::StepError;
use crate::injection::Args;

pub type CommandResult = Result<(), StepError>;

#[async_trait]
pub trait Command: Send + Sync {
    /// Nombre usado en logs y errores.
    fn name(&self) -> &str;

    /// Nombres de los parámetros que el resolver debe inyectar, en orden.
    fn params(&self) -> &[String];

    async fn execute(&self, args: Args) -> CommandResult;
}

type SyncFn = dyn Fn(Args) -> CommandResult + Send + Sync;
type CommandFuture = Pin<Box<dyn Future<Output = CommandResult> + Send>>;
type AsyncFn = dyn Fn(Args) -> CommandFuture + Send + Sync;

/// Closure síncrona: termina en el mismo tick.
pub struct FnCommand {
    name: String,
    params: Vec<String>,
    f: Arc<SyncFn>,
}

impl FnCommand {
    pub fn new<F>(name: impl Into<String>, params: &[&str], f: F) -> Self
        where F: Fn(Args) -> CommandResult + Send + Sync + 'static
    {
        Self { name: name.into(),
               params: params.iter().map(|p| p.to_string()).collect(),
               f: Arc::new(f) }
    }
}

#[async_trait]
impl Command for FnCommand {
    fn name(&self) -> &str {
        &self.name
    }

    fn params(&self) -> &[String] {
        &self.params
    }

    async fn execute(&self, args: Args) -> CommandResult {
        (self.f)(args)
    }
}

/// Closure que devuelve un future; el thread espera a que se resuelva.
pub struct TaskCommand {
    name: String,
    params: Vec<String>,
    f: Arc<AsyncFn>,
}

impl TaskCommand {
    pub fn new<F, Fut>(name: impl Into<String>, params: &[&str], f: F) -> Self
        where F: Fn(Args) -> Fut + Send + Sync + 'static,
              Fut: Future<Output = CommandResult> + Send + 'static
    {
        Self { name: name.into(),
               params: params.iter().map(|p| p.to_string()).collect(),
               f: Arc::new(move |args| -> CommandFuture { Box::pin(f(args)) }) }
    }
}

#[async_trait]
impl Command for TaskCommand {
    fn name(&self) -> &str {
        &self.name
    }

    fn params(&self) -> &[String] {
        &self.params
    }

    async fn execute(&self, args: Args) -> CommandResult {
        (self.f)(args).await
    }
}

impl fmt::Debug for FnCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnCommand").field("name", &self.name).field("params", &self.params).finish()
    }
}

impl fmt::Debug for TaskCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskCommand").field("name", &self.name).field("params", &self.params).finish()
    }
}
