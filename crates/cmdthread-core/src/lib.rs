//! cmdthread-core: motor de command-threads dirigido por eventos.
//!
//! Un `Hub` escucha tipos de trigger en un `Binding`; por cada trigger que
//! atrapa, su `ThreadFactory` construye un `Thread` que recorre los steps en
//! orden (funciones, triggers hijos, `for_each` secuencial o paralelo) y
//! reporta `done` o `fail` exactamente una vez al trigger.
pub mod binding;
pub mod config;
pub mod errors;
pub mod factory;
pub mod hub;
pub mod injection;
pub mod registry;
pub mod step;
pub mod thread;
pub mod trigger;

use std::sync::{Mutex, MutexGuard, PoisonError};

pub use binding::{Binding, HandlerId, LocalBus, RawEvent, TriggerHandler};
pub use config::{init_dotenv, HubOptions, HubSettings};
pub use errors::{FlowError, StepError};
pub use factory::ThreadFactory;
pub use hub::Hub;
pub use injection::{merge_payload, resolve_args, Arg, Args, Services};
pub use registry::Registry;
pub use step::{for_each, for_each_parallel, Command, CommandResult, FnCommand, Step, StepKind, TaskCommand};
pub use thread::{Thread, ThreadStatus};
pub use trigger::{Payload, Trigger, TriggerOutcome};

/// Los mutex internos sólo protegen estado corto; un panic en un listener
/// no debe dejar inutilizable al trigger o al hub.
pub(crate) fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}
