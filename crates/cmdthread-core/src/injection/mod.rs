//! Inyección de argumentos para steps.
//!
//! Cada step declara explícitamente los nombres de sus parámetros; el
//! resolver los busca, en orden de precedencia, en:
//! 1. nombres de convención (`event` / `trigger` → el trigger, `error` → el
//!    último error registrado),
//! 2. el scope de la iteración (`for_each`),
//! 3. el payload del trigger,
//! 4. los servicios inyectados del hub.
//!
//! Un nombre terminado en `?` es opcional.

pub mod args;
pub mod merge;

pub use args::{resolve_args, Arg, Args, Service, Services};
pub use merge::merge_payload;

/// Nombres que resuelven al trigger en curso.
pub const EVENT_ARGS: [&str; 2] = ["event", "trigger"];
/// Nombre que resuelve al último error registrado en el trigger.
pub const ERROR_ARG: &str = "error";
