//! cmdthread: aplicación sobre `cmdthread-core`.
//!
//! - Expone `errors` con el error de aplicación (`AppError`).
//! - Expone `config` para leer la configuración del hub desde el entorno.
//! - Expone `orders`, un pipeline de ejemplo (pedido → reserva por ítem →
//!   notificación) que usa el binario `cmdthread-demo`.

pub mod config;
pub mod errors;
pub mod orders;

pub use cmdthread_core;
