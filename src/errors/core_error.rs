use cmdthread_core::FlowError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Error del motor: {0}")]
    Flow(#[from] FlowError),
    #[error("Error en IO: {0}")]
    Io(#[from] std::io::Error),
    #[error("Error de configuración: {0}")]
    Config(String),
    #[error("Pedido inválido: {0}")]
    InvalidOrder(String),
}
