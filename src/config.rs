//! Configuración central de la aplicación.
//! Carga variables de entorno (.env) y compone los `HubSettings` del motor
//! con los parámetros propios del demo.
use std::env;

use cmdthread_core::{init_dotenv, HubOptions, HubSettings};

use crate::errors::AppError;

pub const ENV_HUB_ID: &str = "CMDTHREAD_HUB_ID";

/// Configuración de la aplicación.
#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    /// Id del hub principal.
    pub hub_id: String,
    pub hub: HubSettings,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self { hub_id: "main".into(),
               hub: HubSettings::default() }
    }
}

impl AppConfig {
    /// Lee `.env` (una sola vez) y el entorno del proceso.
    pub fn from_env() -> Result<Self, AppError> {
        init_dotenv();
        let hub = HubSettings::from_env().map_err(|e| AppError::Config(e.to_string()))?;
        let hub_id = env::var(ENV_HUB_ID).ok()
                                         .filter(|v| !v.trim().is_empty())
                                         .unwrap_or_else(|| "main".into());
        Ok(Self { hub_id, hub })
    }

    pub fn hub_options(&self) -> HubOptions {
        HubOptions::with_settings(self.hub.clone())
    }
}
