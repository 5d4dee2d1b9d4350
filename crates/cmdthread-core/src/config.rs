//! Configuración del hub.
//!
//! `HubSettings` es la parte serializable (se puede leer de entorno o de un
//! JSON); `HubOptions` añade lo que no se serializa: servicios inyectados,
//! hooks pre/post invoke y el registry de ids.

use std::any::Any;
use std::env;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use dotenvy::dotenv;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::errors::FlowError;
use crate::injection::Services;
use crate::registry::Registry;
use crate::thread::Thread;
use crate::trigger::Trigger;

pub const DEFAULT_TIMEOUT_MS: u64 = 5000;

pub const ENV_TIMEOUT_MS: &str = "CMDTHREAD_TIMEOUT_MS";
pub const ENV_THROW_KILLS_THREAD: &str = "CMDTHREAD_THROW_KILLS_THREAD";
pub const ENV_LOG_FAILURES: &str = "CMDTHREAD_LOG_FAILURES";
pub const ENV_WARN_ON_DETAIL_OVERWRITE: &str = "CMDTHREAD_WARN_ON_DETAIL_OVERWRITE";

// Carga perezosa del archivo .env una sola vez.
static DOTENV_LOADED: Lazy<()> = Lazy::new(|| {
    let _ = dotenv(); // ignora error si no existe .env
});

/// Forzar carga temprana de .env desde aplicaciones externas si se desea.
pub fn init_dotenv() {
    Lazy::force(&DOTENV_LOADED);
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HubSettings {
    /// Tiempo máximo de un thread antes de forzar `Failed` con `Timeout`.
    pub timeout_ms: u64,
    /// Si un fallo de step termina el thread entero (`true`) o sólo se
    /// registra en el trigger y el thread sigue con el siguiente step.
    pub throw_kills_thread: bool,
    /// Reporta por `log` cada thread fallido.
    pub log_failures: bool,
    /// Avisa cuando el detail de un `TriggerRef` pisa claves del payload padre.
    pub warn_on_detail_overwrite: bool,
}

impl Default for HubSettings {
    fn default() -> Self {
        Self { timeout_ms: DEFAULT_TIMEOUT_MS,
               throw_kills_thread: true,
               log_failures: true,
               warn_on_detail_overwrite: false }
    }
}

impl HubSettings {
    /// Lee la configuración de entorno (tras cargar `.env`); las variables
    /// ausentes toman el valor por defecto.
    pub fn from_env() -> Result<Self, FlowError> {
        Lazy::force(&DOTENV_LOADED);
        Self::from_vars(|key| env::var(key).ok())
    }

    pub(crate) fn from_vars(get: impl Fn(&str) -> Option<String>) -> Result<Self, FlowError> {
        let defaults = Self::default();
        let timeout_ms = match get(ENV_TIMEOUT_MS) {
            Some(v) => v.trim()
                        .parse::<u64>()
                        .map_err(|_| FlowError::Config(format!("{ENV_TIMEOUT_MS} is not a number: '{v}'")))?,
            None => defaults.timeout_ms,
        };
        Ok(Self { timeout_ms,
                  throw_kills_thread: parse_flag(&get, ENV_THROW_KILLS_THREAD, defaults.throw_kills_thread)?,
                  log_failures: parse_flag(&get, ENV_LOG_FAILURES, defaults.log_failures)?,
                  warn_on_detail_overwrite: parse_flag(&get,
                                                       ENV_WARN_ON_DETAIL_OVERWRITE,
                                                       defaults.warn_on_detail_overwrite)? })
    }

    /// Timeout efectivo en ms: `0` equivale a "sin configurar" y toma el
    /// valor por defecto.
    pub fn effective_timeout_ms(&self) -> u64 {
        if self.timeout_ms == 0 {
            DEFAULT_TIMEOUT_MS
        } else {
            self.timeout_ms
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.effective_timeout_ms())
    }
}

fn parse_flag(get: &impl Fn(&str) -> Option<String>, key: &str, default: bool) -> Result<bool, FlowError> {
    let Some(raw) = get(key) else {
        return Ok(default);
    };
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(FlowError::Config(format!("{key} is not a boolean: '{raw}'"))),
    }
}

/// Devuelve `true` para abortar la invocación.
pub type PreInvokeHook = Arc<dyn Fn(&Trigger) -> bool + Send + Sync>;
pub type PostInvokeHook = Arc<dyn Fn(&Trigger, &Thread) + Send + Sync>;

#[derive(Clone, Default)]
pub struct HubOptions {
    pub settings: HubSettings,
    pub services: Services,
    pub pre_invoke: Option<PreInvokeHook>,
    pub post_invoke: Option<PostInvokeHook>,
    /// Registry compartido; si falta, el hub crea el suyo.
    pub registry: Option<Arc<Registry>>,
}

impl HubOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_settings(settings: HubSettings) -> Self {
        Self { settings,
               ..Self::default() }
    }

    pub fn timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.settings.timeout_ms = timeout_ms;
        self
    }

    pub fn throw_kills_thread(mut self, value: bool) -> Self {
        self.settings.throw_kills_thread = value;
        self
    }

    pub fn log_failures(mut self, value: bool) -> Self {
        self.settings.log_failures = value;
        self
    }

    pub fn warn_on_detail_overwrite(mut self, value: bool) -> Self {
        self.settings.warn_on_detail_overwrite = value;
        self
    }

    /// Registra un servicio resoluble por nombre como argumento de step.
    pub fn service<T: Any + Send + Sync>(mut self, name: impl Into<String>, service: T) -> Self {
        self.services.insert(name.into(), Arc::new(service));
        self
    }

    /// Como `service`, pero conserva el `Arc` para quien lo registra.
    pub fn shared_service<T: Any + Send + Sync>(mut self, name: impl Into<String>, service: Arc<T>) -> Self {
        self.services.insert(name.into(), service);
        self
    }

    pub fn pre_invoke(mut self, hook: impl Fn(&Trigger) -> bool + Send + Sync + 'static) -> Self {
        self.pre_invoke = Some(Arc::new(hook));
        self
    }

    pub fn post_invoke(mut self, hook: impl Fn(&Trigger, &Thread) + Send + Sync + 'static) -> Self {
        self.post_invoke = Some(Arc::new(hook));
        self
    }

    pub fn registry(mut self, registry: Arc<Registry>) -> Self {
        self.registry = Some(registry);
        self
    }
}

impl fmt::Debug for HubOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HubOptions")
         .field("settings", &self.settings)
         .field("services", &self.services.keys().collect::<Vec<_>>())
         .field("pre_invoke", &self.pre_invoke.is_some())
         .field("post_invoke", &self.post_invoke.is_some())
         .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn vars(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn missing_vars_fall_back_to_defaults() {
        let s = HubSettings::from_vars(vars(&[])).unwrap();
        assert_eq!(s, HubSettings::default());
        assert_eq!(s.timeout(), Duration::from_millis(5000));
    }

    #[test]
    fn vars_override_defaults() {
        let s = HubSettings::from_vars(vars(&[(ENV_TIMEOUT_MS, "250"),
                                              (ENV_THROW_KILLS_THREAD, "false"),
                                              (ENV_WARN_ON_DETAIL_OVERWRITE, "1")])).unwrap();
        assert_eq!(s.timeout_ms, 250);
        assert!(!s.throw_kills_thread);
        assert!(s.log_failures);
        assert!(s.warn_on_detail_overwrite);
    }

    #[test]
    fn zero_timeout_falls_back_to_default() {
        let s = HubSettings::from_vars(vars(&[(ENV_TIMEOUT_MS, "0")])).unwrap();
        assert_eq!(s.effective_timeout_ms(), DEFAULT_TIMEOUT_MS);
        assert_eq!(s.timeout(), Duration::from_millis(DEFAULT_TIMEOUT_MS));
        let opts = HubOptions::new().timeout_ms(0);
        assert_eq!(opts.settings.timeout(), Duration::from_millis(DEFAULT_TIMEOUT_MS));
    }

    #[test]
    fn bad_values_are_config_errors() {
        let err = HubSettings::from_vars(vars(&[(ENV_TIMEOUT_MS, "soon")])).unwrap_err();
        assert!(matches!(err, FlowError::Config(_)));
        let err = HubSettings::from_vars(vars(&[(ENV_LOG_FAILURES, "maybe")])).unwrap_err();
        assert!(matches!(err, FlowError::Config(_)));
    }

    #[test]
    fn settings_deserialize_with_defaults() {
        let s: HubSettings = serde_json::from_str(r#"{"timeout_ms": 50}"#).unwrap();
        assert_eq!(s.timeout_ms, 50);
        assert!(s.throw_kills_thread);
    }
}
