//! Contrato con la capa de binding (el "transporte" de eventos).
//!
//! El motor no sabe cómo llegan los eventos: sólo registra handlers por tipo
//! y pide entregas. `LocalBus` es la implementación en memoria que usa el
//! propio workspace; entrega siempre en un tick posterior a `deliver`.

use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use log::{debug, error, warn};
use uuid::Uuid;

use crate::errors::FlowError;
use crate::trigger::{Payload, Trigger};

/// Handler registrado por un hub para un tipo de trigger.
pub type TriggerHandler = Arc<dyn Fn(RawEvent) -> Result<(), FlowError> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(Uuid);

impl HandlerId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for HandlerId {
    fn default() -> Self {
        Self::new()
    }
}

/// Evento tal como lo entrega el binding. Puede venir con un `Trigger` ya
/// adjunto o sólo con tipo + payload.
#[derive(Debug, Clone)]
pub struct RawEvent {
    pub event_type: String,
    pub payload: Payload,
    pub bubbles: bool,
    pub trigger: Option<Trigger>,
}

impl RawEvent {
    pub fn new(event_type: impl Into<String>, payload: Payload) -> Self {
        Self { event_type: event_type.into(),
               payload,
               bubbles: true,
               trigger: None }
    }

    pub fn from_trigger(trigger: Trigger) -> Self {
        Self { event_type: trigger.trigger_type().to_string(),
               payload: Payload::new(),
               bubbles: trigger.bubbles(),
               trigger: Some(trigger) }
    }

    /// Adjunta un trigger si aún no lo tiene, para que todos los handlers
    /// vean la misma instancia.
    pub fn attach(mut self) -> Self {
        if self.trigger.is_none() {
            let payload = std::mem::take(&mut self.payload);
            self.trigger = Some(Trigger::create(self.event_type.clone(), Some(payload), self.bubbles));
        }
        self
    }

    /// Devuelve el trigger adjunto o crea uno nuevo a partir del payload.
    pub fn into_trigger(self) -> Trigger {
        match self.trigger {
            Some(t) => t,
            None => Trigger::create(self.event_type, Some(self.payload), self.bubbles),
        }
    }
}

/// Lo que el motor necesita de la capa de binding.
pub trait Binding: Send + Sync {
    fn add_trigger_listener(&self, trigger_type: &str, handler: TriggerHandler) -> HandlerId;

    fn remove_trigger_listener(&self, trigger_type: &str, id: HandlerId) -> bool;

    /// Programa la entrega de `event`. Nunca debe entregar de forma síncrona
    /// dentro de esta llamada.
    fn deliver(&self, event: RawEvent);
}

#[derive(Default)]
struct BusInner {
    handlers: DashMap<String, Vec<(HandlerId, TriggerHandler)>>,
}

/// Binding en memoria sobre el runtime de tokio.
#[derive(Clone, Default)]
pub struct LocalBus {
    inner: Arc<BusInner>,
}

impl LocalBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Entrega un evento "nativo", sin trigger adjunto.
    pub fn emit(&self, event_type: impl Into<String>, payload: Payload) {
        self.deliver(RawEvent::new(event_type, payload));
    }

    pub fn listener_count(&self, trigger_type: &str) -> usize {
        self.inner.handlers.get(trigger_type).map(|h| h.len()).unwrap_or(0)
    }

    fn route(&self, event: RawEvent) {
        let event = event.attach();
        // copia de los handlers: un handler puede registrar/quitar otros
        let handlers: Vec<TriggerHandler> = self.inner
                                                .handlers
                                                .get(&event.event_type)
                                                .map(|hs| hs.iter().map(|(_, h)| Arc::clone(h)).collect())
                                                .unwrap_or_default();
        debug!("routing '{}' to {} handler(s)", event.event_type, handlers.len());

        for handler in handlers {
            if let Err(e) = handler(event.clone()) {
                error!("handler for '{}' failed: {e}", event.event_type);
            }
            if !event.bubbles && event.trigger.as_ref().is_some_and(Trigger::is_caught) {
                break;
            }
        }

        if let Some(trigger) = &event.trigger {
            if !trigger.is_caught() {
                warn!("{trigger} was never caught; is a hub listening for it on this binding?");
            }
        }
    }
}

impl Binding for LocalBus {
    fn add_trigger_listener(&self, trigger_type: &str, handler: TriggerHandler) -> HandlerId {
        let id = HandlerId::new();
        self.inner.handlers.entry(trigger_type.to_string()).or_default().push((id, handler));
        id
    }

    fn remove_trigger_listener(&self, trigger_type: &str, id: HandlerId) -> bool {
        let Some(mut handlers) = self.inner.handlers.get_mut(trigger_type) else {
            return false;
        };
        let before = handlers.len();
        handlers.retain(|(hid, _)| *hid != id);
        before != handlers.len()
    }

    fn deliver(&self, event: RawEvent) {
        match tokio::runtime::Handle::try_current() {
            Ok(rt) => {
                let bus = self.clone();
                rt.spawn(async move {
                      tokio::task::yield_now().await;
                      bus.route(event);
                  });
            }
            Err(_) => {
                let err = FlowError::Config(format!("no tokio runtime to deliver '{}'", event.event_type));
                error!("{err}");
                if let Some(trigger) = event.trigger {
                    trigger.notify_fail(err);
                }
            }
        }
    }
}

impl fmt::Debug for LocalBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let types: Vec<String> = self.inner.handlers.iter().map(|e| e.key().clone()).collect();
        f.debug_struct("LocalBus").field("types", &types).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[tokio::test]
    async fn delivery_is_deferred_past_the_call() {
        let bus = LocalBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = Arc::clone(&seen);
        bus.add_trigger_listener("ping",
                                 Arc::new(move |ev: RawEvent| {
                                     s.lock().unwrap().push(ev.event_type);
                                     Ok(())
                                 }));

        bus.emit("ping", Payload::new());
        assert!(seen.lock().unwrap().is_empty());

        for _ in 0..4 {
            tokio::task::yield_now().await;
        }
        assert_eq!(*seen.lock().unwrap(), vec!["ping".to_string()]);
    }

    #[tokio::test]
    async fn removed_handler_is_not_called() {
        let bus = LocalBus::new();
        let id = bus.add_trigger_listener("ping", Arc::new(|_: RawEvent| Ok(())));
        assert_eq!(bus.listener_count("ping"), 1);
        assert!(bus.remove_trigger_listener("ping", id));
        assert!(!bus.remove_trigger_listener("ping", id));
        assert_eq!(bus.listener_count("ping"), 0);
    }

    #[test]
    fn attach_reuses_existing_trigger() {
        let t = Trigger::new("ping");
        let ev = RawEvent::from_trigger(t.clone()).attach();
        assert!(ev.into_trigger().same_as(&t));
    }
}
