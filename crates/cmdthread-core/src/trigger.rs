//! `Trigger`: el sobre que representa "este evento ocurrió".
//!
//! Rol en el flujo:
//! - Transporta un `type`, un payload mutable compartido por referencia entre
//!   todos los steps del thread, y un pequeño pub/sub para las notificaciones
//!   terminales `done` / `fail`.
//! - Lo reclama exactamente un `Hub` (claim) y recibe exactamente una
//!   notificación terminal.
//! - Tras la notificación terminal, las listas de listeners se vacían.

use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use log::{debug, error};
use serde_json::{Map, Value};
use tokio::sync::oneshot;
use uuid::Uuid;

use crate::binding::{Binding, RawEvent};
use crate::errors::FlowError;
use crate::lock;

/// Payload compartido de un trigger.
pub type Payload = Map<String, Value>;

pub type DoneListener = Arc<dyn Fn(&Trigger) + Send + Sync>;
pub type FailListener = Arc<dyn Fn(&Trigger, &FlowError) + Send + Sync>;
pub type PrehookListener = Arc<dyn Fn(&Trigger) + Send + Sync>;

/// Resultado terminal registrado en el trigger.
#[derive(Debug, Clone, PartialEq)]
pub enum TriggerOutcome {
    Done,
    Failed(FlowError),
}

#[derive(Default)]
struct TriggerState {
    dispatched: bool,
    caught: bool,
    killed: bool,
    owner: Option<String>,
    errors: Vec<FlowError>,
    done: Vec<DoneListener>,
    fail: Vec<FailListener>,
    prehook: Vec<PrehookListener>,
    outcome: Option<TriggerOutcome>,
}

struct TriggerInner {
    id: Uuid,
    trigger_type: String,
    bubbles: bool,
    parent: Option<Uuid>,
    created_at: DateTime<Utc>,
    payload: Mutex<Payload>,
    state: Mutex<TriggerState>,
}

/// Handle clonable; todos los clones apuntan al mismo trigger.
#[derive(Clone)]
pub struct Trigger {
    inner: Arc<TriggerInner>,
}

impl Trigger {
    /// Crea un trigger con payload vacío que burbujea.
    pub fn new(trigger_type: impl Into<String>) -> Self {
        Self::create(trigger_type, None, true)
    }

    pub fn with_payload(trigger_type: impl Into<String>, payload: Payload) -> Self {
        Self::create(trigger_type, Some(payload), true)
    }

    /// Constructor completo: `payload` por defecto vacío.
    pub fn create(trigger_type: impl Into<String>, payload: Option<Payload>, bubbles: bool) -> Self {
        Self::build(trigger_type.into(), payload.unwrap_or_default(), bubbles, None)
    }

    /// Trigger hijo (step `TriggerRef`): guarda el id del trigger padre.
    pub(crate) fn child_of(parent: &Trigger, trigger_type: &str, payload: Payload) -> Self {
        Self::build(trigger_type.to_string(), payload, parent.bubbles(), Some(parent.id()))
    }

    fn build(trigger_type: String, payload: Payload, bubbles: bool, parent: Option<Uuid>) -> Self {
        Self { inner: Arc::new(TriggerInner { id: Uuid::new_v4(),
                                              trigger_type,
                                              bubbles,
                                              parent,
                                              created_at: Utc::now(),
                                              payload: Mutex::new(payload),
                                              state: Mutex::new(TriggerState::default()) }) }
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn trigger_type(&self) -> &str {
        &self.inner.trigger_type
    }

    pub fn bubbles(&self) -> bool {
        self.inner.bubbles
    }

    /// Id del trigger que lanzó a éste desde un step `TriggerRef`.
    pub fn parent(&self) -> Option<Uuid> {
        self.inner.parent
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.inner.created_at
    }

    /// `true` si ambos handles apuntan al mismo trigger.
    pub fn same_as(&self, other: &Trigger) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    // ---- payload ----

    /// Copia del payload actual.
    pub fn payload(&self) -> Payload {
        lock(&self.inner.payload).clone()
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        lock(&self.inner.payload).get(key).cloned()
    }

    /// Escribe `key` en el payload compartido; last write wins.
    pub fn set(&self, key: impl Into<String>, value: Value) -> Option<Value> {
        lock(&self.inner.payload).insert(key.into(), value)
    }

    pub fn with_payload_mut<R>(&self, f: impl FnOnce(&mut Payload) -> R) -> R {
        f(&mut lock(&self.inner.payload))
    }

    // ---- ciclo de vida ----

    /// Entrega el trigger al binding. La entrega real ocurre en un tick
    /// posterior; el binding lo garantiza.
    pub fn dispatch(&self, binding: &dyn Binding) -> Result<Trigger, FlowError> {
        {
            let mut st = lock(&self.inner.state);
            if st.dispatched {
                return Err(FlowError::AlreadyDispatched { trigger_type: self.trigger_type().to_string() });
            }
            st.dispatched = true;
        }
        debug!("dispatching trigger '{}' ({})", self.trigger_type(), self.id());
        binding.deliver(RawEvent::from_trigger(self.clone()));
        Ok(self.clone())
    }

    pub fn is_dispatched(&self) -> bool {
        lock(&self.inner.state).dispatched
    }

    /// Idempotente: algún hub aceptó procesar el trigger.
    pub fn mark_caught(&self) {
        lock(&self.inner.state).caught = true;
    }

    pub fn is_caught(&self) -> bool {
        lock(&self.inner.state).caught
    }

    /// Fija el hub dueño. Sólo puede ocurrir una vez.
    pub fn claim(&self, hub_id: &str) -> Result<(), FlowError> {
        let mut st = lock(&self.inner.state);
        if let Some(owner) = &st.owner {
            return Err(FlowError::DoubleClaim { trigger_type: self.trigger_type().to_string(),
                                                owner: owner.clone() });
        }
        st.owner = Some(hub_id.to_string());
        Ok(())
    }

    pub fn owner(&self) -> Option<String> {
        lock(&self.inner.state).owner.clone()
    }

    /// Mata el thread en curso: el sequencer se detiene tras el step actual
    /// y falla con este error.
    pub fn fail(&self, error: FlowError) {
        let mut st = lock(&self.inner.state);
        st.killed = true;
        st.errors.push(error);
    }

    pub fn is_killed(&self) -> bool {
        lock(&self.inner.state).killed
    }

    pub fn push_error(&self, error: FlowError) {
        lock(&self.inner.state).errors.push(error);
    }

    pub fn errors(&self) -> Vec<FlowError> {
        lock(&self.inner.state).errors.clone()
    }

    pub fn last_error(&self) -> Option<FlowError> {
        lock(&self.inner.state).errors.last().cloned()
    }

    pub fn outcome(&self) -> Option<TriggerOutcome> {
        lock(&self.inner.state).outcome.clone()
    }

    pub fn is_terminated(&self) -> bool {
        lock(&self.inner.state).outcome.is_some()
    }

    // ---- notificaciones ----

    pub fn add_done_listener(&self, listener: DoneListener) -> Result<&Self, FlowError> {
        let mut st = lock(&self.inner.state);
        if st.done.iter().any(|l| Arc::ptr_eq(l, &listener)) {
            return Err(FlowError::DuplicateListener(format!("done listener on '{}'", self.trigger_type())));
        }
        st.done.push(listener);
        Ok(self)
    }

    pub fn add_fail_listener(&self, listener: FailListener) -> Result<&Self, FlowError> {
        let mut st = lock(&self.inner.state);
        if st.fail.iter().any(|l| Arc::ptr_eq(l, &listener)) {
            return Err(FlowError::DuplicateListener(format!("fail listener on '{}'", self.trigger_type())));
        }
        st.fail.push(listener);
        Ok(self)
    }

    pub fn add_prehook_listener(&self, listener: PrehookListener) -> Result<&Self, FlowError> {
        let mut st = lock(&self.inner.state);
        if st.prehook.iter().any(|l| Arc::ptr_eq(l, &listener)) {
            return Err(FlowError::DuplicateListener(format!("prehook listener on '{}'", self.trigger_type())));
        }
        st.prehook.push(listener);
        Ok(self)
    }

    pub fn on_done(&self, f: impl Fn(&Trigger) + Send + Sync + 'static) -> Result<&Self, FlowError> {
        self.add_done_listener(Arc::new(f))
    }

    pub fn on_fail(&self, f: impl Fn(&Trigger, &FlowError) + Send + Sync + 'static) -> Result<&Self, FlowError> {
        self.add_fail_listener(Arc::new(f))
    }

    /// Azúcar estilo promesa: sin `reject`, un fallo llama `resolve(None)`.
    pub fn then(&self, resolve: impl Fn(Option<&Trigger>) + Send + Sync + 'static) -> Result<&Self, FlowError> {
        let resolve = Arc::new(resolve);
        let on_fail = Arc::clone(&resolve);
        self.on_done(move |t| resolve(Some(t)))?
            .on_fail(move |_, _| on_fail(None))
    }

    pub fn then_or(&self,
                   resolve: impl Fn(&Trigger) + Send + Sync + 'static,
                   reject: impl Fn(&Trigger, &FlowError) + Send + Sync + 'static)
                   -> Result<&Self, FlowError> {
        self.on_done(resolve)?.on_fail(reject)
    }

    /// Adaptador al tipo asíncrono nativo: resuelve con el trigger o con el
    /// error terminal. Si el trigger ya terminó, resuelve de inmediato.
    pub fn completion(&self) -> impl Future<Output = Result<Trigger, FlowError>> + Send + 'static {
        let (tx, rx) = oneshot::channel::<Result<Trigger, FlowError>>();
        let tx = Arc::new(Mutex::new(Some(tx)));
        let settled = {
            let mut st = lock(&self.inner.state);
            match &st.outcome {
                Some(outcome) => Some(outcome.clone()),
                None => {
                    let done_tx = Arc::clone(&tx);
                    st.done.push(Arc::new(move |t: &Trigger| {
                                    if let Some(tx) = lock(&done_tx).take() {
                                        let _ = tx.send(Ok(t.clone()));
                                    }
                                }));
                    st.fail.push(Arc::new(move |_: &Trigger, e: &FlowError| {
                                    if let Some(tx) = lock(&tx).take() {
                                        let _ = tx.send(Err(e.clone()));
                                    }
                                }));
                    None
                }
            }
        };
        let trigger = self.clone();
        async move {
            match settled {
                Some(TriggerOutcome::Done) => Ok(trigger),
                Some(TriggerOutcome::Failed(e)) => Err(e),
                None => {
                    drop(trigger);
                    rx.await
                      .unwrap_or_else(|_| Err(FlowError::Killed("trigger dropped before completing".into())))
                }
            }
        }
    }

    /// Dispara los listeners de pre-ejecución (los llama el hub justo antes
    /// de arrancar el thread).
    pub fn fire_prehook(&self) {
        let listeners = lock(&self.inner.state).prehook.clone();
        for l in listeners {
            l(self);
        }
    }

    /// Notificación terminal de éxito. Devuelve `false` si el trigger ya
    /// había terminado (no-op).
    pub fn notify_done(&self) -> bool {
        let listeners = {
            let mut st = lock(&self.inner.state);
            if st.outcome.is_some() {
                return false;
            }
            st.outcome = Some(TriggerOutcome::Done);
            st.fail.clear();
            st.prehook.clear();
            std::mem::take(&mut st.done)
        };
        debug!("trigger '{}' ({}) done", self.trigger_type(), self.id());
        for l in listeners {
            l(self);
        }
        true
    }

    /// Notificación terminal de fallo. Sin fail listeners, el error se
    /// reporta por `log` para que nunca sea silencioso.
    pub fn notify_fail(&self, error: FlowError) -> bool {
        let listeners = {
            let mut st = lock(&self.inner.state);
            if st.outcome.is_some() {
                return false;
            }
            st.outcome = Some(TriggerOutcome::Failed(error.clone()));
            st.done.clear();
            st.prehook.clear();
            std::mem::take(&mut st.fail)
        };
        if listeners.is_empty() {
            error!("trigger '{}' ({}) failed with no fail listener: {error}", self.trigger_type(), self.id());
        }
        for l in listeners {
            l(self, &error);
        }
        true
    }
}

impl fmt::Debug for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let st = lock(&self.inner.state);
        f.debug_struct("Trigger")
         .field("id", &self.inner.id)
         .field("type", &self.inner.trigger_type)
         .field("dispatched", &st.dispatched)
         .field("caught", &st.caught)
         .field("owner", &st.owner)
         .field("outcome", &st.outcome)
         .finish()
    }
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.owner() {
            Some(hub) => write!(f, "Trigger [ '{}' caught by {} ]", self.trigger_type(), hub),
            None => write!(f, "Trigger [ '{}' ]", self.trigger_type()),
        }
    }
}
