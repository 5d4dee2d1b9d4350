//! `ThreadFactory`: la plantilla (lista ordenada de steps) a partir de la
//! cual un hub construye un `Thread` por cada trigger que atrapa.
//!
//! El dueño (hub) se fija una sola vez al registrar la factory; a partir de
//! ahí sólo puede construir threads para triggers reclamados por ese hub.

use std::sync::{Arc, Mutex};

use once_cell::sync::OnceCell;

use crate::errors::FlowError;
use crate::lock;
use crate::step::Step;
use crate::thread::Thread;
use crate::trigger::Trigger;

struct FactoryInner {
    id: String,
    owner: OnceCell<String>,
    steps: Mutex<Vec<Step>>,
}

#[derive(Clone)]
pub struct ThreadFactory {
    inner: Arc<FactoryInner>,
}

impl ThreadFactory {
    pub fn new(id: impl Into<String>) -> Self {
        Self::with_steps(id, Vec::new())
    }

    pub fn with_steps(id: impl Into<String>, steps: Vec<Step>) -> Self {
        Self { inner: Arc::new(FactoryInner { id: id.into(),
                                              owner: OnceCell::new(),
                                              steps: Mutex::new(steps) }) }
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn owner(&self) -> Option<&str> {
        self.inner.owner.get().map(String::as_str)
    }

    pub(crate) fn set_owner(&self, hub_id: &str) -> Result<(), FlowError> {
        self.inner.owner.set(hub_id.to_string()).map_err(|_| {
                                                    FlowError::InvalidFactory {
                                                        factory: self.id().to_string(),
                                                        reason: format!("already owned by hub '{}'",
                                                                        self.owner().unwrap_or_default()),
                                                    }
                                                })
    }

    /// Añade un step al final. Acepta un `Step`, un comando o el nombre de
    /// un tipo de trigger (se convierte en `TriggerRef`).
    pub fn append(&self, step: impl Into<Step>) -> &Self {
        lock(&self.inner.steps).push(step.into());
        self
    }

    pub fn append_all<I, S>(&self, steps: I) -> &Self
        where I: IntoIterator<Item = S>,
              S: Into<Step>
    {
        lock(&self.inner.steps).extend(steps.into_iter().map(Into::into));
        self
    }

    pub fn len(&self) -> usize {
        lock(&self.inner.steps).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.inner.steps).is_empty()
    }

    /// Copia de los steps actuales.
    pub fn steps(&self) -> Vec<Step> {
        lock(&self.inner.steps).clone()
    }

    /// Construye un thread nuevo para `trigger`. Los steps se copian: añadir
    /// steps después no afecta a threads ya construidos.
    pub fn build(&self, trigger: &Trigger) -> Result<Thread, FlowError> {
        let Some(owner) = self.owner() else {
            return Err(FlowError::AlreadyBound { factory: self.id().to_string(),
                                                 reason: "factory has no owning hub".into() });
        };
        if let Some(claimed_by) = trigger.owner() {
            if claimed_by != owner {
                return Err(FlowError::AlreadyBound { factory: self.id().to_string(),
                                                     reason: format!("trigger '{}' belongs to hub '{claimed_by}'",
                                                                     trigger.trigger_type()) });
            }
        }
        let steps: Arc<[Step]> = lock(&self.inner.steps).clone().into();
        Ok(Thread::new(self.id(), trigger.clone(), steps))
    }
}

impl std::fmt::Debug for ThreadFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadFactory")
         .field("id", &self.inner.id)
         .field("owner", &self.owner())
         .field("steps", &self.len())
         .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::step::StepKind;
    use crate::thread::ThreadStatus;

    #[test]
    fn append_accepts_functions_and_trigger_names() {
        let f = ThreadFactory::new("f");
        f.append(Step::function(&[], |_| Ok(()))).append("child").append_all(["a", "b"]);
        let kinds: Vec<_> = f.steps().iter().map(Step::kind).collect();
        assert_eq!(kinds,
                   vec![StepKind::Function, StepKind::TriggerRef, StepKind::TriggerRef, StepKind::TriggerRef]);
        assert_eq!(f.len(), 4);
    }

    #[test]
    fn build_requires_an_owner() {
        let f = ThreadFactory::new("f");
        let err = f.build(&Trigger::new("go")).unwrap_err();
        assert!(matches!(err, FlowError::AlreadyBound { .. }));
    }

    #[test]
    fn owner_is_set_once() {
        let f = ThreadFactory::new("f");
        f.set_owner("hub-a").unwrap();
        let err = f.set_owner("hub-b").unwrap_err();
        assert!(matches!(err, FlowError::InvalidFactory { .. }));
        assert_eq!(f.owner(), Some("hub-a"));
    }

    #[test]
    fn build_rejects_triggers_owned_by_other_hubs() {
        let f = ThreadFactory::with_steps("f", vec!["x".into()]);
        f.set_owner("hub-a").unwrap();

        let foreign = Trigger::new("go");
        foreign.claim("hub-b").unwrap();
        assert!(f.build(&foreign).is_err());

        let ours = Trigger::new("go");
        ours.claim("hub-a").unwrap();
        let thread = f.build(&ours).unwrap();
        assert_eq!(thread.status(), ThreadStatus::Pending);
        assert_eq!(thread.factory_id(), "f");

        // añadir después no cambia el thread ya construido
        f.append("y");
        assert_eq!(thread.steps().len(), 1);
    }
}
