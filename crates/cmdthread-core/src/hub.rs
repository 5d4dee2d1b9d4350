//! `Hub`: registra factories por tipo de trigger, atrapa los triggers que
//! entrega el binding y mantiene el conjunto de threads vivos.
//!
//! Flujo de un evento:
//! 1. El binding llama al handler del hub con un `RawEvent`.
//! 2. `handle_event` reclama el trigger, corre el hook `pre_invoke` y, si no
//!    aborta, `invoke` construye y arranca un `Thread`.
//! 3. Al terminar, el thread vuelve por `thread_done` / `thread_fail`, que lo
//!    retiran del conjunto vivo y notifican al trigger.

use std::fmt;
use std::sync::{Arc, Mutex, Weak};

use indexmap::IndexMap;
use log::{debug, error, info, warn};
use uuid::Uuid;

use crate::binding::{Binding, HandlerId, RawEvent, TriggerHandler};
use crate::config::{HubOptions, HubSettings, PostInvokeHook, PreInvokeHook};
use crate::errors::FlowError;
use crate::factory::ThreadFactory;
use crate::lock;
use crate::registry::Registry;
use crate::step::Step;
use crate::thread::{ExecContext, Thread};
use crate::trigger::{Payload, Trigger};

struct HubInner {
    id: String,
    binding: Arc<dyn Binding>,
    ctx: Arc<ExecContext>,
    pre_invoke: Option<PreInvokeHook>,
    post_invoke: Option<PostInvokeHook>,
    registry: Arc<Registry>,
    factories: Mutex<IndexMap<String, (ThreadFactory, HandlerId)>>,
    live: Mutex<IndexMap<Uuid, Thread>>,
}

impl HubInner {
    /// Desconecta todos los listeners y libera los ids del registry.
    fn teardown(&self) {
        let factories: Vec<_> = lock(&self.factories).drain(..).collect();
        for (trigger_type, (factory, handler)) in factories {
            self.binding.remove_trigger_listener(&trigger_type, handler);
            self.registry.release(factory.id());
        }
        self.registry.release(&self.id);
    }
}

impl Drop for HubInner {
    fn drop(&mut self) {
        self.teardown();
    }
}

#[derive(Clone)]
pub struct Hub {
    inner: Arc<HubInner>,
}

impl Hub {
    pub fn new(id: impl Into<String>, binding: Arc<dyn Binding>, options: HubOptions) -> Self {
        let id = id.into();
        let HubOptions { settings,
                         services,
                         pre_invoke,
                         post_invoke,
                         registry } = options;
        let registry = registry.unwrap_or_else(|| Arc::new(Registry::new()));
        registry.register(&id, "hub");

        let ctx = Arc::new(ExecContext { hub_id: id.clone(),
                                         binding: Arc::clone(&binding),
                                         services,
                                         settings });
        Self { inner: Arc::new(HubInner { id,
                                          binding,
                                          ctx,
                                          pre_invoke,
                                          post_invoke,
                                          registry,
                                          factories: Mutex::new(IndexMap::new()),
                                          live: Mutex::new(IndexMap::new()) }) }
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn binding(&self) -> &Arc<dyn Binding> {
        &self.inner.binding
    }

    pub fn settings(&self) -> &HubSettings {
        &self.inner.ctx.settings
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.inner.registry
    }

    // ---- listeners ----

    /// Crea una factory `{hub}_{type}_factory` con `steps` y la registra
    /// para `trigger_type`.
    pub fn add_listener<I, S>(&self, trigger_type: &str, steps: I) -> Result<ThreadFactory, FlowError>
        where I: IntoIterator<Item = S>,
              S: Into<Step>
    {
        let factory = ThreadFactory::new(format!("{}_{}_factory", self.inner.id, trigger_type));
        factory.append_all(steps);
        self.add_factory(trigger_type, factory.clone())?;
        Ok(factory)
    }

    /// Registra una factory ya construida. Falla si el tipo ya tiene
    /// listener en este hub o si la factory pertenece a otro hub.
    pub fn add_factory(&self, trigger_type: &str, factory: ThreadFactory) -> Result<(), FlowError> {
        let mut factories = lock(&self.inner.factories);
        if factories.contains_key(trigger_type) {
            return Err(FlowError::DuplicateListener(format!("hub '{}' already listens for '{trigger_type}'",
                                                            self.inner.id)));
        }
        factory.set_owner(&self.inner.id)?;
        self.inner.registry.register(factory.id(), "factory");

        let hub = Arc::downgrade(&self.inner);
        let handler: TriggerHandler = Arc::new(move |event: RawEvent| match upgrade(&hub) {
                                          Some(hub) => hub.handle_event(event).map(|_| ()),
                                          None => Ok(()),
                                      });
        let handler_id = self.inner.binding.add_trigger_listener(trigger_type, handler);
        debug!("[{}] listening for '{trigger_type}' with {}", self.inner.id, factory.id());
        factories.insert(trigger_type.to_string(), (factory, handler_id));
        Ok(())
    }

    pub fn remove_listener(&self, trigger_type: &str) -> Result<ThreadFactory, FlowError> {
        let (factory, handler) = lock(&self.inner.factories).shift_remove(trigger_type)
                                                             .ok_or_else(|| FlowError::NotFound(trigger_type.to_string()))?;
        self.inner.binding.remove_trigger_listener(trigger_type, handler);
        self.inner.registry.release(factory.id());
        Ok(factory)
    }

    pub fn get_listener(&self, trigger_type: &str) -> Option<ThreadFactory> {
        lock(&self.inner.factories).get(trigger_type).map(|(f, _)| f.clone())
    }

    pub fn has_listener(&self, trigger_type: &str) -> bool {
        lock(&self.inner.factories).contains_key(trigger_type)
    }

    /// Tipos de trigger atendidos, en orden de registro.
    pub fn listener_types(&self) -> Vec<String> {
        lock(&self.inner.factories).keys().cloned().collect()
    }

    // ---- eventos ----

    /// Crea un trigger y lo despacha por el binding del hub.
    pub fn dispatch(&self, trigger_type: &str, payload: Payload) -> Result<Trigger, FlowError> {
        Trigger::with_payload(trigger_type, payload).dispatch(self.inner.binding.as_ref())
    }

    /// Handler de eventos del binding. `Ok(None)` si el hook `pre_invoke`
    /// abortó la invocación.
    pub fn handle_event(&self, event: RawEvent) -> Result<Option<Thread>, FlowError> {
        let trigger = event.into_trigger();
        let trigger_type = trigger.trigger_type().to_string();

        if let Some(owner) = trigger.owner() {
            if owner != self.inner.id {
                return Err(FlowError::CrossHubClaim { trigger_type,
                                                      owner,
                                                      hub: self.inner.id.clone() });
            }
        }
        let Some(factory) = self.get_listener(&trigger_type) else {
            return Err(FlowError::UnregisteredTrigger { trigger_type,
                                                        hub: self.inner.id.clone() });
        };

        trigger.claim(&self.inner.id)?;
        trigger.mark_caught();

        if let Some(pre) = &self.inner.pre_invoke {
            if pre(&trigger) {
                debug!("[{}] pre_invoke aborted '{trigger_type}'", self.inner.id);
                return Ok(None);
            }
        }

        let thread = match self.invoke(&trigger, &factory) {
            Ok(thread) => thread,
            Err(e) => {
                trigger.notify_fail(e.clone());
                return Err(e);
            }
        };

        if let Some(post) = &self.inner.post_invoke {
            post(&trigger, &thread);
        }
        Ok(Some(thread))
    }

    /// Construye un thread para `trigger`, lo añade al conjunto vivo y lo
    /// arranca.
    pub fn invoke(&self, trigger: &Trigger, factory: &ThreadFactory) -> Result<Thread, FlowError> {
        let thread = factory.build(trigger)?;
        let thread_id = thread.id();
        self.inner.registry.register(&thread_id.to_string(), "thread");
        lock(&self.inner.live).insert(thread_id, thread.clone());

        trigger.fire_prehook();

        let done_hub = Arc::downgrade(&self.inner);
        let fail_hub = Weak::clone(&done_hub);
        let started = thread.run(Arc::clone(&self.inner.ctx),
                                 move |t| match upgrade(&done_hub) {
                                     Some(hub) => {
                                         if let Err(e) = hub.thread_done(t) {
                                             error!("[{}] {e}", hub.id());
                                         }
                                     }
                                     None => {
                                         t.trigger().notify_done();
                                     }
                                 },
                                 move |t, err| match upgrade(&fail_hub) {
                                     Some(hub) => {
                                         if let Err(e) = hub.thread_fail(t, err) {
                                             error!("[{}] {e}", hub.id());
                                         }
                                     }
                                     None => {
                                         t.trigger().notify_fail(err);
                                     }
                                 });

        if let Err(e) = started {
            self.reap(&thread)?;
            return Err(e);
        }
        info!("[{}] started thread {thread_id} for '{}'", self.inner.id, trigger.trigger_type());
        Ok(thread)
    }

    pub fn thread_done(&self, thread: &Thread) -> Result<(), FlowError> {
        self.reap(thread)?;
        debug!("[{}] thread {} done", self.inner.id, thread.id());
        thread.trigger().notify_done();
        Ok(())
    }

    pub fn thread_fail(&self, thread: &Thread, error: FlowError) -> Result<(), FlowError> {
        self.reap(thread)?;
        if self.inner.ctx.settings.log_failures {
            warn!("[{}] thread {} for '{}' failed: {error}",
                  self.inner.id,
                  thread.id(),
                  thread.trigger().trigger_type());
        }
        thread.trigger().notify_fail(error);
        Ok(())
    }

    fn reap(&self, thread: &Thread) -> Result<(), FlowError> {
        lock(&self.inner.live).shift_remove(&thread.id())
                              .ok_or_else(|| FlowError::UnknownThread(thread.id().to_string()))?;
        self.inner.registry.release(&thread.id().to_string());
        Ok(())
    }

    // ---- inspección ----

    pub fn live_threads(&self) -> Vec<Thread> {
        lock(&self.inner.live).values().cloned().collect()
    }

    pub fn live_thread_ids(&self) -> Vec<Uuid> {
        lock(&self.inner.live).keys().copied().collect()
    }

    /// Desconecta el hub del binding y libera sus ids. Los threads vivos
    /// terminan igual y notifican a sus triggers.
    pub fn destroy(&self) {
        self.inner.teardown();
    }
}

fn upgrade(hub: &Weak<HubInner>) -> Option<Hub> {
    hub.upgrade().map(|inner| Hub { inner })
}

impl fmt::Debug for Hub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hub")
         .field("id", &self.inner.id)
         .field("listeners", &self.listener_types())
         .field("live", &lock(&self.inner.live).len())
         .field("settings", &self.inner.ctx.settings)
         .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binding::LocalBus;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn hub(id: &str, bus: &LocalBus) -> Hub {
        Hub::new(id, Arc::new(bus.clone()), HubOptions::new())
    }

    #[test]
    fn listeners_are_unique_per_type() {
        let bus = LocalBus::new();
        let h = hub("h", &bus);
        let factory = h.add_listener("save", ["child"]).unwrap();
        assert_eq!(factory.id(), "h_save_factory");
        assert_eq!(factory.owner(), Some("h"));
        assert_eq!(bus.listener_count("save"), 1);

        let err = h.add_listener("save", Vec::<Step>::new()).unwrap_err();
        assert!(matches!(err, FlowError::DuplicateListener(_)));
        assert!(h.registry().contains("h_save_factory"));
    }

    #[test]
    fn owned_factory_cannot_join_another_hub() {
        let bus = LocalBus::new();
        let a = hub("a", &bus);
        let b = hub("b", &bus);
        let factory = a.add_listener("save", Vec::<Step>::new()).unwrap();
        let err = b.add_factory("save", factory).unwrap_err();
        assert!(matches!(err, FlowError::InvalidFactory { .. }));
        assert!(!b.has_listener("save"));
    }

    #[test]
    fn remove_listener_unwires_the_binding() {
        let bus = LocalBus::new();
        let h = hub("h", &bus);
        h.add_listener("save", Vec::<Step>::new()).unwrap();
        h.remove_listener("save").unwrap();
        assert_eq!(bus.listener_count("save"), 0);
        assert!(!h.registry().contains("h_save_factory"));
        assert_eq!(h.remove_listener("save").unwrap_err(), FlowError::NotFound("save".into()));
    }

    #[test]
    fn unregistered_trigger_creates_no_thread() {
        let bus = LocalBus::new();
        let h = hub("h", &bus);
        let err = h.handle_event(RawEvent::new("nobody", Payload::new())).unwrap_err();
        assert_eq!(err,
                   FlowError::UnregisteredTrigger { trigger_type: "nobody".into(),
                                                    hub: "h".into() });
        assert!(h.live_threads().is_empty());
    }

    #[test]
    fn trigger_owned_elsewhere_is_a_cross_hub_claim() {
        let bus = LocalBus::new();
        let h = hub("h", &bus);
        h.add_listener("save", Vec::<Step>::new()).unwrap();
        let trigger = Trigger::new("save");
        trigger.claim("other").unwrap();

        let err = h.handle_event(RawEvent::from_trigger(trigger)).unwrap_err();
        assert!(matches!(err, FlowError::CrossHubClaim { .. }));
    }

    #[test]
    fn pre_invoke_can_abort() {
        let bus = LocalBus::new();
        let h = Hub::new("h", Arc::new(bus.clone()), HubOptions::new().pre_invoke(|_| true));
        h.add_listener("save", Vec::<Step>::new()).unwrap();
        let trigger = Trigger::new("save");

        let outcome = h.handle_event(RawEvent::from_trigger(trigger.clone())).unwrap();
        assert!(outcome.is_none());
        assert!(trigger.is_caught());
        assert!(h.live_threads().is_empty());
    }

    #[tokio::test]
    async fn thread_leaves_the_live_set_when_it_finishes() {
        let bus = LocalBus::new();
        let h = hub("h", &bus);
        let prehook = Arc::new(AtomicBool::new(false));
        h.add_listener("save", [Step::function(&[], |_| Ok(()))]).unwrap();

        let trigger = Trigger::new("save");
        let p = Arc::clone(&prehook);
        trigger.add_prehook_listener(Arc::new(move |_: &Trigger| p.store(true, Ordering::SeqCst)))
               .unwrap();
        let pending = trigger.completion();
        let thread = h.handle_event(RawEvent::from_trigger(trigger.clone())).unwrap().unwrap();
        assert_eq!(h.live_thread_ids(), vec![thread.id()]);
        assert!(prehook.load(Ordering::SeqCst));

        pending.await.unwrap();
        assert!(h.live_threads().is_empty());
        assert!(!h.registry().contains(&thread.id().to_string()));
        assert_eq!(h.thread_done(&thread).unwrap_err(), FlowError::UnknownThread(thread.id().to_string()));
    }

    #[test]
    fn destroy_releases_everything() {
        let bus = LocalBus::new();
        let registry = Arc::new(Registry::new());
        let h = Hub::new("h", Arc::new(bus.clone()), HubOptions::new().registry(Arc::clone(&registry)));
        h.add_listener("save", Vec::<Step>::new()).unwrap();
        assert_eq!(registry.len(), 2);

        h.destroy();
        assert!(registry.is_empty());
        assert_eq!(bus.listener_count("save"), 0);
    }

    #[test]
    fn dropping_the_hub_releases_its_id() {
        let registry = Arc::new(Registry::new());
        {
            let _h = Hub::new("h", Arc::new(LocalBus::new()), HubOptions::new().registry(Arc::clone(&registry)));
            assert!(registry.contains("h"));
        }
        assert!(!registry.contains("h"));
    }
}
