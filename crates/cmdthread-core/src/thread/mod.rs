//! `Thread`: una ejecución de un pipeline contra un trigger concreto.
//!
//! Estados: `Pending -> Running -> {Done, Failed}`. La transición a un
//! estado terminal ocurre exactamente una vez; quien la gana es el único que
//! reporta al hub.

mod exec;

use std::fmt;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::binding::Binding;
use crate::config::HubSettings;
use crate::errors::FlowError;
use crate::injection::Services;
use crate::lock;
use crate::step::Step;
use crate::trigger::{Payload, Trigger};

use exec::run_step;

/// Estado de un thread.
///
/// Las transiciones válidas son:
/// - `Pending` -> `Running`
/// - `Running` -> `Done`
/// - `Running` -> `Failed`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ThreadStatus {
    Pending,
    Running,
    Done,
    Failed,
}

impl ThreadStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, ThreadStatus::Done | ThreadStatus::Failed)
    }
}

/// Lo que un thread necesita del hub que lo lanza.
pub(crate) struct ExecContext {
    pub hub_id: String,
    pub binding: Arc<dyn Binding>,
    pub services: Services,
    pub settings: HubSettings,
}

struct ThreadState {
    status: ThreadStatus,
    cursor: usize,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
}

struct ThreadInner {
    id: Uuid,
    factory_id: String,
    trigger: Trigger,
    steps: Arc<[Step]>,
    state: Mutex<ThreadState>,
}

#[derive(Clone)]
pub struct Thread {
    inner: Arc<ThreadInner>,
}

impl Thread {
    pub(crate) fn new(factory_id: &str, trigger: Trigger, steps: Arc<[Step]>) -> Self {
        Self { inner: Arc::new(ThreadInner { id: Uuid::new_v4(),
                                             factory_id: factory_id.to_string(),
                                             trigger,
                                             steps,
                                             state: Mutex::new(ThreadState { status: ThreadStatus::Pending,
                                                                             cursor: 0,
                                                                             started_at: None,
                                                                             finished_at: None }) }) }
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn factory_id(&self) -> &str {
        &self.inner.factory_id
    }

    pub fn trigger(&self) -> &Trigger {
        &self.inner.trigger
    }

    pub fn steps(&self) -> &[Step] {
        &self.inner.steps
    }

    pub fn status(&self) -> ThreadStatus {
        lock(&self.inner.state).status
    }

    /// Índice del step en curso (o del último ejecutado).
    pub fn cursor(&self) -> usize {
        lock(&self.inner.state).cursor
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        lock(&self.inner.state).started_at
    }

    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        lock(&self.inner.state).finished_at
    }

    /// Arranca el thread en el runtime actual. El timeout empieza aquí.
    ///
    /// `on_done` / `on_fail` se llaman como mucho una vez, y nunca ambos.
    pub(crate) fn run<D, F>(&self, ctx: Arc<ExecContext>, on_done: D, on_fail: F) -> Result<(), FlowError>
        where D: FnOnce(&Thread) + Send + 'static,
              F: FnOnce(&Thread, FlowError) + Send + 'static
    {
        let rt = tokio::runtime::Handle::try_current().map_err(|_| {
                                                          FlowError::Config("threads need a tokio runtime".into())
                                                      })?;
        {
            let mut st = lock(&self.inner.state);
            if st.status != ThreadStatus::Pending {
                return Err(FlowError::InvalidState(format!("thread {} already started", self.inner.id)));
            }
            st.status = ThreadStatus::Running;
            st.started_at = Some(Utc::now());
        }

        let thread = self.clone();
        let timeout = ctx.settings.timeout();
        let timeout_ms = ctx.settings.effective_timeout_ms();
        rt.spawn(async move {
              let worker = tokio::spawn(walk(thread.clone(), ctx));
              // si vence el timeout, el worker sigue vivo pero su resultado se descarta
              let outcome = match tokio::time::timeout(timeout, worker).await {
                  Ok(Ok(result)) => result,
                  Ok(Err(join)) => Err(FlowError::StepExecution { step: thread.current_step_name(),
                                                                  message: format!("step panicked: {join}") }),
                  Err(_) => Err(FlowError::Timeout { trigger_type: thread.trigger().trigger_type().to_string(),
                                                     timeout_ms }),
              };
              match outcome {
                  Ok(()) => {
                      if thread.finish(ThreadStatus::Done) {
                          on_done(&thread);
                      }
                  }
                  Err(e) => {
                      if thread.finish(ThreadStatus::Failed) {
                          on_fail(&thread, e);
                      }
                  }
              }
          });
        Ok(())
    }

    /// Transición terminal; devuelve `false` si ya había terminado.
    fn finish(&self, status: ThreadStatus) -> bool {
        let mut st = lock(&self.inner.state);
        if st.status.is_terminal() {
            return false;
        }
        st.status = status;
        st.finished_at = Some(Utc::now());
        true
    }

    /// Mueve el cursor; `false` si el thread ya terminó (timeout) y no debe
    /// arrancar más steps.
    fn advance(&self, index: usize) -> bool {
        let mut st = lock(&self.inner.state);
        if st.status != ThreadStatus::Running {
            return false;
        }
        st.cursor = index;
        true
    }

    fn current_step_name(&self) -> String {
        self.inner
            .steps
            .get(self.cursor())
            .map(Step::name)
            .unwrap_or_else(|| "<none>".into())
    }
}

async fn walk(thread: Thread, ctx: Arc<ExecContext>) -> Result<(), FlowError> {
    let trigger = thread.trigger().clone();
    let scope = Arc::new(Payload::new());

    for (index, step) in thread.steps().iter().enumerate() {
        if !thread.advance(index) {
            debug!("thread {} stopped before step {index}", thread.id());
            return Ok(());
        }

        if let Err(e) = run_step(step.clone(), trigger.clone(), Arc::clone(&scope), Arc::clone(&ctx)).await {
            if ctx.settings.throw_kills_thread {
                return Err(e);
            }
            warn!("[{}] '{}' step {index} failed, continuing: {e}", ctx.hub_id, trigger.trigger_type());
            trigger.push_error(e);
        }

        if trigger.is_killed() {
            return Err(trigger.last_error()
                              .unwrap_or_else(|| FlowError::Killed(format!("'{}' was killed", trigger.trigger_type()))));
        }
    }
    Ok(())
}

impl fmt::Debug for Thread {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let st = lock(&self.inner.state);
        f.debug_struct("Thread")
         .field("id", &self.inner.id)
         .field("factory", &self.inner.factory_id)
         .field("trigger", &self.inner.trigger.trigger_type())
         .field("status", &st.status)
         .field("cursor", &st.cursor)
         .field("steps", &self.inner.steps.len())
         .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binding::LocalBus;
    use crate::step::{for_each, for_each_parallel};
    use serde_json::json;
    use std::sync::Mutex as StdMutex;
    use tokio::sync::oneshot;

    fn ctx(settings: HubSettings) -> Arc<ExecContext> {
        Arc::new(ExecContext { hub_id: "test".into(),
                               binding: Arc::new(LocalBus::new()),
                               services: Services::new(),
                               settings })
    }

    fn payload(v: serde_json::Value) -> Payload {
        v.as_object().cloned().unwrap_or_default()
    }

    /// Corre el thread y devuelve su resultado terminal.
    async fn run_to_end(thread: &Thread, settings: HubSettings) -> Result<(), FlowError> {
        let (tx, rx) = oneshot::channel();
        let tx = Arc::new(StdMutex::new(Some(tx)));
        let fail_tx = Arc::clone(&tx);
        thread.run(ctx(settings),
                   move |_| {
                       let _ = tx.lock().unwrap().take().unwrap().send(Ok(()));
                   },
                   move |_, e| {
                       let _ = fail_tx.lock().unwrap().take().unwrap().send(Err(e));
                   })
              .unwrap();
        rx.await.unwrap()
    }

    fn recorder() -> (Arc<StdMutex<Vec<i64>>>, Step) {
        let out = Arc::new(StdMutex::new(Vec::new()));
        let o = Arc::clone(&out);
        let step = Step::function(&["item"], move |args| {
            o.lock().unwrap().push(args.get::<i64>("item")?);
            Ok(())
        });
        (out, step)
    }

    #[tokio::test]
    async fn steps_run_in_declaration_order() {
        let order = Arc::new(StdMutex::new(Vec::new()));
        let steps: Vec<Step> = (0..3).map(|i| {
                                         let o = Arc::clone(&order);
                                         Step::function(&[], move |_| {
                                             o.lock().unwrap().push(i);
                                             Ok(())
                                         })
                                     })
                                     .collect();
        let thread = Thread::new("f", Trigger::new("go"), steps.into());

        run_to_end(&thread, HubSettings::default()).await.unwrap();
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
        assert_eq!(thread.status(), ThreadStatus::Done);
        assert_eq!(thread.cursor(), 2);
        assert!(thread.started_at().is_some());
    }

    #[tokio::test]
    async fn for_each_keeps_collection_order() {
        let (out, body) = recorder();
        let trigger = Trigger::with_payload("go", payload(json!({"items": [1, 2, 3, 4, 5]})));
        let thread = Thread::new("f", trigger, vec![for_each("items", "item", body)].into());

        run_to_end(&thread, HubSettings::default()).await.unwrap();
        assert_eq!(*out.lock().unwrap(), vec![1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn parallel_failure_waits_for_siblings_and_reports_first_error() {
        let (out, record) = recorder();
        let body = Step::task(&["item"], move |args| {
            let record = record.clone();
            async move {
                let item = args.get::<i64>("item")?;
                tokio::task::yield_now().await;
                if item % 2 == 0 {
                    return Err(format!("even {item}").into());
                }
                let Step::Function(f) = &record else { unreachable!() };
                f.command().execute(args).await
            }
        });
        let trigger = Trigger::with_payload("go", payload(json!({"items": [1, 2, 3, 4, 5]})));
        let thread = Thread::new("f", trigger, vec![for_each_parallel("items", "item", body)].into());

        let err = run_to_end(&thread, HubSettings::default()).await.unwrap_err();
        assert_eq!(err,
                   FlowError::StepExecution { step: "task".into(),
                                              message: "even 2".into() });
        let mut odd = out.lock().unwrap().clone();
        odd.sort();
        assert_eq!(odd, vec![1, 3, 5]);
    }

    #[tokio::test]
    async fn failure_skips_remaining_steps() {
        let reached = Arc::new(StdMutex::new(false));
        let r = Arc::clone(&reached);
        let steps = vec![Step::function(&[], |_| Err("nope".into())).named("broken"),
                         Step::function(&[], move |_| {
                             *r.lock().unwrap() = true;
                             Ok(())
                         })];
        let thread = Thread::new("f", Trigger::new("go"), steps.into());

        let err = run_to_end(&thread, HubSettings::default()).await.unwrap_err();
        assert_eq!(err.to_string(), "step 'broken' failed: nope");
        assert!(!*reached.lock().unwrap());
        assert_eq!(thread.status(), ThreadStatus::Failed);
    }

    #[tokio::test]
    async fn non_fatal_failures_are_recorded_and_the_walk_continues() {
        let seen_error = Arc::new(StdMutex::new(None));
        let s = Arc::clone(&seen_error);
        let steps = vec![Step::function(&[], |_| Err("soft".into())).named("soft"),
                         Step::function(&["error?"], move |args| {
                             *s.lock().unwrap() = args.error().cloned();
                             Ok(())
                         })];
        let trigger = Trigger::new("go");
        let thread = Thread::new("f", trigger.clone(), steps.into());
        let settings = HubSettings { throw_kills_thread: false,
                                     ..HubSettings::default() };

        run_to_end(&thread, settings).await.unwrap();
        assert_eq!(trigger.errors().len(), 1);
        assert_eq!(seen_error.lock().unwrap().as_ref().map(|e| e.to_string()),
                   Some("step 'soft' failed: soft".to_string()));
    }

    #[tokio::test]
    async fn killed_trigger_stops_after_current_step() {
        let steps = vec![Step::function(&["event"], |args| {
                             args.trigger()?.fail(FlowError::Killed("enough".into()));
                             Ok(())
                         }),
                         Step::function(&[], |_| Err("must not run".into()))];
        let thread = Thread::new("f", Trigger::new("go"), steps.into());

        let err = run_to_end(&thread, HubSettings::default()).await.unwrap_err();
        assert_eq!(err, FlowError::Killed("enough".into()));
    }

    #[tokio::test]
    async fn timeout_fails_a_thread_whose_step_never_settles() {
        let steps = vec![Step::task(&[], |_| async {
                             std::future::pending::<()>().await;
                             Ok(())
                         })];
        let thread = Thread::new("f", Trigger::new("slow"), steps.into());
        let settings = HubSettings { timeout_ms: 30,
                                     ..HubSettings::default() };

        let err = run_to_end(&thread, settings).await.unwrap_err();
        assert_eq!(err,
                   FlowError::Timeout { trigger_type: "slow".into(),
                                        timeout_ms: 30 });
        assert_eq!(thread.status(), ThreadStatus::Failed);
    }

    #[tokio::test]
    async fn unresolved_argument_fails_the_step() {
        let steps = vec![Step::function(&["missing"], |_| Ok(())).named("needs")];
        let thread = Thread::new("f", Trigger::new("go"), steps.into());

        let err = run_to_end(&thread, HubSettings::default()).await.unwrap_err();
        assert_eq!(err,
                   FlowError::UnresolvedArgument { step: "needs".into(),
                                                   name: "missing".into() });
    }

    #[tokio::test]
    async fn run_twice_is_rejected() {
        let thread = Thread::new("f", Trigger::new("go"), Vec::new().into());
        run_to_end(&thread, HubSettings::default()).await.unwrap();
        let again = thread.run(ctx(HubSettings::default()), |_| {}, |_, _| {});
        assert!(matches!(again, Err(FlowError::InvalidState(_))));
    }
}
