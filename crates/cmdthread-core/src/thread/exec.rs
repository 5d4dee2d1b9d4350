//! Ejecución de un step individual (recursiva para `ForEach`).

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use futures_util::future::join_all;
use log::debug;
use serde_json::Value;

use super::ExecContext;
use crate::errors::FlowError;
use crate::injection::{merge_payload, resolve_args};
use crate::step::{ForEach, FunctionStep, Step, TriggerRef};
use crate::trigger::{Payload, Trigger};

pub(crate) type StepFuture = Pin<Box<dyn Future<Output = Result<(), FlowError>> + Send>>;

/// `scope` contiene los alias de las iteraciones `for_each` activas; tiene
/// precedencia sobre el payload y nunca se escribe en él.
pub(crate) fn run_step(step: Step, trigger: Trigger, scope: Arc<Payload>, ctx: Arc<ExecContext>) -> StepFuture {
    Box::pin(async move {
        match step {
            Step::Function(f) => run_function(&f, &trigger, &scope, &ctx).await,
            Step::TriggerRef(r) => run_trigger_ref(&r, &trigger, &scope, &ctx).await,
            Step::ForEach(fe) => run_for_each(fe, trigger, scope, ctx).await,
        }
    })
}

async fn run_function(f: &FunctionStep, trigger: &Trigger, scope: &Payload, ctx: &ExecContext) -> Result<(), FlowError> {
    let name = f.name();
    let args = resolve_args(name, f.params(), trigger, scope, &ctx.services)?;
    debug!("[{}] '{}' running step '{name}'", ctx.hub_id, trigger.trigger_type());
    f.command().execute(args).await.map_err(|e| FlowError::step(name, &e))
}

async fn run_trigger_ref(r: &TriggerRef,
                         trigger: &Trigger,
                         scope: &Payload,
                         ctx: &ExecContext)
                         -> Result<(), FlowError> {
    let mut detail = r.detail.clone();
    if let Some(dynamic) = &r.dynamic {
        let name = format!("trigger:{}", r.trigger_type);
        let args = resolve_args(&name, dynamic.params(), trigger, scope, &ctx.services)?;
        let computed = dynamic.build(args).map_err(|e| FlowError::step(&name, &e))?;
        detail = merge_payload(&detail, &computed, false);
    }
    let inherited = merge_payload(&trigger.payload(), scope, false);
    let payload = merge_payload(&inherited, &detail, ctx.settings.warn_on_detail_overwrite);
    let child = Trigger::child_of(trigger, &r.trigger_type, payload);

    // registrar antes de despachar: el hijo no puede terminar sin avisarnos
    let outcome = child.completion();
    child.dispatch(ctx.binding.as_ref())?;
    outcome.await.map(|_| ())
}

async fn run_for_each(fe: ForEach, trigger: Trigger, scope: Arc<Payload>, ctx: Arc<ExecContext>) -> Result<(), FlowError> {
    let items = match scope.get(&fe.collection_key).cloned().or_else(|| trigger.get(&fe.collection_key)) {
        Some(Value::Array(items)) => items,
        _ => return Err(FlowError::InvalidCollection { key: fe.collection_key.clone() }),
    };

    let with_item = |item: Value| {
        let mut s = (*scope).clone();
        s.insert(fe.item_alias.clone(), item);
        Arc::new(s)
    };

    if !fe.parallel {
        for item in items {
            run_step((*fe.body).clone(), trigger.clone(), with_item(item), Arc::clone(&ctx)).await?;
        }
        return Ok(());
    }

    // todas se sondean en este task, en orden de colección; ninguna se
    // cancela si otra falla
    let iterations = items.into_iter()
                          .map(|item| run_step((*fe.body).clone(), trigger.clone(), with_item(item), Arc::clone(&ctx)));
    let results = join_all(iterations).await;

    let mut first_err = None;
    for result in results {
        if let Err(e) = result {
            first_err.get_or_insert(e);
        }
    }
    first_err.map_or(Ok(()), Err)
}
