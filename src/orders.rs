//! Pipeline de ejemplo: procesamiento de pedidos.
//!
//! `order.placed` valida el pedido, reserva cada línea en paralelo
//! (`item.reserve` por línea) y termina lanzando `order.notify`, que deja un
//! mensaje en el `Outbox`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use cmdthread_core::{for_each_parallel, Binding, Hub, Payload, Step, Trigger};
use log::info;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::config::AppConfig;
use crate::errors::AppError;

pub const ORDER_PLACED: &str = "order.placed";
pub const ITEM_RESERVE: &str = "item.reserve";
pub const ORDER_NOTIFY: &str = "order.notify";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderLine {
    pub sku: String,
    pub qty: i64,
}

impl OrderLine {
    pub fn new(sku: impl Into<String>, qty: i64) -> Self {
        Self { sku: sku.into(),
               qty }
    }
}

/// Stock en memoria por SKU.
#[derive(Debug, Default)]
pub struct Inventory {
    stock: Mutex<HashMap<String, i64>>,
}

impl Inventory {
    pub fn new<I, S>(stock: I) -> Self
        where I: IntoIterator<Item = (S, i64)>,
              S: Into<String>
    {
        Self { stock: Mutex::new(stock.into_iter().map(|(s, q)| (s.into(), q)).collect()) }
    }

    pub fn available(&self, sku: &str) -> i64 {
        self.stock.lock().map(|s| s.get(sku).copied().unwrap_or(0)).unwrap_or(0)
    }

    /// Descuenta `line.qty` si hay stock suficiente.
    pub fn reserve(&self, line: &OrderLine) -> Result<i64, AppError> {
        let mut stock = self.stock
                            .lock()
                            .map_err(|_| AppError::InvalidOrder("inventory lock poisoned".into()))?;
        let left = stock.get_mut(&line.sku)
                        .ok_or_else(|| AppError::InvalidOrder(format!("unknown sku '{}'", line.sku)))?;
        if *left < line.qty {
            return Err(AppError::InvalidOrder(format!("not enough '{}': {} left, {} requested",
                                                      line.sku, left, line.qty)));
        }
        *left -= line.qty;
        Ok(*left)
    }
}

/// Mensajes enviados por `order.notify`.
#[derive(Debug, Default)]
pub struct Outbox {
    messages: Mutex<Vec<String>>,
}

impl Outbox {
    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().map(|m| m.clone()).unwrap_or_default()
    }

    fn push(&self, message: String) {
        if let Ok(mut m) = self.messages.lock() {
            m.push(message);
        }
    }
}

/// Construye el hub del demo con los tres listeners instalados.
pub fn build_hub(config: &AppConfig,
                 binding: Arc<dyn Binding>,
                 inventory: Arc<Inventory>,
                 outbox: Arc<Outbox>)
                 -> Result<Hub, AppError> {
    let options = config.hub_options()
                        .shared_service("inventory", inventory)
                        .shared_service("outbox", outbox);
    let hub = Hub::new(config.hub_id.clone(), binding, options);

    hub.add_listener(ITEM_RESERVE,
                     [Step::function(&["item", "inventory"], |args| {
                         let line: OrderLine = args.get("item")?;
                         let inventory = args.service::<Inventory>("inventory")
                                             .ok_or("inventory service not registered")?;
                         let left = inventory.reserve(&line)?;
                         info!("reserved {} x {} ({left} left)", line.qty, line.sku);
                         Ok(())
                     }).named("reserve")])?;

    hub.add_listener(ORDER_NOTIFY,
                     [Step::task(&["order_id", "channel?", "outbox"], |args| async move {
                         let order_id: String = args.get("order_id")?;
                         let channel = args.value("channel").and_then(Value::as_str).unwrap_or("log").to_string();
                         let outbox = args.service::<Outbox>("outbox").ok_or("outbox service not registered")?;
                         outbox.push(format!("[{channel}] order {order_id} confirmed"));
                         Ok(())
                     }).named("notify")])?;

    let validate = Step::function(&["event", "order_id", "items"], |args| {
                       let lines: Vec<OrderLine> = args.get("items")?;
                       if lines.is_empty() {
                           let id: String = args.get("order_id")?;
                           return Err(AppError::InvalidOrder(format!("order {id} has no lines")).into());
                       }
                       args.trigger()?.set("status", json!("validated"));
                       Ok(())
                   }).named("validate");
    let mut detail = Payload::new();
    detail.insert("channel".into(), json!("email"));

    hub.add_listener(ORDER_PLACED,
                     [validate,
                      for_each_parallel("items", "item", ITEM_RESERVE),
                      Step::trigger_with(ORDER_NOTIFY, detail)])?;
    Ok(hub)
}

/// Despacha un pedido y espera su resultado terminal.
pub async fn place_order(hub: &Hub, order_id: &str, lines: &[OrderLine]) -> Result<Trigger, AppError> {
    let mut payload = Payload::new();
    payload.insert("order_id".into(), json!(order_id));
    payload.insert("items".into(), serde_json::to_value(lines).map_err(|e| AppError::InvalidOrder(e.to_string()))?);
    let trigger = hub.dispatch(ORDER_PLACED, payload)?;
    trigger.completion().await?;
    Ok(trigger)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserve_rejects_overdraw() {
        let inv = Inventory::new([("apple", 2)]);
        assert_eq!(inv.reserve(&OrderLine::new("apple", 1)).unwrap(), 1);
        assert!(inv.reserve(&OrderLine::new("apple", 5)).is_err());
        assert!(inv.reserve(&OrderLine::new("kiwi", 1)).is_err());
        assert_eq!(inv.available("apple"), 1);
    }
}
