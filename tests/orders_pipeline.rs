use std::sync::Arc;

use cmdthread::config::AppConfig;
use cmdthread::errors::AppError;
use cmdthread::orders::{build_hub, place_order, Inventory, OrderLine, Outbox};
use cmdthread_core::{FlowError, LocalBus};
use serde_json::json;
use tokio_test::{assert_err, assert_ok};

fn setup() -> (cmdthread_core::Hub, Arc<Inventory>, Arc<Outbox>) {
    let inventory = Arc::new(Inventory::new([("apple", 10), ("pear", 4)]));
    let outbox = Arc::new(Outbox::default());
    let hub = build_hub(&AppConfig::default(),
                        Arc::new(LocalBus::new()),
                        Arc::clone(&inventory),
                        Arc::clone(&outbox)).unwrap();
    (hub, inventory, outbox)
}

#[tokio::test]
async fn order_reserves_every_line_and_notifies() {
    let (hub, inventory, outbox) = setup();
    let order = assert_ok!(place_order(&hub, "A-1", &[OrderLine::new("apple", 3), OrderLine::new("pear", 1)]).await);

    assert_eq!(order.get("status"), Some(json!("validated")));
    assert_eq!(inventory.available("apple"), 7);
    assert_eq!(inventory.available("pear"), 3);
    assert_eq!(outbox.messages(), vec!["[email] order A-1 confirmed".to_string()]);
    assert!(hub.live_threads().is_empty());
}

#[tokio::test]
async fn short_stock_fails_the_order_without_notifying() {
    let (hub, inventory, outbox) = setup();
    let err = assert_err!(place_order(&hub, "A-2", &[OrderLine::new("pear", 10)]).await);

    match err {
        AppError::Flow(FlowError::StepExecution { step, message }) => {
            assert_eq!(step, "reserve");
            assert!(message.contains("not enough 'pear'"));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(inventory.available("pear"), 4);
    assert!(outbox.messages().is_empty());
}

#[tokio::test]
async fn empty_order_is_rejected_by_validation() {
    let (hub, _, outbox) = setup();
    let err = assert_err!(place_order(&hub, "A-3", &[]).await);
    assert!(err.to_string().contains("order A-3 has no lines"));
    assert!(outbox.messages().is_empty());
}
