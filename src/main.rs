use std::process::ExitCode;
use std::sync::Arc;

use cmdthread::config::AppConfig;
use cmdthread::errors::AppError;
use cmdthread::orders::{build_hub, place_order, Inventory, OrderLine, Outbox};
use cmdthread_core::LocalBus;

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("[demo] error: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<(), AppError> {
    let config = AppConfig::from_env()?;
    println!("[demo] hub '{}' timeout={}ms", config.hub_id, config.hub.effective_timeout_ms());

    let inventory = Arc::new(Inventory::new([("apple", 10), ("pear", 4)]));
    let outbox = Arc::new(Outbox::default());
    let hub = build_hub(&config, Arc::new(LocalBus::new()), Arc::clone(&inventory), Arc::clone(&outbox))?;

    let order = place_order(&hub, "A-1", &[OrderLine::new("apple", 3), OrderLine::new("pear", 1)]).await?;
    println!("[demo] {} status={}",
             order,
             order.get("status").map(|v| v.to_string()).unwrap_or_default());
    println!("[demo] stock apple={} pear={}", inventory.available("apple"), inventory.available("pear"));

    // sin stock suficiente: el pedido falla en la reserva
    match place_order(&hub, "A-2", &[OrderLine::new("pear", 10)]).await {
        Ok(_) => println!("[demo] A-2 inesperadamente aceptado"),
        Err(e) => println!("[demo] A-2 rechazado: {e}"),
    }

    for message in outbox.messages() {
        println!("[demo] outbox: {message}");
    }
    Ok(())
}
