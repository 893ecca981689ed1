//! Process entrypoint: load configuration, wire the runtime context, run
//! until interrupted, then shut down in the documented order.

use otc_gateway::PaperBroker;
use otc_runtime::{RuntimeConfig, RuntimeContext, TradingCalendar};

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let config_path = std::env::var("OTC_RUNTIME_CONFIG").unwrap_or_else(|_| "runtime.yaml".to_string());
    let config = RuntimeConfig::load(&config_path)?;

    // The broker behind `Broker` is swappable; `PaperBroker` fills orders
    // instantly against an in-memory position, useful for a dry run against
    // a real contract/quote feed without touching a venue connection.
    let broker = Box::new(PaperBroker::new());
    let calendar = TradingCalendar::default();
    let context = RuntimeContext::new(&config, broker, calendar);

    context.start(
        Vec::new(),
        &config.gateway.host,
        config.gateway.port,
        config.gateway.client_id,
        &config.gateway.account,
    );

    tracing::info!("runtime started, press enter to stop");
    let mut line = String::new();
    std::io::stdin().read_line(&mut line)?;

    tracing::info!("shutdown requested, stopping runtime");
    context.shutdown(&[]);
    Ok(())
}
