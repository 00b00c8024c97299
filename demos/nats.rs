use opentelemetry::{
    Context, global,
    trace::{TraceContextExt as _, Tracer as _},
};
use opentelemetry_sdk::{propagation::TraceContextPropagator, trace::SdkTracerProvider};
use serde::Serialize;
use tracepost::{Envelope, Publisher, PublisherConfig, transport::nats::Nats};
use tracing_error::ErrorLayer;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

#[derive(Clone, Debug, Serialize)]
struct OrderCreated {
    id: u64,
    customer: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let fmt_layer = tracing_subscriber::fmt::layer().with_target(false);
    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(EnvFilter::from_default_env())
        .with(ErrorLayer::default())
        .init();

    let provider = SdkTracerProvider::builder().build();
    global::set_tracer_provider(provider.clone());
    global::set_text_map_propagator(TraceContextPropagator::new());

    let url = std::env::var("NATS_URL").unwrap_or_else(|_| "nats://127.0.0.1:4222".to_owned());
    let nats = Nats::connect(&url).await?;

    let config = PublisherConfig::default().with_tracer_name("orders-service");
    let publisher = Publisher::new(nats.clone(), config);

    // Publish inside an application span so the message joins its trace.
    let tracer = global::tracer("orders-service");
    let span = tracer.start("create order");
    let cx = Context::current_with_span(span);

    for id in 1..=3 {
        let envelope: Envelope<_> = Envelope::new(OrderCreated {
            id,
            customer: "acme".to_owned(),
        })
        .with_topic("orders.created")
        .with_header("x-request-id", format!("req-{id}"));

        publisher.publish(&cx, envelope).await?;
    }

    cx.span().end();
    nats.close().await?;
    provider.shutdown()?;

    Ok(())
}
