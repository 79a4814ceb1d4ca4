//! Producer/consumer teardown demo
//!
//! Run with: cargo run --example producer_consumer
//!
//! Set `RUST_LOG=debug` to see every registry step.
//!
//! A producer creates a stream, a consumer opens it and blocks on the
//! stream's event. The producer then goes away; the consumer is woken,
//! notices its stream is gone and releases its descriptor, which frees the
//! node.

use std::sync::Arc;
use std::time::Duration;

use stream_registry::registry::global;
use stream_registry::{
    DataEvent, DeviceContext, OpenFlags, RegistryConfig, StreamBuffer, WaitOutcome,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = RegistryConfig::default()
        .pending_detach_timeout(Duration::from_secs(2))
        .reap_interval(Duration::from_millis(500));
    let registry = global::init(config)?;
    let reaper = registry.spawn_reaper_task();

    let device = Arc::new(DeviceContext::new(0, "rgx0"));
    registry.set_device(&device)?;
    println!("Device: {}", registry.device()?.name);

    // Producer side
    let buffer = Arc::new(StreamBuffer::new("hwperf")?);
    let node = registry.create_stream(buffer, DataEvent::create()).await?;

    // Consumer side
    let desc = registry.open_stream("hwperf", OpenFlags::NONE).await?;
    let consumer = {
        let registry = Arc::clone(registry);
        tokio::spawn(async move {
            loop {
                match desc.wait(Duration::from_secs(1)).await {
                    WaitOutcome::TimedOut => println!("Consumer: still waiting"),
                    WaitOutcome::Destroyed => {
                        println!("Consumer: stream torn down under us");
                        return;
                    }
                    WaitOutcome::Signaled => {
                        if registry.is_stream_alive(&desc).await {
                            println!("Consumer: data available");
                            continue;
                        }
                        println!("Consumer: stream destroyed, releasing descriptor");
                        match registry.release_descriptor(desc).await {
                            Ok(outcome) => println!("Consumer: {:?}", outcome),
                            Err(e) => println!("Consumer: release failed: {}", e),
                        }
                        return;
                    }
                }
            }
        })
    };

    tokio::time::sleep(Duration::from_millis(300)).await;
    let outcome = registry.release_buffer(node).await?;
    println!("Producer: {:?}", outcome);

    consumer.await?;
    println!("Registry: {:?}", registry.stats().await);

    let report = registry.shutdown().await;
    println!("Shutdown: freed {}, leaked {}", report.freed, report.leaked.len());
    reaper.await?;

    Ok(())
}
