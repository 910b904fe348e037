//! Cadence Demo: scripted interruptions against a narrated output.
//!
//! Replays a handful of inbound JSON signals (speech, an alarm, a camera change,
//! a timer) while a story is "playing", and prints what the manager did with each.
//! Configuration comes from `PAGI_CADENCE_CONFIG` / `PAGI_CADENCE__*` if set.
//!
//! Run with `RUST_LOG=pagi_cadence=debug` to see per-event scoring.

use pagi_cadence::{CadenceConfig, InterruptionManager, LoggingRenderer, ManagerEvent, OutputContext};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const SCRIPT: &[&str] = &[
    r#"{"source": "camera", "confidence": 0.8, "payload": {"scene": "cat walks by"}}"#,
    r#"{"source": "dialogue", "confidence": 0.95, "payload": {"transcript": "hold on", "speaker": "sam"}}"#,
    r#"{"source": "timer", "confidence": 0.9}"#,
    r#"{"source": "microphone", "confidence": 0.99, "payload": {"sound_class": "smoke_alarm"}}"#,
    r#"{"source": "dialogue", "confidence": 0.9, "payload": {"transcript": "what's for dinner?", "speaker": "sam", "topic": "dinner"}}"#,
    r#"{"source": "", "confidence": 2.0}"#,
];

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("🎼 PAGI Cadence Demo");
    info!("====================");

    let config = CadenceConfig::load()?;
    let manager = InterruptionManager::spawn(config, Arc::new(LoggingRenderer))?;
    let mut events = manager
        .take_event_receiver()
        .ok_or("event receiver already taken")?;

    let printer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                ManagerEvent::StateChanged { from, to } => {
                    info!("   state {} → {}", from.as_str(), to.as_str());
                }
                ManagerEvent::Dispatched { event, strategy } => {
                    info!("✅ Dispatched {} via {:?}", event.event_type.as_str(), strategy);
                }
                ManagerEvent::Preempted { preempted, by } => {
                    info!("⚡ {} preempted by {}", preempted, by);
                }
                ManagerEvent::Restarted => warn!("Manager restarted"),
            }
        }
    });

    manager
        .begin_output(OutputContext::new("the lighthouse keeper").with_complexity(0.3))
        .await?;

    for (i, raw) in SCRIPT.iter().enumerate() {
        let progress = (i as f32 + 1.0) / (SCRIPT.len() as f32 + 1.0);
        manager
            .report_progress(progress, format!("...and on night {} the lamp flickered", i + 1))
            .await?;

        match manager.ingest_json(raw).await {
            Ok(response) => info!("📨 Signal {} → {:?}", i + 1, response.strategy()),
            Err(e) => warn!("📨 Signal {} dropped: {}", i + 1, e),
        }
    }

    manager.end_output().await?;
    manager.queue_len().await?;
    info!("📊 Stats: {}", serde_json::to_string_pretty(&manager.stats())?);

    drop(manager);
    let _ = printer.await;
    Ok(())
}
