use serde::Deserialize;
use std::error::Error;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{Duration, timeout};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use weaver_signal::app::{ExecutorSession, SessionBuilder, SessionConfig};
use weaver_signal::domain::{Event, SignalConfig, SignalType, SourceConfig};
use weaver_signal::impls::{InMemoryMqttBroker, InMemoryNatsServer};
use weaver_signal::ports::{MqttPublish, NatsMessage};

/// 設定ファイルの形（`signals.json` 参照）
#[derive(Debug, Deserialize)]
struct DemoConfig {
    #[serde(default)]
    session: SessionConfig,
    signals: Vec<SignalConfig>,
}

const BUILTIN_CONFIG: &str = include_str!("../signals.json");

/// 最後の Event からこれだけ何も来なければ終わる
const IDLE: Duration = Duration::from_millis(300);

fn load_config() -> Result<DemoConfig, Box<dyn Error>> {
    match std::env::args().nth(1) {
        Some(path) => {
            info!(%path, "loading config");
            let raw = std::fs::read_to_string(&path)?;
            Ok(serde_json::from_str(&raw)?)
        }
        None => Ok(serde_json::from_str(BUILTIN_CONFIG)?),
    }
}

/// wildcard を具体的な token に置き換える
fn concrete(pattern: &str, sep: char, wildcards: &[&str]) -> String {
    let joiner = sep.to_string();
    pattern
        .split(sep)
        .map(|token| if wildcards.contains(&token) { "demo" } else { token })
        .collect::<Vec<_>>()
        .join(joiner.as_str())
}

/// 各 signal の source に 3 件ずつ流す。NATS は 2 件目の header を壊しておく
async fn publish_samples(
    signals: &[SignalConfig],
    nats: &InMemoryNatsServer,
    mqtt: &InMemoryMqttBroker,
) {
    for signal in signals {
        for i in 1..=3 {
            let body = serde_json::json!({ "signal": signal.name, "seq": i }).to_string();
            match &signal.source {
                SourceConfig::Nats(config) => {
                    let subject = concrete(&config.subject, '.', &["*", ">"]);
                    let mut msg = NatsMessage::new(subject, body.into_bytes());
                    if i == 2 {
                        msg = msg.with_headers(b"not a header block".to_vec());
                    }
                    nats.publish(msg).await;
                }
                SourceConfig::Mqtt(config) => {
                    let topic = concrete(&config.topic, '/', &["+", "#"]);
                    mqtt.publish(MqttPublish::new(topic, body.into_bytes())).await;
                }
                SourceConfig::Other { signal_type, .. } => {
                    warn!(signal = %signal.name, %signal_type, "no demo transport for this source");
                    break;
                }
            }
        }
    }
}

fn print_event(event: &Event) {
    let payload = event.payload();
    println!(
        "{} signal={} type={} at={} source={} body={}",
        event.id(),
        event.signal(),
        event.signal_type(),
        event.timestamp().to_rfc3339(),
        payload.source(),
        String::from_utf8_lossy(payload.body()),
    );
    if let Some(violation) = event.error() {
        println!("    constraint violated: {violation}");
    }
}

async fn drain(events: &mut mpsc::Receiver<Event>) -> usize {
    let mut received = 0;
    while let Ok(Some(event)) = timeout(IDLE, events.recv()).await {
        print_event(&event);
        received += 1;
    }
    received
}

async fn activate_all(session: &mut ExecutorSession, signals: &[SignalConfig]) {
    for signal in signals {
        if let Err(e) = session.activate(signal.clone()).await {
            warn!(signal = %signal.name, error = %e, "activation failed");
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // (A) 設定と in-memory transport
    let config = load_config()?;
    let nats = InMemoryNatsServer::new();
    let mqtt = InMemoryMqttBroker::new();

    // (B) Session を組み立てる（NATS / MQTT が揃っていなければ失敗）
    let (mut session, mut events) = SessionBuilder::new()
        .with_config(config.session)
        .with_nats(Arc::new(nats.clone()))
        .with_mqtt(Arc::new(mqtt.clone()))
        .expect_signal_types(&[SignalType::NATS, SignalType::MQTT])
        .build()?;
    info!(session = %session.id(), "session ready");

    // (C) Signal を起動してメッセージを流す
    activate_all(&mut session, &config.signals).await;
    info!(active = ?session.active_signals(), loops = session.active_loops(), "signals active");
    publish_samples(&config.signals, &nats, &mqtt).await;

    // (D) 届いた Event を表示
    let received = drain(&mut events).await;
    println!("received {received} events");

    // (E) 全 Signal を止める
    for e in session.shutdown().await {
        warn!(error = %e, "stop failed");
    }
    Ok(())
}
