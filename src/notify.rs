//! Alert and metrics notification.
//!
//! Notifiers are fire-and-forget collaborators: the worker pool calls them
//! after the throttle approves an alert, logs any error and moves on. A
//! broken notifier never stalls or crashes the pipeline.
//!
//! `MqttNotifier` publishes alerts to `maskwatch/alerts/<source>` and, via
//! `MetricsSink`, periodic snapshots to `maskwatch/metrics`.

use anyhow::Result;
use rumqttc::v5::{mqttbytes::QoS, Client, Connection, Event, MqttOptions};
use serde::Serialize;
use std::time::Duration;

use crate::stats::{MetricsSink, StatsSnapshot};

const TOPIC_PREFIX: &str = "maskwatch";

/// Everything a notifier needs to render one alert.
#[derive(Clone, Debug, Serialize)]
pub struct AlertContext {
    pub source_name: String,
    pub violation_count: u32,
    pub face_count: u32,
    pub epoch_ms: u64,
}

impl AlertContext {
    pub fn summary(&self) -> String {
        format!(
            "{}: {} of {} faces unmasked",
            self.source_name, self.violation_count, self.face_count
        )
    }
}

/// Delivery channel for throttled alerts. Implementations must not block
/// for long; workers call this inline.
pub trait Notifier: Send + Sync {
    fn notify(&self, context: &AlertContext) -> Result<()>;
}

/// Default notifier: one structured log line per alert.
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, context: &AlertContext) -> Result<()> {
        log::warn!("ALERT {}", context.summary());
        Ok(())
    }
}

/// MQTT-backed notifier. Owns the connection driver thread; dropping the
/// notifier without calling `disconnect` abandons the connection.
pub struct MqttNotifier {
    client: Client,
    connection_handle: Option<std::thread::JoinHandle<()>>,
}

impl MqttNotifier {
    pub fn connect(host: &str, port: u16, client_id: &str) -> Result<Self> {
        let mut options = MqttOptions::new(client_id, host, port);
        options.set_keep_alive(Duration::from_secs(60));
        options.set_clean_start(true);
        let (client, connection) = Client::new(options, 10);
        log::info!("connected to MQTT broker at {}:{}", host, port);
        Ok(Self::from_parts(client, connection))
    }

    fn from_parts(client: Client, mut connection: Connection) -> Self {
        let handle = std::thread::spawn(move || {
            for event in connection.iter() {
                match event {
                    Ok(Event::Incoming(_)) | Ok(Event::Outgoing(_)) => {}
                    Err(e) => {
                        log::warn!("MQTT connection error: {}", e);
                        break;
                    }
                }
            }
        });
        Self {
            client,
            connection_handle: Some(handle),
        }
    }

    pub fn disconnect(mut self) -> Result<()> {
        self.client.disconnect()?;
        if let Some(handle) = self.connection_handle.take() {
            let _ = handle.join();
        }
        Ok(())
    }
}

impl Notifier for MqttNotifier {
    fn notify(&self, context: &AlertContext) -> Result<()> {
        let topic = format!("{}/alerts/{}", TOPIC_PREFIX, context.source_name);
        let payload = serde_json::to_vec(context)?;
        self.client.publish(topic, QoS::AtLeastOnce, false, payload)?;
        Ok(())
    }
}

impl MetricsSink for MqttNotifier {
    fn record(&self, snapshot: &StatsSnapshot) {
        let topic = format!("{}/metrics", TOPIC_PREFIX);
        match serde_json::to_vec(snapshot) {
            Ok(payload) => {
                if let Err(e) = self.client.publish(topic, QoS::AtMostOnce, false, payload) {
                    log::warn!("failed to publish metrics snapshot: {}", e);
                }
            }
            Err(e) => log::warn!("failed to serialize metrics snapshot: {}", e),
        }
    }
}
