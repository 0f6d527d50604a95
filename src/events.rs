//! Event / Log Sink: human-visible notices on
//! reassignment start/finish, throttle changes, and override (un)sets.
//! Fire-and-forget from the reconciler's point of view: writes go onto a
//! bounded channel drained by a single background task, and are dropped
//! (with a counter) rather than backing up the reconciler, mirroring the
//! mpsc-channel-plus-background-task shape used for health reporting.

use tokio::sync::mpsc;
use tracing::{info, warn};

const EVENT_QUEUE_CAPACITY: usize = 256;

pub trait EventSink: Send + Sync {
    fn write(&self, title: &str, body: &str, tags: &[String]);
}

struct Event {
    title: String,
    body: String,
    tags: Vec<String>,
}

/// Sends events to Datadog's events API. Always logs via `tracing` too, so
/// events are visible even if Datadog delivery is degraded or disabled.
pub struct DatadogEventSink {
    sender: mpsc::Sender<Event>,
}

impl DatadogEventSink {
    pub fn new(client: reqwest::Client, site: String, api_key: String, default_tags: Vec<String>) -> Self {
        let (sender, mut receiver) = mpsc::channel::<Event>(EVENT_QUEUE_CAPACITY);

        tokio::spawn(async move {
            while let Some(event) = receiver.recv().await {
                let mut tags = default_tags.clone();
                tags.extend(event.tags.clone());

                let url = format!("https://api.{site}/api/v1/events");
                let body = serde_json::json!({
                    "title": event.title,
                    "text": event.body,
                    "tags": tags,
                });

                if let Err(e) = client
                    .post(url)
                    .header("DD-API-KEY", &api_key)
                    .json(&body)
                    .send()
                    .await
                {
                    warn!("failed to deliver event {:?} to datadog: {}", event.title, e);
                }
            }
        });

        Self { sender }
    }
}

impl EventSink for DatadogEventSink {
    fn write(&self, title: &str, body: &str, tags: &[String]) {
        info!(event = title, "{}", body);

        let event = Event {
            title: title.to_owned(),
            body: body.to_owned(),
            tags: tags.to_vec(),
        };

        if self.sender.try_send(event).is_err() {
            metrics::counter!("autothrottle_events_dropped_total").increment(1);
            warn!("event queue full, dropped event {:?}", title);
        }
    }
}

/// Used by tests and by `--dd-api-key`-less deployments: logs only.
pub struct LoggingEventSink;

impl EventSink for LoggingEventSink {
    fn write(&self, title: &str, body: &str, tags: &[String]) {
        info!(event = title, tags = ?tags, "{}", body);
    }
}

impl EventSink for std::sync::Arc<dyn EventSink> {
    fn write(&self, title: &str, body: &str, tags: &[String]) {
        (**self).write(title, body, tags)
    }
}
