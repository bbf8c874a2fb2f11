/// Server-sent event streaming of hub events to clients
///
/// One stream serves one subscription. It opens with a `subscribed` event
/// and a reconnect hint, relays hub events as they arrive, and writes a
/// keepalive comment whenever the connection has been idle for a period.
use crate::events::{HubEvent, Subscription};
use crate::metrics::MetricsCollector;
use bytes::Bytes;
use hyper::Body;
use serde_json::json;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info};
use uuid::Uuid;

/// Keepalive frame
pub const KEEPALIVE_FRAME: &str = ": keepalive\n\n";

/// Stream tuning
#[derive(Debug, Clone)]
pub struct StreamSettings {
    pub keepalive: Duration,
    pub retry_ms: u64,
}

impl Default for StreamSettings {
    fn default() -> Self {
        StreamSettings {
            keepalive: Duration::from_secs(15),
            retry_ms: 3000,
        }
    }
}

/// Encode the opening frame
pub fn subscribed_frame(subscription_id: Uuid, project_id: i64, retry_ms: u64) -> String {
    format!(
        "retry: {}\nevent: subscribed\ndata: {}\n\n",
        retry_ms,
        json!({
            "subscription_id": subscription_id,
            "project_id": project_id,
        })
    )
}

/// Encode a hub event as an SSE message
pub fn event_frame(event: &HubEvent) -> String {
    let data = serde_json::to_string(event).unwrap_or_else(|_| "{}".to_string());
    format!("id: {}\ndata: {}\n\n", event.id, data)
}

/// Tracks the active-streams gauge and logs the disconnect
struct StreamGuard {
    subscription_id: Uuid,
    project_id: i64,
    metrics: Option<Arc<MetricsCollector>>,
}

impl StreamGuard {
    fn new(subscription_id: Uuid, project_id: i64, metrics: Option<Arc<MetricsCollector>>) -> Self {
        if let Some(metrics) = &metrics {
            metrics.record_stream_opened();
        }
        info!(%subscription_id, project_id, "Event stream opened");
        StreamGuard {
            subscription_id,
            project_id,
            metrics,
        }
    }
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        if let Some(metrics) = &self.metrics {
            metrics.record_stream_closed();
        }
        info!(
            subscription_id = %self.subscription_id,
            project_id = self.project_id,
            "Event stream closed"
        );
    }
}

enum Frame {
    Event(HubEvent),
    Keepalive,
    End,
}

/// Turn a subscription into an SSE response body.
///
/// The body owns the subscription: when the client goes away hyper drops
/// the body, which unregisters the subscriber. When the hub drops the
/// subscriber (slow consumer, shutdown) the body ends.
pub fn sse_body(
    subscription: Subscription,
    settings: StreamSettings,
    metrics: Option<Arc<MetricsCollector>>,
) -> Body {
    let stream = async_stream::stream! {
        let mut subscription = subscription;
        let _guard = StreamGuard::new(subscription.id(), subscription.project_id(), metrics);

        yield Ok::<Bytes, Infallible>(Bytes::from(subscribed_frame(
            subscription.id(),
            subscription.project_id(),
            settings.retry_ms,
        )));

        let period = settings.keepalive;
        let mut keepalive = interval_at(Instant::now() + period, period);
        keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let frame = tokio::select! {
                event = subscription.recv() => match event {
                    Some(event) => Frame::Event(event),
                    None => Frame::End,
                },
                _ = keepalive.tick() => Frame::Keepalive,
            };

            match frame {
                Frame::Event(event) => {
                    debug!(
                        subscription_id = %subscription.id(),
                        event_type = %event.event_type,
                        "Relaying event"
                    );
                    keepalive.reset();
                    yield Ok(Bytes::from(event_frame(&event)));
                }
                Frame::Keepalive => yield Ok(Bytes::from_static(KEEPALIVE_FRAME.as_bytes())),
                Frame::End => break,
            }
        }
    };

    Body::wrap_stream(stream)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use qcflow_core::Stage;

    #[test]
    fn test_subscribed_frame_format() {
        let id = Uuid::new_v4();
        let frame = subscribed_frame(id, 4, 2500);
        assert!(frame.starts_with("retry: 2500\nevent: subscribed\ndata: "));
        assert!(frame.contains(&id.to_string()));
        assert!(frame.ends_with("\n\n"));
    }

    #[test]
    fn test_event_frame_carries_json() {
        let event = HubEvent {
            id: Uuid::new_v4(),
            event_type: "drawing_submitted".to_string(),
            project_id: 1,
            drawing_id: 42,
            stage: Stage::FirstQc,
            version: 3,
            actor_id: Some(1),
            timestamp: Utc::now(),
        };
        let frame = event_frame(&event);
        let data = frame
            .lines()
            .find_map(|line| line.strip_prefix("data: "))
            .unwrap();
        let value: serde_json::Value = serde_json::from_str(data).unwrap();
        assert_eq!(value["type"], "drawing_submitted");
        assert_eq!(value["drawing_id"], 42);
        assert_eq!(value["stage"], "first_qc");
    }
}
