//! Forwarders between the Modbus link and the gateway's outputs
//!
//! Scheduled-read publications are serialized to JSON and handed to the
//! uplink writer under their topic key. Indicator colors are applied to the
//! status LED driver. Both run as their own tasks so the polling loop only
//! ever performs a non-blocking enqueue.

use std::sync::Arc;

use modbus_link::{IndicatorColor, Publication};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Destination of serialized publications
pub trait Uplink: Send + Sync + 'static {
    fn send(&self, topic: &str, payload: &str) -> anyhow::Result<()>;
}

/// Writes publications to the service log
#[derive(Debug, Default, Clone, Copy)]
pub struct LogUplink;

impl Uplink for LogUplink {
    fn send(&self, topic: &str, payload: &str) -> anyhow::Result<()> {
        info!("[PUB] {}: {}", topic, payload);
        Ok(())
    }
}

/// Status LED driver
pub trait Indicator: Send + Sync + 'static {
    fn set_color(&self, color: IndicatorColor);
}

/// Logs color changes
#[derive(Debug, Default)]
pub struct LogIndicator {
    last: Mutex<Option<IndicatorColor>>,
}

impl Indicator for LogIndicator {
    fn set_color(&self, color: IndicatorColor) {
        let mut last = self.last.lock();
        if *last != Some(color) {
            info!("[LED] rgb({}, {}, {})", color.r, color.g, color.b);
            *last = Some(color);
        }
    }
}

/// Serialize a publication for the uplink
pub fn encode(publication: &Publication) -> serde_json::Result<String> {
    serde_json::to_string(publication)
}

/// Forward publications until cancelled or the channel closes
///
/// Returns the number of publications handed to the uplink.
pub fn spawn_uplink_forwarder(
    mut rx: mpsc::Receiver<Publication>,
    uplink: Arc<dyn Uplink>,
    cancel: CancellationToken,
) -> JoinHandle<u64> {
    tokio::spawn(async move {
        let mut sent = 0u64;
        loop {
            let publication = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                next = rx.recv() => match next {
                    Some(p) => p,
                    None => break,
                },
            };

            let payload = match encode(&publication) {
                Ok(payload) => payload,
                Err(e) => {
                    warn!("Failed to encode {}: {}", publication.key, e);
                    continue;
                },
            };
            match uplink.send(&publication.key, &payload) {
                Ok(()) => sent += 1,
                Err(e) => warn!("Uplink send failed for {}: {}", publication.key, e),
            }
        }
        debug!("Uplink forwarder stopped after {} publications", sent);
        sent
    })
}

/// Apply indicator colors until cancelled or the channel closes
pub fn spawn_indicator_driver(
    mut rx: mpsc::Receiver<IndicatorColor>,
    indicator: Arc<dyn Indicator>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                next = rx.recv() => match next {
                    Some(color) => indicator.set_color(color),
                    None => break,
                },
            }
        }
        // Drain what the link queued before it went away
        while let Ok(color) = rx.try_recv() {
            indicator.set_color(color);
        }
        debug!("Indicator driver stopped");
    })
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use modbus_link::{ChannelPublisher, IndicatorSink, OperationOutput, PublishSink, ReadKind};
    use tracing_test::traced_test;

    #[derive(Default)]
    struct RecordingUplink {
        sent: Mutex<Vec<(String, String)>>,
        fail: bool,
    }

    impl Uplink for RecordingUplink {
        fn send(&self, topic: &str, payload: &str) -> anyhow::Result<()> {
            if self.fail {
                anyhow::bail!("broker unavailable");
            }
            self.sent.lock().push((topic.to_string(), payload.to_string()));
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingIndicator {
        colors: Mutex<Vec<IndicatorColor>>,
    }

    impl Indicator for RecordingIndicator {
        fn set_color(&self, color: IndicatorColor) {
            self.colors.lock().push(color);
        }
    }

    fn publication(values: Vec<u16>) -> Publication {
        Publication::new(
            "modbus/input/199",
            ReadKind::Input,
            199,
            OperationOutput::Registers(values),
        )
    }

    #[test]
    fn test_encode_shape() {
        let json: serde_json::Value =
            serde_json::from_str(&encode(&publication(vec![42, 43])).unwrap()).unwrap();
        assert_eq!(json["key"], "modbus/input/199");
        assert_eq!(json["kind"], "input");
        assert_eq!(json["start_address"], 199);
        assert_eq!(json["values"], serde_json::json!([42, 43]));
        assert!(json["timestamp"].as_i64().unwrap() > 0);
    }

    #[tokio::test]
    async fn test_forwarder_sends_until_channel_closes() {
        let (publisher, rx) = ChannelPublisher::channel(8);
        let uplink = Arc::new(RecordingUplink::default());
        let task = spawn_uplink_forwarder(rx, uplink.clone(), CancellationToken::new());

        publisher.publish(&publication(vec![1, 2]));
        publisher.publish(&publication(vec![3, 4]));
        drop(publisher);

        assert_eq!(task.await.unwrap(), 2);
        let sent = uplink.sent.lock();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].0, "modbus/input/199");
        assert!(sent[1].1.contains("[3,4]"));
    }

    #[tokio::test]
    #[traced_test]
    async fn test_forwarder_survives_uplink_errors() {
        let (publisher, rx) = ChannelPublisher::channel(8);
        let uplink = Arc::new(RecordingUplink {
            fail: true,
            ..Default::default()
        });
        let task = spawn_uplink_forwarder(rx, uplink, CancellationToken::new());

        publisher.publish(&publication(vec![7]));
        drop(publisher);

        assert_eq!(task.await.unwrap(), 0);
        assert!(logs_contain("Uplink send failed for modbus/input/199"));
    }

    #[tokio::test]
    async fn test_forwarder_stops_on_cancel() {
        let (_publisher, rx) = ChannelPublisher::channel(8);
        let cancel = CancellationToken::new();
        let task = spawn_uplink_forwarder(rx, Arc::new(LogUplink), cancel.clone());

        cancel.cancel();
        assert_eq!(task.await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_indicator_driver_applies_colors_in_order() {
        let (sink, rx) = IndicatorSink::channel(5);
        let indicator = Arc::new(RecordingIndicator::default());
        let task = spawn_indicator_driver(rx, indicator.clone(), CancellationToken::new());

        assert!(sink.notify(IndicatorColor::BLUE));
        assert!(sink.notify(IndicatorColor::GREEN));
        drop(sink);
        task.await.unwrap();

        assert_eq!(
            *indicator.colors.lock(),
            vec![IndicatorColor::BLUE, IndicatorColor::GREEN]
        );
    }

    #[test]
    #[traced_test]
    fn test_log_indicator_skips_repeats() {
        let indicator = LogIndicator::default();
        indicator.set_color(IndicatorColor::RED);
        indicator.set_color(IndicatorColor::RED);
        indicator.set_color(IndicatorColor::OFF);

        logs_assert(|lines: &[&str]| {
            match lines.iter().filter(|l| l.contains("[LED]")).count() {
                2 => Ok(()),
                n => Err(format!("expected 2 LED lines, got {}", n)),
            }
        });
    }
}
