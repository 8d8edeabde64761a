use std::time::Duration;

use async_trait::async_trait;
use cotrelay_core::RawEvent;
use rand::Rng;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::PluginSource;

/// Mock plugin source that emits fake position reports.
///
/// Every poll produces a historical trail per device (oldest first), the
/// shape of a real tracker API that returns recent history on each poll.
/// Feeding this through admission exercises the collapse-to-latest path.
pub struct MockPluginSource {
    /// Number of simulated devices.
    device_count: usize,
    /// Interval between polls.
    poll_interval: Duration,
    /// Historical positions per device per poll.
    history_depth: usize,
}

impl MockPluginSource {
    pub fn new(device_count: usize, poll_interval: Duration, history_depth: usize) -> Self {
        Self {
            device_count,
            poll_interval,
            history_depth: history_depth.max(1),
        }
    }

    fn generate_poll(&self, positions: &mut [(f64, f64)]) -> Vec<RawEvent> {
        let mut rng = rand::rng();
        let now = jiff::Timestamp::now();
        let mut batch = Vec::with_capacity(self.device_count * self.history_depth);

        for (device, position) in positions.iter_mut().enumerate() {
            position.0 += rng.random_range(-0.001..0.001);
            position.1 += rng.random_range(-0.001..0.001);

            for age in (0..self.history_depth).rev() {
                let event_time = now
                    .checked_sub(jiff::SignedDuration::from_secs(age as i64))
                    .unwrap_or(now);
                let body = serde_json::json!({
                    "uid": format!("mock-{device:04}"),
                    "time": event_time.to_string(),
                    "lat": position.0,
                    "lon": position.1,
                })
                .to_string();
                batch.push(RawEvent::new(body));
            }
        }

        batch
    }
}

#[async_trait]
impl PluginSource for MockPluginSource {
    type Error = std::convert::Infallible;

    async fn start(
        &self,
        cancel: CancellationToken,
    ) -> Result<mpsc::Receiver<Vec<RawEvent>>, Self::Error> {
        let (tx, rx) = mpsc::channel(16);

        let device_count = self.device_count;
        let poll_interval = self.poll_interval;
        let source = Self::new(device_count, poll_interval, self.history_depth);

        info!(
            device_count,
            poll_interval_ms = poll_interval.as_millis() as u64,
            history_depth = source.history_depth,
            "starting mock plugin source"
        );

        tokio::spawn(async move {
            // ThreadRng is not Send, so it must not outlive this block
            // and cross an await.
            let mut positions: Vec<(f64, f64)> = {
                let mut rng = rand::rng();
                (0..device_count)
                    .map(|_| {
                        (
                            rng.random_range(-60.0..60.0),
                            rng.random_range(-180.0..180.0),
                        )
                    })
                    .collect()
            };
            let mut interval = tokio::time::interval(poll_interval);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        info!("mock plugin source shutting down");
                        break;
                    }
                    _ = interval.tick() => {
                        let batch = source.generate_poll(&mut positions);
                        if tx.send(batch).await.is_err() {
                            info!("channel closed, mock plugin source shutting down");
                            break;
                        }
                    }
                }
            }
        });

        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use cotrelay_queue::parser::parse_event;
    use tokio_util::sync::CancellationToken;

    use super::MockPluginSource;
    use crate::source::PluginSource;

    #[test]
    fn generated_reports_parse_cleanly() {
        let source = MockPluginSource::new(3, Duration::from_secs(1), 4);
        let mut positions = vec![(0.0, 0.0); 3];

        let batch = source.generate_poll(&mut positions);
        assert_eq!(batch.len(), 12);

        for raw in &batch {
            let event = parse_event(raw).unwrap();
            assert!(event.device_id.as_str().starts_with("mock-"));
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn started_source_delivers_polls() {
        let source = MockPluginSource::new(2, Duration::from_millis(10), 3);
        let cancel = CancellationToken::new();

        let mut polls = source.start(cancel.clone()).await.unwrap();
        let batch = polls.recv().await.unwrap();
        cancel.cancel();

        assert_eq!(batch.len(), 6);
        for raw in &batch {
            parse_event(raw).unwrap();
        }
    }

    #[test]
    fn trail_is_oldest_first_per_device() {
        let source = MockPluginSource::new(1, Duration::from_secs(1), 3);
        let mut positions = vec![(10.0, 20.0)];

        let batch = source.generate_poll(&mut positions);
        let times: Vec<jiff::Timestamp> = batch
            .iter()
            .map(|raw| parse_event(raw).unwrap().event_time)
            .collect();

        assert!(times.windows(2).all(|pair| pair[0] <= pair[1]));
    }
}
