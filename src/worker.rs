use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info};

use crate::config::FeedDescriptor;
use crate::sink::{IngestionSink, StoreError, StoreOutcome};
use crate::source::{FeedSource, FetchError};

/// What one poll cycle found and how long the worker will sleep afterwards.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub new_channels: usize,
    pub new_items: usize,
    pub duplicates: usize,
    pub store_errors: usize,
    pub sleep: Duration,
}

impl CycleReport {
    fn tally(&mut self, outcome: Result<StoreOutcome, StoreError>, uri: &str) -> bool {
        match outcome {
            Ok(StoreOutcome::Inserted) => true,
            Ok(StoreOutcome::Duplicate) => {
                self.duplicates += 1;
                false
            }
            Err(e) => {
                error!(uri, error = %e, "Store failed");
                self.store_errors += 1;
                false
            }
        }
    }
}

/// Why a worker stopped. Only a failed fetch ends the loop.
#[derive(Debug)]
pub struct WorkerExit {
    pub uri: String,
    pub cycles: u64,
    pub error: FetchError,
}

/// Drives one feed: fetch, store, sleep for the hinted interval, repeat.
///
/// A fetch error ends the loop for good. There is no retry or backoff, so
/// one bad response stops this feed until the process restarts. Store
/// errors are logged and polling goes on.
pub struct PollWorker {
    descriptor: FeedDescriptor,
    source: Arc<dyn FeedSource>,
    sink: Arc<dyn IngestionSink>,
}

impl PollWorker {
    pub fn new(
        descriptor: FeedDescriptor,
        source: Arc<dyn FeedSource>,
        sink: Arc<dyn IngestionSink>,
    ) -> Self {
        Self {
            descriptor,
            source,
            sink,
        }
    }

    pub fn uri(&self) -> &str {
        &self.descriptor.uri
    }

    /// One fetch and store pass. The returned report carries the sleep that should follow.
    pub async fn poll_once(&self) -> Result<CycleReport, FetchError> {
        let uri = self.uri();
        let result = self.source.fetch(uri, self.descriptor.timeout).await?;

        let mut report = CycleReport::default();

        for channel in &result.channels {
            let outcome = self.sink.store_channel(channel).await;
            if report.tally(outcome, uri) {
                report.new_channels += 1;
            }
        }

        for item in &result.items {
            let outcome = self.sink.store_item(item).await;
            if report.tally(outcome, uri) {
                report.new_items += 1;
            }
        }

        info!(uri, count = report.new_channels, "New channel(s)");
        info!(uri, count = report.new_items, "New item(s)");

        report.sleep = sleep_duration(result.seconds_till_next_update);
        Ok(report)
    }

    /// Polls until a fetch fails.
    pub async fn run(self) -> WorkerExit {
        let mut cycles = 0;

        loop {
            match self.poll_once().await {
                Ok(report) => {
                    cycles += 1;
                    info!(
                        uri = self.uri(),
                        seconds = report.sleep.as_secs(),
                        "Sleeping until next poll"
                    );
                    tokio::time::sleep(report.sleep).await;
                }
                Err(error) => {
                    error!(uri = self.uri(), error = %error, "Fetch failed, polling stopped");
                    return WorkerExit {
                        uri: self.descriptor.uri,
                        cycles,
                        error,
                    };
                }
            }
        }
    }
}

/// Negative hints mean poll again right away.
pub fn sleep_duration(seconds_till_next_update: i64) -> Duration {
    Duration::from_secs(seconds_till_next_update.max(0) as u64)
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;

    fn descriptor(uri: &str) -> FeedDescriptor {
        FeedDescriptor {
            uri: uri.to_string(),
            timeout: Duration::from_secs(300),
        }
    }

    #[test]
    fn test_sleep_duration_clamps_negative_hints() {
        assert_eq!(sleep_duration(-5), Duration::ZERO);
        assert_eq!(sleep_duration(0), Duration::ZERO);
        assert_eq!(sleep_duration(90), Duration::from_secs(90));
    }

    #[tokio::test]
    async fn test_poll_once_counts_new_and_known() {
        let source = Arc::new(ScriptedSource::new(vec![
            Ok(fetch_result("chan", &["a", "b"], 30)),
            Ok(fetch_result("chan", &["a", "b", "c"], 30)),
        ]));
        let sink = Arc::new(MemorySink::default());
        let worker = PollWorker::new(descriptor("http://a.example/rss"), source, sink.clone());

        let first = worker.poll_once().await.unwrap();
        assert_eq!(first.new_channels, 1);
        assert_eq!(first.new_items, 2);
        assert_eq!(first.duplicates, 0);
        assert_eq!(first.sleep, Duration::from_secs(30));

        let second = worker.poll_once().await.unwrap();
        assert_eq!(second.new_channels, 0);
        assert_eq!(second.new_items, 1);
        assert_eq!(second.duplicates, 3);
        assert_eq!(sink.items.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_store_errors_do_not_fail_the_cycle() {
        let source = Arc::new(ScriptedSource::new(vec![Ok(fetch_result(
            "chan",
            &["good", "bad"],
            10,
        ))]));
        let sink = Arc::new(MemorySink::default());
        sink.failing_items.lock().unwrap().insert("bad".to_string());
        let worker = PollWorker::new(descriptor("http://a.example/rss"), source, sink.clone());

        let report = worker.poll_once().await.unwrap();

        assert_eq!(report.new_items, 1);
        assert_eq!(report.store_errors, 1);
        assert!(sink.items.lock().unwrap().contains("good"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_next_fetch_waits_for_hint() {
        let source = Arc::new(ScriptedSource::new(vec![
            Ok(fetch_result("chan", &["a"], 60)),
            Ok(fetch_result("chan", &["a"], 45)),
            Err("gone".to_string()),
        ]));
        let sink = Arc::new(MemorySink::default());
        let worker = PollWorker::new(descriptor("http://a.example/rss"), source.clone(), sink);

        let exit = worker.run().await;

        assert_eq!(exit.cycles, 2);
        let times = source.call_times();
        assert_eq!(times.len(), 3);
        assert!(times[1] - times[0] >= Duration::from_secs(60));
        assert!(times[2] - times[1] >= Duration::from_secs(45));
    }

    #[tokio::test(start_paused = true)]
    async fn test_negative_hint_polls_again_immediately() {
        let source = Arc::new(ScriptedSource::new(vec![
            Ok(fetch_result("chan", &[], -30)),
            Err("gone".to_string()),
        ]));
        let worker = PollWorker::new(
            descriptor("http://a.example/rss"),
            source.clone(),
            Arc::new(MemorySink::default()),
        );

        let exit = worker.run().await;

        assert_eq!(exit.cycles, 1);
        let times = source.call_times();
        assert_eq!(times[1] - times[0], Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetch_failure_is_terminal() {
        let source = Arc::new(ScriptedSource::new(vec![Err("connection refused".to_string())]));
        let worker = PollWorker::new(
            descriptor("http://b.example/rss"),
            source.clone(),
            Arc::new(MemorySink::default()),
        );

        let exit = worker.run().await;
        assert_eq!(exit.uri, "http://b.example/rss");
        assert_eq!(exit.cycles, 0);
        assert!(matches!(exit.error, FetchError::Parse(_)));

        tokio::time::sleep(Duration::from_secs(24 * 3600)).await;
        assert_eq!(source.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_worker_passes_descriptor_timeout() {
        let source = Arc::new(ScriptedSource::new(vec![Err("stop".to_string())]));
        let worker = PollWorker::new(
            FeedDescriptor {
                uri: "http://a.example/rss".to_string(),
                timeout: Duration::from_secs(60),
            },
            source.clone(),
            Arc::new(MemorySink::default()),
        );

        worker.run().await;

        let calls = source.calls.lock().unwrap();
        assert_eq!(calls[0].1, Duration::from_secs(60));
    }
}
