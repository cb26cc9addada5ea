use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{Client, Url};
use std::sync::Arc;
use std::time::Instant;
use tokio::task::{JoinError, JoinSet};
use tokio::time::{interval, sleep, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::error::FastError;
use super::progress::{kbps, ProgressSample, TransferProgress};
use super::types::{EndpointSet, EngineState, MeasureConfig, RateEstimate, RateEvent, RateSender};

/// Turns a set of endpoints into a stream of rate estimates.
///
/// On success the stream ends with one [`RateEvent::Final`] carrying the
/// returned estimate. On error the stream closes without it.
#[async_trait]
pub trait ThroughputEngine: Send + Sync {
    async fn measure(
        &self,
        endpoints: EndpointSet,
        tx: RateSender,
    ) -> Result<RateEstimate, FastError>;
}

/// Concurrent HTTP GET downloads feeding one shared byte counter.
pub struct HttpEngine {
    client: Client,
    config: MeasureConfig,
}

impl HttpEngine {
    pub fn new(client: Client, config: MeasureConfig) -> Self {
        Self { client, config }
    }

    fn spawn_download(
        &self,
        tasks: &mut JoinSet<Result<u64, FastError>>,
        url: Url,
        progress: &Arc<TransferProgress>,
    ) {
        let client = self.client.clone();
        let progress = Arc::clone(progress);
        tasks.spawn(async move { download(&client, url, &progress).await });
    }
}

#[async_trait]
impl ThroughputEngine for HttpEngine {
    async fn measure(
        &self,
        endpoints: EndpointSet,
        tx: RateSender,
    ) -> Result<RateEstimate, FastError> {
        let fan_out = self.config.connections.max(1);
        debug!(state = %EngineState::Idle, "Measuring {} endpoints, fan-out {fan_out}", endpoints.len());

        let progress = Arc::new(TransferProgress::new());
        let mut pending = endpoints.into_iter();
        let mut tasks = JoinSet::new();

        debug!(state = %EngineState::Connecting);
        for url in pending.by_ref().take(fan_out) {
            self.spawn_download(&mut tasks, url, &progress);
        }

        let start = progress.sample();
        let mut last = start;
        let mut index: u64 = 0;
        let mut downloading = false;

        let window = sleep(self.config.duration);
        tokio::pin!(window);
        let mut ticker = interval(self.config.sample_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // the first tick completes immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = &mut window => {
                    debug!("Measurement window of {:?} elapsed", self.config.duration);
                    break;
                }
                _ = ticker.tick() => {
                    if progress.connections() == 0 {
                        continue;
                    }
                    if !downloading {
                        downloading = true;
                        debug!(state = %EngineState::Downloading);
                    }
                    let now = progress.sample();
                    debug!("Instantaneous rate {:.0} Kbps", now.kbps_since(&last));
                    last = now;
                    index += 1;
                    let estimate = RateEstimate { index, kbps: now.kbps_since(&start) };
                    if tx.send(RateEvent::Sample(estimate)).await.is_err() {
                        debug!("Estimate receiver dropped");
                    }
                }
                joined = tasks.join_next() => {
                    if !settle(joined) {
                        debug!("All downloads finished");
                        break;
                    }
                    // every finished download frees a slot for the next endpoint
                    if let Some(url) = pending.next() {
                        debug!("Opening next endpoint {url}");
                        self.spawn_download(&mut tasks, url, &progress);
                    }
                }
            }
        }

        debug!(state = %EngineState::Finalizing);
        tasks.abort_all();
        let end = progress.sample();

        if progress.connections() == 0 {
            return Err(FastError::Measurement(
                "could not connect to any endpoint".to_string(),
            ));
        }

        let estimate = final_estimate(&start, &end, index + 1);
        info!(
            "Downloaded {} bytes over {} connections: {:.0} Kbps",
            end.bytes,
            progress.connections(),
            estimate.kbps
        );
        if tx.send(RateEvent::Final(estimate)).await.is_err() {
            debug!("Estimate receiver dropped before final value");
        }
        debug!(state = %EngineState::Done);
        Ok(estimate)
    }
}

/// Log how a download ended. Returns `false` once no downloads remain.
///
/// Success, failure, panic and cancellation all free the download's slot.
fn settle(joined: Option<Result<Result<u64, FastError>, JoinError>>) -> bool {
    match joined {
        None => return false,
        Some(Ok(Ok(bytes))) => debug!("Download finished after {bytes} bytes"),
        Some(Ok(Err(e))) => warn!("Endpoint failed: {e}"),
        Some(Err(e)) => warn!("Download task failed: {e}"),
    }
    true
}

fn final_estimate(start: &ProgressSample, end: &ProgressSample, index: u64) -> RateEstimate {
    RateEstimate {
        index,
        kbps: kbps(
            end.bytes.saturating_sub(start.bytes),
            end.at.saturating_duration_since(start.at),
        ),
    }
}

/// Stream one endpoint into `progress`.
///
/// Errors only when the connection never produced a successful response.
/// A transfer that breaks off midway keeps the bytes it delivered.
async fn download(
    client: &Client,
    url: Url,
    progress: &TransferProgress,
) -> Result<u64, FastError> {
    let started = Instant::now();
    let resp = client
        .get(url.clone())
        .send()
        .await
        .map_err(|e| FastError::Measurement(format!("{url}: {e}")))?;
    let status = resp.status();
    if !status.is_success() {
        return Err(FastError::Measurement(format!("{url} returned {status}")));
    }
    progress.connection_opened();
    debug!("Connected to {url} in {:.2?}", started.elapsed());

    let mut total: u64 = 0;
    let mut stream = resp.bytes_stream();
    while let Some(chunk) = stream.next().await {
        match chunk {
            Ok(chunk) => {
                let n = chunk.len() as u64;
                total += n;
                progress.record(n);
            }
            Err(e) => {
                warn!("Transfer from {url} interrupted: {e}");
                break;
            }
        }
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::sync::mpsc;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_config() -> MeasureConfig {
        MeasureConfig {
            connections: 2,
            duration: Duration::from_secs(5),
            sample_interval: Duration::from_millis(10),
        }
    }

    fn endpoints(urls: &[String]) -> EndpointSet {
        EndpointSet::new(urls.iter().map(|u| Url::parse(u).unwrap()).collect()).unwrap()
    }

    async fn collect(mut rx: mpsc::Receiver<RateEvent>) -> Vec<RateEvent> {
        let mut events = Vec::new();
        while let Some(ev) = rx.recv().await {
            events.push(ev);
        }
        events
    }

    async fn mount_body(server: &MockServer, route: &str, len: usize, delay: Duration) {
        Mock::given(method("GET"))
            .and(path(route))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_bytes(vec![0u8; len])
                    .set_delay(delay),
            )
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_measure_ends_with_final_estimate() {
        let server = MockServer::start().await;
        mount_body(&server, "/a", 256 * 1024, Duration::from_millis(50)).await;
        mount_body(&server, "/b", 256 * 1024, Duration::from_millis(50)).await;

        let engine = HttpEngine::new(Client::new(), test_config());
        let (tx, rx) = mpsc::channel(256);
        let collector = tokio::spawn(collect(rx));

        let urls = [format!("{}/a", server.uri()), format!("{}/b", server.uri())];
        let result = engine.measure(endpoints(&urls), tx).await.unwrap();
        let events = collector.await.unwrap();

        assert!(result.kbps > 0.0);
        assert_eq!(events.last(), Some(&RateEvent::Final(result)));
        assert_eq!(
            events
                .iter()
                .filter(|e| matches!(e, RateEvent::Final(_)))
                .count(),
            1
        );
        // strictly increasing indices, final last
        let indices: Vec<u64> = events.iter().map(|e| e.estimate().index).collect();
        assert!(indices.windows(2).all(|w| w[0] < w[1]));
    }

    #[tokio::test]
    async fn test_partial_connection_failure_is_tolerated() {
        let server = MockServer::start().await;
        mount_body(&server, "/ok", 64 * 1024, Duration::ZERO).await;
        Mock::given(method("GET"))
            .and(path("/missing"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let engine = HttpEngine::new(Client::new(), test_config());
        let (tx, rx) = mpsc::channel(256);
        let collector = tokio::spawn(collect(rx));

        let urls = [
            format!("{}/missing", server.uri()),
            "http://127.0.0.1:1/refused".to_string(),
            format!("{}/ok", server.uri()),
        ];
        let result = engine.measure(endpoints(&urls), tx).await;
        let events = collector.await.unwrap();

        let result = result.unwrap();
        assert!(matches!(events.last(), Some(RateEvent::Final(e)) if *e == result));
    }

    #[tokio::test]
    async fn test_failed_endpoint_is_replaced_in_order() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/down"))
            .respond_with(ResponseTemplate::new(503))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/spare"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![1u8; 1024]))
            .expect(1)
            .mount(&server)
            .await;

        let config = MeasureConfig {
            connections: 1,
            ..test_config()
        };
        let engine = HttpEngine::new(Client::new(), config);
        let (tx, rx) = mpsc::channel(256);
        let collector = tokio::spawn(collect(rx));

        let urls = [format!("{}/down", server.uri()), format!("{}/spare", server.uri())];
        assert!(engine.measure(endpoints(&urls), tx).await.is_ok());
        collector.await.unwrap();
    }

    #[tokio::test]
    async fn test_completed_endpoint_frees_slot_for_next() {
        let server = MockServer::start().await;
        mount_body(&server, "/a", 4 * 1024, Duration::ZERO).await;
        mount_body(&server, "/b", 4 * 1024, Duration::ZERO).await;
        mount_body(&server, "/c", 4 * 1024, Duration::ZERO).await;

        let config = MeasureConfig {
            connections: 1,
            ..test_config()
        };
        let engine = HttpEngine::new(Client::new(), config);
        let (tx, rx) = mpsc::channel(256);
        let collector = tokio::spawn(collect(rx));

        let urls = [
            format!("{}/a", server.uri()),
            format!("{}/b", server.uri()),
            format!("{}/c", server.uri()),
        ];
        assert!(engine.measure(endpoints(&urls), tx).await.is_ok());
        collector.await.unwrap();

        let requested: Vec<String> = server
            .received_requests()
            .await
            .unwrap()
            .iter()
            .map(|r| r.url.path().to_string())
            .collect();
        assert_eq!(requested, vec!["/a", "/b", "/c"]);
    }

    async fn exploding_download() -> Result<u64, FastError> {
        panic!("download task blew up")
    }

    #[tokio::test]
    async fn test_panicked_or_cancelled_download_frees_slot() {
        let mut tasks: JoinSet<Result<u64, FastError>> = JoinSet::new();
        tasks.spawn(exploding_download());
        assert!(settle(tasks.join_next().await));

        let handle = tasks.spawn(async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(0)
        });
        handle.abort();
        let joined = tasks.join_next().await;
        assert!(matches!(joined, Some(Err(ref e)) if e.is_cancelled()));
        assert!(settle(joined));

        assert!(!settle(tasks.join_next().await));
    }

    #[test]
    fn test_settle_keeps_going_after_finished_or_failed_download() {
        assert!(settle(Some(Ok(Ok(1024)))));
        assert!(settle(Some(Ok(Err(FastError::Measurement(
            "503".to_string()
        ))))));
        assert!(!settle(None));
    }

    #[tokio::test]
    async fn test_no_connections_is_measurement_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let engine = HttpEngine::new(Client::new(), test_config());
        let (tx, rx) = mpsc::channel(256);
        let collector = tokio::spawn(collect(rx));

        let urls = [
            format!("{}/x", server.uri()),
            "http://127.0.0.1:1/refused".to_string(),
        ];
        let err = engine.measure(endpoints(&urls), tx).await.unwrap_err();
        let events = collector.await.unwrap();

        assert!(matches!(err, FastError::Measurement(_)));
        assert!(events.is_empty());
    }

    #[tokio::test]
    async fn test_window_bounds_slow_downloads() {
        let server = MockServer::start().await;
        mount_body(&server, "/slow", 1024, Duration::from_secs(30)).await;

        let config = MeasureConfig {
            duration: Duration::from_millis(200),
            ..test_config()
        };
        let engine = HttpEngine::new(Client::new(), config);
        let (tx, rx) = mpsc::channel(256);
        let collector = tokio::spawn(collect(rx));

        let started = Instant::now();
        let urls = [format!("{}/slow", server.uri())];
        let err = engine.measure(endpoints(&urls), tx).await.unwrap_err();
        collector.await.unwrap();

        // the response headers never arrive inside the window
        assert!(matches!(err, FastError::Measurement(_)));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn test_final_estimate_uses_whole_run() {
        let start = Instant::now();
        let a = ProgressSample { bytes: 0, at: start };
        let b = ProgressSample {
            bytes: 1_250_000,
            at: start + Duration::from_secs(10),
        };
        let estimate = final_estimate(&a, &b, 7);
        assert_eq!(estimate.index, 7);
        assert_eq!(estimate.kbps, 1_000.0);
    }
}
