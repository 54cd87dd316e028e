//! Progress feed subscription.
//!
//! A [`ProgressSubscriber`] spawns one task per subscription. The task
//! attaches to the feed through a [`FeedTransport`], forwards events in
//! delivery order, and re-attaches with linear backoff when the stream
//! drops. After `max_attempts` consecutive failures it reports
//! [`FeedMessage::Lost`] and stops.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dependify_common::{JobId, ProgressEvent};
use futures::stream::{BoxStream, StreamExt};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use crate::errors::FeedError;

/// What a subscription reports to its `on_event` callback.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedMessage {
    /// Attached (or re-attached) to the feed.
    Connected,
    Event(ProgressEvent),
    /// The stream dropped; re-attach attempt `attempt` is pending.
    Disconnected { attempt: u32 },
    /// Gave up re-attaching. No further messages follow.
    Lost,
}

pub type EventStream = BoxStream<'static, Result<ProgressEvent, FeedError>>;

/// Attaches to the feed for one job.
#[async_trait]
pub trait FeedTransport: Send + Sync + 'static {
    async fn connect(&self, job_id: &JobId) -> Result<EventStream, FeedError>;
}

/// WebSocket transport: `{base}/ws/jobs/{job_id}`, one JSON
/// [`ProgressEvent`] per text frame.
#[derive(Debug, Clone)]
pub struct WsTransport {
    base_url: String,
}

impl WsTransport {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
        }
    }

    pub fn feed_url(&self, job_id: &JobId) -> Result<url::Url, FeedError> {
        let raw = format!(
            "{}/ws/jobs/{}",
            self.base_url.trim_end_matches('/'),
            job_id
        );
        let url = url::Url::parse(&raw).map_err(|e| FeedError::InvalidUrl {
            url: raw.clone(),
            message: e.to_string(),
        })?;
        match url.scheme() {
            "ws" | "wss" => Ok(url),
            other => Err(FeedError::InvalidUrl {
                url: raw,
                message: format!("unsupported scheme '{}'", other),
            }),
        }
    }
}

#[async_trait]
impl FeedTransport for WsTransport {
    async fn connect(&self, job_id: &JobId) -> Result<EventStream, FeedError> {
        let url = self.feed_url(job_id)?;
        let (ws, _) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .map_err(|e| FeedError::Connect {
                url: url.to_string(),
                source: Box::new(e),
            })?;
        tracing::debug!(%url, "attached to progress feed");

        let stream = ws.filter_map(|msg| async move {
            match msg {
                Ok(Message::Text(text)) => Some(
                    serde_json::from_str::<ProgressEvent>(text.as_str()).map_err(FeedError::from),
                ),
                Ok(_) => None,
                Err(e) => Some(Err(FeedError::Dropped(e.to_string()))),
            }
        });
        Ok(stream.boxed())
    }
}

/// Re-attach policy.
#[derive(Debug, Clone, Copy)]
pub struct SubscriberConfig {
    pub max_attempts: u32,
    /// Delay before attempt `n` is `backoff * n`.
    pub backoff: Duration,
}

impl Default for SubscriberConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            backoff: Duration::from_millis(500),
        }
    }
}

/// Live subscription. Dropping it releases the subscription as well.
#[derive(Debug)]
pub struct SubscriptionHandle {
    job_id: JobId,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl SubscriptionHandle {
    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    pub fn is_active(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Wait for the subscription task to end on its own (after
    /// [`FeedMessage::Lost`]).
    pub async fn finished(mut self) {
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }

    async fn release(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

pub struct ProgressSubscriber<T: FeedTransport> {
    transport: Arc<T>,
    config: SubscriberConfig,
}

impl<T: FeedTransport> ProgressSubscriber<T> {
    pub fn new(transport: T, config: SubscriberConfig) -> Self {
        Self {
            transport: Arc::new(transport),
            config,
        }
    }

    /// Start delivering feed messages for `job_id` to `on_event`, in feed
    /// order.
    pub fn subscribe<F>(&self, job_id: JobId, on_event: F) -> SubscriptionHandle
    where
        F: FnMut(FeedMessage) + Send + 'static,
    {
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run_subscription(
            Arc::clone(&self.transport),
            job_id.clone(),
            self.config,
            cancel.clone(),
            on_event,
        ));
        tracing::debug!(%job_id, "subscribed");
        SubscriptionHandle {
            job_id,
            cancel,
            task: Some(task),
        }
    }

    /// Stop listening. Once this returns `on_event` is not called again.
    pub async fn unsubscribe(&self, handle: SubscriptionHandle) {
        let job_id = handle.job_id.clone();
        handle.release().await;
        tracing::debug!(%job_id, "unsubscribed");
    }
}

async fn run_subscription<T, F>(
    transport: Arc<T>,
    job_id: JobId,
    config: SubscriberConfig,
    cancel: CancellationToken,
    mut on_event: F,
) where
    T: FeedTransport,
    F: FnMut(FeedMessage) + Send + 'static,
{
    let mut attempt: u32 = 0;

    loop {
        let connected = tokio::select! {
            _ = cancel.cancelled() => return,
            result = transport.connect(&job_id) => result,
        };

        match connected {
            Ok(mut stream) => {
                attempt = 0;
                on_event(FeedMessage::Connected);
                loop {
                    let next = tokio::select! {
                        _ = cancel.cancelled() => return,
                        next = stream.next() => next,
                    };
                    match next {
                        Some(Ok(event)) => on_event(FeedMessage::Event(event)),
                        Some(Err(FeedError::Decode(e))) => {
                            tracing::warn!(%job_id, error = %e, "skipping undecodable feed message");
                        }
                        Some(Err(e)) => {
                            tracing::warn!(%job_id, error = %e, "progress feed dropped");
                            break;
                        }
                        None => {
                            tracing::debug!(%job_id, "progress feed closed");
                            break;
                        }
                    }
                }
            }
            Err(e) => {
                tracing::warn!(%job_id, attempt, error = %e, "progress feed unavailable");
            }
        }

        attempt += 1;
        if attempt > config.max_attempts {
            tracing::warn!(%job_id, "giving up on progress feed");
            on_event(FeedMessage::Lost);
            return;
        }
        on_event(FeedMessage::Disconnected { attempt });

        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(config.backoff * attempt) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dependify_common::{JobStatus, StatusPayload};
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use tokio::sync::mpsc;

    enum Script {
        Events(Vec<ProgressEvent>),
        Fail,
        Hang,
    }

    struct ScriptedTransport {
        scripts: Mutex<VecDeque<Script>>,
    }

    impl ScriptedTransport {
        fn new(scripts: Vec<Script>) -> Self {
            Self {
                scripts: Mutex::new(scripts.into()),
            }
        }
    }

    #[async_trait]
    impl FeedTransport for ScriptedTransport {
        async fn connect(&self, _job_id: &JobId) -> Result<EventStream, FeedError> {
            let next = self.scripts.lock().unwrap().pop_front();
            match next {
                Some(Script::Events(events)) => {
                    Ok(futures::stream::iter(events.into_iter().map(Ok)).boxed())
                }
                Some(Script::Hang) => Ok(futures::stream::pending().boxed()),
                Some(Script::Fail) | None => Err(FeedError::Dropped("refused".into())),
            }
        }
    }

    fn status(status: JobStatus) -> ProgressEvent {
        ProgressEvent::status(JobId::new("job-1"), StatusPayload::new(status))
    }

    fn config(max_attempts: u32) -> SubscriberConfig {
        SubscriberConfig {
            max_attempts,
            backoff: Duration::from_millis(500),
        }
    }

    fn collect(
        subscriber: &ProgressSubscriber<ScriptedTransport>,
    ) -> (SubscriptionHandle, mpsc::UnboundedReceiver<FeedMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = subscriber.subscribe(JobId::new("job-1"), move |msg| {
            let _ = tx.send(msg);
        });
        (handle, rx)
    }

    async fn drain(mut rx: mpsc::UnboundedReceiver<FeedMessage>) -> Vec<FeedMessage> {
        let mut out = Vec::new();
        while let Some(msg) = rx.recv().await {
            out.push(msg);
        }
        out
    }

    #[tokio::test(start_paused = true)]
    async fn test_events_delivered_in_feed_order_then_lost() {
        let transport = ScriptedTransport::new(vec![Script::Events(vec![
            status(JobStatus::Refactoring),
            status(JobStatus::Analyzing),
        ])]);
        let subscriber = ProgressSubscriber::new(transport, config(2));
        let (handle, rx) = collect(&subscriber);
        handle.finished().await;

        assert_eq!(
            drain(rx).await,
            vec![
                FeedMessage::Connected,
                FeedMessage::Event(status(JobStatus::Refactoring)),
                FeedMessage::Event(status(JobStatus::Analyzing)),
                FeedMessage::Disconnected { attempt: 1 },
                FeedMessage::Disconnected { attempt: 2 },
                FeedMessage::Lost,
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_successful_reconnect_resets_attempts() {
        let transport = ScriptedTransport::new(vec![
            Script::Events(vec![status(JobStatus::Analyzing)]),
            Script::Fail,
            Script::Events(vec![status(JobStatus::Validating)]),
        ]);
        let subscriber = ProgressSubscriber::new(transport, config(2));
        let (handle, rx) = collect(&subscriber);
        handle.finished().await;

        assert_eq!(
            drain(rx).await,
            vec![
                FeedMessage::Connected,
                FeedMessage::Event(status(JobStatus::Analyzing)),
                FeedMessage::Disconnected { attempt: 1 },
                FeedMessage::Disconnected { attempt: 2 },
                FeedMessage::Connected,
                FeedMessage::Event(status(JobStatus::Validating)),
                FeedMessage::Disconnected { attempt: 1 },
                FeedMessage::Disconnected { attempt: 2 },
                FeedMessage::Lost,
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_grows_linearly() {
        let transport = ScriptedTransport::new(vec![]);
        let subscriber = ProgressSubscriber::new(transport, config(3));
        let start = tokio::time::Instant::now();
        let (handle, _rx) = collect(&subscriber);
        handle.finished().await;
        // 500ms + 1000ms + 1500ms before the final attempt fails.
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(3000), "{:?}", elapsed);
        assert!(elapsed < Duration::from_millis(3100), "{:?}", elapsed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unsubscribe_stops_delivery() {
        let transport = ScriptedTransport::new(vec![Script::Hang]);
        let subscriber = ProgressSubscriber::new(transport, config(5));
        let (handle, mut rx) = collect(&subscriber);

        assert_eq!(rx.recv().await, Some(FeedMessage::Connected));
        assert!(handle.is_active());
        subscriber.unsubscribe(handle).await;
        // The callback (and its sender) is dropped with the task.
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_handle_releases_subscription() {
        let transport = ScriptedTransport::new(vec![Script::Hang]);
        let subscriber = ProgressSubscriber::new(transport, config(5));
        let (handle, mut rx) = collect(&subscriber);
        assert_eq!(rx.recv().await, Some(FeedMessage::Connected));
        drop(handle);
        assert_eq!(rx.recv().await, None);
    }

    #[test]
    fn test_feed_url_shape() {
        let transport = WsTransport::new("ws://localhost:5001/");
        let url = transport.feed_url(&JobId::new("abc")).unwrap();
        assert_eq!(url.as_str(), "ws://localhost:5001/ws/jobs/abc");

        let transport = WsTransport::new("http://localhost:5001");
        assert!(matches!(
            transport.feed_url(&JobId::new("abc")),
            Err(FeedError::InvalidUrl { .. })
        ));
    }
}
