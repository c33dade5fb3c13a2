//! Notification listener — owns the feed subscription, the reconnection
//! supervisor and the worker pool that runs message handlers.
//!
//! State machine:
//!
//! ```text
//! Connecting --SUBSCRIBED--> Subscribed --CLOSED / CHANNEL_ERROR--> Disconnected
//!     ^                                                                 |
//!     +---------------------- backoff elapsed --------------------------+
//!                                                                       |
//!                                        budget exhausted --> Failed <--+
//! ```
//!
//! Only one subscription exists at a time; the previous stream is fully
//! unsubscribed before the supervisor schedules the next handshake.

use std::sync::Arc;

use tokio::sync::{Semaphore, mpsc, watch};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;

use webglow_common::types::Message;

use crate::feed::{ChannelStatus, FeedEvent, FeedStream, MessageFeed};
use crate::handler::NotificationHandler;
use crate::supervisor::{ReconnectPolicy, ReconnectSupervisor};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerState {
    Connecting,
    Subscribed,
    Disconnected,
    /// Reconnect budget exhausted; the host must restart the listener.
    Failed,
    /// Shut down on request.
    Stopped,
}

impl std::fmt::Display for ListenerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ListenerState::Connecting => write!(f, "connecting"),
            ListenerState::Subscribed => write!(f, "subscribed"),
            ListenerState::Disconnected => write!(f, "disconnected"),
            ListenerState::Failed => write!(f, "failed"),
            ListenerState::Stopped => write!(f, "stopped"),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ListenerConfig {
    pub policy: ReconnectPolicy,
    /// Maximum number of handlers running at once.
    pub workers: usize,
    /// Insert events buffered ahead of the workers. Overflow is dropped.
    pub queue_capacity: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            policy: ReconnectPolicy::default(),
            workers: 16,
            queue_capacity: 1024,
        }
    }
}

/// How a single subscription session ended.
enum SessionEnd {
    Disconnected,
    Cancelled,
}

pub struct NotificationListener {
    feed: Arc<dyn MessageFeed>,
    handler: Arc<NotificationHandler>,
    config: ListenerConfig,
}

/// Handle returned by [`NotificationListener::start`].
pub struct ListenerHandle {
    cancel: CancellationToken,
    state: watch::Receiver<ListenerState>,
    task: JoinHandle<()>,
}

impl ListenerHandle {
    pub fn state(&self) -> ListenerState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ListenerState> {
        self.state.clone()
    }

    /// Resolve once the listener has given up reconnecting or its task has
    /// died without reaching a final state.
    pub async fn failed(&self) {
        let mut state = self.state.clone();
        if state.wait_for(|s| *s == ListenerState::Failed).await.is_err()
            && *state.borrow() != ListenerState::Stopped
        {
            tracing::error!(state = %*state.borrow(), "Notification listener exited unexpectedly");
        }
    }

    /// Cancel the subscription and any pending reconnect timer, then wait
    /// for in-flight handlers to finish.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            tracing::error!(error = %e, "Listener task panicked");
        }
    }
}

impl NotificationListener {
    pub fn new(
        feed: Arc<dyn MessageFeed>,
        handler: Arc<NotificationHandler>,
        config: ListenerConfig,
    ) -> Self {
        Self {
            feed,
            handler,
            config,
        }
    }

    /// Begin the subscription on a background task.
    pub fn start(self) -> ListenerHandle {
        let cancel = CancellationToken::new();
        let (state_tx, state_rx) = watch::channel(ListenerState::Connecting);
        let task = tokio::spawn(self.run(cancel.clone(), state_tx));

        ListenerHandle {
            cancel,
            state: state_rx,
            task,
        }
    }

    async fn run(self, cancel: CancellationToken, state: watch::Sender<ListenerState>) {
        tracing::info!(
            workers = self.config.workers,
            queue_capacity = self.config.queue_capacity,
            max_attempts = self.config.policy.max_attempts,
            "Starting notification listener"
        );

        let (queue_tx, queue_rx) = mpsc::channel(self.config.queue_capacity.max(1));
        let workers = tokio::spawn(dispatch(
            queue_rx,
            self.handler.clone(),
            self.config.workers,
            cancel.clone(),
        ));

        let mut supervisor = ReconnectSupervisor::new(self.config.policy);

        loop {
            state.send_replace(ListenerState::Connecting);

            let subscribed = tokio::select! {
                _ = cancel.cancelled() => break,
                result = self.feed.subscribe() => result,
            };

            match subscribed {
                Ok(stream) => {
                    let end = run_session(stream, &queue_tx, &mut supervisor, &state, &cancel).await;
                    if let SessionEnd::Cancelled = end {
                        break;
                    }
                }
                Err(e) => {
                    tracing::error!(error = %e, "Subscription handshake failed");
                }
            }

            state.send_replace(ListenerState::Disconnected);

            let Some(delay) = supervisor.next_delay() else {
                tracing::error!(
                    max_attempts = supervisor.max_attempts(),
                    "Max reconnect attempts reached. Manual restart required."
                );
                state.send_replace(ListenerState::Failed);
                break;
            };

            tracing::info!(
                delay_ms = delay.as_millis() as u64,
                attempt = supervisor.attempts(),
                max_attempts = supervisor.max_attempts(),
                "Reconnecting"
            );

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        drop(queue_tx);
        if let Err(e) = workers.await {
            tracing::error!(error = %e, "Notification worker pool panicked");
        }

        if cancel.is_cancelled() {
            state.send_replace(ListenerState::Stopped);
        }
        tracing::info!(state = %*state.borrow(), "Notification listener stopped");
    }
}

/// Pump one subscription until it disconnects or the listener is cancelled.
async fn run_session(
    mut stream: Box<dyn FeedStream>,
    queue: &mpsc::Sender<Message>,
    supervisor: &mut ReconnectSupervisor,
    state: &watch::Sender<ListenerState>,
    cancel: &CancellationToken,
) -> SessionEnd {
    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => {
                stream.unsubscribe().await;
                return SessionEnd::Cancelled;
            }
            event = stream.next_event() => event,
        };

        match event {
            Some(FeedEvent::Insert(message)) => match queue.try_send(message) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(message)) => {
                    tracing::warn!(
                        message_id = %message.id,
                        "Notification queue full, dropping insert event"
                    );
                }
                Err(mpsc::error::TrySendError::Closed(message)) => {
                    tracing::error!(
                        message_id = %message.id,
                        "Worker pool stopped, dropping insert event"
                    );
                }
            },
            Some(FeedEvent::Status {
                status: ChannelStatus::Subscribed,
                ..
            }) => {
                tracing::info!("Successfully subscribed to message changes");
                supervisor.reset();
                state.send_replace(ListenerState::Subscribed);
            }
            Some(FeedEvent::Status {
                status: ChannelStatus::Closed,
                error,
            }) => {
                tracing::warn!(reason = ?error, "Channel closed, attempting to reconnect");
                break;
            }
            Some(FeedEvent::Status {
                status: ChannelStatus::ChannelError,
                error,
            }) => {
                tracing::error!(error = ?error, "Channel error");
                break;
            }
            Some(FeedEvent::Status {
                status: ChannelStatus::Other(status),
                error,
            }) => {
                tracing::info!(status = %status, detail = ?error, "Channel status");
            }
            None => {
                tracing::warn!("Message feed ended, attempting to reconnect");
                break;
            }
        }
    }

    stream.unsubscribe().await;
    SessionEnd::Disconnected
}

/// Run handlers from the queue with at most `workers` in flight.
///
/// On cancellation, queued events are discarded and in-flight handlers are
/// awaited.
async fn dispatch(
    mut queue: mpsc::Receiver<Message>,
    handler: Arc<NotificationHandler>,
    workers: usize,
    cancel: CancellationToken,
) {
    let limit = Arc::new(Semaphore::new(workers.max(1)));
    let mut tasks = JoinSet::new();

    loop {
        let message = tokio::select! {
            _ = cancel.cancelled() => break,
            message = queue.recv() => match message {
                Some(message) => message,
                None => break,
            },
        };

        let permit = tokio::select! {
            _ = cancel.cancelled() => break,
            permit = limit.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };

        let handler = handler.clone();
        tasks.spawn(async move {
            let outcome = handler.handle(&message).await;
            tracing::debug!(message_id = %message.id, outcome = ?outcome, "Message handled");
            drop(permit);
        });

        while let Some(result) = tasks.try_join_next() {
            if let Err(e) = result {
                tracing::error!(error = %e, "Notification handler panicked");
            }
        }
    }

    queue.close();
    let mut discarded = 0usize;
    while queue.try_recv().is_ok() {
        discarded += 1;
    }
    if discarded > 0 {
        tracing::warn!(discarded, "Discarded queued insert events on shutdown");
    }

    while let Some(result) = tasks.join_next().await {
        if let Err(e) = result {
            tracing::error!(error = %e, "Notification handler panicked");
        }
    }
}
