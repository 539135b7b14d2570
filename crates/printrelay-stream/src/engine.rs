// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Flow-controlled subscription engine.
//
// Lifecycle: Idle → Connecting → Verifying → Streaming → Stopped | Failed.
//
// Fetch requests are gated by a credit semaphore sized to the window.  A
// request goes out only after taking a credit; the credit comes back once
// the matching response batch (events or keepalive) has been fully handled.
// Events are decoded and handed to the handler one at a time, in delivery
// order, on the task driving the stream, so a slow handler delays the next
// fetch instead of piling up buffered batches.
//
// The replay cursor advances after every batch, keepalives included, and
// only once the batch's handler calls have returned.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use apache_avro::Schema;
use async_trait::async_trait;
use tokio::sync::{Notify, Semaphore, mpsc, watch};
use tokio_stream::StreamExt;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, error, info, instrument, warn};

use printrelay_core::error::{RelayError, Result};
use printrelay_core::types::EventRecord;

use crate::decode::{decode_event, parse_schema};
use crate::proto::{ConsumerEvent, FetchRequest, FetchResponse, ReplayFrom};
use crate::transport::PubSubTransport;

/// Receives decoded events, one at a time, in delivery order.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, record: EventRecord) -> Result<()>;
}

/// Where the engine is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    Idle,
    Connecting,
    Verifying,
    Streaming,
    Stopped,
    Failed,
}

/// Flow-control settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineOptions {
    /// Maximum fetch requests in flight.
    pub window_size: u32,
    /// Events asked for by each fetch request.
    pub num_requested: i32,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            window_size: 1,
            num_requested: 1,
        }
    }
}

/// Requests a running subscription to stop at the next batch boundary.
///
/// A subscription idling on an empty stream wakes up and ends; a batch
/// already being handled always runs to completion.
#[derive(Debug, Clone, Default)]
pub struct StopHandle {
    stop: Arc<AtomicBool>,
    wake: Arc<Notify>,
}

impl StopHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
        self.wake.notify_waiters();
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    /// Resolves once `stop` has been called.
    pub async fn stopped(&self) {
        let notified = self.wake.notified();
        tokio::pin!(notified);
        // Register before checking the flag so a concurrent stop is not missed.
        notified.as_mut().enable();
        if self.is_stopped() {
            return;
        }
        notified.await;
    }
}

/// Long-lived pull subscription against the event bus.
pub struct SubscriptionEngine {
    transport: Arc<dyn PubSubTransport>,
    options: EngineOptions,
    stop: StopHandle,
    state: watch::Sender<SubscriptionState>,
    latest_replay_id: Mutex<Option<Vec<u8>>>,
    schemas: Mutex<HashMap<String, Arc<Schema>>>,
    batches: AtomicU64,
}

impl SubscriptionEngine {
    pub fn new(transport: Arc<dyn PubSubTransport>, options: EngineOptions) -> Self {
        let (state, _) = watch::channel(SubscriptionState::Idle);
        Self {
            transport,
            options: EngineOptions {
                window_size: options.window_size.max(1),
                num_requested: options.num_requested.max(1),
            },
            stop: StopHandle::new(),
            state,
            latest_replay_id: Mutex::new(None),
            schemas: Mutex::new(HashMap::new()),
            batches: AtomicU64::new(0),
        }
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Stop at the next batch boundary.  Stopping is permanent for this
    /// engine instance.
    pub fn stop(&self) {
        info!("subscription stop requested");
        self.stop.stop();
    }

    pub fn state(&self) -> SubscriptionState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<SubscriptionState> {
        self.state.subscribe()
    }

    /// Position after the last fully handled batch.
    pub fn latest_replay_id(&self) -> Option<Vec<u8>> {
        self.latest_replay_id
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Total batches received (events and keepalives) over the engine's life.
    pub fn batches_received(&self) -> u64 {
        self.batches.load(Ordering::SeqCst)
    }

    pub fn cached_schemas(&self) -> usize {
        self.schemas.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Subscribe from the latest event.  Runs until stopped or a transport
    /// error occurs.
    pub async fn subscribe(&self, topic: &str, handler: &dyn EventHandler) -> Result<()> {
        self.subscribe_from(topic, handler, ReplayFrom::Latest).await
    }

    /// Subscribe from an explicit replay position.
    #[instrument(skip(self, handler), fields(window = self.options.window_size))]
    pub async fn subscribe_from(
        &self,
        topic: &str,
        handler: &dyn EventHandler,
        replay: ReplayFrom,
    ) -> Result<()> {
        if self.stop.is_stopped() {
            self.set_state(SubscriptionState::Stopped);
            return Ok(());
        }

        let result = self.run(topic, handler, replay).await;
        match &result {
            Ok(()) => {
                info!("subscription stopped");
                self.set_state(SubscriptionState::Stopped);
            }
            Err(e) => {
                error!(error = %e, "subscription failed");
                self.set_state(SubscriptionState::Failed);
            }
        }
        result
    }

    async fn run(&self, topic: &str, handler: &dyn EventHandler, replay: ReplayFrom) -> Result<()> {
        self.set_state(SubscriptionState::Connecting);
        self.transport.connect().await?;

        self.set_state(SubscriptionState::Verifying);
        let topic_info = self.transport.get_topic(topic).await?;
        info!(
            topic = %topic_info.topic_name,
            can_subscribe = topic_info.can_subscribe,
            schema_id = %topic_info.schema_id,
            "topic verified"
        );
        if !topic_info.can_subscribe {
            return Err(RelayError::PermissionDenied(format!(
                "can_subscribe=false for {topic}; check the event exists and the user may subscribe"
            )));
        }

        let window = self.options.window_size as usize;
        let credits = Arc::new(Semaphore::new(window));
        let (tx, rx) = mpsc::channel(window);
        let first = FetchRequest::initial(topic, &replay, self.options.num_requested);
        let feeder = tokio::spawn(feed_requests(
            tx,
            credits.clone(),
            self.stop.clone(),
            first,
            self.options.num_requested,
        ));

        let mut responses = match self.transport.subscribe(ReceiverStream::new(rx)).await {
            Ok(stream) => stream,
            Err(e) => {
                feeder.abort();
                return Err(e);
            }
        };
        self.set_state(SubscriptionState::Streaming);
        info!(topic, replay = ?replay_label(&replay), "listening for events");

        let result = loop {
            let next = tokio::select! {
                next = responses.next() => next,
                _ = self.stop.stopped() => break Ok(()),
            };
            let batch = match next {
                Some(Ok(batch)) => batch,
                Some(Err(e)) => break Err(e),
                None if self.stop.is_stopped() => break Ok(()),
                None => break Err(RelayError::Transport("stream closed by server".into())),
            };
            if self.stop.is_stopped() {
                break Ok(());
            }
            self.batches.fetch_add(1, Ordering::SeqCst);
            self.handle_batch(batch, handler).await;

            // Return the credit, never growing past the window.
            if credits.available_permits() < window {
                credits.add_permits(1);
            }
        };

        feeder.abort();
        result
    }

    async fn handle_batch(&self, batch: FetchResponse, handler: &dyn EventHandler) {
        if batch.events.is_empty() {
            debug!(
                replay_id = %hex::encode(&batch.latest_replay_id),
                pending = batch.pending_num_requested,
                "keepalive"
            );
        } else {
            info!(count = batch.events.len(), pending = batch.pending_num_requested, "received events");
        }

        for event in batch.events {
            if let Err(e) = self.dispatch(event, handler).await {
                error!(error = %e, "error processing event, continuing");
            }
        }

        *self.latest_replay_id.lock().unwrap_or_else(|e| e.into_inner()) =
            Some(batch.latest_replay_id);
    }

    async fn dispatch(&self, event: ConsumerEvent, handler: &dyn EventHandler) -> Result<()> {
        let producer = event
            .event
            .ok_or_else(|| RelayError::Decode("consumer event without a payload".into()))?;
        let schema = self.schema(&producer.schema_id).await?;
        let record = decode_event(&schema, &producer.payload)?;
        debug!(
            event_id = %producer.id,
            replay_id = %hex::encode(&event.replay_id),
            event_type = %record.event_type(),
            "decoded event"
        );
        handler.handle(record).await
    }

    /// Schema by id, fetched once per engine and cached.
    async fn schema(&self, schema_id: &str) -> Result<Arc<Schema>> {
        if let Some(schema) = self
            .schemas
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(schema_id)
        {
            return Ok(schema.clone());
        }

        let info = self.transport.get_schema(schema_id).await?;
        let schema = Arc::new(parse_schema(&info.schema_json)?);
        self.schemas
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(schema_id.to_string(), schema.clone());
        debug!(schema_id, "schema cached");
        Ok(schema)
    }

    fn set_state(&self, state: SubscriptionState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            debug!(from = ?previous, to = ?state, "subscription state");
        }
    }
}

/// Issue fetch requests, one per credit.
async fn feed_requests(
    tx: mpsc::Sender<FetchRequest>,
    credits: Arc<Semaphore>,
    stop: StopHandle,
    first: FetchRequest,
    num_requested: i32,
) {
    let mut next = Some(first);
    loop {
        let Ok(permit) = credits.acquire().await else {
            break;
        };
        permit.forget();
        if stop.is_stopped() {
            break;
        }
        let request = next.take().unwrap_or_else(|| FetchRequest::more(num_requested));
        if tx.send(request).await.is_err() {
            warn!("fetch request stream closed");
            break;
        }
    }
}

fn replay_label(replay: &ReplayFrom) -> String {
    match replay {
        ReplayFrom::Latest => "latest".into(),
        ReplayFrom::Earliest => "earliest".into(),
        ReplayFrom::Cursor(id) => hex::encode(id),
    }
}
