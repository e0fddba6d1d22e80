//! The RPC service: one handler, one subject, one queue group.

use std::marker::PhantomData;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use quasar_bus::{BusConnection, Envelope, Headers, KvBucket, SubscriptionHandle};
use quasar_codec::Codec;
use quasar_container::{Container, RefreshEvent};
use quasar_trace::ExecutionContext;

use crate::error::ServiceError;
use crate::hash::{bucket_name, request_hash};
use crate::reload::{reload_channel, ReloadHandle, ReloadState, ServiceChannels};
use crate::status;

/// Boxed handler future.
pub type HandlerFuture<Res> = BoxFuture<'static, anyhow::Result<Res>>;

type HandlerFn<Req, Res> = Arc<dyn Fn(Req) -> HandlerFuture<Res> + Send + Sync>;

/// Uniform lifecycle interface consumed by the bootstrapper.
#[async_trait]
pub trait Service: Send + Sync {
    /// Service name for logs (the subject).
    fn name(&self) -> &str;

    /// Resolve resources. The initial pass (`is_reload = false`) also
    /// registers the connection refresh listener.
    async fn configure(&self, is_reload: bool) -> Result<(), ServiceError>;

    /// Subscribe and begin dispatching.
    async fn start(&self) -> Result<(), ServiceError>;

    /// Unsubscribe. No-op when the connection is already draining or
    /// closed.
    async fn shutdown(&self) -> Result<(), ServiceError>;

    /// Hand the monitor side of the reload handshake to the caller.
    /// Returns `None` after the first take.
    fn reload_handle(&self) -> Option<ReloadHandle>;
}

#[derive(Debug, Clone, Default)]
struct ServiceOptions {
    cache_ttl: Option<Duration>,
    on_success: Vec<String>,
    on_error: Vec<String>,
}

#[derive(Default)]
struct RuntimeState {
    conn: Option<Arc<BusConnection>>,
    subscription: Option<SubscriptionHandle>,
    bucket: Option<Arc<KvBucket>>,
}

/// An RPC service bound to `subject` within `queue`.
///
/// Generic over the request/response types and the codec; the handler is
/// any `Fn(Req) -> Future<Output = anyhow::Result<Res>>`.
pub struct RpcService<Req, Res, C> {
    container: Arc<Container>,
    conn_name: String,
    subject: String,
    queue: String,
    codec: Arc<C>,
    handler: HandlerFn<Req, Res>,
    options: ServiceOptions,
    state: RwLock<RuntimeState>,
    channels: ServiceChannels,
    monitor: Mutex<Option<ReloadHandle>>,
}

impl<Req, Res, C> RpcService<Req, Res, C>
where
    Req: DeserializeOwned + Send + 'static,
    Res: Serialize + Send + 'static,
    C: Codec + Send + Sync + 'static,
{
    /// Create a service bound to `subject` within `queue`, resolving its
    /// bus connection from `container` under `conn_name`.
    pub fn new<H, Fut>(
        container: Arc<Container>,
        conn_name: impl Into<String>,
        subject: impl Into<String>,
        queue: impl Into<String>,
        codec: C,
        handler: H,
    ) -> Self
    where
        H: Fn(Req) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = anyhow::Result<Res>> + Send + 'static,
    {
        let (channels, handle) = reload_channel();
        Self {
            container,
            conn_name: conn_name.into(),
            subject: subject.into(),
            queue: queue.into(),
            codec: Arc::new(codec),
            handler: Arc::new(move |req| handler(req).boxed()),
            options: ServiceOptions::default(),
            state: RwLock::new(RuntimeState::default()),
            channels,
            monitor: Mutex::new(Some(handle)),
        }
    }

    /// Enable response caching with the given entry TTL.
    #[must_use]
    pub fn with_cache(mut self, ttl: Duration) -> Self {
        self.options.cache_ttl = Some(ttl);
        self
    }

    /// Publish successful replies to these subjects as well.
    #[must_use]
    pub fn with_success_fanout<I, S>(mut self, subjects: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.options.on_success = subjects.into_iter().map(Into::into).collect();
        self
    }

    /// Publish failure replies to these subjects as well.
    #[must_use]
    pub fn with_error_fanout<I, S>(mut self, subjects: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.options.on_error = subjects.into_iter().map(Into::into).collect();
        self
    }

    fn register_reload_listener(&self) {
        let events_tx = self.channels.events_tx.clone();
        let acks_rx = Arc::clone(&self.channels.acks_rx);
        let subject = self.subject.clone();

        self.container.on_refresh(
            &self.conn_name,
            Arc::new(move |event| {
                let events_tx = events_tx.clone();
                let acks_rx = Arc::clone(&acks_rx);
                let subject = subject.clone();
                Box::pin(async move {
                    match event {
                        RefreshEvent::Refreshing => {
                            if events_tx.send(ReloadState::Reloading).await.is_err() {
                                warn!(service = %subject, "Reload monitor gone, swap proceeds");
                                return;
                            }
                            // Hold the swap until the monitor has torn the
                            // subscription down.
                            let ack = acks_rx.lock().await.recv().await;
                            if ack != Some(ReloadState::Ready) {
                                warn!(service = %subject, ack = ?ack, "Reload ack was not READY");
                            }
                        }
                        RefreshEvent::Refreshed => {
                            let _ = events_tx.send(ReloadState::Reloaded).await;
                        }
                    }
                })
            }),
        );
    }
}

#[async_trait]
impl<Req, Res, C> Service for RpcService<Req, Res, C>
where
    Req: DeserializeOwned + Send + 'static,
    Res: Serialize + Send + 'static,
    C: Codec + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        &self.subject
    }

    async fn configure(&self, is_reload: bool) -> Result<(), ServiceError> {
        if !is_reload {
            self.register_reload_listener();
        }
        let conn = self.container.resolve::<BusConnection>(&self.conn_name)?;
        self.state.write().await.conn = Some(conn);
        debug!(service = %self.subject, reload = is_reload, "Configured");
        Ok(())
    }

    async fn start(&self) -> Result<(), ServiceError> {
        let mut state = self.state.write().await;
        let conn = state.conn.clone().ok_or(ServiceError::NotConfigured)?;

        if let Some(ttl) = self.options.cache_ttl {
            state.bucket = Some(conn.key_value(&bucket_name(&self.subject), Some(ttl))?);
        }

        let mut subscription = conn.queue_subscribe(&self.subject, &self.queue)?;
        state.subscription = Some(subscription.handle());

        let dispatcher = Arc::new(Dispatcher {
            subject: self.subject.clone(),
            conn,
            codec: Arc::clone(&self.codec),
            handler: Arc::clone(&self.handler),
            bucket: state.bucket.clone(),
            on_success: self.options.on_success.clone(),
            on_error: self.options.on_error.clone(),
            _marker: PhantomData,
        });
        drop(state);

        let subject = self.subject.clone();
        tokio::spawn(async move {
            // One task per inbound message; the loop ends when the
            // subscription is removed and its buffer drains.
            while let Some(envelope) = subscription.recv().await {
                let dispatcher = Arc::clone(&dispatcher);
                tokio::spawn(async move {
                    dispatcher.dispatch(envelope).await;
                });
            }
            debug!(service = %subject, "Dispatch loop ended");
        });

        info!(service = %self.subject, queue = %self.queue, "Subscribed");
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), ServiceError> {
        let mut state = self.state.write().await;
        if let Some(conn) = &state.conn {
            if conn.is_draining() || conn.is_closed() {
                return Ok(());
            }
        }
        if let Some(handle) = state.subscription.take() {
            handle.unsubscribe();
            info!(service = %self.subject, "Unsubscribed");
        }
        Ok(())
    }

    fn reload_handle(&self) -> Option<ReloadHandle> {
        self.monitor.lock().take()
    }
}

/// Everything one in-flight request needs, snapshotted at start time so
/// dispatch never touches service state.
struct Dispatcher<Req, Res, C> {
    subject: String,
    conn: Arc<BusConnection>,
    codec: Arc<C>,
    handler: HandlerFn<Req, Res>,
    bucket: Option<Arc<KvBucket>>,
    on_success: Vec<String>,
    on_error: Vec<String>,
    _marker: PhantomData<fn(Req) -> Res>,
}

impl<Req, Res, C> Dispatcher<Req, Res, C>
where
    Req: DeserializeOwned + Send + 'static,
    Res: Serialize + Send + 'static,
    C: Codec + Send + Sync + 'static,
{
    async fn dispatch(self: Arc<Self>, envelope: Envelope) {
        let ctx = ExecutionContext::new(&self.subject, envelope.reply.clone());

        // Recovery path: a caught handler panic replies FAIL:RECOVERED
        // with the recovered value in the error field.
        {
            let dispatcher = Arc::clone(&self);
            let original = envelope.clone();
            ctx.on_failure(Box::new(move |recovered| {
                Box::pin(async move {
                    let mut headers = Headers::new();
                    headers.set(status::STATUS_HEADER, status::FAIL_RECOVERED);
                    headers.set(status::ERROR_HEADER, status::escape_quotes(&recovered));
                    dispatcher.respond(&original, headers, Vec::new(), false);
                })
            }));
        }

        let request: Req = match self.codec.decode(&envelope.subject, &envelope.payload) {
            Ok(request) => request,
            Err(err) => {
                ctx.error(&err);
                self.respond(
                    &envelope,
                    Self::status_headers(status::FAIL_DECODE),
                    Vec::new(),
                    false,
                );
                return;
            }
        };

        let mut cache_key = None;
        if let Some(bucket) = &self.bucket {
            let key = request_hash(&envelope.payload);
            if let Some(cached) = bucket.get(&key) {
                debug!(service = %self.subject, key = %key, "Cache hit");
                self.respond(
                    &envelope,
                    Self::status_headers(status::SUCCESS),
                    cached,
                    true,
                );
                return;
            }
            cache_key = Some(key);
        }

        let outcome = AssertUnwindSafe((self.handler)(request)).catch_unwind().await;
        let response = match outcome {
            Err(panic) => {
                ctx.recovered(panic_message(&panic)).await;
                return;
            }
            Ok(Err(err)) => {
                ctx.error(&*err);
                let mut headers = Self::status_headers(status::FAIL_HANDLE);
                headers.set(status::ERROR_HEADER, status::escape_quotes(&err.to_string()));
                self.respond(&envelope, headers, Vec::new(), false);
                return;
            }
            Ok(Ok(response)) => response,
        };

        let bytes = match self.codec.encode(&envelope.subject, &response) {
            Ok(bytes) => bytes,
            Err(err) => {
                ctx.error(&err);
                self.respond(
                    &envelope,
                    Self::status_headers(status::FAIL_ENCODE),
                    Vec::new(),
                    false,
                );
                return;
            }
        };

        if let (Some(bucket), Some(key)) = (&self.bucket, &cache_key) {
            // A racing duplicate already filled the slot; both responses
            // came from identical bytes, so the lost write is benign.
            if let Err(err) = bucket.create(key, bytes.clone()) {
                ctx.warn(&err.to_string());
            }
        }

        self.respond(
            &envelope,
            Self::status_headers(status::SUCCESS),
            bytes,
            true,
        );
    }

    /// Reply to the caller, then fan the outcome out to the configured
    /// auxiliary subjects with the reply-to stripped.
    fn respond(&self, original: &Envelope, headers: Headers, payload: Vec<u8>, ok: bool) {
        if let Some(reply_to) = &original.reply {
            let mut reply = Envelope::new(reply_to.clone(), payload.clone());
            reply.headers = headers.clone();
            if let Err(err) = self.conn.publish(reply) {
                error!(service = %self.subject, error = %err, "Reply publish failed");
            }
        }

        let fanout = if ok { &self.on_success } else { &self.on_error };
        for subject in fanout {
            let mut copy = Envelope::new(subject.clone(), payload.clone());
            copy.headers = headers.clone();
            if let Err(err) = self.conn.publish(copy) {
                error!(service = %self.subject, fanout = %subject, error = %err, "Fan-out publish failed");
            }
        }
    }

    fn status_headers(value: &str) -> Headers {
        let mut headers = Headers::new();
        headers.set(status::STATUS_HEADER, value);
        headers
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        String::from("unknown panic")
    }
}
