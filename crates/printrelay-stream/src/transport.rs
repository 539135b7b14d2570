// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Event bus transport.
//
// `PubSubTransport` is the seam between the subscription engine and the
// wire.  `GrpcTransport` speaks the Pub/Sub API over a TLS gRPC channel and
// attaches the session's auth metadata to every call, not just the first,
// so a token refreshed mid-run is picked up by the next RPC.

use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use http::uri::PathAndQuery;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::{Stream, StreamExt};
use tonic::client::Grpc;
use tonic::codec::ProstCodec;
use tonic::metadata::{Ascii, MetadataValue};
use tonic::transport::{Channel, ClientTlsConfig, Endpoint};
use tonic::{Code, Request, Status};
use tracing::{debug, info, instrument};

use printrelay_core::error::{RelayError, Result};
use printrelay_core::session::{Session, redact_token};

use crate::proto::{
    FetchRequest, FetchResponse, GET_SCHEMA_PATH, GET_TOPIC_PATH, SUBSCRIBE_PATH, SchemaInfo,
    SchemaRequest, TopicInfo, TopicRequest,
};

/// Server-to-client half of a subscription.
pub type FetchStream = Pin<Box<dyn Stream<Item = Result<FetchResponse>> + Send>>;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(60);

/// Operations the subscription engine needs from the event bus.
#[async_trait]
pub trait PubSubTransport: Send + Sync {
    /// Establish (or re-establish) the underlying connection.
    async fn connect(&self) -> Result<()>;

    async fn get_topic(&self, topic: &str) -> Result<TopicInfo>;

    async fn get_schema(&self, schema_id: &str) -> Result<SchemaInfo>;

    /// Open the bidirectional fetch stream.
    async fn subscribe(&self, requests: ReceiverStream<FetchRequest>) -> Result<FetchStream>;
}

/// Make ring the process-wide rustls provider.
///
/// Both rustls backends are compiled into the binary (ring via tonic and
/// reqwest, aws-lc-rs via the ipp client), so rustls will not pick one on
/// its own.  Safe to call more than once; the first installed provider wins.
pub fn install_crypto_provider() {
    if rustls::crypto::ring::default_provider().install_default().is_ok() {
        debug!("installed ring as the rustls crypto provider");
    }
}

/// Map a gRPC status onto the error taxonomy.
pub fn status_to_error(status: Status) -> RelayError {
    match status.code() {
        Code::Unauthenticated => RelayError::Unauthenticated(status.message().to_string()),
        Code::PermissionDenied => RelayError::PermissionDenied(status.message().to_string()),
        code => RelayError::Transport(format!("{code:?}: {}", status.message())),
    }
}

/// Pub/Sub API over gRPC + TLS.
pub struct GrpcTransport {
    endpoint: Endpoint,
    session: Arc<Session>,
    channel: Mutex<Option<Channel>>,
}

impl GrpcTransport {
    /// Prepare a transport for `endpoint` (e.g.
    /// `https://api.pubsub.salesforce.com:7443`).  No I/O happens until
    /// [`connect`](PubSubTransport::connect).
    pub fn new(endpoint: &str, session: Arc<Session>) -> Result<Self> {
        install_crypto_provider();
        let endpoint = Endpoint::from_shared(endpoint.to_string())
            .map_err(|e| RelayError::Config(format!("invalid endpoint '{endpoint}': {e}")))?
            .tls_config(ClientTlsConfig::new().with_webpki_roots())
            .map_err(|e| RelayError::Config(format!("TLS configuration: {e}")))?
            .connect_timeout(CONNECT_TIMEOUT)
            .http2_keep_alive_interval(KEEP_ALIVE_INTERVAL)
            .keep_alive_while_idle(true);
        Ok(Self {
            endpoint,
            session,
            channel: Mutex::new(None),
        })
    }

    fn client(&self) -> Result<Grpc<Channel>> {
        let guard = self.channel.lock().unwrap_or_else(|e| e.into_inner());
        let channel = guard
            .clone()
            .ok_or_else(|| RelayError::Transport("not connected".into()))?;
        Ok(Grpc::new(channel))
    }

    /// Wrap a message with the per-call auth metadata.
    fn request<T>(&self, message: T) -> Result<Request<T>> {
        let mut request = Request::new(message);
        for (key, value) in self.session.auth_metadata() {
            let value = MetadataValue::<Ascii>::try_from(value.as_str())
                .map_err(|e| RelayError::Config(format!("metadata '{key}' is not valid ASCII: {e}")))?;
            request.metadata_mut().insert(key, value);
        }
        Ok(request)
    }
}

async fn ready(grpc: &mut Grpc<Channel>) -> Result<()> {
    grpc.ready()
        .await
        .map_err(|e| RelayError::Transport(format!("service not ready: {e}")))
}

#[async_trait]
impl PubSubTransport for GrpcTransport {
    #[instrument(skip(self), fields(endpoint = %self.endpoint.uri()))]
    async fn connect(&self) -> Result<()> {
        let channel = self
            .endpoint
            .connect()
            .await
            .map_err(|e| RelayError::Transport(format!("connect: {e}")))?;
        *self.channel.lock().unwrap_or_else(|e| e.into_inner()) = Some(channel);
        info!(
            instance_url = self.session.instance_url(),
            tenant_id = self.session.tenant_id(),
            token = %redact_token(&self.session.access_token()),
            "connected to Pub/Sub API"
        );
        Ok(())
    }

    async fn get_topic(&self, topic: &str) -> Result<TopicInfo> {
        let mut grpc = self.client()?;
        ready(&mut grpc).await?;
        let request = self.request(TopicRequest {
            topic_name: topic.to_string(),
        })?;
        let response = grpc
            .unary(
                request,
                PathAndQuery::from_static(GET_TOPIC_PATH),
                ProstCodec::<TopicRequest, TopicInfo>::default(),
            )
            .await
            .map_err(status_to_error)?;
        Ok(response.into_inner())
    }

    async fn get_schema(&self, schema_id: &str) -> Result<SchemaInfo> {
        let mut grpc = self.client()?;
        ready(&mut grpc).await?;
        let request = self.request(SchemaRequest {
            schema_id: schema_id.to_string(),
        })?;
        debug!(schema_id, "fetching schema");
        let response = grpc
            .unary(
                request,
                PathAndQuery::from_static(GET_SCHEMA_PATH),
                ProstCodec::<SchemaRequest, SchemaInfo>::default(),
            )
            .await
            .map_err(|status| match status.code() {
                Code::Unauthenticated | Code::PermissionDenied | Code::Unavailable => {
                    status_to_error(status)
                }
                _ => RelayError::Schema(format!("GetSchema({schema_id}): {}", status.message())),
            })?;
        Ok(response.into_inner())
    }

    async fn subscribe(&self, requests: ReceiverStream<FetchRequest>) -> Result<FetchStream> {
        let mut grpc = self.client()?;
        ready(&mut grpc).await?;
        let request = self.request(requests)?;
        let response = grpc
            .streaming(
                request,
                PathAndQuery::from_static(SUBSCRIBE_PATH),
                ProstCodec::<FetchRequest, FetchResponse>::default(),
            )
            .await
            .map_err(status_to_error)?;
        let stream = response
            .into_inner()
            .map(|item| item.map_err(status_to_error));
        Ok(Box::pin(stream))
    }
}
