//! Forwarding server.
//!
//! A broker service variant that proxies every request to an upstream
//! broker over a shared channel, for deployments that chain through a
//! proxy tier. Incoming request metadata is propagated to the upstream
//! request; the peer address is appended to an `x-forwarded-for` list,
//! and a request that has already been forwarded once is rejected before
//! it can loop.

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use tonic::codegen::http::{header, HeaderValue, Request, Response, Uri};
use tonic::transport::server::TcpConnectInfo;
use tonic::transport::{Channel, Endpoint};
use tonic::Status;

use crate::core::error::{BrokerError, BrokerResult};

use super::grpc::{grpc_error_response, read_unary_body};

/// Maximum number of hops a request may take before it is rejected.
pub const MAX_FORWARDS: usize = 1;

const FORWARDED_FOR: &str = "x-forwarded-for";

/// A broker service that forwards every request to an upstream broker.
#[derive(Clone)]
pub struct ForwardingServer {
    channel: Channel,
}

impl ForwardingServer {
    /// Connect to the upstream broker endpoint.
    pub async fn connect(endpoint: &str) -> BrokerResult<Self> {
        let channel = Endpoint::from_shared(endpoint.to_string())
            .map_err(|e| BrokerError::invalid_argument(format!("invalid upstream endpoint: {e}")))?
            .connect()
            .await
            .map_err(|e| BrokerError::storage(format!("failed to connect upstream: {e}")))?;
        Ok(Self { channel })
    }

    /// Wrap an already-established channel.
    pub fn from_channel(channel: Channel) -> Self {
        Self { channel }
    }
}

impl tonic::server::NamedService for ForwardingServer {
    const NAME: &'static str = "strata.RecordBroker";
}

/// Parse the entries of an `x-forwarded-for` list header.
fn forwarded_for_entries(value: Option<&HeaderValue>) -> Vec<String> {
    let Some(value) = value.and_then(|v| v.to_str().ok()) else {
        return Vec::new();
    };
    value
        .split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(str::to_string)
        .collect()
}

impl<B> tonic::codegen::Service<Request<B>> for ForwardingServer
where
    B: tonic::codegen::Body + Send + 'static,
    B::Data: Into<Bytes> + Send,
    B::Error: Into<tonic::codegen::StdError> + Send + 'static,
{
    type Response = Response<tonic::body::BoxBody>;
    type Error = std::convert::Infallible;
    type Future = std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>,
    >;

    fn poll_ready(
        &mut self,
        _cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), Self::Error>> {
        std::task::Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request<B>) -> Self::Future {
        let mut channel = self.channel.clone();

        Box::pin(async move {
            let peer = req
                .extensions()
                .get::<TcpConnectInfo>()
                .and_then(|info| info.remote_addr())
                .map(|addr| addr.to_string())
                .unwrap_or_else(|| "127.0.0.1".to_string());

            let mut forwarded = forwarded_for_entries(req.headers().get(FORWARDED_FOR));
            if forwarded.len() >= MAX_FORWARDS {
                let err = BrokerError::ForwardLimitExceeded {
                    chain: forwarded.join(","),
                    max: MAX_FORWARDS,
                };
                return Ok(grpc_error_response(err.to_status()));
            }
            forwarded.push(peer);

            let (parts, body) = req.into_parts();

            let body = match read_unary_body(body).await {
                Ok(body) => body,
                Err(status) => return Ok(grpc_error_response(status)),
            };

            let uri = match parts.uri.path_and_query() {
                Some(pq) => match Uri::builder().path_and_query(pq.clone()).build() {
                    Ok(uri) => uri,
                    Err(e) => {
                        return Ok(grpc_error_response(Status::internal(format!(
                            "invalid request uri: {e}"
                        ))))
                    }
                },
                None => parts.uri.clone(),
            };

            let mut out = Request::builder().method(parts.method).uri(uri);
            if let Some(headers) = out.headers_mut() {
                // Propagate the incoming metadata, except per-connection
                // headers the upstream transport owns.
                for (name, value) in parts.headers.iter() {
                    if name == &header::HOST || name == &header::CONTENT_LENGTH {
                        continue;
                    }
                    if name.as_str() == FORWARDED_FOR {
                        continue;
                    }
                    headers.append(name.clone(), value.clone());
                }
                if let Ok(value) = HeaderValue::from_str(&forwarded.join(",")) {
                    headers.insert(FORWARDED_FOR, value);
                }
            }

            let out = match out.body(tonic::body::BoxBody::new(
                Full::new(body).map_err(|never| match never {}),
            )) {
                Ok(out) => out,
                Err(e) => {
                    return Ok(grpc_error_response(Status::internal(format!(
                        "failed to build upstream request: {e}"
                    ))))
                }
            };

            if let Err(e) =
                futures::future::poll_fn(|cx| tonic::codegen::Service::poll_ready(&mut channel, cx))
                    .await
            {
                return Ok(grpc_error_response(Status::unavailable(format!(
                    "upstream unavailable: {e}"
                ))));
            }

            match tonic::codegen::Service::call(&mut channel, out).await {
                Ok(resp) => {
                    let (parts, body) = resp.into_parts();
                    let body = tonic::body::BoxBody::new(
                        body.map_err(|e| Status::internal(format!("upstream body error: {e}"))),
                    );
                    Ok(Response::from_parts(parts, body))
                }
                Err(e) => Ok(grpc_error_response(Status::unavailable(format!(
                    "upstream error: {e}"
                )))),
            }
        })
    }
}
