//! gRPC server for the record broker.
//!
//! The service is wired to tonic by hand: a named service that routes on
//! the request path, decodes gRPC-framed protobuf messages, and answers
//! with bodies that emit data frames followed by `grpc-status` trailers.
//! Streaming responses are fed from an mpsc channel by the handler's
//! producer task.

use std::net::SocketAddr;

use bytes::{BufMut, Bytes, BytesMut};
use http_body_util::BodyExt;
use prost::Message;
use tokio::sync::{mpsc, watch};
use tonic::codegen::http::{header, HeaderMap, HeaderValue, StatusCode};
use tonic::Status;

use crate::core::error::{BrokerError, BrokerResult};

use super::service::BrokerService;

/// Decode a gRPC message from body bytes (strips the 5-byte header).
#[allow(clippy::result_large_err)]
pub(crate) fn decode_grpc_message<M: Message + Default>(body: &Bytes) -> Result<M, Status> {
    if body.len() < 5 {
        return Err(Status::invalid_argument("gRPC message too short"));
    }

    let _compressed = body[0];
    let len = u32::from_be_bytes([body[1], body[2], body[3], body[4]]) as usize;

    if body.len() < 5 + len {
        return Err(Status::invalid_argument(format!(
            "gRPC message truncated: expected {} bytes, got {}",
            len,
            body.len() - 5
        )));
    }

    let msg_bytes = &body[5..5 + len];
    M::decode(msg_bytes).map_err(|e| Status::invalid_argument(format!("decode error: {}", e)))
}

/// Encode a gRPC message to bytes (adds the 5-byte header).
pub(crate) fn encode_grpc_message<M: Message>(msg: &M) -> Bytes {
    let encoded = msg.encode_to_vec();
    let len = encoded.len() as u32;

    let mut buf = BytesMut::with_capacity(5 + encoded.len());
    buf.put_u8(0); // not compressed
    buf.put_u32(len);
    buf.put_slice(&encoded);
    buf.freeze()
}

fn ok_trailers() -> HeaderMap {
    let mut trailers = HeaderMap::new();
    trailers.insert("grpc-status", "0".parse().unwrap());
    trailers
}

fn status_trailers(status: &Status) -> HeaderMap {
    let mut trailers = HeaderMap::new();
    trailers.insert(
        "grpc-status",
        (status.code() as i32).to_string().parse().unwrap(),
    );
    if !status.message().is_empty() {
        if let Ok(value) = HeaderValue::from_str(status.message()) {
            trailers.insert("grpc-message", value);
        }
    }
    trailers
}

/// A unary gRPC body: at most one data frame, then trailers.
pub(crate) struct UnaryBody {
    data: Option<Bytes>,
    trailers: Option<HeaderMap>,
}

impl http_body::Body for UnaryBody {
    type Data = Bytes;
    type Error = Status;

    fn poll_frame(
        self: std::pin::Pin<&mut Self>,
        _cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Option<Result<http_body::Frame<Self::Data>, Self::Error>>> {
        let this = self.get_mut();
        if let Some(data) = this.data.take() {
            return std::task::Poll::Ready(Some(Ok(http_body::Frame::data(data))));
        }
        if let Some(trailers) = this.trailers.take() {
            return std::task::Poll::Ready(Some(Ok(http_body::Frame::trailers(trailers))));
        }
        std::task::Poll::Ready(None)
    }

    fn is_end_stream(&self) -> bool {
        self.data.is_none() && self.trailers.is_none()
    }
}

/// A streaming gRPC body fed by a channel of framed messages. The stream
/// ends with `grpc-status: 0` trailers when the channel closes, or with
/// the error's status when the producer sends one.
pub(crate) struct StreamBody {
    rx: mpsc::Receiver<Result<Bytes, Status>>,
    done: bool,
}

impl http_body::Body for StreamBody {
    type Data = Bytes;
    type Error = Status;

    fn poll_frame(
        self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Option<Result<http_body::Frame<Self::Data>, Self::Error>>> {
        let this = self.get_mut();
        if this.done {
            return std::task::Poll::Ready(None);
        }

        match this.rx.poll_recv(cx) {
            std::task::Poll::Ready(Some(Ok(data))) => {
                std::task::Poll::Ready(Some(Ok(http_body::Frame::data(data))))
            }
            std::task::Poll::Ready(Some(Err(status))) => {
                this.done = true;
                std::task::Poll::Ready(Some(Ok(http_body::Frame::trailers(status_trailers(
                    &status,
                )))))
            }
            std::task::Poll::Ready(None) => {
                this.done = true;
                std::task::Poll::Ready(Some(Ok(http_body::Frame::trailers(ok_trailers()))))
            }
            std::task::Poll::Pending => std::task::Poll::Pending,
        }
    }
}

/// Build a unary gRPC response with data and ok trailers.
pub(crate) fn grpc_response(body: Bytes) -> tonic::codegen::http::Response<tonic::body::BoxBody> {
    tonic::codegen::http::Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/grpc")
        .body(tonic::body::BoxBody::new(UnaryBody {
            data: Some(body),
            trailers: Some(ok_trailers()),
        }))
        .unwrap()
}

/// Build an error response carrying the status in the trailers.
pub(crate) fn grpc_error_response(
    status: Status,
) -> tonic::codegen::http::Response<tonic::body::BoxBody> {
    tonic::codegen::http::Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/grpc")
        .body(tonic::body::BoxBody::new(UnaryBody {
            data: None,
            trailers: Some(status_trailers(&status)),
        }))
        .unwrap()
}

/// Build a streaming response fed by the given channel of messages.
fn grpc_stream_response<M: Message + 'static>(
    mut rx: mpsc::Receiver<Result<M, Status>>,
) -> tonic::codegen::http::Response<tonic::body::BoxBody> {
    let (tx, frames) = mpsc::channel(1);
    tokio::spawn(async move {
        while let Some(item) = rx.recv().await {
            let frame = item.map(|msg| encode_grpc_message(&msg));
            if tx.send(frame).await.is_err() {
                return;
            }
        }
    });

    tonic::codegen::http::Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/grpc")
        .body(tonic::body::BoxBody::new(StreamBody {
            rx: frames,
            done: false,
        }))
        .unwrap()
}

/// Read a unary request body: data frames until one whole gRPC message
/// is buffered, or the stream ends.
pub(crate) async fn read_unary_body<B>(body: B) -> Result<Bytes, Status>
where
    B: tonic::codegen::Body + Send + 'static,
    B::Data: Into<Bytes> + Send,
    B::Error: Into<tonic::codegen::StdError> + Send + 'static,
{
    let mut data = BytesMut::new();
    let mut pinned_body = std::pin::pin!(body);

    loop {
        match pinned_body.as_mut().frame().await {
            Some(Ok(frame)) => {
                if frame.is_data() {
                    if let Ok(chunk) = frame.into_data() {
                        let chunk_bytes: Bytes = chunk.into();
                        data.extend_from_slice(&chunk_bytes);
                        // gRPC frame: 1 byte compressed flag + 4 byte length.
                        if data.len() >= 5 {
                            let msg_len =
                                u32::from_be_bytes([data[1], data[2], data[3], data[4]]) as usize;
                            if data.len() >= 5 + msg_len {
                                break;
                            }
                        }
                    }
                } else if frame.is_trailers() {
                    break;
                }
            }
            Some(Err(err)) => {
                tracing::error!("error reading request body: {}", err.into());
                return Err(Status::internal("failed to read request body"));
            }
            None => break,
        }
    }

    Ok(data.freeze())
}

/// Wrapper exposing [`BrokerService`] as a tonic service.
#[derive(Clone)]
pub struct RecordBrokerServer {
    inner: BrokerService,
}

impl RecordBrokerServer {
    pub fn new(inner: BrokerService) -> Self {
        Self { inner }
    }
}

impl tonic::server::NamedService for RecordBrokerServer {
    const NAME: &'static str = "strata.RecordBroker";
}

impl<B> tonic::codegen::Service<tonic::codegen::http::Request<B>> for RecordBrokerServer
where
    B: tonic::codegen::Body + Send + 'static,
    B::Data: Into<Bytes> + Send,
    B::Error: Into<tonic::codegen::StdError> + Send + 'static,
{
    type Response = tonic::codegen::http::Response<tonic::body::BoxBody>;
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

    fn call(&mut self, req: tonic::codegen::http::Request<B>) -> Self::Future {
        let inner = self.inner.clone();
        let path = req.uri().path().to_string();

        Box::pin(async move {
            let body = match read_unary_body(req.into_body()).await {
                Ok(body) => body,
                Err(status) => return Ok(grpc_error_response(status)),
            };
            tracing::debug!(path = %path, body_len = body.len(), "handling broker request");

            macro_rules! unary {
                ($req_ty:ty, $handler:expr) => {
                    match decode_grpc_message::<$req_ty>(&body) {
                        Ok(req) => match $handler(req) {
                            Ok(resp) => grpc_response(encode_grpc_message(&resp)),
                            Err(status) => grpc_error_response(status),
                        },
                        Err(status) => grpc_error_response(status),
                    }
                };
            }

            let response = match path.as_str() {
                "/strata.RecordBroker/Get" => {
                    unary!(crate::proto::GetRequest, |req| inner.get(req))
                }
                "/strata.RecordBroker/Query" => {
                    unary!(crate::proto::QueryRequest, |req| inner.query(req))
                }
                "/strata.RecordBroker/Put" => {
                    unary!(crate::proto::PutRequest, |req| inner.put(req))
                }
                "/strata.RecordBroker/Patch" => {
                    unary!(crate::proto::PatchRequest, |req| inner.patch(req))
                }
                "/strata.RecordBroker/SetOptions" => {
                    unary!(crate::proto::SetOptionsRequest, |req| inner.set_options(req))
                }
                "/strata.RecordBroker/AcquireLease" => {
                    unary!(crate::proto::AcquireLeaseRequest, |req| inner
                        .acquire_lease(req))
                }
                "/strata.RecordBroker/RenewLease" => {
                    unary!(crate::proto::RenewLeaseRequest, |req| inner.renew_lease(req))
                }
                "/strata.RecordBroker/ReleaseLease" => {
                    unary!(crate::proto::ReleaseLeaseRequest, |req| inner
                        .release_lease(req))
                }
                "/strata.RecordBroker/ListTypes" => {
                    unary!(crate::proto::ListTypesRequest, |_req| inner.list_types())
                }
                "/strata.RecordBroker/ServerInfo" => {
                    unary!(crate::proto::ServerInfoRequest, |_req| inner.server_info())
                }
                "/strata.RecordBroker/Sync" => {
                    match decode_grpc_message::<crate::proto::SyncRequest>(&body) {
                        Ok(req) => grpc_stream_response(inner.sync(req)),
                        Err(status) => grpc_error_response(status),
                    }
                }
                "/strata.RecordBroker/SyncLatest" => {
                    match decode_grpc_message::<crate::proto::SyncLatestRequest>(&body) {
                        Ok(req) => grpc_stream_response(inner.sync_latest(req)),
                        Err(status) => grpc_error_response(status),
                    }
                }
                _ => {
                    tracing::warn!(path = %path, "unknown broker method");
                    grpc_error_response(Status::unimplemented(format!(
                        "unknown method: {}",
                        path
                    )))
                }
            };

            Ok(response)
        })
    }
}

/// gRPC server hosting the broker service.
pub struct GrpcServer {
    bind_addr: SocketAddr,
    service: BrokerService,
    shutdown_rx: watch::Receiver<bool>,
}

impl GrpcServer {
    /// Create a server for the given service.
    pub fn new(
        bind_addr: SocketAddr,
        service: BrokerService,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            bind_addr,
            service,
            shutdown_rx,
        }
    }

    /// Run until the shutdown signal fires.
    pub async fn run(self) -> BrokerResult<()> {
        use tonic::transport::Server;

        let addr = self.bind_addr;
        let mut shutdown_rx = self.shutdown_rx;

        tracing::info!(%addr, "starting record broker gRPC server");

        Server::builder()
            .add_service(RecordBrokerServer::new(self.service))
            .serve_with_shutdown(addr, async move {
                loop {
                    if shutdown_rx.changed().await.is_err() {
                        break;
                    }
                    if *shutdown_rx.borrow() {
                        break;
                    }
                }
                tracing::info!("gRPC server shutting down");
            })
            .await
            .map_err(|e| BrokerError::storage(format!("gRPC server error: {}", e)))?;

        Ok(())
    }
}
