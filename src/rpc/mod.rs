//! gRPC surface for the record broker.

pub mod forward;
pub mod grpc;
pub mod service;

pub use forward::ForwardingServer;
pub use grpc::{GrpcServer, RecordBrokerServer};
pub use service::BrokerService;
