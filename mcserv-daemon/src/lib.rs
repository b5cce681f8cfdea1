//! mcserv daemon core: service lifecycle coordination and the Unix-socket RPC
//! endpoint services are exposed through.
//!
//! - [`service`]: the [`Service`] contract and its single-use completion signal
//! - [`registry`]: [`ServiceRegistry`], fail-fast start/stop/wait of services
//! - [`rpc`]: wire types, method dispatch, [`RpcServer`] and [`RpcClient`]

mod error;
pub mod paths;
pub mod registry;
pub mod rpc;
pub mod service;
pub mod telemetry;

pub use error::{
    ClientError, ListenerError, MethodError, RegistrationError, RegistryError, ServiceError,
    ServiceFailure,
};
pub use registry::{RegistryPhase, ServiceRegistry};
pub use rpc::probe::{Control, PingArgs, Pong, PING_METHOD};
pub use rpc::{ping, MethodSet, RpcClient, RpcReceiver, RpcServer};
pub use service::{Completion, CompletionSignal, Service, ServiceFuture, ServiceResult};
pub use telemetry::{init_tracing, LogFormat};
