//! JSON-lines RPC over a Unix socket: wire types, method dispatch, the
//! listener service and a blocking client.

mod client;
mod dispatch;
pub mod probe;
mod protocol;
mod server;

pub use client::{ping, RpcClient};
pub use dispatch::{Dispatcher, MethodSet, RpcReceiver};
pub use protocol::{encode_line, Request, Response};
pub use server::RpcServer;
