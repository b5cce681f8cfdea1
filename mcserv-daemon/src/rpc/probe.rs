//! Connectivity probe exported as `Control.Ping`.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::rpc::dispatch::{MethodSet, RpcReceiver};

pub const CONTROL_RECEIVER: &str = "Control";
pub const PING_METHOD: &str = "Control.Ping";

/// Argument of `Control.Ping`; carries nothing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PingArgs {}

/// Result of `Control.Ping`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pong {
    pub ok: bool,
}

/// Receiver for daemon-level control methods.
#[derive(Debug, Default)]
pub struct Control;

impl RpcReceiver for Control {
    fn name(&self) -> &str {
        CONTROL_RECEIVER
    }

    fn methods(self: Arc<Self>, methods: &mut MethodSet) {
        methods.add("Ping", |args: PingArgs| {
            let pong = Pong { ok: true };
            tracing::info!(?args, ?pong, "rpc call Control.Ping");
            Ok(pong)
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    use crate::rpc::dispatch::Dispatcher;
    use crate::rpc::protocol::{Request, Response};

    #[test]
    fn ping_answers_ok() {
        let mut dispatcher = Dispatcher::new();
        dispatcher.register(Arc::new(Control)).expect("register control");
        assert_eq!(dispatcher.methods(), vec![PING_METHOD]);

        let response = dispatcher.dispatch(&Request::new(PING_METHOD, json!({}), 5));
        assert_eq!(response, Response::ok(json!(5), json!({"ok": true})));
    }
}
