//! Method table binding `Receiver.Method` names to typed handlers.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::{MethodError, RegistrationError};
use crate::rpc::protocol::{Request, Response};

type Handler = Box<dyn Fn(Value) -> Result<Value, MethodError> + Send + Sync>;

/// An object whose methods are exposed over RPC as `name().Method`.
pub trait RpcReceiver: Send + Sync + 'static {
    fn name(&self) -> &str;

    /// Adds every callable method to `methods`.
    fn methods(self: Arc<Self>, methods: &mut MethodSet);
}

/// Methods collected from one receiver during registration.
pub struct MethodSet {
    receiver: String,
    methods: Vec<(String, Handler)>,
}

impl MethodSet {
    fn new(receiver: &str) -> Self {
        Self {
            receiver: receiver.to_string(),
            methods: Vec::new(),
        }
    }

    /// Adds a procedure taking one argument and producing one result.
    pub fn add<A, R, F>(&mut self, name: &str, handler: F) -> &mut Self
    where
        A: DeserializeOwned,
        R: Serialize,
        F: Fn(A) -> Result<R, MethodError> + Send + Sync + 'static,
    {
        let method = format!("{}.{}", self.receiver, name);
        let label = method.clone();
        let handler: Handler = Box::new(move |params| {
            let args = decode_params::<A>(params).map_err(|source| MethodError::InvalidParams {
                method: label.clone(),
                source,
            })?;
            let reply = handler(args)?;
            serde_json::to_value(reply).map_err(MethodError::Encode)
        });
        self.methods.push((method, handler));
        self
    }
}

/// Missing params decode as unit, falling back to an empty object so that
/// argument structs without fields accept both.
fn decode_params<A: DeserializeOwned>(params: Value) -> Result<A, serde_json::Error> {
    match params {
        Value::Null => serde_json::from_value(Value::Null)
            .or_else(|_| serde_json::from_value(Value::Object(Map::new()))),
        other => serde_json::from_value(other),
    }
}

/// Registered procedures, keyed by qualified name.
#[derive(Default)]
pub struct Dispatcher {
    methods: BTreeMap<String, Handler>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers every method of `receiver`. Nothing is registered when any
    /// name is invalid or collides.
    pub fn register<R: RpcReceiver>(
        &mut self,
        receiver: Arc<R>,
    ) -> Result<Vec<String>, RegistrationError> {
        let receiver_name = receiver.name().to_string();
        validate_name(&receiver_name)?;

        let mut set = MethodSet::new(&receiver_name);
        receiver.methods(&mut set);
        if set.methods.is_empty() {
            return Err(RegistrationError::NoMethods {
                receiver: receiver_name,
            });
        }

        let mut seen = std::collections::BTreeSet::new();
        for (method, _) in &set.methods {
            let short = method
                .strip_prefix(&receiver_name)
                .and_then(|rest| rest.strip_prefix('.'))
                .unwrap_or(method);
            validate_name(short)?;
            if self.methods.contains_key(method) || !seen.insert(method.as_str()) {
                return Err(RegistrationError::Duplicate {
                    method: method.clone(),
                });
            }
        }

        let mut names = Vec::with_capacity(set.methods.len());
        for (method, handler) in set.methods {
            names.push(method.clone());
            self.methods.insert(method, handler);
        }
        Ok(names)
    }

    /// Runs the named procedure. Failures become an error response carrying
    /// the request id; they never escape as `Err`.
    pub fn dispatch(&self, request: &Request) -> Response {
        let id = request.id.clone();
        let Some(handler) = self.methods.get(&request.method) else {
            return Response::error(
                id,
                MethodError::UnknownMethod {
                    method: request.method.clone(),
                }
                .to_string(),
            );
        };

        match handler(request.argument()) {
            Ok(result) => Response::ok(id, result),
            Err(err) => Response::error(id, err.to_string()),
        }
    }

    /// Registered method names, sorted.
    pub fn methods(&self) -> Vec<String> {
        self.methods.keys().cloned().collect()
    }
}

fn validate_name(name: &str) -> Result<(), RegistrationError> {
    if name.is_empty() || name.contains('.') {
        return Err(RegistrationError::InvalidName {
            name: name.to_string(),
        });
    }
    Ok(())
}
