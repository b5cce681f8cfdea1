//! Unix-socket RPC listener, run as a [`Service`].

use std::fmt;
use std::fs;
use std::io::{self, ErrorKind};
use std::os::unix::fs::FileTypeExt;
use std::os::unix::net::UnixStream as StdUnixStream;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::watch;

use crate::error::{io_err, ListenerError, RegistrationError, ServiceError};
use crate::paths::SOCKET_MODE;
use crate::rpc::dispatch::{Dispatcher, RpcReceiver};
use crate::rpc::protocol::{encode_line, Request, Response};
use crate::service::{Completion, CompletionSignal, Service, ServiceFuture};

/// Serves registered methods over newline-delimited JSON on a Unix socket.
///
/// Register receivers before wrapping the server in an `Arc`; each accepted
/// connection runs on its own task and may carry any number of calls.
pub struct RpcServer {
    socket_path: PathBuf,
    dispatcher: Dispatcher,
    started: AtomicBool,
    shutdown: watch::Sender<bool>,
    completion: CompletionSignal,
}

impl RpcServer {
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            socket_path: socket_path.into(),
            dispatcher: Dispatcher::new(),
            started: AtomicBool::new(false),
            shutdown,
            completion: CompletionSignal::new(),
        }
    }

    /// Exposes every method of `receiver` as `Receiver.Method`.
    pub fn register<R: RpcReceiver>(&mut self, receiver: Arc<R>) -> Result<(), RegistrationError> {
        let names = self.dispatcher.register(receiver)?;
        tracing::debug!(server = %self, methods = ?names, "registered rpc receiver");
        Ok(())
    }

    /// Registered method names, sorted.
    pub fn methods(&self) -> Vec<String> {
        self.dispatcher.methods()
    }

    fn is_stopping(&self) -> bool {
        *self.shutdown.borrow()
    }

    async fn serve(self: &Arc<Self>) -> Result<(), ListenerError> {
        let mut shutdown = self.shutdown.subscribe();
        if *shutdown.borrow_and_update() {
            tracing::debug!(server = %self, "stop requested before bind");
            return Ok(());
        }

        let socket = BoundSocket::bind(&self.socket_path)?;
        tracing::info!(server = %self, methods = ?self.methods(), "rpc server listening");

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow_and_update() {
                        break;
                    }
                }
                accepted = socket.listener.accept() => match accepted {
                    Ok((stream, _)) => {
                        tracing::debug!(server = %self, "new connection");
                        let server = Arc::clone(self);
                        tokio::spawn(async move {
                            if let Err(err) = server.handle_connection(stream).await {
                                tracing::warn!(error = %err, "rpc connection error");
                            }
                        });
                    }
                    Err(_) if self.is_stopping() => break,
                    Err(err) if is_transient(err.kind()) => {
                        tracing::warn!(server = %self, error = %err, "transient accept error");
                    }
                    Err(source) => {
                        return Err(ListenerError::Accept {
                            path: self.socket_path.clone(),
                            source,
                        });
                    }
                }
            }
        }

        tracing::info!(server = %self, "stopped rpc server");
        Ok(())
    }

    async fn handle_connection(self: Arc<Self>, stream: UnixStream) -> Result<(), ListenerError> {
        let (reader, mut writer) = stream.into_split();
        let mut reader = BufReader::new(reader);
        let mut line = Vec::new();

        loop {
            line.clear();
            let read = reader
                .read_until(b'\n', &mut line)
                .await
                .map_err(ListenerError::Connection)?;
            if read == 0 {
                break;
            }
            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }

            // Raw bytes, so a line that is not UTF-8 is just another bad request.
            let request: Request = match serde_json::from_slice(&line) {
                Ok(request) => request,
                Err(err) => {
                    write_response(
                        &mut writer,
                        &Response::error(serde_json::Value::Null, format!("invalid request: {err}")),
                    )
                    .await?;
                    continue;
                }
            };

            tracing::debug!(method = %request.method, id = %request.id, "rpc call");
            let id = request.id.clone();
            let server = Arc::clone(&self);
            // Handlers are plain synchronous functions; keep them off the
            // reactor and contain any panic to this one call.
            let response = tokio::task::spawn_blocking(move || server.dispatcher.dispatch(&request))
                .await
                .unwrap_or_else(|err| Response::error(id, format!("rpc method failed: {err}")));
            if let Some(error) = &response.error {
                tracing::debug!(id = %response.id, error = %error, "rpc call failed");
            }

            write_response(&mut writer, &response).await?;
        }

        Ok(())
    }
}

impl fmt::Display for RpcServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RpcServer{{socket: {}}}", self.socket_path.display())
    }
}

impl Service for RpcServer {
    fn start(self: Arc<Self>) -> ServiceFuture {
        Box::pin(async move {
            if self.started.swap(true, Ordering::SeqCst) {
                tracing::warn!(server = %self, "rpc server already started");
                return;
            }
            tracing::info!(server = %self, "starting rpc server");
            let outcome = self.serve().await.map_err(ServiceError::from);
            self.completion.complete(outcome);
        })
    }

    fn stop(&self) {
        tracing::debug!(server = %self, "stopping rpc server");
        self.shutdown.send_replace(true);
    }

    fn done(&self) -> Option<Completion> {
        self.completion.subscribe()
    }
}

/// The bound listener. Dropping it removes the socket file, so every exit
/// from the accept loop releases the path.
struct BoundSocket {
    listener: UnixListener,
    path: PathBuf,
}

impl BoundSocket {
    fn bind(path: &Path) -> Result<Self, ListenerError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            if !parent.exists() {
                fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
            }
        }
        prepare_socket_for_bind(path)?;

        let listener = UnixListener::bind(path).map_err(|source| ListenerError::Bind {
            path: path.to_path_buf(),
            source,
        })?;
        let socket = Self {
            listener,
            path: path.to_path_buf(),
        };
        set_socket_permissions(&socket.path)?;
        Ok(socket)
    }
}

impl Drop for BoundSocket {
    fn drop(&mut self) {
        match fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => tracing::warn!(
                socket = %self.path.display(),
                error = %err,
                "failed to remove rpc socket",
            ),
        }
    }
}

/// Clears a stale socket left by a previous run. A socket that still accepts
/// connections, or a path that is not a socket, is left alone.
fn prepare_socket_for_bind(socket: &Path) -> Result<(), ListenerError> {
    let metadata = match fs::symlink_metadata(socket) {
        Ok(metadata) => metadata,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(()),
        Err(err) => return Err(io_err(socket, err)),
    };
    if !metadata.file_type().is_socket() {
        return Err(ListenerError::NotSocket {
            path: socket.to_path_buf(),
        });
    }

    check_existing_socket(socket, StdUnixStream::connect(socket))?;

    match fs::remove_file(socket) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(io_err(socket, err)),
    }
}

/// Judges an existing socket by the outcome of connecting to it. Only a socket
/// that refuses connections is stale; any other connect failure leaves the
/// path alone.
fn check_existing_socket(
    socket: &Path,
    connected: io::Result<StdUnixStream>,
) -> Result<(), ListenerError> {
    match connected {
        Ok(_) => Err(ListenerError::InUse {
            path: socket.to_path_buf(),
        }),
        Err(err) if matches!(err.kind(), ErrorKind::ConnectionRefused | ErrorKind::NotFound) => {
            tracing::warn!(
                socket = %socket.display(),
                error = %err,
                "removing stale rpc socket before bind",
            );
            Ok(())
        }
        Err(source) => Err(ListenerError::Connect {
            path: socket.to_path_buf(),
            source,
        }),
    }
}

fn set_socket_permissions(path: &Path) -> Result<(), ListenerError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(SOCKET_MODE)).map_err(|e| io_err(path, e))
}

fn is_transient(kind: ErrorKind) -> bool {
    matches!(
        kind,
        ErrorKind::Interrupted | ErrorKind::ConnectionAborted | ErrorKind::WouldBlock
    )
}

async fn write_response(writer: &mut OwnedWriteHalf, response: &Response) -> Result<(), ListenerError> {
    let payload = encode_line(response)?;
    writer
        .write_all(&payload)
        .await
        .map_err(ListenerError::Connection)?;
    writer.flush().await.map_err(ListenerError::Connection)?;
    Ok(())
}
