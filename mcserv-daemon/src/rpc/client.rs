use std::io::{BufRead, BufReader, ErrorKind, Write};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::error::ClientError;
use crate::rpc::probe::{PingArgs, Pong, PING_METHOD};
use crate::rpc::protocol::{encode_line, Request, Response};

/// Blocking client issuing sequential calls over one connection.
pub struct RpcClient {
    socket: PathBuf,
    writer: UnixStream,
    reader: BufReader<UnixStream>,
    next_id: u64,
}

impl RpcClient {
    pub fn connect(socket: impl AsRef<Path>) -> Result<Self, ClientError> {
        let socket = socket.as_ref().to_path_buf();
        if !socket.exists() {
            return Err(ClientError::NotRunning { socket });
        }

        let writer = UnixStream::connect(&socket).map_err(|err| {
            if matches!(
                err.kind(),
                ErrorKind::NotFound | ErrorKind::ConnectionRefused | ErrorKind::ConnectionReset
            ) {
                ClientError::NotRunning {
                    socket: socket.clone(),
                }
            } else {
                client_io(&socket, err)
            }
        })?;
        let reader = BufReader::new(writer.try_clone().map_err(|e| client_io(&socket, e))?);

        Ok(Self {
            socket,
            writer,
            reader,
            next_id: 0,
        })
    }

    /// Bounds every subsequent read and write. `None` blocks indefinitely.
    pub fn set_timeout(&self, timeout: Option<Duration>) -> Result<(), ClientError> {
        self.writer
            .set_read_timeout(timeout)
            .and_then(|()| self.writer.set_write_timeout(timeout))
            .map_err(|e| client_io(&self.socket, e))
    }

    /// Calls `method` with one argument and decodes its single result.
    pub fn call<A, R>(&mut self, method: &str, args: &A) -> Result<R, ClientError>
    where
        A: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let id = self.next_id;
        self.next_id += 1;

        let request = Request::new(method, serde_json::to_value(args)?, id);
        let payload = encode_line(&request)?;
        self.writer
            .write_all(&payload)
            .and_then(|()| self.writer.flush())
            .map_err(|e| client_io(&self.socket, e))?;

        let mut line = String::new();
        let read = self
            .reader
            .read_line(&mut line)
            .map_err(|e| client_io(&self.socket, e))?;
        if read == 0 {
            return Err(ClientError::Protocol(
                "server closed connection before responding".to_string(),
            ));
        }

        let response: Response = serde_json::from_str(line.trim_end())?;
        if response.id != Value::from(id) {
            return Err(ClientError::Protocol(format!(
                "response id {} does not match request id {id}",
                response.id
            )));
        }
        if let Some(message) = response.error {
            return Err(ClientError::Remote {
                method: method.to_string(),
                message,
            });
        }
        Ok(serde_json::from_value(response.result)?)
    }
}

/// Connects to `socket` and issues one connectivity probe.
pub fn ping(socket: &Path, timeout: Option<Duration>) -> Result<Pong, ClientError> {
    let mut client = RpcClient::connect(socket)?;
    client.set_timeout(timeout)?;
    client.call(PING_METHOD, &PingArgs {})
}

fn client_io(path: &Path, source: std::io::Error) -> ClientError {
    ClientError::Io {
        path: path.to_path_buf(),
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::net::UnixListener;
    use std::thread;

    use tempfile::TempDir;

    #[test]
    fn missing_socket_reports_not_running() {
        let dir = TempDir::new().expect("temp dir");
        let socket = dir.path().join("absent.sock");
        let err = ping(&socket, None).expect_err("no server");
        assert!(matches!(err, ClientError::NotRunning { .. }), "got: {err}");
    }

    #[test]
    fn mismatched_response_id_is_a_protocol_error() {
        let dir = TempDir::new().expect("temp dir");
        let socket = dir.path().join("liar.sock");
        let listener = UnixListener::bind(&socket).expect("bind");
        let server = thread::spawn(move || {
            let (stream, _) = listener.accept().expect("accept");
            let mut reader = BufReader::new(stream.try_clone().expect("clone"));
            let mut line = String::new();
            reader.read_line(&mut line).expect("read request");
            let mut stream = stream;
            stream
                .write_all(b"{\"id\":999,\"result\":{\"ok\":true},\"error\":null}\n")
                .expect("write response");
        });

        let err = ping(&socket, Some(Duration::from_secs(2))).expect_err("id mismatch");
        assert!(matches!(err, ClientError::Protocol(_)), "got: {err}");
        assert!(err.to_string().contains("999"));
        server.join().expect("join server");
    }
}
