//! The supervised game server process, run as a [`Service`].

use std::fmt;
use std::os::unix::process::CommandExt;
use std::process::{Command as StdCommand, ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::watch;

use mcserv_daemon::{Completion, CompletionSignal, Service, ServiceError, ServiceFuture};

#[derive(Debug, Error)]
pub enum GameServerError {
    #[error("failed to spawn game server `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to wait for game server `{program}`: {source}")]
    Wait {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("game server `{program}` exited unexpectedly with {status}")]
    Exited { program: String, status: ExitStatus },
}

/// Runs one child process for the lifetime of the service. The child gets
/// its own process group so a terminal Ctrl-C reaches only mcserv, which then
/// stops the child through [`Service::stop`].
pub struct GameServer {
    program: String,
    args: Vec<String>,
    started: AtomicBool,
    shutdown: watch::Sender<bool>,
    completion: CompletionSignal,
}

impl GameServer {
    pub fn new(program: String, args: Vec<String>) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            program,
            args,
            started: AtomicBool::new(false),
            shutdown,
            completion: CompletionSignal::new(),
        }
    }

    async fn supervise(&self) -> Result<(), GameServerError> {
        let mut shutdown = self.shutdown.subscribe();
        if *shutdown.borrow_and_update() {
            return Ok(());
        }

        let mut command = StdCommand::new(&self.program);
        command
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0);
        let mut child = Command::from(command)
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| GameServerError::Spawn {
                program: self.program.clone(),
                source,
            })?;
        tracing::info!(server = %self, pid = child.id(), "game server started");

        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(forward_output(stdout, "stdout"));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_output(stderr, "stderr"));
        }

        tokio::select! {
            status = child.wait() => {
                let status = status.map_err(|source| self.wait_error(source))?;
                return self.exit_outcome(status);
            }
            _ = shutdown.changed() => {}
        }

        tracing::info!(server = %self, "killing game server");
        if let Err(err) = child.start_kill() {
            tracing::warn!(server = %self, error = %err, "failed to kill game server");
        }
        let status = child.wait().await.map_err(|source| self.wait_error(source))?;
        tracing::info!(server = %self, %status, "game server stopped");
        Ok(())
    }

    fn exit_outcome(&self, status: ExitStatus) -> Result<(), GameServerError> {
        if status.success() || *self.shutdown.borrow() {
            tracing::info!(server = %self, %status, "game server exited");
            return Ok(());
        }
        Err(GameServerError::Exited {
            program: self.program.clone(),
            status,
        })
    }

    fn wait_error(&self, source: std::io::Error) -> GameServerError {
        GameServerError::Wait {
            program: self.program.clone(),
            source,
        }
    }
}

impl fmt::Display for GameServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GameServer{{command: {}", self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        f.write_str("}")
    }
}

impl Service for GameServer {
    fn start(self: Arc<Self>) -> ServiceFuture {
        Box::pin(async move {
            if self.started.swap(true, Ordering::SeqCst) {
                tracing::warn!(server = %self, "game server already started");
                return;
            }
            let outcome = self.supervise().await.map_err(ServiceError::other);
            self.completion.complete(outcome);
        })
    }

    fn stop(&self) {
        tracing::debug!(server = %self, "stopping game server");
        self.shutdown.send_replace(true);
    }

    fn done(&self) -> Option<Completion> {
        self.completion.subscribe()
    }
}

async fn forward_output<R>(stream: R, name: &'static str)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(stream).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => tracing::info!(stream = name, "{line}"),
            Ok(None) => break,
            Err(err) => {
                tracing::warn!(stream = name, error = %err, "failed to read game server output");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn server(program: &str, args: &[&str]) -> Arc<GameServer> {
        Arc::new(GameServer::new(
            program.to_string(),
            args.iter().map(|arg| arg.to_string()).collect(),
        ))
    }

    #[tokio::test]
    async fn clean_exit_completes_successfully() {
        let game = server("true", &[]);
        let done = game.done().expect("completion");
        Arc::clone(&game).start().await;
        done.await.expect("clean exit");
    }

    #[tokio::test]
    async fn failing_exit_is_reported() {
        let game = server("false", &[]);
        let done = game.done().expect("completion");
        Arc::clone(&game).start().await;

        let err = done.await.expect_err("non-zero exit");
        let msg = err.to_string();
        assert!(msg.contains("`false` exited unexpectedly"), "got: {msg}");
    }

    #[tokio::test]
    async fn missing_program_is_a_spawn_error() {
        let game = server("/nonexistent/mcserv-game-server", &[]);
        let done = game.done().expect("completion");
        Arc::clone(&game).start().await;

        let err = done.await.expect_err("spawn failure");
        assert!(err.to_string().contains("failed to spawn"), "got: {err}");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn stop_kills_running_child() {
        let game = server("sleep", &["30"]);
        let done = game.done().expect("completion");
        tokio::spawn(Arc::clone(&game).start());
        tokio::time::sleep(Duration::from_millis(100)).await;

        game.stop();
        game.stop();
        tokio::time::timeout(Duration::from_secs(2), done)
            .await
            .expect("child should be killed promptly")
            .expect("requested stop is a clean exit");
    }

    #[test]
    fn identity_lists_command_and_arguments() {
        let game = server("java", &["-jar", "server.jar"]);
        assert_eq!(game.to_string(), "GameServer{command: java -jar server.jar}");
    }
}
