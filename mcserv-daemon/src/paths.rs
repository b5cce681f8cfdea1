use std::path::PathBuf;

pub const DAEMON_SOCKET: &str = "mcserv.sock";
pub const SOCKET_ENV: &str = "MCSERV_SOCKET";

/// Used when no per-user runtime directory is available.
pub const FALLBACK_SOCKET_DIR: &str = "/var/run";

/// Owner-only access; the socket has no other authentication.
pub const SOCKET_MODE: u32 = 0o600;

/// `$XDG_RUNTIME_DIR/mcserv.sock`, or `/var/run/mcserv.sock` without one.
pub fn default_socket_path() -> PathBuf {
    dirs::runtime_dir()
        .unwrap_or_else(|| PathBuf::from(FALLBACK_SOCKET_DIR))
        .join(DAEMON_SOCKET)
}
