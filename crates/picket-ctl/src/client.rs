// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>

//! One-shot control-channel client.

use std::os::unix::net::UnixDatagram;
use std::path::PathBuf;
use std::time::Duration;

use picket_core::{EngineError, EngineResult, Scope};
use picket_ctl_proto::{client_socket_path, MAX_MESSAGE};

/// Default prefix for the ephemeral client socket.
const DEFAULT_PREFIX: &str = "picket-ctl";

/// Default reply timeout.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// One-shot request/response client for a control channel.
///
/// Each [`ControlClient::send`] binds its own ephemeral socket under
/// `/tmp/<prefix>.<pid>.S`, sends the request, waits for exactly one reply,
/// and unlinks the socket before returning.
#[derive(Debug, Clone)]
pub struct ControlClient {
    server_path: PathBuf,
    prefix: String,
    timeout: Duration,
}

impl ControlClient {
    /// Client for the channel bound at `server_path`.
    pub fn new(server_path: impl Into<PathBuf>) -> Self {
        Self {
            server_path: server_path.into(),
            prefix: DEFAULT_PREFIX.to_owned(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Overrides the ephemeral socket prefix (useful when several clients
    /// run in one process).
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Overrides the reply timeout.
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sends one request and returns the single reply.
    ///
    /// # Errors
    /// `InvalidArg` for over-limit messages, `Timeout` when no reply
    /// arrives, `Other` for socket failures.
    pub fn send(&self, message: &str) -> EngineResult<String> {
        if message.len() > MAX_MESSAGE {
            return Err(EngineError::InvalidArg(format!(
                "message of {} bytes exceeds the {MAX_MESSAGE}-byte limit",
                message.len()
            )));
        }

        let local = client_socket_path(&self.prefix, std::process::id());
        let _ = std::fs::remove_file(&local);
        let socket = UnixDatagram::bind(&local)?;
        let mut scope = Scope::new("control-client");
        {
            let local = local.clone();
            scope.register_cleanup(move || {
                let _ = std::fs::remove_file(&local);
            });
        }

        socket.set_read_timeout(Some(self.timeout))?;
        socket.send_to(message.as_bytes(), &self.server_path)?;

        let mut buf = [0_u8; MAX_MESSAGE];
        let len = socket.recv(&mut buf).map_err(|err| match err.kind() {
            std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut => EngineError::Timeout,
            _ => EngineError::from(err),
        })?;
        String::from_utf8(buf[..len].to_vec())
            .map_err(|_| EngineError::BadValue("reply is not valid UTF-8".to_owned()))
    }
}

/// Convenience wrapper: send one request with the default client settings.
pub fn send(server_path: impl Into<PathBuf>, message: &str) -> EngineResult<String> {
    ControlClient::new(server_path).send(message)
}
