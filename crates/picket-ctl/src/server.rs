// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>

//! The control-channel server: a non-blocking Unix datagram socket with a
//! command registry.

use std::os::unix::net::UnixDatagram;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rustc_hash::FxHashMap;
use tracing::{debug, info, warn};

use picket_core::{EngineError, EngineResult, Scope};
use picket_ctl_proto::{error_reply, parse_request, MAX_MESSAGE, UNKNOWN_COMMAND_REPLY};

/// A registered control command.
///
/// Handlers run synchronously inside [`ControlChannel::receive`] with a
/// short-lived per-request [`Scope`]; the returned string is sent back to
/// the caller verbatim.
pub trait CommandHandler: Send + Sync {
    /// Executes the command with the request's argument text.
    fn execute(&self, args: &str, scope: &mut Scope) -> EngineResult<String>;
}

/// Datagram command dispatcher bound to a filesystem socket path.
pub struct ControlChannel {
    path: PathBuf,
    socket: Option<UnixDatagram>,
    commands: FxHashMap<String, Arc<dyn CommandHandler>>,
}

impl ControlChannel {
    /// Creates a stopped channel for `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            socket: None,
            commands: FxHashMap::default(),
        }
    }

    /// Registers `handler` under `name`.
    ///
    /// # Errors
    /// `Exists` for a duplicate name.
    pub fn register_command(
        &mut self,
        name: &str,
        handler: Arc<dyn CommandHandler>,
    ) -> EngineResult<()> {
        if self.commands.contains_key(name) {
            return Err(EngineError::Exists(format!("command {name}")));
        }
        self.commands.insert(name.to_owned(), handler);
        Ok(())
    }

    /// Binds the socket (non-blocking) and starts serving.
    ///
    /// A stale socket file left by a crashed process is removed first.
    ///
    /// # Errors
    /// `InvalidArg` when already started; `Other` for bind failures.
    pub fn start(&mut self) -> EngineResult<()> {
        if self.socket.is_some() {
            return Err(EngineError::InvalidArg(
                "control channel already started".to_owned(),
            ));
        }
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "removed stale socket"),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => return Err(err.into()),
        }
        let socket = UnixDatagram::bind(&self.path)?;
        socket.set_nonblocking(true)?;
        self.socket = Some(socket);
        info!(path = %self.path.display(), "control channel started");
        Ok(())
    }

    /// Non-blocking readiness check: is a datagram waiting?
    pub fn ready(&self) -> bool {
        let Some(socket) = &self.socket else {
            return false;
        };
        let mut probe = [0_u8; 1];
        socket.peek(&mut probe).is_ok()
    }

    /// Reads, dispatches, and answers exactly one datagram.
    ///
    /// # Errors
    /// `Again` when no datagram is pending; `InvalidArg` when stopped.
    pub fn receive(&self) -> EngineResult<()> {
        let Some(socket) = &self.socket else {
            return Err(EngineError::InvalidArg(
                "control channel is not started".to_owned(),
            ));
        };
        // One extra byte detects over-limit datagrams without growing the
        // accepted size.
        let mut buf = [0_u8; MAX_MESSAGE + 1];
        let (len, from) = socket.recv_from(&mut buf)?;
        let Some(reply_to) = from.as_pathname().map(Path::to_path_buf) else {
            warn!("dropping datagram from unbound client; no reply address");
            return Ok(());
        };

        let reply = self.answer(&buf[..len]);
        if let Err(err) = socket.send_to(reply.as_bytes(), &reply_to) {
            warn!(
                client = %reply_to.display(),
                error = %err,
                "failed to send control reply"
            );
        }
        Ok(())
    }

    /// Stops serving and unlinks the socket file.
    ///
    /// # Errors
    /// `InvalidArg` when not started.
    pub fn stop(&mut self) -> EngineResult<()> {
        if self.socket.take().is_none() {
            return Err(EngineError::InvalidArg(
                "control channel is not started".to_owned(),
            ));
        }
        match std::fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => return Err(err.into()),
        }
        info!(path = %self.path.display(), "control channel stopped");
        Ok(())
    }

    /// The configured socket path.
    pub fn socket_path(&self) -> &Path {
        &self.path
    }

    /// True while the socket is bound.
    pub const fn is_running(&self) -> bool {
        self.socket.is_some()
    }

    /// Produces the single reply for one request datagram.
    fn answer(&self, datagram: &[u8]) -> String {
        if datagram.len() > MAX_MESSAGE {
            return error_reply("EINVAL", "message exceeds 8192 bytes.");
        }
        let request = match parse_request(datagram) {
            Ok(request) => request,
            Err(err) => return error_reply("EINVAL", &format!("{err}.")),
        };
        let Some(handler) = self.commands.get(&request.command) else {
            debug!(command = %request.command, "unknown control command");
            return UNKNOWN_COMMAND_REPLY.to_owned();
        };
        let mut scope = Scope::new("control-request");
        let result = handler.execute(&request.args, &mut scope);
        scope.finish();
        match result {
            Ok(reply) => reply,
            Err(err) => error_reply(err.symbol(), &err.to_string()),
        }
    }
}

impl Drop for ControlChannel {
    fn drop(&mut self) {
        if self.socket.take().is_some() {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

impl core::fmt::Debug for ControlChannel {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ControlChannel")
            .field("path", &self.path)
            .field("running", &self.is_running())
            .field("commands", &self.commands.len())
            .finish()
    }
}
