// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! picket-ctl-proto: wire protocol for the engine-manager control channel.
//!
//! Requests and responses are single UTF-8 text datagrams. A request is
//! `COMMAND [ARGS]` with `\r`, `\n`, `\t`, and space as separators, at most
//! [`MAX_MESSAGE`] bytes including any trailing NUL. Error responses carry
//! the symbolic status name (`ENOENT: Command not found.`). Exactly one
//! response datagram is produced per request.
#![forbid(unsafe_code)]

use std::path::PathBuf;

use thiserror::Error;

/// Maximum request or response size in bytes, trailing NUL included.
pub const MAX_MESSAGE: usize = 8192;

/// Fixed basename of the server socket.
pub const SOCKET_BASENAME: &str = "picket_manager_controller.sock";

/// Whitespace characters that separate the command from its arguments.
pub const WHITESPACE: &[char] = &[' ', '\r', '\n', '\t'];

/// Reply sent for a request naming no registered command.
pub const UNKNOWN_COMMAND_REPLY: &str = "ENOENT: Command not found.";

/// Errors raised while parsing a request datagram.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtoError {
    /// The datagram exceeds [`MAX_MESSAGE`] bytes.
    #[error("message of {0} bytes exceeds the {MAX_MESSAGE}-byte limit")]
    TooLarge(usize),
    /// The datagram is not valid UTF-8.
    #[error("message is not valid UTF-8")]
    NotUtf8,
    /// The datagram contains no command.
    #[error("empty command")]
    Empty,
}

/// A parsed control request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandRequest {
    /// Command name, as sent.
    pub command: String,
    /// Remaining argument text, trimmed; empty when absent.
    pub args: String,
}

/// Parses one request datagram into command and arguments.
///
/// Trailing NUL bytes are stripped before validation; surrounding
/// whitespace is trimmed; the first whitespace run separates the command
/// from the argument text.
///
/// # Errors
/// [`ProtoError::TooLarge`], [`ProtoError::NotUtf8`], or
/// [`ProtoError::Empty`].
pub fn parse_request(datagram: &[u8]) -> Result<CommandRequest, ProtoError> {
    if datagram.len() > MAX_MESSAGE {
        return Err(ProtoError::TooLarge(datagram.len()));
    }
    let end = datagram
        .iter()
        .rposition(|&b| b != 0)
        .map_or(0, |pos| pos + 1);
    let text = std::str::from_utf8(&datagram[..end]).map_err(|_| ProtoError::NotUtf8)?;
    let text = text.trim_matches(WHITESPACE);
    if text.is_empty() {
        return Err(ProtoError::Empty);
    }
    match text.split_once(WHITESPACE) {
        Some((command, rest)) => Ok(CommandRequest {
            command: command.to_owned(),
            args: rest.trim_matches(WHITESPACE).to_owned(),
        }),
        None => Ok(CommandRequest {
            command: text.to_owned(),
            args: String::new(),
        }),
    }
}

/// Formats an error reply: `SYMBOL: detail`.
pub fn error_reply(symbol: &str, detail: &str) -> String {
    format!("{symbol}: {detail}")
}

/// Default server socket path: [`SOCKET_BASENAME`] under the system run
/// directory.
pub fn default_socket_path() -> PathBuf {
    PathBuf::from("/var/run").join(SOCKET_BASENAME)
}

/// Server socket path under an arbitrary directory.
pub fn socket_path_in(dir: impl Into<PathBuf>) -> PathBuf {
    dir.into().join(SOCKET_BASENAME)
}

/// Ephemeral client socket path: `/tmp/<prefix>.<pid>.S`.
pub fn client_socket_path(prefix: &str, pid: u32) -> PathBuf {
    PathBuf::from("/tmp").join(format!("{prefix}.{pid}.S"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_and_args_split_on_first_whitespace() {
        let req = parse_request(b"echo hi, how are you?").unwrap();
        assert_eq!(req.command, "echo");
        assert_eq!(req.args, "hi, how are you?");
    }

    #[test]
    fn bare_commands_have_empty_args() {
        let req = parse_request(b"engine_status").unwrap();
        assert_eq!(req.command, "engine_status");
        assert_eq!(req.args, "");
    }

    #[test]
    fn surrounding_whitespace_and_nuls_are_stripped() {
        let req = parse_request(b"\r\n\t echo  padded \t\r\n\0\0").unwrap();
        assert_eq!(req.command, "echo");
        assert_eq!(req.args, "padded");
    }

    #[test]
    fn oversized_messages_are_rejected() {
        let big = vec![b'a'; MAX_MESSAGE + 1];
        assert_eq!(
            parse_request(&big),
            Err(ProtoError::TooLarge(MAX_MESSAGE + 1))
        );
        let exact = vec![b'a'; MAX_MESSAGE];
        assert!(parse_request(&exact).is_ok());
    }

    #[test]
    fn empty_and_non_utf8_messages_are_rejected() {
        assert_eq!(parse_request(b""), Err(ProtoError::Empty));
        assert_eq!(parse_request(b"  \r\n "), Err(ProtoError::Empty));
        assert_eq!(parse_request(&[0xff, 0xfe]), Err(ProtoError::NotUtf8));
    }

    #[test]
    fn socket_paths_follow_the_convention() {
        assert_eq!(
            default_socket_path(),
            PathBuf::from("/var/run/picket_manager_controller.sock")
        );
        assert_eq!(
            client_socket_path("picket-ctl", 41),
            PathBuf::from("/tmp/picket-ctl.41.S")
        );
    }
}
