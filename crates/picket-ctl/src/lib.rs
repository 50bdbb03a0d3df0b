// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! picket-ctl: local datagram control channel for the engine manager.
//!
//! Operators send `COMMAND [ARGS]` datagrams over a Unix socket to reload
//! configuration or inspect the engine pool without restarting the host.
//! The server loop is cooperative: the host polls [`ControlChannel::ready`]
//! from its own event loop and calls [`ControlChannel::receive`] for one
//! datagram at a time; nothing here spawns threads or blocks.
//!
//! The channel performs no authentication: filesystem permissions on the
//! socket path are the sole access control.
#![forbid(unsafe_code)]

mod client;
mod commands;
mod server;

/// One-shot client helpers.
pub use client::{send, ControlClient};
/// Built-in command set.
pub use commands::register_builtin_commands;
/// The datagram server and its command trait.
pub use server::{CommandHandler, ControlChannel};
