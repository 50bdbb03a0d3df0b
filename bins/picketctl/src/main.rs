// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! picketctl
//!
//! Sends one command to a running Picket engine manager over its control
//! socket and prints the reply.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use picket_ctl::ControlClient;

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    /// Control socket path (defaults to the system run directory)
    #[clap(short, long)]
    socket: Option<PathBuf>,

    /// Command to send (e.g. engine_status, engine_create, engine_disable)
    command: String,

    /// Arguments appended to the command
    args: Vec<String>,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let socket = args
        .socket
        .unwrap_or_else(picket_ctl_proto::default_socket_path);

    let mut message = args.command;
    for arg in &args.args {
        message.push(' ');
        message.push_str(arg);
    }

    let reply = ControlClient::new(&socket)
        .send(&message)
        .with_context(|| format!("sending to {}", socket.display()))?;
    println!("{reply}");
    Ok(())
}
