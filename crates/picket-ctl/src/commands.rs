// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>

//! Built-in control commands.

use std::path::PathBuf;
use std::sync::Arc;

use picket_core::{EngineResult, Outcome, Scope};
use picket_manager::{CreateDisposition, EngineManager};

use crate::server::{CommandHandler, ControlChannel};

/// Registers the built-in command set against `manager`.
///
/// `config_path` is the rules document `engine_create` loads when the
/// request does not name one.
pub fn register_builtin_commands(
    channel: &mut ControlChannel,
    manager: Arc<EngineManager>,
    config_path: PathBuf,
) -> EngineResult<()> {
    channel.register_command("echo", Arc::new(EchoCommand))?;
    channel.register_command(
        "engine_create",
        Arc::new(EngineCreateCommand {
            manager: Arc::clone(&manager),
            config_path,
        }),
    )?;
    channel.register_command(
        "engine_status",
        Arc::new(EngineStatusCommand {
            manager: Arc::clone(&manager),
        }),
    )?;
    channel.register_command("engine_disable", Arc::new(EngineDisableCommand { manager }))?;
    Ok(())
}

/// Reflects the argument text.
struct EchoCommand;

impl CommandHandler for EchoCommand {
    fn execute(&self, args: &str, _scope: &mut Scope) -> EngineResult<String> {
        Ok(args.to_owned())
    }
}

/// Reloads configuration into a fresh engine.
struct EngineCreateCommand {
    manager: Arc<EngineManager>,
    config_path: PathBuf,
}

impl CommandHandler for EngineCreateCommand {
    fn execute(&self, args: &str, _scope: &mut Scope) -> EngineResult<String> {
        let path = if args.is_empty() {
            self.config_path.clone()
        } else {
            PathBuf::from(args)
        };
        match self.manager.engine_create(&path)? {
            CreateDisposition::Created(engine) => {
                Ok(format!("OK: engine {} created.", engine.serial()))
            }
            CreateDisposition::Declined => Ok("DECLINED: engine limit reached.".to_owned()),
        }
    }
}

/// Reports the engine count and current serial.
struct EngineStatusCommand {
    manager: Arc<EngineManager>,
}

impl CommandHandler for EngineStatusCommand {
    fn execute(&self, _args: &str, _scope: &mut Scope) -> EngineResult<String> {
        let count = self.manager.engine_count();
        match self.manager.current_serial() {
            Some(serial) => Ok(format!("OK: engines {count} current {serial}.")),
            None => Ok(format!("OK: engines {count} current none.")),
        }
    }
}

/// Retires the current engine without creating a replacement.
struct EngineDisableCommand {
    manager: Arc<EngineManager>,
}

impl CommandHandler for EngineDisableCommand {
    fn execute(&self, _args: &str, _scope: &mut Scope) -> EngineResult<String> {
        match self.manager.engine_disable()? {
            Outcome::Ok => Ok("OK: engine disabled.".to_owned()),
            Outcome::Declined => Ok("DECLINED: no engine to disable.".to_owned()),
        }
    }
}
