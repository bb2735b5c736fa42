//! Static command handler registry.
//!
//! Built once at startup. Lookup goes through the closed `CommandKind` set,
//! so a command type string either names a known kind with a registered
//! handler or is rejected as unknown.

use std::collections::HashMap;

use sovereign_contracts::{
    command::CommandKind,
    error::{KernelError, KernelResult},
};

use crate::traits::CommandHandler;

#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<CommandKind, Box<dyn CommandHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` under its own kind.
    ///
    /// Registering a second handler for the same kind is a configuration error.
    pub fn register(&mut self, handler: Box<dyn CommandHandler>) -> KernelResult<()> {
        let kind = handler.kind();
        if self.handlers.contains_key(&kind) {
            return Err(KernelError::Config {
                reason: format!("a handler for '{}' is already registered", kind),
            });
        }
        self.handlers.insert(kind, handler);
        Ok(())
    }

    /// Find the handler for a wire command type.
    pub fn resolve(&self, command_type: &str) -> KernelResult<&dyn CommandHandler> {
        CommandKind::parse(command_type)
            .and_then(|kind| self.handlers.get(&kind))
            .map(|handler| handler.as_ref())
            .ok_or_else(|| KernelError::UnknownCommand {
                command_type: command_type.to_string(),
            })
    }

    pub fn kinds(&self) -> impl Iterator<Item = CommandKind> + '_ {
        self.handlers.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}
