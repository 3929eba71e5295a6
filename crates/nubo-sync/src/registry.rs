//! Command registry: the closed allow-list of command names.
//!
//! Names resolve by exact lookup only. Nothing derived from the request is
//! ever used to reach a handler; a name that is not listed here is
//! `BAD_COMMAND`, whatever it looks like.

use crate::domain::envelope::ResponseMap;
use crate::domain::error::NuboResult;
use crate::handlers::{self, CommandContext};
use rmpv::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, LazyLock};

/// Handler signature shared by every command.
pub type CommandHandler =
    fn(&mut CommandContext<'_>, Option<&Value>) -> NuboResult<ResponseMap>;

/// Registration entry
#[derive(Clone, Copy)]
pub struct CommandEntry {
    pub name: &'static str,
    pub handler: CommandHandler,
    /// False only for the bootstrap command.
    pub requires_auth: bool,
    pub description: &'static str,
}

impl CommandEntry {
    /// Entry callable without a credential.
    pub const fn bootstrap(
        name: &'static str,
        handler: CommandHandler,
        description: &'static str,
    ) -> Self {
        Self {
            name,
            handler,
            requires_auth: false,
            description,
        }
    }

    /// Entry that requires and renews a credential.
    pub const fn protected(
        name: &'static str,
        handler: CommandHandler,
        description: &'static str,
    ) -> Self {
        Self {
            name,
            handler,
            requires_auth: true,
            description,
        }
    }
}

impl fmt::Debug for CommandEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandEntry")
            .field("name", &self.name)
            .field("requires_auth", &self.requires_auth)
            .finish()
    }
}

/// The commands a stock server exposes.
pub const STANDARD_COMMANDS: &[CommandEntry] = &[
    CommandEntry::bootstrap(
        "init",
        handlers::init::handle,
        "Register a computer with the install password",
    ),
    CommandEntry::protected(
        "directory",
        handlers::files::directory,
        "List files with their hashes",
    ),
    CommandEntry::protected("put", handlers::files::put, "Create or replace a file"),
    CommandEntry::protected("get", handlers::files::get, "Fetch a file"),
    CommandEntry::protected("delete", handlers::files::delete, "Remove a file"),
    CommandEntry::protected("test", handlers::echo::handle, "Echo parameters"),
];

static STANDARD_REGISTRY: LazyLock<Arc<CommandRegistry>> =
    LazyLock::new(|| Arc::new(CommandRegistry::from_entries(STANDARD_COMMANDS.iter().copied())));

/// Immutable name -> entry map.
#[derive(Debug, Clone, Default)]
pub struct CommandRegistry {
    entries: HashMap<&'static str, CommandEntry>,
}

impl CommandRegistry {
    /// Process-wide registry of [`STANDARD_COMMANDS`], built once.
    pub fn standard() -> Arc<CommandRegistry> {
        Arc::clone(&STANDARD_REGISTRY)
    }

    /// Later entries replace earlier ones with the same name.
    pub fn from_entries(entries: impl IntoIterator<Item = CommandEntry>) -> Self {
        Self {
            entries: entries.into_iter().map(|e| (e.name, e)).collect(),
        }
    }

    pub fn resolve(&self, name: &str) -> Option<&CommandEntry> {
        self.entries.get(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.entries.keys().copied().collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
