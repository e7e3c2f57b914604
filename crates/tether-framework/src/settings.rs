//! Engine settings.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::permission::Permission;
use crate::rules::CommandSyntax;

/// Settings the engine reads while dispatching.
///
/// Loaded by the runtime from the `[engine]` section of the configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// How long a paused or rejected session waits for its next event.
    pub session_expire_timeout_secs: u64,
    /// Tokens a command must start with.
    pub command_start: Vec<String>,
    /// Tokens separating the parts of a multi-part command.
    pub command_sep: Vec<String>,
    /// Names the bot answers to. Adapters use them to decide `is_tome`.
    pub nickname: Vec<String>,
    /// User ids granted [`Permission::superuser`](crate::Permission::superuser).
    pub superusers: Vec<String>,
}

impl Default for Settings {
    fn default() -> Self {
        let syntax = CommandSyntax::default();
        Self {
            session_expire_timeout_secs: 120,
            command_start: syntax.starts,
            command_sep: syntax.seps,
            nickname: Vec::new(),
            superusers: Vec::new(),
        }
    }
}

impl Settings {
    pub fn session_expire_timeout(&self) -> Duration {
        Duration::from_secs(self.session_expire_timeout_secs)
    }

    pub fn command_syntax(&self) -> CommandSyntax {
        CommandSyntax {
            starts: self.command_start.clone(),
            seps: self.command_sep.clone(),
        }
    }

    /// The superuser permission for the configured superusers.
    pub fn superuser(&self) -> Permission {
        Permission::superuser(self.superusers.iter().cloned())
    }
}
