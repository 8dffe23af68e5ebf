pub mod extract;
pub mod remove;
pub mod show;
pub mod sync;

use std::path::PathBuf;
use std::sync::Arc;

use cnwan_core::FileRegistry;
use cnwan_sync::Broker;

use crate::settings::Settings;

/// Resolved home directory and settings shared by every command.
pub struct CommandEnv {
    pub home: PathBuf,
    pub settings: Settings,
}

impl CommandEnv {
    pub fn store(&self) -> FileRegistry {
        FileRegistry::new(self.settings.store_root(&self.home))
    }

    pub fn broker(&self) -> Broker {
        Broker::with_registry(Arc::new(self.store()), self.settings.broker_settings())
    }
}
