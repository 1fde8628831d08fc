//! User-tunable configuration, loaded the way `jj-lib`'s `UserSettings`
//! loads it: a `config::Config` built from an optional file plus
//! environment overrides, exposing typed accessors over raw lookups.

use std::path::Path;

use crate::backend::{Signature, Timestamp};

/// Default size of a block written by the file store (§4.11).
pub const DEFAULT_BLOCK_SIZE: u64 = 8 * 1024 * 1024;

/// Default PBKDF2 iteration count for the crypt context (§4.2).
pub const DEFAULT_KDF_ITERATIONS: u32 = 100_000;

#[derive(Debug, Clone, Default)]
pub struct UserSettings {
    config: config::Config,
}

impl UserSettings {
    pub fn from_config(config: config::Config) -> Self {
        UserSettings { config }
    }

    /// Loads settings from `path` if it exists, falling back to defaults,
    /// then applies `REPO_ENGINE_USER`/`REPO_ENGINE_EMAIL` overrides.
    pub fn from_file_or_default(path: &Path) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder().add_source(
            config::File::from(path.to_path_buf())
                .required(false)
                .format(config::FileFormat::Toml),
        );
        if let Ok(value) = std::env::var("REPO_ENGINE_USER") {
            builder = builder.set_override("user.name", value)?;
        }
        if let Ok(value) = std::env::var("REPO_ENGINE_EMAIL") {
            builder = builder.set_override("user.email", value)?;
        }
        Ok(UserSettings::from_config(builder.build()?))
    }

    pub fn user_name(&self) -> String {
        self.config
            .get_string("user.name")
            .unwrap_or_else(|_| whoami_fallback())
    }

    pub fn user_email(&self) -> String {
        self.config
            .get_string("user.email")
            .unwrap_or_else(|_| "unknown@example.com".to_string())
    }

    pub fn signature(&self) -> Signature {
        Signature {
            name: self.user_name(),
            email: self.user_email(),
            timestamp: Timestamp::now(),
        }
    }

    pub fn block_size(&self) -> u64 {
        self.config
            .get_int("store.block-size")
            .map(|v| v as u64)
            .unwrap_or(DEFAULT_BLOCK_SIZE)
    }

    pub fn kdf_iterations(&self) -> u32 {
        self.config
            .get_int("crypt.kdf-iterations")
            .map(|v| v as u32)
            .unwrap_or(DEFAULT_KDF_ITERATIONS)
    }
}

fn whoami_fallback() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "unknown".to_string())
}
