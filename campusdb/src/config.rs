// Runtime configuration - audit behaviour, id generation, hashing cost, domain defaults

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Top-level configuration, usually parsed from `campusdb.yaml`.
/// Every section is optional; missing keys fall back to the defaults below.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CampusConfig {
    pub audit: AuditConfig,
    pub ids: IdConfig,
    pub auth: AuthConfig,
    pub fees: FeesConfig,
    pub library: LibraryConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    pub mode: AuditMode,
    pub diff: DiffMode,
    /// Recorded as `user_id` on every audit entry written by this session.
    pub actor: String,
}

impl Default for AuditConfig {
    fn default() -> Self {
        AuditConfig {
            mode: AuditMode::Warn,
            diff: DiffMode::NewKeys,
            actor: "system".to_string(),
        }
    }
}

/// What happens when the AuditLog table does not exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditMode {
    /// Log a warning and let the mutation proceed.
    Warn,
    /// Fail the mutation with `NotFound`.
    FailClosed,
}

/// Which keys the audit diff compares.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiffMode {
    /// Only keys present in the new snapshot; removed keys are never reported.
    NewKeys,
    /// Keys of both snapshots.
    Symmetric,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct IdConfig {
    pub strategy: IdStrategy,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdStrategy {
    /// `<prefix><epoch millis><0-999>`
    #[default]
    Timestamp,
    Ulid,
    Uuid,
    Nanoid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub bcrypt_cost: u32,
    /// Re-hash legacy SHA-256 passwords with bcrypt after a successful login.
    pub upgrade_legacy_hashes: bool,
}

impl Default for AuthConfig {
    fn default() -> Self {
        AuthConfig {
            bcrypt_cost: bcrypt::DEFAULT_COST,
            upgrade_legacy_hashes: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeesConfig {
    pub default_currency: String,
}

impl Default for FeesConfig {
    fn default() -> Self {
        FeesConfig {
            default_currency: "INR".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LibraryConfig {
    pub fine_per_day: f64,
    pub loan_days: i64,
}

impl Default for LibraryConfig {
    fn default() -> Self {
        LibraryConfig {
            fine_per_day: 5.0,
            loan_days: 14,
        }
    }
}

impl CampusConfig {
    /// Load configuration from a YAML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    pub fn from_yaml_str(content: &str) -> Result<Self> {
        if content.trim().is_empty() {
            return Ok(CampusConfig::default());
        }
        let config: CampusConfig = serde_yaml::from_str(content)?;
        Ok(config)
    }

    /// Configuration used by unit tests: cheapest bcrypt cost, everything else default.
    pub fn for_tests() -> Self {
        let mut config = CampusConfig::default();
        config.auth.bcrypt_cost = 4;
        config
    }
}
