//! Layered configuration using Figment.
//!
//! Configuration is built from three layers, each overriding the previous:
//! 1. Defaults from [`DeckrunConfig::default`]
//! 2. A TOML file (`config/deckrun.toml` unless another path is given)
//! 3. Environment variables prefixed with `DECKRUN_`
//!
//! Nested fields use double underscores:
//!
//! - `DECKRUN_APPLICATION__LOG_LEVEL=debug` → `application.log_level`
//! - `DECKRUN_ENGINE__RECOVERY_POLICY=continue` → `engine.recovery_policy`
//! - `DECKRUN_HARDWARE__MODE=realistic` → `hardware.mode`

use crate::logging::LogFormat;
use anyhow::{bail, Context, Result};
use deck_engine::state::CutoutFixturePlacement;
use deck_engine::{DeckConfiguration, EngineConfig};
use deck_hardware::HardwareConfig;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Default location of the configuration file.
pub const DEFAULT_CONFIG_PATH: &str = "config/deckrun.toml";

const VALID_LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeckrunConfig {
    pub application: ApplicationConfig,
    pub engine: EngineConfig,
    pub deck: DeckConfig,
    pub hardware: HardwareConfig,
    pub labware: LabwareConfig,
}

/// Application-level settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationConfig {
    pub name: String,
    /// trace, debug, info, warn or error
    pub log_level: String,
    pub log_format: LogFormat,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: "deckrun".to_string(),
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
        }
    }
}

/// One fixture mounted in one cutout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixtureConfig {
    pub cutout: String,
    pub fixture: String,
}

/// Deck layout. No fixtures means the layout is inferred from the protocol.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeckConfig {
    pub fixtures: Vec<FixtureConfig>,
}

impl DeckConfig {
    pub fn to_deck_configuration(&self) -> DeckConfiguration {
        if self.fixtures.is_empty() {
            return DeckConfiguration::Inferred;
        }
        DeckConfiguration::Concrete(
            self.fixtures
                .iter()
                .map(|f| CutoutFixturePlacement {
                    cutout_id: f.cutout.clone(),
                    cutout_fixture_id: f.fixture.clone(),
                })
                .collect(),
        )
    }
}

/// Where custom labware definitions live.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LabwareConfig {
    pub directories: Vec<PathBuf>,
}

impl DeckrunConfig {
    /// Load from the default file location and the environment.
    pub fn load() -> Result<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load from `path` and the environment. A missing file is not an error.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let mut figment = Figment::from(Serialized::defaults(DeckrunConfig::default()));
        if path.exists() {
            figment = figment.merge(Toml::file(path));
        } else {
            warn!(path = %path.display(), "Config file not found; using defaults");
        }
        figment = figment.merge(Env::prefixed("DECKRUN_").split("__"));

        let config: DeckrunConfig = figment
            .extract()
            .context("Failed to extract configuration")?;
        config
            .validate()
            .context("Configuration validation failed")?;
        Ok(config)
    }

    /// Check constraints the types cannot express.
    pub fn validate(&self) -> Result<()> {
        let level = self.application.log_level.to_lowercase();
        if !VALID_LOG_LEVELS.contains(&level.as_str()) {
            bail!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                VALID_LOG_LEVELS.join(", ")
            );
        }

        let mut cutouts = HashSet::new();
        for fixture in &self.deck.fixtures {
            if !cutouts.insert(fixture.cutout.as_str()) {
                bail!("Cutout {} is configured more than once", fixture.cutout);
            }
        }

        if self.engine.notification_capacity == 0 {
            bail!("engine.notification_capacity must be positive");
        }
        if self.engine.action_queue_capacity == 0 {
            bail!("engine.action_queue_capacity must be positive");
        }

        self.hardware
            .validate()
            .context("Invalid hardware configuration")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use deck_engine::RecoveryPolicy;
    use deck_hardware::SimulationMode;
    use figment::Jail;

    const EXAMPLE: &str = r#"
        [application]
        log_level = "debug"
        log_format = "json"

        [engine]
        recovery_policy = "continue"

        [[deck.fixtures]]
        cutout = "cutoutD3"
        fixture = "wasteChuteRightAdapterNoCover"

        [hardware]
        gripper = true

        [hardware.pipettes]
        left = "p50_single"
    "#;

    #[test]
    fn defaults_are_valid() {
        let config = DeckrunConfig::default();
        config.validate().unwrap();
        assert_eq!(config.deck.to_deck_configuration(), DeckConfiguration::Inferred);
    }

    #[test]
    fn file_and_environment_layers() {
        Jail::expect_with(|jail| {
            jail.create_file("deckrun.toml", EXAMPLE)?;
            jail.set_env("DECKRUN_HARDWARE__MODE", "realistic");
            jail.set_env("DECKRUN_APPLICATION__LOG_LEVEL", "warn");

            let config = DeckrunConfig::load_from("deckrun.toml").map_err(|e| format!("{:#}", e))?;
            assert_eq!(config.application.log_level, "warn");
            assert_eq!(config.application.log_format, LogFormat::Json);
            assert_eq!(config.engine.recovery_policy, RecoveryPolicy::Continue);
            assert_eq!(config.hardware.mode, SimulationMode::Realistic);
            assert_eq!(config.hardware.pipettes.left.as_deref(), Some("p50_single"));
            assert!(config.hardware.gripper);
            assert_eq!(
                config.deck.to_deck_configuration(),
                DeckConfiguration::Concrete(vec![CutoutFixturePlacement {
                    cutout_id: "cutoutD3".to_string(),
                    cutout_fixture_id: "wasteChuteRightAdapterNoCover".to_string(),
                }])
            );
            Ok(())
        });
    }

    #[test]
    fn missing_file_uses_defaults() {
        Jail::expect_with(|_| {
            let config = DeckrunConfig::load_from("absent.toml").map_err(|e| e.to_string())?;
            assert_eq!(config, DeckrunConfig::default());
            Ok(())
        });
    }

    #[test]
    fn invalid_log_level() {
        let mut config = DeckrunConfig::default();
        config.application.log_level = "loud".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn duplicate_cutouts() {
        let fixture = FixtureConfig {
            cutout: "cutoutC3".to_string(),
            fixture: "singleRightSlot".to_string(),
        };
        let config = DeckrunConfig {
            deck: DeckConfig {
                fixtures: vec![fixture.clone(), fixture],
            },
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("cutoutC3"));
    }

    #[test]
    fn zero_capacity_is_rejected() {
        let mut config = DeckrunConfig::default();
        config.engine.notification_capacity = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn hardware_errors_are_reported() {
        let mut config = DeckrunConfig::default();
        config.hardware.pipettes.right = Some("p20_single".to_string());
        let err = config.validate().unwrap_err();
        assert!(format!("{:#}", err).contains("p20_single"));
    }
}
