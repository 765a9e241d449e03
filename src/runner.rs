//! Running a protocol document against the simulated robot.

use crate::config::DeckrunConfig;
use anyhow::{Context, Result};
use deck_core::definitions::LabwareUri;
use deck_core::types::Point;
use deck_engine::state::LabwareOffsetLocation;
use deck_engine::{CommandCreate, EngineContext, ProtocolEngine, RecoveryPolicy, RunSummary};
use deck_hardware::{FilesystemProvider, SimulatedHardware};
use serde::Deserialize;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

/// A calibration vector supplied with the protocol.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OffsetCreate {
    pub definition_uri: LabwareUri,
    pub location: LabwareOffsetLocation,
    pub vector: Point,
}

/// What the run driver executes: offsets first, then commands in order.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Protocol {
    #[serde(default)]
    pub labware_offsets: Vec<OffsetCreate>,
    pub commands: Vec<CommandCreate>,
}

impl Protocol {
    /// Parse a protocol document, or a bare JSON array of commands.
    pub fn from_json(text: &str) -> Result<Self> {
        let value: serde_json::Value = serde_json::from_str(text).context("Protocol is not valid JSON")?;
        if value.is_array() {
            let commands = serde_json::from_value(value).context("Invalid command list")?;
            return Ok(Self {
                labware_offsets: Vec::new(),
                commands,
            });
        }
        serde_json::from_value(value).context("Invalid protocol document")
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read protocol {}", path.display()))?;
        Self::from_json(&text).with_context(|| format!("Failed to parse protocol {}", path.display()))
    }
}

/// Build an engine over the configured simulator and definition directories.
pub async fn build_engine(config: &DeckrunConfig) -> Result<(ProtocolEngine, Arc<SimulatedHardware>)> {
    let hardware = Arc::new(config.hardware.build());
    let mut provider = FilesystemProvider::new();
    for dir in &config.labware.directories {
        provider = provider.with_directory(dir)?;
    }
    info!(
        mode = ?config.hardware.mode,
        custom_labware = provider.custom_count(),
        "Simulated robot ready"
    );

    let context = EngineContext::new(hardware.clone(), Arc::new(provider), config.engine.clone());
    let engine = ProtocolEngine::new(context, config.deck.to_deck_configuration())
        .await
        .context("Failed to create protocol engine")?;
    Ok((engine, hardware))
}

/// Execute `protocol` to completion and return the run summary.
///
/// When `interrupt` resolves the run is stopped; the in-flight command is
/// failed and nothing further starts.
pub async fn run_protocol<F>(config: &DeckrunConfig, protocol: Protocol, interrupt: F) -> Result<RunSummary>
where
    F: Future<Output = ()> + Send + 'static,
{
    let (mut engine, _hardware) = build_engine(config).await?;
    if config.engine.recovery_policy == RecoveryPolicy::Manual {
        warn!("Manual recovery: a failed command holds the run until interrupted");
    }

    for offset in protocol.labware_offsets {
        engine.add_labware_offset(offset.definition_uri, offset.location, offset.vector);
    }
    let total = protocol.commands.len();
    for command in protocol.commands {
        engine.add_command(command);
    }
    info!(commands = total, "Protocol queued");

    let handle = engine.handle();
    let stopper = tokio::spawn(async move {
        interrupt.await;
        warn!("Interrupt received; stopping run");
        handle.stop();
    });

    engine.play();
    let status = engine.run_until_idle().await;
    stopper.abort();
    info!(%status, "Run driver idle");

    Ok(engine.finish())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn accepts_a_bare_command_list() {
        let text = json!([{ "commandType": "home", "params": {} }]).to_string();
        let protocol = Protocol::from_json(&text).unwrap();
        assert_eq!(protocol.commands.len(), 1);
        assert!(protocol.labware_offsets.is_empty());
    }

    #[test]
    fn parses_offsets() {
        let text = json!({
            "labwareOffsets": [{
                "definitionUri": "std/wellplate_96_360ul_flat/1",
                "location": { "slotName": "C2" },
                "vector": [0.1, 0.2, 0.3]
            }],
            "commands": []
        })
        .to_string();
        let protocol = Protocol::from_json(&text).unwrap();
        assert_eq!(
            protocol.labware_offsets[0].definition_uri,
            LabwareUri::new("std", "wellplate_96_360ul_flat", 1)
        );
    }

    #[test]
    fn unknown_command_is_rejected() {
        let text = json!([{ "commandType": "teleport", "params": {} }]).to_string();
        let err = Protocol::from_json(&text).unwrap_err();
        assert!(format!("{:#}", err).contains("Invalid command list"));
    }
}
