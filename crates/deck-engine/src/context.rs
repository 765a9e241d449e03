//! Engine context: the collaborators every command implementation needs.
//!
//! Constructed once per engine and passed by reference into commands. There
//! is no ambient global hardware handle.
//!
//! # Locks
//!
//! - **Motion**: every physical movement (gantry, plunger, gripper, homing)
//!   runs while a [`MotionGuard`] is held. The guard derefs to the hardware
//!   adapter, so holding it is the only convenient way to move anything.
//! - **Scan**: instrument re-detection holds the scan lock so two scans are
//!   never interleaved.
//!
//! Both are `tokio` mutexes: they are held across adapter awaits and released
//! on every exit path when the guard drops.

use crate::config::EngineConfig;
use crate::geometry::MotionPlan;
use deck_core::definitions::{LabwareDefinition, ModuleDefinition, ModuleModel};
use deck_core::error::EngineResult;
use deck_core::hardware::{HardwareControl, HardwareResult};
use deck_core::provider::DataProvider;
use deck_core::types::Mount;
use std::ops::Deref;
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};
use tracing::debug;

/// Hardware, definitions and locks shared by command implementations.
pub struct EngineContext {
    hardware: Arc<dyn HardwareControl>,
    provider: Arc<dyn DataProvider>,
    config: EngineConfig,
    motion: Mutex<()>,
    scan: Mutex<()>,
}

impl std::fmt::Debug for EngineContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineContext")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl EngineContext {
    pub fn new(
        hardware: Arc<dyn HardwareControl>,
        provider: Arc<dyn DataProvider>,
        config: EngineConfig,
    ) -> Self {
        Self {
            hardware,
            provider,
            config,
            motion: Mutex::new(()),
            scan: Mutex::new(()),
        }
    }

    /// Hardware for calls that do not move anything.
    pub fn hardware(&self) -> &dyn HardwareControl {
        self.hardware.as_ref()
    }

    pub fn provider(&self) -> &dyn DataProvider {
        self.provider.as_ref()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Wait for exclusive use of the gantry.
    pub async fn motion(&self) -> MotionGuard<'_> {
        let guard = self.motion.lock().await;
        MotionGuard {
            _guard: guard,
            hardware: Arc::clone(&self.hardware),
        }
    }

    /// Wait for exclusive use of instrument detection.
    pub async fn scan(&self) -> MutexGuard<'_, ()> {
        self.scan.lock().await
    }

    pub async fn labware_definition(
        &self,
        load_name: &str,
        namespace: &str,
        version: u32,
    ) -> EngineResult<Arc<LabwareDefinition>> {
        let definition = self
            .provider
            .labware_definition(load_name, namespace, version)
            .await?;
        Ok(Arc::new(definition))
    }

    pub async fn module_definition(&self, model: ModuleModel) -> EngineResult<Arc<ModuleDefinition>> {
        Ok(Arc::new(self.provider.module_definition(model).await?))
    }
}

/// Exclusive access to the gantry for the lifetime of the guard.
pub struct MotionGuard<'a> {
    _guard: MutexGuard<'a, ()>,
    hardware: Arc<dyn HardwareControl>,
}

impl MotionGuard<'_> {
    /// Move `mount` through every waypoint of `plan`. No-op plans issue no call.
    pub async fn execute_plan(
        &self,
        mount: Mount,
        plan: &MotionPlan,
        speed: Option<f64>,
    ) -> HardwareResult<()> {
        if plan.is_no_op() {
            debug!(%mount, "Skipping zero-length move");
            return Ok(());
        }
        for waypoint in &plan.waypoints {
            debug!(%mount, position = %waypoint.position, "Moving to waypoint");
            self.hardware
                .move_to(mount, waypoint.position, waypoint.critical_point, speed)
                .await?;
        }
        Ok(())
    }
}

impl Deref for MotionGuard<'_> {
    type Target = dyn HardwareControl;

    fn deref(&self) -> &Self::Target {
        self.hardware.as_ref()
    }
}
