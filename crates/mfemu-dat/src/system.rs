use std::sync::Arc;

use mfemu_core::{CpuId, MainStorage};
use mfemu_txf::TxfEngine;

use crate::arch::ArchMode;
use crate::config::SystemConfig;
use crate::cpu::{CpuContext, CpuShared};
use crate::error::ConfigError;
use crate::interlock::Interlock;
use crate::registry::CpuRegistry;

/// Machine-wide state shared by every CPU thread (`sysblk`).
#[derive(Debug)]
pub struct System {
    storage: Arc<MainStorage>,
    cpus: CpuRegistry,
    intlock: Interlock,
    txf: TxfEngine,
    config: SystemConfig,
}

impl System {
    pub fn new(config: SystemConfig) -> Result<Arc<Self>, ConfigError> {
        config.validate()?;
        let storage = Arc::new(MainStorage::new(config.main_storage_size)?);
        let txf = TxfEngine::new(storage.clone(), config.max_cpus, config.txf)?;
        tracing::debug!(
            main_storage_size = config.main_storage_size,
            max_cpus = config.max_cpus,
            "system created"
        );
        Ok(Arc::new(Self {
            storage,
            cpus: CpuRegistry::new(config.max_cpus),
            intlock: Interlock::new(),
            txf,
            config,
        }))
    }

    #[inline]
    pub fn storage(&self) -> &MainStorage {
        &self.storage
    }

    #[inline]
    pub fn cpus(&self) -> &CpuRegistry {
        &self.cpus
    }

    #[inline]
    pub fn interlock(&self) -> &Interlock {
        &self.intlock
    }

    #[inline]
    pub fn txf(&self) -> &TxfEngine {
        &self.txf
    }

    #[inline]
    pub fn config(&self) -> &SystemConfig {
        &self.config
    }

    /// Add CPU `id` running `arch`. The CPU is online but stopped.
    pub fn configure_cpu(
        self: &Arc<Self>,
        id: CpuId,
        arch: ArchMode,
    ) -> Result<CpuContext, ConfigError> {
        let shared = Arc::new(CpuShared::new(id, arch));
        self.cpus.configure(shared.clone())?;
        tracing::debug!(cpu = id, %arch, "cpu configured");
        Ok(CpuContext::new(shared, self.clone()))
    }

    pub fn deconfigure_cpu(&self, id: CpuId) -> Result<(), ConfigError> {
        self.cpus.deconfigure(id)?;
        tracing::debug!(cpu = id, "cpu deconfigured");
        Ok(())
    }

    pub fn start_cpu(&self, id: CpuId) -> Result<(), ConfigError> {
        self.cpus.start(id)
    }

    pub fn stop_cpu(&self, id: CpuId) -> Result<(), ConfigError> {
        self.cpus.stop(id)
    }
}
