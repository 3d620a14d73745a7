use core::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use mfemu_core::{cpu_bit, CpuId};

use crate::cpu::CpuShared;
use crate::error::ConfigError;
use crate::invalidate::CpuTarget;

/// Every configured CPU of the machine, indexed by CPU address.
///
/// Started/stopped state is a bitmask so that a broadcast can test membership without taking
/// the table lock for writing.
#[derive(Debug)]
pub struct CpuRegistry {
    cpus: RwLock<Vec<Option<Arc<CpuShared>>>>,
    started: AtomicU64,
}

impl CpuRegistry {
    pub fn new(max_cpus: usize) -> Self {
        Self {
            cpus: RwLock::new(vec![None; max_cpus]),
            started: AtomicU64::new(0),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Vec<Option<Arc<CpuShared>>>> {
        match self.cpus.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<Option<Arc<CpuShared>>>> {
        match self.cpus.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn max_cpus(&self) -> usize {
        self.read().len()
    }

    /// Add a CPU and bring it online (stopped).
    pub(crate) fn configure(&self, cpu: Arc<CpuShared>) -> Result<(), ConfigError> {
        let id = cpu.id();
        let mut cpus = self.write();
        let max_cpus = cpus.len();
        let slot = cpus
            .get_mut(usize::from(id))
            .ok_or(ConfigError::CpuOutOfRange { cpu: id, max_cpus })?;
        if slot.is_some() {
            return Err(ConfigError::CpuAlreadyConfigured(id));
        }
        cpu.set_online(true);
        *slot = Some(cpu);
        Ok(())
    }

    /// Take a CPU offline and remove it. Its TLB stops receiving broadcasts.
    pub(crate) fn deconfigure(&self, id: CpuId) -> Result<Arc<CpuShared>, ConfigError> {
        let mut cpus = self.write();
        let cpu = cpus
            .get_mut(usize::from(id))
            .and_then(Option::take)
            .ok_or(ConfigError::CpuNotConfigured(id))?;
        self.started.fetch_and(!cpu_bit(id), Ordering::AcqRel);
        cpu.set_online(false);
        Ok(cpu)
    }

    pub fn get(&self, id: CpuId) -> Option<Arc<CpuShared>> {
        self.read().get(usize::from(id)).cloned().flatten()
    }

    pub fn is_configured(&self, id: CpuId) -> bool {
        self.get(id).is_some()
    }

    pub fn start(&self, id: CpuId) -> Result<(), ConfigError> {
        if !self.is_configured(id) {
            return Err(ConfigError::CpuNotConfigured(id));
        }
        self.started.fetch_or(cpu_bit(id), Ordering::AcqRel);
        Ok(())
    }

    pub fn stop(&self, id: CpuId) -> Result<(), ConfigError> {
        if !self.is_configured(id) {
            return Err(ConfigError::CpuNotConfigured(id));
        }
        self.started.fetch_and(!cpu_bit(id), Ordering::AcqRel);
        Ok(())
    }

    #[inline]
    pub fn started_mask(&self) -> u64 {
        self.started.load(Ordering::Acquire)
    }

    #[inline]
    pub fn is_started(&self, id: CpuId) -> bool {
        self.started_mask() & cpu_bit(id) != 0
    }

    pub fn set_online(&self, id: CpuId, online: bool) -> Result<(), ConfigError> {
        let cpu = self.get(id).ok_or(ConfigError::CpuNotConfigured(id))?;
        cpu.set_online(online);
        Ok(())
    }

    /// Addresses of every configured CPU that is online.
    pub fn online_cpus(&self) -> Vec<CpuId> {
        self.read()
            .iter()
            .flatten()
            .filter(|cpu| cpu.is_online())
            .map(|cpu| cpu.id())
            .collect()
    }

    /// Call `f` for every online, started CPU that `target` selects; returns how many matched.
    ///
    /// The table stays read-locked for the whole walk, so no CPU can be deconfigured halfway.
    pub fn for_each_target(&self, target: CpuTarget, mut f: impl FnMut(&CpuShared)) -> usize {
        let started = self.started_mask();
        let cpus = self.read();
        let mut matched = 0;
        for cpu in cpus.iter().flatten() {
            if cpu.is_online() && started & cpu_bit(cpu.id()) != 0 && target.selects(cpu.id()) {
                f(cpu);
                matched += 1;
            }
        }
        matched
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::ArchMode;

    fn registry_with(ids: &[CpuId]) -> CpuRegistry {
        let registry = CpuRegistry::new(8);
        for &id in ids {
            registry
                .configure(Arc::new(CpuShared::new(id, ArchMode::Z900)))
                .unwrap();
        }
        registry
    }

    #[test]
    fn configure_rejects_duplicates_and_out_of_range_addresses() {
        let registry = registry_with(&[1]);
        assert_eq!(
            registry.configure(Arc::new(CpuShared::new(1, ArchMode::S390))),
            Err(ConfigError::CpuAlreadyConfigured(1))
        );
        assert_eq!(
            registry.configure(Arc::new(CpuShared::new(8, ArchMode::S390))),
            Err(ConfigError::CpuOutOfRange {
                cpu: 8,
                max_cpus: 8
            })
        );
        assert!(registry.get(1).is_some_and(|cpu| cpu.is_online()));
        assert_eq!(registry.start(3), Err(ConfigError::CpuNotConfigured(3)));
    }

    #[test]
    fn broadcasts_only_reach_online_started_cpus() {
        let registry = registry_with(&[0, 1, 2, 3]);
        for id in [0, 1, 2] {
            registry.start(id).unwrap();
        }
        registry.set_online(2, false).unwrap();

        let mut seen = Vec::new();
        let matched = registry.for_each_target(CpuTarget::All, |cpu| seen.push(cpu.id()));
        assert_eq!(matched, 2);
        assert_eq!(seen, vec![0, 1]);

        assert_eq!(registry.for_each_target(CpuTarget::Cpu(1), |_| {}), 1);
        assert_eq!(registry.for_each_target(CpuTarget::Cpu(3), |_| {}), 0);
    }

    #[test]
    fn deconfigure_clears_the_started_bit() {
        let registry = registry_with(&[5]);
        registry.start(5).unwrap();
        assert!(registry.is_started(5));

        let cpu = registry.deconfigure(5).unwrap();
        assert!(!cpu.is_online());
        assert!(!registry.is_started(5));
        assert!(registry.get(5).is_none());
        assert_eq!(registry.online_cpus(), Vec::<CpuId>::new());
    }
}
