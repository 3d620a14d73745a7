use mfemu_core::{StorageError, MAX_CPUS, STORAGE_KEY_FRAME_SIZE};
use mfemu_txf::TxfConfig;

use crate::error::ConfigError;

/// Machine shape used by [`crate::System::new`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SystemConfig {
    /// Bytes of main storage; a non-zero multiple of 4 KiB.
    pub main_storage_size: u64,
    /// Highest number of CPUs that can be configured.
    pub max_cpus: usize,
    pub txf: TxfConfig,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            main_storage_size: 16 * 1024 * 1024,
            max_cpus: 4,
            txf: TxfConfig::default(),
        }
    }
}

impl SystemConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let size = self.main_storage_size;
        if size == 0 || size % STORAGE_KEY_FRAME_SIZE != 0 {
            return Err(StorageError::InvalidSize {
                size,
                frame: STORAGE_KEY_FRAME_SIZE,
            }
            .into());
        }
        if !(1..=MAX_CPUS).contains(&self.max_cpus) {
            return Err(ConfigError::CpuCount {
                got: self.max_cpus,
                max: MAX_CPUS,
            });
        }
        self.txf.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mfemu_txf::TxfConfigError;

    #[test]
    fn validation_reports_the_first_bad_field() {
        assert_eq!(SystemConfig::default().validate(), Ok(()));

        let cfg = SystemConfig {
            main_storage_size: 0x1800,
            ..SystemConfig::default()
        };
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::Storage(StorageError::InvalidSize { size: 0x1800, .. }))
        ));

        let cfg = SystemConfig {
            max_cpus: 65,
            ..SystemConfig::default()
        };
        assert_eq!(
            cfg.validate(),
            Err(ConfigError::CpuCount { got: 65, max: 64 })
        );

        let cfg = SystemConfig {
            txf: TxfConfig {
                spin_limit: 0,
                ..TxfConfig::default()
            },
            ..SystemConfig::default()
        };
        assert_eq!(
            cfg.validate(),
            Err(ConfigError::Txf(TxfConfigError::ZeroSpinLimit))
        );
    }
}
