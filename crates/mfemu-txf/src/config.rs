use thiserror::Error;

/// Tunables for the transactional conflict engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxfConfig {
    /// Cache lines a single transaction may touch before it aborts with an overflow.
    pub backout_capacity: usize,
    /// Upper bound on compare-and-exchange retries (and pending-abort waits) before the engine
    /// declares a logic error.
    pub spin_limit: u32,
}

impl Default for TxfConfig {
    fn default() -> Self {
        Self {
            backout_capacity: 128,
            spin_limit: 1 << 22,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TxfConfigError {
    #[error("backout capacity must be at least one cache line")]
    ZeroBackoutCapacity,
    #[error("spin limit must be non-zero")]
    ZeroSpinLimit,
}

impl TxfConfig {
    pub fn validate(&self) -> Result<(), TxfConfigError> {
        if self.backout_capacity == 0 {
            return Err(TxfConfigError::ZeroBackoutCapacity);
        }
        if self.spin_limit == 0 {
            return Err(TxfConfigError::ZeroSpinLimit);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_valid_and_zero_limits_are_rejected() {
        assert_eq!(TxfConfig::default().validate(), Ok(()));

        let cfg = TxfConfig {
            backout_capacity: 0,
            ..TxfConfig::default()
        };
        assert_eq!(cfg.validate(), Err(TxfConfigError::ZeroBackoutCapacity));

        let cfg = TxfConfig {
            spin_limit: 0,
            ..TxfConfig::default()
        };
        assert_eq!(cfg.validate(), Err(TxfConfigError::ZeroSpinLimit));
    }
}
