use coalesce_shared::{
    derive_more::Display,
    serde::{Deserialize, Serialize},
    serde_yaml,
};

use crate::Error;

/// Whether command buffers are submitted one by one or batched and merged on flush
#[derive(Debug, Display, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(crate = "coalesce_shared::serde")]
pub enum DispatchMode {
    ImmediateDispatch,
    #[default]
    BatchedDispatch,
}

/// Configuration of the [`BatchedFlusher`](crate::batched_flush::BatchedFlusher)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(crate = "coalesce_shared::serde", default)]
pub struct FlushConfig {
    pub dispatch_mode: DispatchMode,
    /// Size of the global memory of the device in bytes
    pub global_memory_size: u64,
    /// Share of the global memory that one merged submission may keep resident
    pub memory_budget_percent: u8,
    /// OS context whose inspection ids are used during aggregation
    pub os_context_id: u32,
}

impl Default for FlushConfig {
    fn default() -> Self {
        Self {
            dispatch_mode: DispatchMode::BatchedDispatch,
            global_memory_size: 4 * 1024 * 1024 * 1024,
            memory_budget_percent: 50,
            os_context_id: 0,
        }
    }
}

impl FlushConfig {
    /// Parses the configuration from YAML. Fields that are missing keep their default value.
    pub fn from_yaml_str(yaml: &str) -> crate::Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks that the values are in range
    pub fn validate(&self) -> crate::Result<()> {
        if self.memory_budget_percent > 100 {
            return Err(Error::InvalidConfig(format!(
                "memory_budget_percent must be at most 100 but is {}",
                self.memory_budget_percent
            )));
        }
        Ok(())
    }

    /// Memory budget in bytes for the merged part of one submission
    pub fn total_memory_budget(&self) -> usize {
        let budget = self.global_memory_size as u128 * self.memory_budget_percent as u128 / 100;
        usize::try_from(budget).unwrap_or(usize::MAX)
    }
}
