//! Scheduler pass configuration.

use bon::bon;
use twill_ir::Location;

/// Placement alignment used when `alignment` is left at zero.
const DEFAULT_ALIGNMENT: usize = 4;

/// Configuration for [`schedule_block`](crate::schedule_block).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleOptions {
    /// Target cache location; its unit may be overridden per refinement.
    pub mem_loc: Location,
    /// Cache size in KiB.
    pub mem_kib: u64,
    /// Placement alignment in bytes; zero selects the default of 4.
    pub alignment: usize,
    /// Location tag attached to every synthesized transfer block.
    pub xfer_loc: Location,
}

#[bon]
impl ScheduleOptions {
    /// Create a schedule configuration with builder pattern.
    #[builder]
    pub fn builder(
        mem_loc: Location,
        mem_kib: u64,
        #[builder(default = 0)] alignment: usize,
        xfer_loc: Location,
    ) -> Self {
        Self { mem_loc, mem_kib, alignment, xfer_loc }
    }

    /// Effective byte budget of the cache.
    pub fn mem_bytes(&self) -> usize {
        self.mem_kib as usize * 1024
    }

    /// Effective placement alignment in bytes.
    pub fn effective_alignment(&self) -> usize {
        if self.alignment == 0 { DEFAULT_ALIGNMENT } else { self.alignment }
    }
}
