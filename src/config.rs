//! User-facing configuration.

use bitflags::bitflags;
use thiserror::Error;

/// Construction-time configuration problems reported to the embedder.
#[derive(Debug, Error)]
pub enum JitError {
    #[error("processor id {processor_id} is outside the monitor's {processors}-processor cluster")]
    ProcessorIdOutOfRange {
        processor_id: usize,
        processors: usize,
    },
    #[error("code cache of {requested} bytes cannot hold the prelude and an emission margin")]
    CodeCacheTooSmall { requested: usize },
}

/// The smallest usable code cache: the prelude plus one emission margin.
pub const MIN_CODE_CACHE_SIZE: usize = 2 * 1024 * 1024;

bitflags! {
    /// Individually toggleable optimizations.
    #[derive(Copy, Clone, PartialEq, Eq, Debug)]
    pub struct OptimizationFlag: u32 {
        const BLOCK_LINKING = 1 << 0;
        const RETURN_STACK_BUFFER = 1 << 1;
        const FAST_DISPATCH = 1 << 2;
        const GET_SET_ELIMINATION = 1 << 3;
        const CONST_PROP = 1 << 4;
        const MISC_IR_OPT = 1 << 5;
    }
}

impl OptimizationFlag {
    /// The subset that never changes observable behaviour for well-behaved
    /// guests; used unless `unsafe_optimizations` is set.
    pub fn all_safe() -> Self {
        OptimizationFlag::BLOCK_LINKING
            | OptimizationFlag::RETURN_STACK_BUFFER
            | OptimizationFlag::FAST_DISPATCH
            | OptimizationFlag::GET_SET_ELIMINATION
            | OptimizationFlag::CONST_PROP
            | OptimizationFlag::MISC_IR_OPT
    }
}

impl Default for OptimizationFlag {
    fn default() -> Self {
        Self::all_safe()
    }
}

/// Architecture-neutral pieces of the per-core configuration.
#[derive(Clone, Debug)]
pub struct BaseConfig {
    /// Size in bytes of the executable code cache.
    pub code_cache_size: usize,
    pub optimizations: OptimizationFlag,
    /// Allow optimizations outside the safe set.
    pub unsafe_optimizations: bool,
    /// Account guest cycles against `GetTicksRemaining`/`AddTicks`.
    pub enable_cycle_counting: bool,
    /// Identifies this core to the shared exclusive monitor.
    pub processor_id: usize,
    pub define_unpredictable_behaviour: bool,
    pub hook_hint_instructions: bool,
}

impl Default for BaseConfig {
    fn default() -> Self {
        Self {
            code_cache_size: 32 * 1024 * 1024,
            optimizations: OptimizationFlag::default(),
            unsafe_optimizations: false,
            enable_cycle_counting: true,
            processor_id: 0,
            define_unpredictable_behaviour: false,
            hook_hint_instructions: false,
        }
    }
}

impl BaseConfig {
    pub fn effective_optimizations(&self) -> OptimizationFlag {
        if self.unsafe_optimizations {
            self.optimizations
        } else {
            self.optimizations & OptimizationFlag::all_safe()
        }
    }

    pub fn has_optimization(&self, flag: OptimizationFlag) -> bool {
        self.effective_optimizations().contains(flag)
    }
}

/// Per-core A64 configuration.
#[derive(Clone, Debug)]
pub struct A64Config {
    pub base: BaseConfig,
    /// Reported CNTFRQ_EL0.
    pub cntfrq_el0: u32,
    /// Reported CTR_EL0.
    pub ctr_el0: u32,
    /// Reported DCZID_EL0.
    pub dczid_el0: u32,
    /// Read CNTPCT_EL0 from the wall-clock callback rather than the cycle
    /// counter.
    pub wall_clock_cntpct: bool,
}

impl Default for A64Config {
    fn default() -> Self {
        Self {
            base: BaseConfig::default(),
            cntfrq_el0: 600_000_000,
            ctr_el0: 0x8444_c004,
            dczid_el0: 4,
            wall_clock_cntpct: false,
        }
    }
}

/// Per-core A32 configuration.
#[derive(Clone, Debug)]
pub struct A32Config {
    pub base: BaseConfig,
    /// Architecture version (7 or 8) for decode gating.
    pub arch_version: u32,
}

impl Default for A32Config {
    fn default() -> Self {
        Self {
            base: BaseConfig::default(),
            arch_version: 8,
        }
    }
}
