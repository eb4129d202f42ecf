// Optimization Options
//
// Options select which passes run:
// - O0: graph is returned unchanged
// - O1: prune operators that cannot reach an output or requested gradient
// - O2: O1 + in-place aliasing
// - O3: O2 + memory planning (mirror stage when training, buffer pooling otherwise)

use std::env;
use std::fmt;

/// Environment variable overriding the optimization level
pub const OPT_LEVEL_ENV: &str = "TENSORPLAN_OPT_LEVEL";

/// Environment variable overriding the execution phase
pub const PHASE_ENV: &str = "TENSORPLAN_PHASE";

/// Optimization level
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum OptLevel {
    O0,
    O1,
    O2,
    O3,
}

impl OptLevel {
    pub fn from_u8(level: u8) -> Option<Self> {
        match level {
            0 => Some(OptLevel::O0),
            1 => Some(OptLevel::O1),
            2 => Some(OptLevel::O2),
            3 => Some(OptLevel::O3),
            _ => None,
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for OptLevel {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "O{}", self.as_u8())
    }
}

/// Phase the compiled graph will run in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    /// Gradients are computed; memory is planned by recomputation
    Train,
    /// Forward only; memory is planned by buffer pooling
    Test,
}

impl Phase {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "train" | "training" => Some(Phase::Train),
            "test" | "inference" | "eval" => Some(Phase::Test),
            _ => None,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Phase::Train => write!(f, "train"),
            Phase::Test => write!(f, "test"),
        }
    }
}

/// Options for a single optimization run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OptimizeOptions {
    /// Highest optimization level to apply
    pub level: OptLevel,
    /// Phase of the compiled graph
    pub phase: Phase,
}

impl OptimizeOptions {
    /// Create options with default settings (O3, test phase)
    pub fn new() -> Self {
        Self {
            level: OptLevel::O3,
            phase: Phase::Test,
        }
    }

    /// Create options with the given level
    pub fn with_level(level: OptLevel) -> Self {
        Self {
            level,
            ..Self::new()
        }
    }

    /// Create options for training at O3
    pub fn training() -> Self {
        Self {
            phase: Phase::Train,
            ..Self::new()
        }
    }

    /// Defaults overridden by `TENSORPLAN_OPT_LEVEL` and `TENSORPLAN_PHASE`;
    /// malformed values are ignored
    pub fn from_env() -> Self {
        let level = env::var(OPT_LEVEL_ENV).ok();
        let phase = env::var(PHASE_ENV).ok();
        Self::from_values(level.as_deref(), phase.as_deref())
    }

    fn from_values(level: Option<&str>, phase: Option<&str>) -> Self {
        let mut options = Self::new();
        if let Some(value) = level {
            match value.trim().parse::<u8>().ok().and_then(OptLevel::from_u8) {
                Some(level) => options.level = level,
                None => log::warn!("Ignoring invalid {}={:?}", OPT_LEVEL_ENV, value),
            }
        }
        if let Some(value) = phase {
            match Phase::parse(value) {
                Some(phase) => options.phase = phase,
                None => log::warn!("Ignoring invalid {}={:?}", PHASE_ENV, value),
            }
        }
        options
    }

    pub fn prunes(&self) -> bool {
        self.level >= OptLevel::O1
    }

    pub fn aliases_inplace(&self) -> bool {
        self.level >= OptLevel::O2
    }

    pub fn plans_recompute(&self) -> bool {
        self.level >= OptLevel::O3 && self.phase == Phase::Train
    }

    pub fn pools_buffers(&self) -> bool {
        self.level >= OptLevel::O3 && self.phase == Phase::Test
    }
}

impl Default for OptimizeOptions {
    fn default() -> Self {
        Self::new()
    }
}
