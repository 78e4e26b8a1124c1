use crate::object::DEFAULT_GC_THRESHOLD;

/// Interpreter settings resolved from command-line flags and environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Value stack capacity in slots.
    pub stack_size: usize,
    /// Live objects before the first collection.
    pub gc_threshold: usize,
    /// Collect before every instruction.
    pub gc_stress: bool,
    pub color: bool,
    pub json: bool,
    pub trace: bool,
}

pub const DEFAULT_STACK_SIZE: usize = 4096;

impl Default for Config {
    fn default() -> Self {
        Config {
            stack_size: DEFAULT_STACK_SIZE,
            gc_threshold: DEFAULT_GC_THRESHOLD,
            gc_stress: false,
            color: true,
            json: false,
            trace: false,
        }
    }
}

impl Config {
    /// Applies `NO_COLOR` (any value disables color).
    pub fn with_env(mut self) -> Self {
        if std::env::var_os("NO_COLOR").is_some() {
            self.color = false;
        }
        self
    }
}
