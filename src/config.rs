//! Engine configuration

/// Limits applied to one engine state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VmConfig {
    /// Initial capacity of the value stack
    pub stack_capacity: usize,
    /// Maximum number of live stack slots
    pub max_stack: usize,
    /// Maximum nesting of native calls
    pub max_call_depth: usize,
}

impl VmConfig {
    /// Default stack capacity
    pub const DEFAULT_STACK_SIZE: usize = 1024;
    /// Default stack limit
    pub const DEFAULT_MAX_STACK: usize = 65536;
    /// Default max recursion
    pub const DEFAULT_MAX_CALL_DEPTH: usize = 200;

    /// Set the initial stack capacity
    pub fn stack_capacity(mut self, slots: usize) -> Self {
        self.stack_capacity = slots;
        self
    }

    /// Set the stack limit
    pub fn max_stack(mut self, slots: usize) -> Self {
        self.max_stack = slots;
        self
    }

    /// Set the call depth limit
    pub fn max_call_depth(mut self, depth: usize) -> Self {
        self.max_call_depth = depth;
        self
    }
}

impl Default for VmConfig {
    fn default() -> Self {
        VmConfig {
            stack_capacity: Self::DEFAULT_STACK_SIZE,
            max_stack: Self::DEFAULT_MAX_STACK,
            max_call_depth: Self::DEFAULT_MAX_CALL_DEPTH,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder() {
        let config = VmConfig::default().max_stack(64).max_call_depth(8);
        assert_eq!(config.max_stack, 64);
        assert_eq!(config.max_call_depth, 8);
        assert_eq!(config.stack_capacity, VmConfig::DEFAULT_STACK_SIZE);
    }
}
