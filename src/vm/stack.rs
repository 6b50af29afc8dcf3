//! Value stack for the engine
//!
//! Slots are addressed relative to the current call frame: positive
//! indices count from the frame base (1 = first argument), negative indices
//! count from the top (-1 = topmost slot).

use crate::value::{FunctionRef, Value};

/// The index `n` slots from the top (`-n`), saturating at `i32::MIN`
pub fn from_top(n: usize) -> i32 {
    i32::try_from(n).map_or(i32::MIN, |n| -n)
}

/// The index `n` slots from the base, saturating at `i32::MAX`
pub fn from_base(n: usize) -> i32 {
    i32::try_from(n).unwrap_or(i32::MAX)
}

/// Call frame bookkeeping
#[derive(Debug, Clone, Copy)]
pub struct Frame {
    /// Absolute index of the first argument
    pub base: usize,
    /// The closure being executed
    pub func: FunctionRef,
}

/// Value stack with call frames
pub struct Stack {
    /// Stack storage
    values: Vec<Value>,
    /// Active frames, innermost last
    frames: Vec<Frame>,
}

impl Stack {
    /// Create a new stack with the given capacity
    pub fn new(capacity: usize) -> Self {
        Stack {
            values: Vec::with_capacity(capacity),
            frames: Vec::with_capacity(16),
        }
    }

    /// Push a value onto the stack
    #[inline]
    pub fn push(&mut self, value: Value) {
        self.values.push(value);
    }

    /// Pop a value, never crossing the frame base
    #[inline]
    pub fn pop(&mut self) -> Option<Value> {
        if self.values.len() > self.base() {
            self.values.pop()
        } else {
            None
        }
    }

    /// Absolute index where the current frame starts
    #[inline]
    pub fn base(&self) -> usize {
        self.frames.last().map_or(0, |f| f.base)
    }

    /// Number of slots in the current frame
    #[inline]
    pub fn depth(&self) -> usize {
        self.values.len() - self.base()
    }

    /// Total number of slots across all frames
    #[inline]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Translate a frame-relative index into an absolute one
    pub fn absolute(&self, index: i32) -> Option<usize> {
        let depth = self.depth() as i64;
        let index = index as i64;
        let offset = if index > 0 && index <= depth {
            index - 1
        } else if index < 0 && -index <= depth {
            depth + index
        } else {
            return None;
        };
        Some(self.base() + offset as usize)
    }

    /// Get the value at a frame-relative index
    #[inline]
    pub fn get(&self, index: i32) -> Option<&Value> {
        self.absolute(index).map(|i| &self.values[i])
    }

    /// Overwrite the value at a frame-relative index
    pub fn set(&mut self, index: i32, value: Value) -> Option<()> {
        let abs = self.absolute(index)?;
        self.values[abs] = value;
        Some(())
    }

    /// Remove the value at a frame-relative index, shifting the rest down
    pub fn remove(&mut self, index: i32) -> Option<Value> {
        let abs = self.absolute(index)?;
        Some(self.values.remove(abs))
    }

    /// Drop n values from the current frame
    pub fn drop_n(&mut self, n: usize) {
        let new_len = self.values.len().saturating_sub(n).max(self.base());
        self.values.truncate(new_len);
    }

    /// Truncate to an absolute length
    pub fn truncate(&mut self, len: usize) {
        self.values.truncate(len);
    }

    /// Split off everything from an absolute index upward
    pub fn split_off(&mut self, at: usize) -> Vec<Value> {
        self.values.split_off(at)
    }

    /// All live slots, bottom first
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// Push a new frame whose first argument sits at `base`
    pub fn push_frame(&mut self, base: usize, func: FunctionRef) {
        self.frames.push(Frame { base, func });
    }

    /// Pop the innermost frame
    pub fn pop_frame(&mut self) -> Option<Frame> {
        self.frames.pop()
    }

    /// The innermost frame
    pub fn frame(&self) -> Option<&Frame> {
        self.frames.last()
    }

    /// Number of active frames
    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }
}
