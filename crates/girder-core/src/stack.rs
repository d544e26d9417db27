//! Blocks and ordered block stacks.
//!
//! A [`Stack`] stores blocks bottom-to-top. Split and merge operations
//! preserve order and transfer ownership wholesale: a block removed
//! from one stack is moved, never copied, so a block exists in exactly
//! one container at any instant.

use crate::error::StackError;
use crate::id::BlockId;

/// A unit load (steel slab, coil, container) with a stable identity.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Block {
    /// Stable identifier; unique across the run.
    pub id: BlockId,
}

impl Block {
    /// Construct a block with the given id.
    pub fn new(id: BlockId) -> Self {
        Self { id }
    }
}

/// An ordered sequence of blocks, bottom-to-top.
///
/// The stack itself is unbounded; height limits are enforced by the
/// owning [`Location`](crate::model::Location) or crane capacity at the
/// point of transfer.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Stack {
    bottom_to_top: Vec<Block>,
}

impl Stack {
    /// An empty stack.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a stack from blocks listed bottom-to-top.
    pub fn from_blocks(bottom_to_top: Vec<Block>) -> Self {
        Self { bottom_to_top }
    }

    /// Number of blocks in the stack.
    pub fn size(&self) -> usize {
        self.bottom_to_top.len()
    }

    /// True when the stack holds no blocks.
    pub fn is_empty(&self) -> bool {
        self.bottom_to_top.is_empty()
    }

    /// The topmost block, if any.
    pub fn topmost(&self) -> Option<Block> {
        self.bottom_to_top.last().copied()
    }

    /// Blocks in bottom-to-top order.
    pub fn bottom_to_top(&self) -> impl Iterator<Item = Block> + '_ {
        self.bottom_to_top.iter().copied()
    }

    /// Blocks in top-to-bottom order.
    pub fn top_to_bottom(&self) -> impl Iterator<Item = Block> + '_ {
        self.bottom_to_top.iter().rev().copied()
    }

    /// Place a single block on top.
    pub fn add_on_top(&mut self, block: Block) {
        self.bottom_to_top.push(block);
    }

    /// Place an entire stack on top, preserving its internal order.
    pub fn add_stack_on_top(&mut self, stack: Stack) {
        self.bottom_to_top.extend(stack.bottom_to_top);
    }

    /// Slide a single block underneath the current bottom.
    pub fn add_to_bottom(&mut self, block: Block) {
        self.bottom_to_top.insert(0, block);
    }

    /// Slide an entire stack underneath, preserving its internal order.
    ///
    /// Used when a crane picks up: the grabbed pile goes below any load
    /// the crane already carries.
    pub fn add_stack_to_bottom(&mut self, stack: Stack) {
        let mut merged = stack.bottom_to_top;
        merged.append(&mut self.bottom_to_top);
        self.bottom_to_top = merged;
    }

    /// Remove the topmost block.
    pub fn remove_from_top(&mut self) -> Result<Block, StackError> {
        self.bottom_to_top.pop().ok_or(StackError::Insufficient {
            requested: 1,
            available: 0,
        })
    }

    /// Split off the top `amount` blocks as a new stack, preserving
    /// their bottom-to-top order.
    pub fn remove_n_from_top(&mut self, amount: usize) -> Result<Stack, StackError> {
        if self.size() < amount {
            return Err(StackError::Insufficient {
                requested: amount,
                available: self.size(),
            });
        }
        let split = self.bottom_to_top.split_off(self.size() - amount);
        Ok(Stack {
            bottom_to_top: split,
        })
    }

    /// Remove the bottommost block.
    pub fn remove_from_bottom(&mut self) -> Result<Block, StackError> {
        if self.bottom_to_top.is_empty() {
            return Err(StackError::Insufficient {
                requested: 1,
                available: 0,
            });
        }
        Ok(self.bottom_to_top.remove(0))
    }

    /// Split off the bottom `amount` blocks as a new stack.
    pub fn remove_n_from_bottom(&mut self, amount: usize) -> Result<Stack, StackError> {
        if self.size() < amount {
            return Err(StackError::Insufficient {
                requested: amount,
                available: self.size(),
            });
        }
        let rest = self.bottom_to_top.split_off(amount);
        let split = std::mem::replace(&mut self.bottom_to_top, rest);
        Ok(Stack {
            bottom_to_top: split,
        })
    }

    /// Remove and return all blocks, leaving the stack empty.
    pub fn take_all(&mut self) -> Stack {
        Stack {
            bottom_to_top: std::mem::take(&mut self.bottom_to_top),
        }
    }

    /// True when the stack contains the given block.
    pub fn contains(&self, id: BlockId) -> bool {
        self.bottom_to_top.iter().any(|b| b.id == id)
    }

    /// Zero-based position of the block from the bottom, if present.
    pub fn position_of(&self, id: BlockId) -> Option<usize> {
        self.bottom_to_top.iter().position(|b| b.id == id)
    }
}
