//! The work stack: a linked chain of stack entries over the data heap.
//!
//! The stack carries operands between instructions, and doubles as the
//! explicit recursion stack for tear-down, comparison, the immutability
//! check, and unpacking assignment. A stack entry holds one value and an
//! optional second value slot so paired traversals can ride one entry.

use crate::{
    engine::Engine,
    heap::{DataKind, EntryData, HeapId},
    result::{EngineResult, RunResult, engine_assert},
};

impl Engine {
    /// Pushes `value`, bumping its use count.
    pub(crate) fn push(&mut self, value: HeapId) -> EngineResult<HeapId> {
        self.push_entry(value, true)
    }

    /// Pushes `value` without claiming a use; the caller guarantees the
    /// value stays alive while it is on the stack.
    pub(crate) fn push_no_use(&mut self, value: HeapId) -> EngineResult<HeapId> {
        self.push_entry(value, false)
    }

    fn push_entry(&mut self, value: HeapId, use_value: bool) -> EngineResult<HeapId> {
        engine_assert(self.heap.kind(value) != DataKind::Free)?;
        let entry = self.heap.alloc(EntryData::StackEntry {
            previous: self.stack_top,
            value,
            value2: None,
            flag: false,
        })?;
        if use_value {
            self.ref_value(value);
        }
        self.stack_top = Some(entry);
        self.stack_count += 1;
        Ok(entry)
    }

    /// The value on top of the stack.
    pub(crate) fn top(&self) -> EngineResult<HeapId> {
        let top = self.stack_top.ok_or(RunResult::StackUnderflow)?;
        let EntryData::StackEntry { value, .. } = self.heap.data(top) else {
            return Err(RunResult::InternalError);
        };
        engine_assert(self.heap.kind(*value) != DataKind::Free)?;
        Ok(*value)
    }

    /// The auxiliary value of the top entry, if set.
    pub(crate) fn top_value2(&self) -> EngineResult<Option<HeapId>> {
        let Some(top) = self.stack_top else {
            return Ok(None);
        };
        let EntryData::StackEntry { value2, .. } = self.heap.data(top) else {
            return Err(RunResult::InternalError);
        };
        Ok(*value2)
    }

    /// Replaces the top entry's value in place, transferring the old
    /// value's stack ownership to whatever now records it.
    pub(crate) fn set_top_value(&mut self, value: HeapId) -> EngineResult<()> {
        let top = self.stack_top.ok_or(RunResult::StackUnderflow)?;
        let EntryData::StackEntry { value: slot, .. } = self.heap.data_mut(top) else {
            return Err(RunResult::InternalError);
        };
        *slot = value;
        Ok(())
    }

    /// Sets or clears the auxiliary value of a specific stack entry.
    pub(crate) fn set_entry_value2(&mut self, entry: HeapId, value: Option<HeapId>) -> EngineResult<()> {
        let EntryData::StackEntry { value2, .. } = self.heap.data_mut(entry) else {
            return Err(RunResult::InternalError);
        };
        *value2 = value;
        Ok(())
    }

    /// Pops the top entry, releasing the popped value's use.
    pub(crate) fn pop(&mut self) -> EngineResult<()> {
        self.pop_entry(true)
    }

    /// Pops the top entry without releasing the popped value.
    pub(crate) fn pop_no_erase(&mut self) -> EngineResult<()> {
        self.pop_entry(false)
    }

    fn pop_entry(&mut self, erase_value: bool) -> EngineResult<()> {
        let top = self.stack_top.ok_or(RunResult::StackUnderflow)?;
        let EntryData::StackEntry { previous, value, .. } = *self.heap.data(top) else {
            return Err(RunResult::InternalError);
        };
        if erase_value && self.heap.kind(value).is_object() {
            self.unref(value)?;
        }
        self.heap.free(top)?;
        self.stack_top = previous;
        self.stack_count -= 1;
        Ok(())
    }
}
