//! Assignment to addresses: simple targets and tuple unpacking.
//!
//! An address is a sequence element, a dictionary node, a namespace node,
//! or a tuple of addresses. Tuple targets unpack element-wise; nested
//! target tuples are deferred onto the work stack rather than recursed
//! into, and shape mismatches fail before any slot is written at the
//! level being checked.

use crate::{
    engine::Engine,
    heap::{DataKind, EntryData, HeapId},
    result::{EngineResult, RunResult, engine_assert},
};

impl Engine {
    /// Stores `new_value` into a single address slot, releasing the slot's
    /// previous value and claiming a use of the new one.
    pub(crate) fn assign_simple(&mut self, address: HeapId, new_value: HeapId) -> EngineResult<()> {
        match *self.heap.data(address) {
            EntryData::Element { value: old, .. } => {
                self.unref(old)?;
                let EntryData::Element { value, .. } = self.heap.data_mut(address) else {
                    return Err(RunResult::InternalError);
                };
                *value = new_value;
            }
            EntryData::DictionaryNode { value: old, .. } | EntryData::NamespaceNode { value: old, .. } => {
                self.unref(old)?;
                self.set_node_value(address, new_value)?;
            }
            _ => return Err(RunResult::InternalError),
        }
        self.ref_value(new_value);
        Ok(())
    }

    /// Verifies that `value` is a tuple of the same arity as the target.
    pub(crate) fn check_sequence_match(&self, address: HeapId, value: HeapId) -> EngineResult<()> {
        engine_assert(self.heap.kind(address) == DataKind::Tuple)?;
        if self.heap.kind(value) != DataKind::Tuple {
            return Err(RunResult::UnexpectedType);
        }
        let address_count = self.heap.data(address).as_sequence().ok_or(RunResult::InternalError)?.count;
        let value_count = self.heap.data(value).as_sequence().ok_or(RunResult::InternalError)?.count;
        if address_count != value_count {
            return Err(RunResult::SequenceMismatch);
        }
        Ok(())
    }

    /// Unpacks `value` into a tuple of addresses.
    ///
    /// Consumes one use of `address` (the caller's); the top-level value
    /// is left untouched so the assigning instruction can decide whether
    /// it stays on the stack.
    pub(crate) fn assign_tuple(&mut self, address: HeapId, value: HeapId) -> EngineResult<()> {
        self.check_sequence_match(address, value)?;

        let start_top = self.stack_top;
        let (mut address, mut value) = (address, value);
        let mut release_value = false;
        let mut iterations: u32 = 0;
        loop {
            let mut value_cursor = None;
            let mut target_cursor = self.sequence_next(address, None, true)?;
            while let (Some(target_element), Some(target)) = (target_cursor.element, target_cursor.value) {
                iterations += 1;
                if iterations > self.cycle_detection_limit {
                    return Err(RunResult::CycleDetected);
                }
                let source = self.sequence_next(value, value_cursor, true)?;
                value_cursor = source.element;
                let source_value = source.value.ok_or(RunResult::InternalError)?;

                if self.heap.kind(target) == DataKind::Tuple {
                    self.check_sequence_match(target, source_value)?;
                    self.push(source_value)?;
                    self.push(target)?;
                } else {
                    self.assign_simple(target, source_value)?;
                }
                target_cursor = self.sequence_next(address, Some(target_element), true)?;
            }

            self.unref(address)?;
            if release_value {
                self.unref(value)?;
            }

            if self.stack_top == start_top {
                break;
            }
            address = self.top()?;
            self.ref_value(address);
            self.pop()?;
            value = self.top()?;
            self.ref_value(value);
            self.pop()?;
            release_value = true;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        appspec::AppSpec,
        engine::Engine,
        heap::{EntryData, HeapId, Sequence, Tree},
        result::RunResult,
    };

    fn engine() -> Engine {
        Engine::new(256, 32768, AppSpec::empty(0)).unwrap()
    }

    fn int(engine: &mut Engine, v: i32) -> HeapId {
        engine.alloc(EntryData::Integer(v)).unwrap()
    }

    fn int_tuple(engine: &mut Engine, values: &[i32]) -> HeapId {
        let t = engine.alloc(EntryData::Tuple(Sequence::default())).unwrap();
        for &v in values {
            let value = int(engine, v);
            engine.sequence_append(t, value).unwrap();
            engine.unref(value).unwrap();
        }
        t
    }

    #[test]
    fn simple_assignment_swaps_the_namespace_value() {
        let mut engine = engine();
        let ns = engine.alloc(EntryData::Namespace(Tree::default())).unwrap();
        let first = int(&mut engine, 1);
        let node = engine.tree_try_insert_by_symbol(ns, 7, first).unwrap().node;
        engine.unref(first).unwrap();

        let second = int(&mut engine, 2);
        engine.assign_simple(node, second).unwrap();
        let (_, value) = engine.find_symbol(ns, 7).unwrap().unwrap();
        assert_eq!(engine.heap.data(value), &EntryData::Integer(2));
        assert_eq!(engine.heap.use_count(second), 2);
        engine.unref(second).unwrap();
        engine.unref(ns).unwrap();
    }

    #[test]
    fn tuple_unpacking_assigns_each_target() {
        let mut engine = engine();
        let ns = engine.alloc(EntryData::Namespace(Tree::default())).unwrap();
        let zero = int(&mut engine, 0);
        let node_a = engine.tree_try_insert_by_symbol(ns, 1, zero).unwrap().node;
        let node_b = engine.tree_try_insert_by_symbol(ns, 2, zero).unwrap().node;
        engine.unref(zero).unwrap();

        // Target tuple of addresses, with an extra use standing in for
        // the assigning instruction's claim.
        let targets = engine.alloc(EntryData::Tuple(Sequence::default())).unwrap();
        engine.sequence_append(targets, node_a).unwrap();
        engine.sequence_append(targets, node_b).unwrap();

        let values = int_tuple(&mut engine, &[10, 20]);
        engine.ref_value(targets);
        engine.assign_tuple(targets, values).unwrap();

        let (_, a) = engine.find_symbol(ns, 1).unwrap().unwrap();
        let (_, b) = engine.find_symbol(ns, 2).unwrap().unwrap();
        assert_eq!(engine.heap.data(a), &EntryData::Integer(10));
        assert_eq!(engine.heap.data(b), &EntryData::Integer(20));
        assert_eq!(engine.stack_count, 0);
        engine.unref(values).unwrap();
        engine.unref(ns).unwrap();
    }

    #[test]
    fn arity_mismatch_is_a_sequence_mismatch() {
        let mut engine = engine();
        let ns = engine.alloc(EntryData::Namespace(Tree::default())).unwrap();
        let zero = int(&mut engine, 0);
        let node = engine.tree_try_insert_by_symbol(ns, 1, zero).unwrap().node;
        engine.unref(zero).unwrap();

        let targets = engine.alloc(EntryData::Tuple(Sequence::default())).unwrap();
        engine.sequence_append(targets, node).unwrap();
        let values = int_tuple(&mut engine, &[1, 2]);
        assert_eq!(engine.assign_tuple(targets, values), Err(RunResult::SequenceMismatch));
        engine.unref(targets).unwrap();
        engine.unref(values).unwrap();
        engine.unref(ns).unwrap();
    }

    #[test]
    fn non_tuple_source_is_an_unexpected_type() {
        let mut engine = engine();
        let targets = engine.alloc(EntryData::Tuple(Sequence::default())).unwrap();
        let value = int(&mut engine, 3);
        assert_eq!(engine.check_sequence_match(targets, value), Err(RunResult::UnexpectedType));
        engine.unref(targets).unwrap();
        engine.unref(value).unwrap();
    }
}
