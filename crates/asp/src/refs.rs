//! Reference counting and iterative tear-down.
//!
//! Objects carry a use count; support entries are single-owner. Releasing
//! a compound object never recurses into the native stack: the object's
//! children are parked on the work stack and released one per loop
//! iteration, with the cycle-detection limit bounding the total work.

use crate::{
    engine::Engine,
    heap::{DataKind, EntryData, HeapId},
    result::{EngineResult, RunResult, engine_assert},
};

impl Engine {
    /// Claims a use of an object. Support entries are unaffected.
    pub(crate) fn ref_value(&mut self, id: HeapId) {
        let entry = self.heap.entry_mut(id);
        if entry.data.is_object() {
            entry.use_count += 1;
        }
    }

    /// Releases one use of `id`, freeing it (and everything it owns)
    /// when the count reaches zero.
    ///
    /// The `None` singleton is exempt: releasing it is a no-op.
    pub(crate) fn unref(&mut self, id: HeapId) -> EngineResult<()> {
        if id == HeapId::NONE {
            return Ok(());
        }

        let start_top = self.stack_top;
        let mut current = id;
        let mut iterations: u32 = 0;
        loop {
            iterations += 1;
            if iterations > self.cycle_detection_limit {
                return Err(RunResult::CycleDetected);
            }

            if current != HeapId::NONE {
                let is_object = self.heap.data(current).is_object();
                if is_object {
                    let entry = self.heap.entry_mut(current);
                    engine_assert(entry.use_count > 0)?;
                    entry.use_count -= 1;
                }
                if !is_object || self.heap.use_count(current) == 0 {
                    self.release_children(current, &mut iterations)?;
                    if self.heap.kind(current) != DataKind::Free {
                        self.heap.free(current)?;
                    }
                }
            }

            if self.stack_top == start_top {
                break;
            }

            // Fetch the next parked child: the auxiliary slot first, then
            // the entry's own value.
            if let Some(second) = self.top_value2()? {
                let top = self.stack_top.ok_or(RunResult::InternalError)?;
                self.set_entry_value2(top, None)?;
                current = second;
            } else {
                current = self.top()?;
                self.pop_no_erase()?;
            }
        }

        Ok(())
    }

    /// Releases a value known to own no other entries.
    fn unref_terminal(&mut self, id: HeapId) -> EngineResult<()> {
        if id == HeapId::NONE {
            return Ok(());
        }
        engine_assert(self.heap.kind(id).is_terminal())?;
        let is_object = self.heap.data(id).is_object();
        if is_object {
            let entry = self.heap.entry_mut(id);
            engine_assert(entry.use_count > 0)?;
            entry.use_count -= 1;
        }
        if !is_object || self.heap.use_count(id) == 0 {
            self.heap.free(id)?;
        }
        Ok(())
    }

    /// Parks a dying entry's children on the work stack (or releases the
    /// terminal ones directly) and detaches them from the entry.
    fn release_children(&mut self, id: HeapId, iterations: &mut u32) -> EngineResult<()> {
        match *self.heap.data(id) {
            EntryData::Range { start, end, step } => {
                for child in [start, end, step].into_iter().flatten() {
                    self.unref_terminal(child)?;
                }
            }

            EntryData::String(_)
            | EntryData::Tuple(_)
            | EntryData::List(_)
            | EntryData::ParameterList(_)
            | EntryData::ArgumentList(_) => {
                let kind = self.heap.kind(id);
                loop {
                    *iterations += 1;
                    if *iterations > self.cycle_detection_limit {
                        return Err(RunResult::CycleDetected);
                    }
                    let next = self.sequence_next(id, None, true)?;
                    let Some(element) = next.element else {
                        break;
                    };
                    let value = next.value.ok_or(RunResult::InternalError)?;
                    let erase_value = self.heap.kind(value).is_terminal();
                    self.sequence_erase_element(id, element, erase_value)?;
                    // Addresses stored in tuples and lists are not owned.
                    let push =
                        !erase_value && (!matches!(kind, DataKind::Tuple | DataKind::List) || self.heap.kind(value).is_object());
                    if push {
                        self.push_no_use(value)?;
                    }
                }
            }

            EntryData::Set(_) | EntryData::Dictionary(_) | EntryData::Namespace(_) => loop {
                *iterations += 1;
                if *iterations > self.cycle_detection_limit {
                    return Err(RunResult::CycleDetected);
                }
                let next = self.tree_next(id, None)?;
                let Some(node) = next.node else {
                    break;
                };
                let erase_key = next.key.is_some_and(|k| self.heap.kind(k).is_terminal());
                let erase_value = next
                    .value
                    .is_some_and(|v| self.heap.kind(v).is_terminal() && self.heap.kind(v).is_object());
                self.tree_erase_node(id, node, erase_key, erase_value)?;

                let pushed_key = match next.key {
                    Some(key) if !erase_key => {
                        self.push_no_use(key)?;
                        true
                    }
                    _ => false,
                };
                if let Some(value) = next.value {
                    if !erase_value && self.heap.kind(value).is_object() {
                        if pushed_key {
                            let top = self.stack_top.ok_or(RunResult::InternalError)?;
                            self.set_entry_value2(top, Some(value))?;
                        } else {
                            self.push_no_use(value)?;
                        }
                    }
                }
            },

            EntryData::Iterator {
                iterable,
                member,
                needs_cleanup,
                ..
            } => {
                self.push_no_use(iterable)?;
                if let Some(member) = member {
                    if needs_cleanup {
                        if self.heap.kind(member).is_terminal() {
                            self.unref_terminal(member)?;
                        } else {
                            self.push_no_use(member)?;
                        }
                    }
                }
            }

            EntryData::Function {
                module, parameters, ..
            } => {
                self.push_no_use(module)?;
                self.push_no_use(parameters)?;
            }

            EntryData::Module { namespace, .. } => {
                self.push_no_use(namespace)?;
            }

            EntryData::Frame { module, .. } => {
                self.push_no_use(module)?;
            }

            EntryData::KeyValuePair { key, value } => {
                for child in [key, value] {
                    if self.heap.kind(child).is_terminal() {
                        self.unref_terminal(child)?;
                    } else {
                        self.push_no_use(child)?;
                    }
                }
            }

            EntryData::Parameter { default, .. } => {
                if let Some(default) = default {
                    if self.heap.kind(default).is_terminal() {
                        self.unref_terminal(default)?;
                    } else {
                        self.push_no_use(default)?;
                    }
                }
            }

            EntryData::Argument { value, .. } => {
                if self.heap.kind(value).is_terminal() {
                    self.unref_terminal(value)?;
                } else {
                    self.push_no_use(value)?;
                }
            }

            // Terminal kinds and bare support records own nothing.
            _ => {}
        }
        Ok(())
    }

    /// Deep immutability check, iterative over the work stack.
    ///
    /// Scalars and other simple objects answer directly; tuples are
    /// walked because a tuple is only as immutable as its members.
    pub(crate) fn is_immutable_object(&mut self, id: HeapId) -> EngineResult<bool> {
        fn is_simple_immutable(kind: DataKind) -> bool {
            kind.is_object()
                && !matches!(
                    kind,
                    DataKind::Tuple | DataKind::List | DataKind::Set | DataKind::Dictionary | DataKind::Iterator
                )
        }

        if self.heap.kind(id) != DataKind::Tuple {
            return Ok(is_simple_immutable(self.heap.kind(id)));
        }

        let start_top = self.stack_top;
        let mut current = id;
        let mut immutable = true;
        let mut iterations: u32 = 0;
        'walk: loop {
            let mut cursor = None;
            loop {
                iterations += 1;
                if iterations > self.cycle_detection_limit {
                    return Err(RunResult::CycleDetected);
                }
                let next = self.sequence_next(current, cursor, true)?;
                let Some(element) = next.element else {
                    break;
                };
                cursor = Some(element);
                let value = next.value.ok_or(RunResult::InternalError)?;
                if self.heap.kind(value) == DataKind::Tuple {
                    self.push_no_use(value)?;
                } else if !is_simple_immutable(self.heap.kind(value)) {
                    immutable = false;
                    break 'walk;
                }
            }
            if self.stack_top == start_top {
                break;
            }
            current = self.top()?;
            self.pop_no_erase()?;
        }

        while self.stack_top != start_top {
            self.pop_no_erase()?;
        }
        Ok(immutable)
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        appspec::AppSpec,
        engine::Engine,
        heap::{EntryData, HeapId, Sequence, Tree},
    };

    fn engine() -> Engine {
        Engine::new(256, 8192, AppSpec::empty(0)).unwrap()
    }

    #[test]
    fn unref_none_singleton_is_a_no_op() {
        let mut engine = engine();
        let count = engine.heap.use_count(HeapId::NONE);
        engine.unref(HeapId::NONE).unwrap();
        assert_eq!(engine.heap.use_count(HeapId::NONE), count);
    }

    #[test]
    fn releasing_a_list_frees_elements_and_values() {
        let mut engine = engine();
        let free_before = engine.free_count();
        let list = engine.alloc(EntryData::List(Sequence::default())).unwrap();
        for i in 0..4 {
            let value = engine.alloc(EntryData::Integer(i)).unwrap();
            engine.sequence_append(list, value).unwrap();
            engine.unref(value).unwrap();
        }
        assert!(engine.free_count() < free_before);
        engine.unref(list).unwrap();
        assert_eq!(engine.free_count(), free_before, "nothing may leak");
    }

    #[test]
    fn releasing_nested_containers_is_complete() {
        let mut engine = engine();
        let free_before = engine.free_count();

        let outer = engine.alloc(EntryData::List(Sequence::default())).unwrap();
        let inner = engine.alloc(EntryData::List(Sequence::default())).unwrap();
        let value = engine.alloc(EntryData::Float(2.5)).unwrap();
        engine.sequence_append(inner, value).unwrap();
        engine.unref(value).unwrap();
        engine.sequence_append(outer, inner).unwrap();
        engine.unref(inner).unwrap();

        engine.unref(outer).unwrap();
        assert_eq!(engine.free_count(), free_before);
    }

    #[test]
    fn releasing_a_dictionary_frees_keys_and_values() {
        let mut engine = engine();
        let free_before = engine.free_count();

        let dict = engine.alloc(EntryData::Dictionary(Tree::default())).unwrap();
        for i in 0..3 {
            let key = engine.alloc(EntryData::Integer(i)).unwrap();
            let value = engine.alloc(EntryData::Integer(i * 10)).unwrap();
            engine.tree_insert(dict, key, Some(value)).unwrap();
            engine.unref(key).unwrap();
            engine.unref(value).unwrap();
        }
        engine.unref(dict).unwrap();
        assert_eq!(engine.free_count(), free_before);
    }

    #[test]
    fn shared_value_survives_container_release() {
        let mut engine = engine();
        let list = engine.alloc(EntryData::List(Sequence::default())).unwrap();
        let shared = engine.alloc(EntryData::Integer(99)).unwrap();
        engine.sequence_append(list, shared).unwrap();
        assert_eq!(engine.heap.use_count(shared), 2);
        engine.unref(list).unwrap();
        assert_eq!(engine.heap.use_count(shared), 1, "our use must survive");
        engine.unref(shared).unwrap();
    }

    #[test]
    fn tuples_of_scalars_are_immutable() {
        let mut engine = engine();
        let tuple = engine.alloc(EntryData::Tuple(Sequence::default())).unwrap();
        let a = engine.alloc(EntryData::Integer(1)).unwrap();
        engine.sequence_append(tuple, a).unwrap();
        engine.unref(a).unwrap();
        assert!(engine.is_immutable_object(tuple).unwrap());
        engine.unref(tuple).unwrap();
    }

    #[test]
    fn tuple_containing_a_list_is_mutable() {
        let mut engine = engine();
        let tuple = engine.alloc(EntryData::Tuple(Sequence::default())).unwrap();
        let inner = engine.alloc(EntryData::Tuple(Sequence::default())).unwrap();
        let list = engine.alloc(EntryData::List(Sequence::default())).unwrap();
        engine.sequence_append(inner, list).unwrap();
        engine.unref(list).unwrap();
        engine.sequence_append(tuple, inner).unwrap();
        engine.unref(inner).unwrap();
        assert!(!engine.is_immutable_object(tuple).unwrap());
        engine.unref(tuple).unwrap();
    }
}
