//! The iterator state machine: start, test, advance, dereference.
//!
//! An iterator captures its iterable by index and tracks a current
//! member. Range iterators own a freshly allocated integer that advances
//! in place (flagged for cleanup); string iterators track a fragment
//! element plus a byte offset inside it; sequence and tree iterators
//! track an element or node. A member of `None` means the iterator is at
//! its end.

use crate::{
    engine::Engine,
    heap::{DataKind, EntryData, Fragment, HeapId, Sequence},
    result::{EngineResult, RunResult},
};

impl Engine {
    /// Starts an iterator over the top of stack, replacing it in place.
    pub(crate) fn op_start_iterator(&mut self) -> EngineResult<()> {
        let iterable = self.top()?;
        if !self.heap.kind(iterable).is_object() {
            return Err(RunResult::UnexpectedType);
        }

        let mut needs_cleanup = false;
        let member = match self.heap.kind(iterable) {
            DataKind::Range => {
                let parts = self.get_range(iterable)?;
                if parts.is_at_end(parts.start) {
                    None
                } else {
                    let value = self.alloc(EntryData::Integer(parts.start))?;
                    needs_cleanup = true;
                    Some(value)
                }
            }
            DataKind::String | DataKind::Tuple | DataKind::List => self.sequence_next(iterable, None, true)?.element,
            DataKind::Set | DataKind::Dictionary => self.tree_next(iterable, None)?.node,
            _ => return Err(RunResult::UnexpectedType),
        };

        let iterator = self.heap.alloc(EntryData::Iterator {
            iterable,
            member,
            string_index: 0,
            needs_cleanup,
        })?;
        // The iterable's stack use transfers to the iterator.
        self.set_top_value(iterator)
    }

    /// Pushes a boolean telling whether the iterator still has a member.
    pub(crate) fn op_test_iterator(&mut self) -> EngineResult<()> {
        let iterator = self.top()?;
        let EntryData::Iterator { member, .. } = *self.heap.data(iterator) else {
            return Err(RunResult::UnexpectedType);
        };
        let result = self.alloc(EntryData::Boolean(member.is_some()))?;
        self.push(result)?;
        self.unref(result)
    }

    /// Advances the iterator on top of the stack.
    ///
    /// Advancing past the last member parks the iterator at its end;
    /// advancing an ended iterator is a no-op.
    pub(crate) fn op_next_iterator(&mut self) -> EngineResult<()> {
        let iterator = self.top()?;
        let EntryData::Iterator {
            iterable,
            member,
            string_index,
            ..
        } = *self.heap.data(iterator)
        else {
            return Err(RunResult::UnexpectedType);
        };
        let Some(member) = member else {
            return Ok(());
        };

        let new_member: Option<HeapId>;
        let mut new_needs_cleanup = None;
        match self.heap.kind(iterable) {
            DataKind::Range => {
                let EntryData::Integer(current) = *self.heap.data(member) else {
                    return Err(RunResult::UnexpectedType);
                };
                let parts = self.get_range(iterable)?;
                let next_value = current.wrapping_add(parts.step);
                if parts.is_at_end(next_value) {
                    self.unref(member)?;
                    new_needs_cleanup = Some(false);
                    new_member = None;
                } else {
                    let EntryData::Integer(slot) = self.heap.data_mut(member) else {
                        return Err(RunResult::InternalError);
                    };
                    *slot = next_value;
                    new_member = Some(member);
                }
            }

            DataKind::String => {
                let EntryData::Element { value, .. } = *self.heap.data(member) else {
                    return Err(RunResult::UnexpectedType);
                };
                let EntryData::StringFragment(fragment) = self.heap.data(value) else {
                    return Err(RunResult::UnexpectedType);
                };
                let size = fragment.len();
                if string_index + 1 < size {
                    let EntryData::Iterator { string_index, .. } = self.heap.data_mut(iterator) else {
                        return Err(RunResult::InternalError);
                    };
                    *string_index += 1;
                    return Ok(());
                }
                // Fragment exhausted: restart the offset and step to the
                // next fragment element.
                let EntryData::Iterator { string_index, .. } = self.heap.data_mut(iterator) else {
                    return Err(RunResult::InternalError);
                };
                *string_index = 0;
                new_member = self.sequence_next(iterable, Some(member), true)?.element;
            }

            DataKind::Tuple | DataKind::List => {
                if self.heap.kind(member) != DataKind::Element {
                    return Err(RunResult::UnexpectedType);
                }
                new_member = self.sequence_next(iterable, Some(member), true)?.element;
            }

            DataKind::Set | DataKind::Dictionary => {
                if !matches!(self.heap.kind(member), DataKind::SetNode | DataKind::DictionaryNode) {
                    return Err(RunResult::UnexpectedType);
                }
                new_member = self.tree_next(iterable, Some(member))?.node;
            }

            _ => return Err(RunResult::UnexpectedType),
        }

        let EntryData::Iterator {
            member, needs_cleanup, ..
        } = self.heap.data_mut(iterator)
        else {
            return Err(RunResult::InternalError);
        };
        *member = new_member;
        if let Some(flag) = new_needs_cleanup {
            *needs_cleanup = flag;
        }
        Ok(())
    }

    /// Pushes the value the iterator currently designates.
    ///
    /// Ranges expose their current integer; strings materialize a fresh
    /// one-byte string; sets yield the key; dictionaries yield a fresh
    /// (key, value) tuple.
    pub(crate) fn op_deref_iterator(&mut self) -> EngineResult<()> {
        let iterator = self.top()?;
        let EntryData::Iterator {
            iterable,
            member,
            string_index,
            ..
        } = *self.heap.data(iterator)
        else {
            return Err(RunResult::UnexpectedType);
        };
        let member = member.ok_or(RunResult::IteratorAtEnd)?;

        let (value, fresh) = match self.heap.kind(iterable) {
            DataKind::Range => {
                if self.heap.kind(member) != DataKind::Integer {
                    return Err(RunResult::UnexpectedType);
                }
                (member, false)
            }

            DataKind::String => {
                let EntryData::Element { value, .. } = *self.heap.data(member) else {
                    return Err(RunResult::UnexpectedType);
                };
                let EntryData::StringFragment(fragment) = self.heap.data(value) else {
                    return Err(RunResult::UnexpectedType);
                };
                let byte = fragment.as_slice()[usize::from(string_index)];
                let result = self.heap.alloc(EntryData::String(Sequence::default()))?;
                let fragment = self.heap.alloc(EntryData::StringFragment(Fragment::new(&[byte])))?;
                self.sequence_append(result, fragment)?;
                (result, true)
            }

            DataKind::Tuple | DataKind::List => {
                let EntryData::Element { value, .. } = *self.heap.data(member) else {
                    return Err(RunResult::UnexpectedType);
                };
                (value, false)
            }

            DataKind::Set => (self.node_key(member)?, false),

            DataKind::Dictionary => {
                let key = self.node_key(member)?;
                let value = self.node_value(member)?.ok_or(RunResult::InternalError)?;
                let tuple = self.heap.alloc(EntryData::Tuple(Sequence::default()))?;
                self.sequence_append(tuple, key)?;
                self.sequence_append(tuple, value)?;
                (tuple, true)
            }

            _ => return Err(RunResult::UnexpectedType),
        };

        self.push(value)?;
        if fresh {
            self.unref(value)?;
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

    fn range(engine: &mut Engine, start: i32, end: i32, step: i32) -> HeapId {
        let start = int(engine, start);
        let end = int(engine, end);
        let step = int(engine, step);
        engine
            .alloc(EntryData::Range {
                start: Some(start),
                end: Some(end),
                step: Some(step),
            })
            .unwrap()
    }

    /// Drives the iterator protocol over an iterable already on the
    /// stack, collecting each produced value id.
    fn drain(engine: &mut Engine) -> Vec<HeapId> {
        engine.op_start_iterator().unwrap();
        let mut values = Vec::new();
        loop {
            engine.op_test_iterator().unwrap();
            let flag = engine.top().unwrap();
            let EntryData::Boolean(more) = *engine.heap.data(flag) else {
                panic!("test must push a boolean");
            };
            engine.pop().unwrap();
            if !more {
                break;
            }
            engine.op_deref_iterator().unwrap();
            let value = engine.top().unwrap();
            engine.ref_value(value);
            values.push(value);
            engine.pop().unwrap();
            engine.op_next_iterator().unwrap();
        }
        engine.pop().unwrap();
        values
    }

    #[test]
    fn range_iteration_produces_stepped_values() {
        let mut engine = engine();
        let r = range(&mut engine, 0, 5, 2);
        engine.push(r).unwrap();
        engine.unref(r).unwrap();
        let values: Vec<i32> = drain(&mut engine)
            .into_iter()
            .map(|id| match engine.heap.data(id) {
                EntryData::Integer(v) => *v,
                other => panic!("unexpected {other:?}"),
            })
            .collect();
        assert_eq!(values, vec![0, 2, 4]);
    }

    #[test]
    fn negative_step_range_counts_down() {
        let mut engine = engine();
        let r = range(&mut engine, 5, 0, -2);
        engine.push(r).unwrap();
        engine.unref(r).unwrap();
        let values: Vec<i32> = drain(&mut engine)
            .into_iter()
            .map(|id| match engine.heap.data(id) {
                EntryData::Integer(v) => *v,
                other => panic!("unexpected {other:?}"),
            })
            .collect();
        assert_eq!(values, vec![5, 3, 1]);
    }

    #[test]
    fn empty_range_is_at_end_immediately() {
        let mut engine = engine();
        let r = range(&mut engine, 3, 3, 1);
        engine.push(r).unwrap();
        engine.unref(r).unwrap();
        assert!(drain(&mut engine).is_empty());
    }

    #[test]
    fn string_iteration_yields_single_byte_strings() {
        let mut engine = engine();
        let s = engine.alloc(EntryData::String(Sequence::default())).unwrap();
        engine.string_append_buffer(s, b"0123456789abcdef").unwrap();
        engine.push(s).unwrap();
        engine.unref(s).unwrap();
        let values = drain(&mut engine);
        assert_eq!(values.len(), 16, "one value per byte, across fragments");
        let bytes: Vec<u8> = values
            .iter()
            .map(|&id| engine.string_bytes(id).unwrap()[0])
            .collect();
        assert_eq!(bytes, b"0123456789abcdef");
        for id in values {
            engine.unref(id).unwrap();
        }
    }

    #[test]
    fn list_iteration_visits_elements_in_order() {
        let mut engine = engine();
        let list = engine.alloc(EntryData::List(Sequence::default())).unwrap();
        for v in [7, 8, 9] {
            let value = int(&mut engine, v);
            engine.sequence_append(list, value).unwrap();
            engine.unref(value).unwrap();
        }
        engine.push(list).unwrap();
        engine.unref(list).unwrap();
        let values: Vec<i32> = drain(&mut engine)
            .into_iter()
            .map(|id| match engine.heap.data(id) {
                EntryData::Integer(v) => *v,
                other => panic!("unexpected {other:?}"),
            })
            .collect();
        assert_eq!(values, vec![7, 8, 9]);
    }

    #[test]
    fn dictionary_iteration_yields_key_value_tuples() {
        let mut engine = engine();
        let dict = engine.alloc(EntryData::Dictionary(Tree::default())).unwrap();
        for (k, v) in [(2, 20), (1, 10)] {
            let key = int(&mut engine, k);
            let value = int(&mut engine, v);
            engine.tree_insert(dict, key, Some(value)).unwrap();
            engine.unref(key).unwrap();
            engine.unref(value).unwrap();
        }
        engine.push(dict).unwrap();
        engine.unref(dict).unwrap();
        let values = drain(&mut engine);
        assert_eq!(values.len(), 2);
        let mut pairs = Vec::new();
        for id in &values {
            let (_, k) = engine.sequence_index(*id, 0).unwrap();
            let (_, v) = engine.sequence_index(*id, 1).unwrap();
            let (EntryData::Integer(k), EntryData::Integer(v)) = (engine.heap.data(k), engine.heap.data(v)) else {
                panic!("non-integer pair");
            };
            pairs.push((*k, *v));
        }
        assert_eq!(pairs, vec![(1, 10), (2, 20)], "keys come out in key order");
        for id in values {
            engine.unref(id).unwrap();
        }
    }

    #[test]
    fn deref_at_end_is_an_error() {
        let mut engine = engine();
        let r = range(&mut engine, 0, 0, 1);
        engine.push(r).unwrap();
        engine.unref(r).unwrap();
        engine.op_start_iterator().unwrap();
        assert_eq!(engine.op_deref_iterator(), Err(RunResult::IteratorAtEnd));
    }

    #[test]
    fn iterator_release_cleans_owned_member() {
        let mut engine = engine();
        let free_before = engine.free_count();
        let r = range(&mut engine, 0, 10, 1);
        engine.push(r).unwrap();
        engine.unref(r).unwrap();
        engine.op_start_iterator().unwrap();
        engine.pop().unwrap();
        assert_eq!(engine.free_count(), free_before, "iterator, range, and member freed");
    }
}
