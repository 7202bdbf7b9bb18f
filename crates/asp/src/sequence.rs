//! Sequences: doubly linked element chains over the data heap.
//!
//! Strings, tuples, lists, parameter lists, and argument lists all share
//! this shape. The container entry holds head, tail, and a count; for
//! strings the count is the byte length, so inserting or removing a
//! fragment adjusts it by the fragment's size rather than by one.

use crate::{
    engine::Engine,
    heap::{DataKind, EntryData, Fragment, HeapId, FRAGMENT_CAPACITY},
    result::{EngineResult, RunResult, engine_assert},
};

/// Cursor step result: the next element and its value.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct SequenceNext {
    pub element: Option<HeapId>,
    pub value: Option<HeapId>,
}

fn is_sequence_kind(kind: DataKind) -> bool {
    matches!(
        kind,
        DataKind::String | DataKind::Tuple | DataKind::List | DataKind::ParameterList | DataKind::ArgumentList
    )
}

impl Engine {
    /// Size contribution of `value` to `sequence`'s count.
    fn sequence_size_of(&self, sequence: HeapId, value: HeapId) -> EngineResult<u32> {
        if self.heap.kind(sequence) == DataKind::String {
            match self.heap.data(value) {
                EntryData::StringFragment(fragment) => Ok(u32::from(fragment.len())),
                _ => Err(RunResult::InternalError),
            }
        } else {
            Ok(1)
        }
    }

    /// Appends `value` at the tail, claiming a use of it.
    pub(crate) fn sequence_append(&mut self, sequence: HeapId, value: HeapId) -> EngineResult<HeapId> {
        engine_assert(is_sequence_kind(self.heap.kind(sequence)))?;

        let tail = self.heap.data(sequence).as_sequence().ok_or(RunResult::InternalError)?.tail;
        let element = self.heap.alloc(EntryData::Element {
            previous: tail,
            next: None,
            value,
        })?;
        self.ref_value(value);

        let size = self.sequence_size_of(sequence, value)?;
        if let Some(tail) = tail {
            let EntryData::Element { next, .. } = self.heap.data_mut(tail) else {
                return Err(RunResult::InternalError);
            };
            *next = Some(element);
            let header = self.heap.data_mut(sequence).as_sequence_mut().ok_or(RunResult::InternalError)?;
            header.tail = Some(element);
            header.count += size;
        } else {
            let header = self.heap.data_mut(sequence).as_sequence_mut().ok_or(RunResult::InternalError)?;
            header.head = Some(element);
            header.tail = Some(element);
            header.count += size;
        }
        Ok(element)
    }

    /// Inserts `value` before the element at `index`.
    ///
    /// An index of -1 or the count appends. Negative indices address from
    /// the end.
    pub(crate) fn sequence_insert_by_index(
        &mut self,
        sequence: HeapId,
        index: i32,
        value: HeapId,
    ) -> EngineResult<HeapId> {
        let count = self.heap.data(sequence).as_sequence().ok_or(RunResult::InternalError)?.count;
        if index == -1 || index == count as i32 {
            return self.sequence_append(sequence, value);
        }
        let index = if index < 0 { index + 1 } else { index };
        let (element, _) = self.sequence_index(sequence, index)?;
        self.sequence_insert_before(sequence, Some(element), value)
    }

    /// Inserts `value` before `element` (append when `element` is None).
    pub(crate) fn sequence_insert_before(
        &mut self,
        sequence: HeapId,
        element: Option<HeapId>,
        value: HeapId,
    ) -> EngineResult<HeapId> {
        engine_assert(is_sequence_kind(self.heap.kind(sequence)))?;
        let Some(next_element) = element else {
            return self.sequence_append(sequence, value);
        };
        engine_assert(self.heap.kind(next_element) == DataKind::Element)?;

        let EntryData::Element { previous, .. } = *self.heap.data(next_element) else {
            return Err(RunResult::InternalError);
        };
        let new_element = self.heap.alloc(EntryData::Element {
            previous,
            next: Some(next_element),
            value,
        })?;
        self.ref_value(value);

        if let Some(previous) = previous {
            let EntryData::Element { next, .. } = self.heap.data_mut(previous) else {
                return Err(RunResult::InternalError);
            };
            *next = Some(new_element);
        } else {
            let header = self.heap.data_mut(sequence).as_sequence_mut().ok_or(RunResult::InternalError)?;
            header.head = Some(new_element);
        }
        let EntryData::Element { previous, .. } = self.heap.data_mut(next_element) else {
            return Err(RunResult::InternalError);
        };
        *previous = Some(new_element);

        let size = self.sequence_size_of(sequence, value)?;
        let header = self.heap.data_mut(sequence).as_sequence_mut().ok_or(RunResult::InternalError)?;
        header.count += size;
        Ok(new_element)
    }

    /// Erases the element at `index`; see [`Engine::sequence_erase_element`].
    pub(crate) fn sequence_erase(&mut self, sequence: HeapId, index: i32, erase_value: bool) -> EngineResult<()> {
        let (element, _) = self.sequence_index(sequence, index)?;
        self.sequence_erase_element(sequence, element, erase_value)
    }

    /// Unlinks `element`, releasing its value when `erase_value` is set.
    pub(crate) fn sequence_erase_element(
        &mut self,
        sequence: HeapId,
        element: HeapId,
        erase_value: bool,
    ) -> EngineResult<()> {
        engine_assert(is_sequence_kind(self.heap.kind(sequence)))?;
        let EntryData::Element { previous, next, value } = *self.heap.data(element) else {
            return Err(RunResult::InternalError);
        };

        if let Some(previous) = previous {
            let EntryData::Element { next: slot, .. } = self.heap.data_mut(previous) else {
                return Err(RunResult::InternalError);
            };
            *slot = next;
        } else {
            self.heap.data_mut(sequence).as_sequence_mut().ok_or(RunResult::InternalError)?.head = next;
        }
        if let Some(next) = next {
            let EntryData::Element { previous: slot, .. } = self.heap.data_mut(next) else {
                return Err(RunResult::InternalError);
            };
            *slot = previous;
        } else {
            self.heap.data_mut(sequence).as_sequence_mut().ok_or(RunResult::InternalError)?.tail = previous;
        }

        let size = self.sequence_size_of(sequence, value)?;
        let is_string = self.heap.kind(sequence) == DataKind::String;
        if erase_value && (is_string || self.heap.kind(value).is_object()) {
            self.unref(value)?;
        }
        self.heap.free(element)?;

        let header = self.heap.data_mut(sequence).as_sequence_mut().ok_or(RunResult::InternalError)?;
        header.count -= size;
        Ok(())
    }

    /// Finds the element at `index`; negative indices address from the
    /// end. The tail is reached in one hop; interior elements by a
    /// bounded head-first walk.
    pub(crate) fn sequence_index(&self, sequence: HeapId, index: i32) -> EngineResult<(HeapId, HeapId)> {
        let kind = self.heap.kind(sequence);
        engine_assert(is_sequence_kind(kind) && kind != DataKind::String)?;
        let header = *self.heap.data(sequence).as_sequence().ok_or(RunResult::InternalError)?;
        let count = header.count as i32;

        let index = if index < 0 { index + count } else { index };
        if index < 0 || index >= count {
            return Err(RunResult::ValueOutOfRange);
        }

        if index == count - 1 {
            let element = header.tail.ok_or(RunResult::InternalError)?;
            let EntryData::Element { value, .. } = *self.heap.data(element) else {
                return Err(RunResult::InternalError);
            };
            return Ok((element, value));
        }

        let mut cursor = self.sequence_next(sequence, None, true)?;
        let mut iterations: u32 = 0;
        for _ in 0..index {
            iterations += 1;
            if iterations > self.cycle_detection_limit {
                return Err(RunResult::CycleDetected);
            }
            let element = cursor.element.ok_or(RunResult::InternalError)?;
            cursor = self.sequence_next(sequence, Some(element), true)?;
        }
        let element = cursor.element.ok_or(RunResult::InternalError)?;
        let value = cursor.value.ok_or(RunResult::InternalError)?;
        Ok((element, value))
    }

    /// Steps a cursor: from the head/tail when `element` is None, else to
    /// the neighbor in the requested direction.
    pub(crate) fn sequence_next(
        &self,
        sequence: HeapId,
        element: Option<HeapId>,
        forward: bool,
    ) -> EngineResult<SequenceNext> {
        engine_assert(is_sequence_kind(self.heap.kind(sequence)))?;
        let header = self.heap.data(sequence).as_sequence().ok_or(RunResult::InternalError)?;
        let next = match element {
            None => {
                if forward {
                    header.head
                } else {
                    header.tail
                }
            }
            Some(element) => {
                let EntryData::Element { previous, next, .. } = *self.heap.data(element) else {
                    return Err(RunResult::InternalError);
                };
                if forward {
                    next
                } else {
                    previous
                }
            }
        };
        let value = match next {
            Some(element) => {
                let EntryData::Element { value, .. } = *self.heap.data(element) else {
                    return Err(RunResult::InternalError);
                };
                Some(value)
            }
            None => None,
        };
        Ok(SequenceNext { element: next, value })
    }

    /// Appends raw bytes to a string, topping up the tail fragment before
    /// allocating fresh ones. The string's count tracks total bytes.
    pub(crate) fn string_append_buffer(&mut self, string: HeapId, mut buffer: &[u8]) -> EngineResult<()> {
        engine_assert(self.heap.kind(string) == DataKind::String)?;

        // Top up the tail fragment when it has room.
        let tail_fragment = {
            let header = self.heap.data(string).as_sequence().ok_or(RunResult::InternalError)?;
            match header.tail {
                Some(tail) => {
                    let EntryData::Element { value, .. } = *self.heap.data(tail) else {
                        return Err(RunResult::InternalError);
                    };
                    Some(value)
                }
                None => None,
            }
        };
        if let Some(fragment_id) = tail_fragment {
            let EntryData::StringFragment(fragment) = self.heap.data_mut(fragment_id) else {
                return Err(RunResult::InternalError);
            };
            let take = fragment.room().min(buffer.len());
            if take > 0 {
                fragment.push(&buffer[..take]);
                buffer = &buffer[take..];
                let header = self.heap.data_mut(string).as_sequence_mut().ok_or(RunResult::InternalError)?;
                header.count += take as u32;
            }
        }

        while !buffer.is_empty() {
            let take = buffer.len().min(FRAGMENT_CAPACITY);
            let fragment = self
                .heap
                .alloc(EntryData::StringFragment(Fragment::new(&buffer[..take])))?;
            self.sequence_append(string, fragment)?;
            buffer = &buffer[take..];
        }
        Ok(())
    }

    /// Byte at `index` of a string; negative indices address from the end.
    pub(crate) fn string_element(&self, string: HeapId, index: i32) -> EngineResult<u8> {
        engine_assert(self.heap.kind(string) == DataKind::String)?;
        let count = self.heap.data(string).as_sequence().ok_or(RunResult::InternalError)?.count as i32;
        let index = if index < 0 { index + count } else { index };
        if index < 0 || index >= count {
            return Err(RunResult::ValueOutOfRange);
        }

        let mut remaining = index as u32;
        let mut cursor = self.sequence_next(string, None, true)?;
        let mut iterations: u32 = 0;
        while let (Some(element), Some(value)) = (cursor.element, cursor.value) {
            iterations += 1;
            if iterations > self.cycle_detection_limit {
                return Err(RunResult::CycleDetected);
            }
            let EntryData::StringFragment(fragment) = self.heap.data(value) else {
                return Err(RunResult::InternalError);
            };
            let len = u32::from(fragment.len());
            if remaining < len {
                return Ok(fragment.as_slice()[remaining as usize]);
            }
            remaining -= len;
            cursor = self.sequence_next(string, Some(element), true)?;
        }
        Err(RunResult::InternalError)
    }

    /// Copies a string's bytes out of its fragments.
    pub(crate) fn string_bytes(&self, string: HeapId) -> EngineResult<Vec<u8>> {
        engine_assert(self.heap.kind(string) == DataKind::String)?;
        let count = self.heap.data(string).as_sequence().ok_or(RunResult::InternalError)?.count;
        let mut bytes = Vec::with_capacity(count as usize);
        let mut cursor = self.sequence_next(string, None, true)?;
        let mut iterations: u32 = 0;
        while let (Some(element), Some(value)) = (cursor.element, cursor.value) {
            iterations += 1;
            if iterations > self.cycle_detection_limit {
                return Err(RunResult::CycleDetected);
            }
            let EntryData::StringFragment(fragment) = self.heap.data(value) else {
                return Err(RunResult::InternalError);
            };
            bytes.extend_from_slice(fragment.as_slice());
            cursor = self.sequence_next(string, Some(element), true)?;
        }
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        appspec::AppSpec,
        engine::Engine,
        heap::{EntryData, Sequence},
        result::RunResult,
    };

    fn engine() -> Engine {
        Engine::new(256, 16384, AppSpec::empty(0)).unwrap()
    }

    fn list_of(engine: &mut Engine, values: &[i32]) -> crate::heap::HeapId {
        let list = engine.alloc(EntryData::List(Sequence::default())).unwrap();
        for &v in values {
            let value = engine.alloc(EntryData::Integer(v)).unwrap();
            engine.sequence_append(list, value).unwrap();
            engine.unref(value).unwrap();
        }
        list
    }

    fn values_of(engine: &Engine, list: crate::heap::HeapId) -> Vec<i32> {
        let mut out = Vec::new();
        let mut cursor = engine.sequence_next(list, None, true).unwrap();
        while let (Some(element), Some(value)) = (cursor.element, cursor.value) {
            let EntryData::Integer(v) = engine.heap.data(value) else {
                panic!("non-integer element");
            };
            out.push(*v);
            cursor = engine.sequence_next(list, Some(element), true).unwrap();
        }
        out
    }

    #[test]
    fn append_links_head_and_tail() {
        let mut engine = engine();
        let list = list_of(&mut engine, &[1, 2, 3]);
        assert_eq!(values_of(&engine, list), vec![1, 2, 3]);
        engine.unref(list).unwrap();
    }

    #[test]
    fn negative_index_addresses_from_the_end() {
        let mut engine = engine();
        let list = list_of(&mut engine, &[10, 20, 30]);
        let (_, value) = engine.sequence_index(list, -1).unwrap();
        assert_eq!(engine.heap.data(value), &EntryData::Integer(30));
        let (_, value) = engine.sequence_index(list, -3).unwrap();
        assert_eq!(engine.heap.data(value), &EntryData::Integer(10));
        assert_eq!(engine.sequence_index(list, -4), Err(RunResult::ValueOutOfRange));
        engine.unref(list).unwrap();
    }

    #[test]
    fn insert_by_index_places_before() {
        let mut engine = engine();
        let list = list_of(&mut engine, &[1, 3]);
        let two = engine.alloc(EntryData::Integer(2)).unwrap();
        engine.sequence_insert_by_index(list, 1, two).unwrap();
        engine.unref(two).unwrap();
        assert_eq!(values_of(&engine, list), vec![1, 2, 3]);
        engine.unref(list).unwrap();
    }

    #[test]
    fn erase_by_index_relinks_neighbors() {
        let mut engine = engine();
        let list = list_of(&mut engine, &[1, 2, 3]);
        engine.sequence_erase(list, 1, true).unwrap();
        assert_eq!(values_of(&engine, list), vec![1, 3]);
        engine.sequence_erase(list, -1, true).unwrap();
        assert_eq!(values_of(&engine, list), vec![1]);
        engine.unref(list).unwrap();
    }

    #[test]
    fn string_count_tracks_bytes_not_fragments() {
        let mut engine = engine();
        let s = engine.alloc(EntryData::String(Sequence::default())).unwrap();
        engine.string_append_buffer(s, b"hello, fragmented world").unwrap();
        let header = engine.heap.data(s).as_sequence().unwrap();
        assert_eq!(header.count, 23);
        assert_eq!(engine.string_bytes(s).unwrap(), b"hello, fragmented world");
        engine.unref(s).unwrap();
    }

    #[test]
    fn string_append_reuses_tail_fragment_room() {
        let mut engine = engine();
        let s = engine.alloc(EntryData::String(Sequence::default())).unwrap();
        engine.string_append_buffer(s, b"abc").unwrap();
        let free_after_first = engine.free_count();
        engine.string_append_buffer(s, b"def").unwrap();
        assert_eq!(engine.free_count(), free_after_first, "short appends must pack");
        assert_eq!(engine.string_bytes(s).unwrap(), b"abcdef");
        engine.unref(s).unwrap();
    }

    #[test]
    fn string_element_spans_fragments() {
        let mut engine = engine();
        let s = engine.alloc(EntryData::String(Sequence::default())).unwrap();
        engine.string_append_buffer(s, b"0123456789abcdefghij").unwrap();
        assert_eq!(engine.string_element(s, 0).unwrap(), b'0');
        assert_eq!(engine.string_element(s, 14).unwrap(), b'e');
        assert_eq!(engine.string_element(s, -1).unwrap(), b'j');
        assert_eq!(engine.string_element(s, 20), Err(RunResult::ValueOutOfRange));
        engine.unref(s).unwrap();
    }
}
