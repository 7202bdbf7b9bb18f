//! The host-facing object API: constructors and value readers.
//!
//! These are the calls host function implementations use inside a
//! dispatch callback: read bound parameters, inspect values, and build a
//! return object. Constructors hand back an owned use of the new object;
//! returning it from the dispatch callback (or transferring it into a
//! container) passes that ownership on, otherwise release it with
//! [`Engine::release`].

use crate::{
    engine::Engine,
    heap::{DataKind, EntryData, HeapId, Sequence, Tree},
    result::RunResult,
};

impl Engine {
    /* Constructors. */

    /// The `None` singleton, with a claimed use.
    pub fn new_none(&mut self) -> Result<HeapId, RunResult> {
        self.alloc(EntryData::None)
    }

    pub fn new_ellipsis(&mut self) -> Result<HeapId, RunResult> {
        self.alloc(EntryData::Ellipsis)
    }

    pub fn new_boolean(&mut self, value: bool) -> Result<HeapId, RunResult> {
        self.alloc(EntryData::Boolean(value))
    }

    pub fn new_integer(&mut self, value: i32) -> Result<HeapId, RunResult> {
        self.alloc(EntryData::Integer(value))
    }

    pub fn new_float(&mut self, value: f64) -> Result<HeapId, RunResult> {
        self.alloc(EntryData::Float(value))
    }

    /// A new string holding `text`'s bytes.
    pub fn new_string(&mut self, text: &str) -> Result<HeapId, RunResult> {
        self.new_string_bytes(text.as_bytes())
    }

    pub fn new_string_bytes(&mut self, bytes: &[u8]) -> Result<HeapId, RunResult> {
        let string = self.heap.alloc(EntryData::String(Sequence::default()))?;
        self.string_append_buffer(string, bytes)?;
        Ok(string)
    }

    pub fn new_tuple(&mut self) -> Result<HeapId, RunResult> {
        self.heap.alloc(EntryData::Tuple(Sequence::default()))
    }

    pub fn new_list(&mut self) -> Result<HeapId, RunResult> {
        self.heap.alloc(EntryData::List(Sequence::default()))
    }

    pub fn new_set(&mut self) -> Result<HeapId, RunResult> {
        self.heap.alloc(EntryData::Set(Tree::default()))
    }

    pub fn new_dictionary(&mut self) -> Result<HeapId, RunResult> {
        self.heap.alloc(EntryData::Dictionary(Tree::default()))
    }

    /// A new range; a step of 0 is rejected.
    pub fn new_range(
        &mut self,
        start: Option<i32>,
        end: Option<i32>,
        step: Option<i32>,
    ) -> Result<HeapId, RunResult> {
        if step == Some(0) {
            return Err(RunResult::ValueOutOfRange);
        }
        let make = |value: Option<i32>, engine: &mut Self| -> Result<Option<HeapId>, RunResult> {
            value.map(|v| engine.alloc(EntryData::Integer(v))).transpose()
        };
        let start = make(start, self)?;
        let end = make(end, self)?;
        let step = make(step, self)?;
        self.heap.alloc(EntryData::Range { start, end, step })
    }

    /* Container building. */

    /// Appends to a tuple or list, transferring the value's ownership
    /// into the container.
    pub fn append_element(&mut self, container: HeapId, value: HeapId) -> Result<(), RunResult> {
        if !matches!(self.heap.kind(container), DataKind::Tuple | DataKind::List) {
            return Err(RunResult::UnexpectedType);
        }
        self.sequence_append(container, value)?;
        self.unref(value)?;
        Ok(())
    }

    /// Inserts into a set, transferring the key's ownership.
    pub fn insert_set(&mut self, set: HeapId, key: HeapId) -> Result<(), RunResult> {
        if self.heap.kind(set) != DataKind::Set {
            return Err(RunResult::UnexpectedType);
        }
        self.tree_insert(set, key, None)?;
        self.unref(key)?;
        Ok(())
    }

    /// Inserts into a dictionary, transferring both ownerships.
    pub fn insert_dictionary(&mut self, dictionary: HeapId, key: HeapId, value: HeapId) -> Result<(), RunResult> {
        if self.heap.kind(dictionary) != DataKind::Dictionary {
            return Err(RunResult::UnexpectedType);
        }
        self.tree_insert(dictionary, key, Some(value))?;
        self.unref(key)?;
        self.unref(value)?;
        Ok(())
    }

    /// Releases a host-held use of an object.
    pub fn release(&mut self, id: HeapId) -> Result<(), RunResult> {
        self.unref(id)
    }

    /* Readers. */

    /// The kind tag of a value.
    #[must_use]
    pub fn kind_of(&self, id: HeapId) -> DataKind {
        self.heap.kind(id)
    }

    #[must_use]
    pub fn is_none(&self, id: HeapId) -> bool {
        matches!(self.heap.data(id), EntryData::None)
    }

    #[must_use]
    pub fn boolean_value(&self, id: HeapId) -> Option<bool> {
        match self.heap.data(id) {
            EntryData::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    #[must_use]
    pub fn integer_value(&self, id: HeapId) -> Option<i32> {
        match self.heap.data(id) {
            EntryData::Integer(v) => Some(*v),
            _ => None,
        }
    }

    #[must_use]
    pub fn float_value(&self, id: HeapId) -> Option<f64> {
        match self.heap.data(id) {
            EntryData::Float(v) => Some(*v),
            _ => None,
        }
    }

    /// Copies a string value's bytes out of the heap.
    pub fn string_value(&self, id: HeapId) -> Result<Vec<u8>, RunResult> {
        if self.heap.kind(id) != DataKind::String {
            return Err(RunResult::UnexpectedType);
        }
        self.string_bytes(id)
    }

    /// Element/member count of a container, or byte length of a string.
    #[must_use]
    pub fn object_length(&self, id: HeapId) -> Option<u32> {
        match self.heap.data(id) {
            EntryData::String(s) | EntryData::Tuple(s) | EntryData::List(s) => Some(s.count),
            EntryData::Set(t) | EntryData::Dictionary(t) => Some(t.count),
            _ => None,
        }
    }

    /// Value at `index` of a tuple or list, without claiming a use.
    pub fn element_value(&self, container: HeapId, index: i32) -> Result<HeapId, RunResult> {
        if !matches!(self.heap.kind(container), DataKind::Tuple | DataKind::List) {
            return Err(RunResult::UnexpectedType);
        }
        let (_, value) = self.sequence_index(container, index)?;
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        appspec::AppSpec,
        engine::Engine,
        heap::DataKind,
    };

    fn engine() -> Engine {
        Engine::new(256, 16384, AppSpec::empty(0)).unwrap()
    }

    #[test]
    fn constructors_round_trip_through_readers() {
        let mut engine = engine();
        let b = engine.new_boolean(true).unwrap();
        assert_eq!(engine.boolean_value(b), Some(true));
        let i = engine.new_integer(-7).unwrap();
        assert_eq!(engine.integer_value(i), Some(-7));
        let f = engine.new_float(1.5).unwrap();
        assert_eq!(engine.float_value(f), Some(1.5));
        let s = engine.new_string("hello").unwrap();
        assert_eq!(engine.string_value(s).unwrap(), b"hello");
        assert_eq!(engine.object_length(s), Some(5));
    }

    #[test]
    fn append_element_transfers_ownership() {
        let mut engine = engine();
        let free_before = engine.free_count();
        let tuple = engine.new_tuple().unwrap();
        let value = engine.new_integer(3).unwrap();
        engine.append_element(tuple, value).unwrap();
        assert_eq!(engine.heap.use_count(value), 1, "container holds the only use");
        assert_eq!(engine.element_value(tuple, 0).unwrap(), value);
        engine.release(tuple).unwrap();
        assert_eq!(engine.free_count(), free_before);
    }

    #[test]
    fn dictionary_building() {
        let mut engine = engine();
        let dict = engine.new_dictionary().unwrap();
        let key = engine.new_string("k").unwrap();
        let value = engine.new_integer(1).unwrap();
        engine.insert_dictionary(dict, key, value).unwrap();
        assert_eq!(engine.object_length(dict), Some(1));
        assert_eq!(engine.kind_of(dict), DataKind::Dictionary);
        engine.release(dict).unwrap();
    }

    #[test]
    fn zero_step_range_is_rejected() {
        let mut engine = engine();
        assert!(engine.new_range(Some(0), Some(5), Some(0)).is_err());
        assert!(engine.new_range(Some(0), Some(5), Some(2)).is_ok());
    }
}
