//! Functions: the application function table and argument binding.
//!
//! At reset the engine turns the application spec's records into function
//! entries in the system namespace. At call time the binder lays an
//! argument list over a parameter list, producing the call's local
//! namespace: positionals in order, spillover into a tuple group, named
//! arguments after positionals, named spillover into a dictionary group,
//! then defaults. Binding failures are malformed function calls.

use crate::{
    appspec::{
        PARAMETER_FLAG_DICTIONARY_GROUP, PARAMETER_FLAG_HAS_DEFAULT, PARAMETER_FLAG_TUPLE_GROUP,
        PARAMETER_SYMBOL_MASK, SpecValueType,
    },
    engine::Engine,
    heap::{DataKind, EntryData, FunctionTarget, HeapId, ParameterGroup, Sequence, Tree},
    result::{EngineResult, RunResult, engine_assert},
    symbols::SCRIPT_SYMBOL_BASE,
};

/// Cursor over the raw spec record bytes.
struct SpecReader<'a> {
    bytes: &'a [u8],
    index: usize,
}

impl<'a> SpecReader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, index: 0 }
    }

    fn at_end(&self) -> bool {
        self.index >= self.bytes.len()
    }

    fn byte(&mut self) -> EngineResult<u8> {
        let byte = *self.bytes.get(self.index).ok_or(RunResult::InitializationError)?;
        self.index += 1;
        Ok(byte)
    }

    fn word(&mut self) -> EngineResult<u32> {
        let mut word = 0u32;
        for _ in 0..4 {
            word = word << 8 | u32::from(self.byte()?);
        }
        Ok(word)
    }

    fn slice(&mut self, len: usize) -> EngineResult<&'a [u8]> {
        let end = self.index.checked_add(len).ok_or(RunResult::InitializationError)?;
        let slice = self.bytes.get(self.index..end).ok_or(RunResult::InitializationError)?;
        self.index = end;
        Ok(slice)
    }
}

impl Engine {
    /// Builds one function entry per application spec record, bound into
    /// the system namespace from the script symbol base upward.
    pub(crate) fn init_app_functions(&mut self) -> Result<(), RunResult> {
        let spec = self.app_spec.bytes().to_vec();
        let mut reader = SpecReader::new(&spec);
        let mut function_symbol = SCRIPT_SYMBOL_BASE;

        while !reader.at_end() {
            let parameter_count = reader.byte()?;
            let parameters = self.heap.alloc(EntryData::ParameterList(Sequence::default()))?;
            for _ in 0..parameter_count {
                let word = reader.word()?;
                let symbol = (word & PARAMETER_SYMBOL_MASK) as i32;
                let group = if word & PARAMETER_FLAG_TUPLE_GROUP != 0 {
                    ParameterGroup::Tuple
                } else if word & PARAMETER_FLAG_DICTIONARY_GROUP != 0 {
                    ParameterGroup::Dictionary
                } else {
                    ParameterGroup::None
                };
                let default = if word & PARAMETER_FLAG_HAS_DEFAULT != 0 {
                    Some(self.read_default_value(&mut reader)?)
                } else {
                    None
                };
                let parameter = self.heap.alloc(EntryData::Parameter { symbol, default, group })?;
                self.sequence_append(parameters, parameter)?;
            }

            let function = self.heap.alloc(EntryData::Function {
                target: FunctionTarget::App {
                    symbol: function_symbol,
                },
                module: self.module,
                parameters,
            })?;
            self.ref_value(self.module);

            let insert = self.tree_try_insert_by_symbol(self.system_namespace, function_symbol, function)?;
            if !insert.inserted {
                return Err(RunResult::InitializationError);
            }
            self.unref(function)?;
            function_symbol += 1;
        }
        Ok(())
    }

    /// Deserializes one default value from the spec records.
    fn read_default_value(&mut self, reader: &mut SpecReader<'_>) -> EngineResult<HeapId> {
        let value_type = SpecValueType::decode(reader.byte()?).ok_or(RunResult::InitializationError)?;
        match value_type {
            SpecValueType::None => self.alloc(EntryData::None),
            SpecValueType::Ellipsis => self.alloc(EntryData::Ellipsis),
            SpecValueType::Boolean => {
                let value = reader.byte()?;
                self.alloc(EntryData::Boolean(value != 0))
            }
            SpecValueType::Integer => {
                let value = reader.word()? as i32;
                self.alloc(EntryData::Integer(value))
            }
            SpecValueType::Float => {
                let mut bytes = [0u8; 8];
                bytes.copy_from_slice(reader.slice(8)?);
                self.alloc(EntryData::Float(f64::from_bits(u64::from_be_bytes(bytes))))
            }
            SpecValueType::String => {
                let len = reader.word()? as usize;
                let bytes = reader.slice(len)?.to_vec();
                let string = self.heap.alloc(EntryData::String(Sequence::default()))?;
                self.string_append_buffer(string, &bytes)?;
                Ok(string)
            }
        }
    }

    /// Binds an argument list against a parameter list into `ns`.
    pub(crate) fn load_arguments(
        &mut self,
        argument_list: HeapId,
        parameter_list: HeapId,
        ns: HeapId,
    ) -> EngineResult<()> {
        engine_assert(self.heap.kind(argument_list) == DataKind::ArgumentList)?;
        engine_assert(self.heap.kind(parameter_list) == DataKind::ParameterList)?;
        engine_assert(self.heap.kind(ns) == DataKind::Namespace)?;

        let mut binder = Binder {
            parameter_cursor: None,
            tuple_group: None,
        };

        // Positional phase: plain arguments and iterable groups, until
        // the first named (or dictionary-group) argument.
        let mut cursor = self.sequence_next(argument_list, None, true)?;
        let mut iterations: u32 = 0;
        while let (Some(element), Some(argument)) = (cursor.element, cursor.value) {
            iterations += 1;
            if iterations > self.cycle_detection_limit {
                return Err(RunResult::CycleDetected);
            }
            let EntryData::Argument {
                has_name, is_group, value, ..
            } = *self.heap.data(argument)
            else {
                return Err(RunResult::InternalError);
            };
            if has_name {
                break;
            }
            if is_group {
                match self.heap.kind(value) {
                    DataKind::Tuple | DataKind::List => {
                        let mut inner = self.sequence_next(value, None, true)?;
                        while let (Some(inner_element), Some(inner_value)) = (inner.element, inner.value) {
                            iterations += 1;
                            if iterations > self.cycle_detection_limit {
                                return Err(RunResult::CycleDetected);
                            }
                            self.bind_positional(&mut binder, parameter_list, ns, inner_value)?;
                            inner = self.sequence_next(value, Some(inner_element), true)?;
                        }
                    }
                    // Dictionary groups carry named arguments.
                    DataKind::Dictionary => break,
                    _ => return Err(RunResult::MalformedFunctionCall),
                }
            } else {
                self.bind_positional(&mut binder, parameter_list, ns, value)?;
            }
            cursor = self.sequence_next(argument_list, Some(element), true)?;
        }

        // Named phase: everything from here on must carry a name or be a
        // dictionary group.
        while let (Some(element), Some(argument)) = (cursor.element, cursor.value) {
            iterations += 1;
            if iterations > self.cycle_detection_limit {
                return Err(RunResult::CycleDetected);
            }
            let EntryData::Argument {
                symbol,
                has_name,
                is_group,
                value,
            } = *self.heap.data(argument)
            else {
                return Err(RunResult::InternalError);
            };
            if has_name {
                self.bind_named(parameter_list, ns, symbol, value)?;
            } else if is_group && self.heap.kind(value) == DataKind::Dictionary {
                let mut node = self.tree_next(value, None)?;
                while let Some(current) = node.node {
                    iterations += 1;
                    if iterations > self.cycle_detection_limit {
                        return Err(RunResult::CycleDetected);
                    }
                    let key = node.key.ok_or(RunResult::InternalError)?;
                    let EntryData::Integer(named_symbol) = *self.heap.data(key) else {
                        return Err(RunResult::MalformedFunctionCall);
                    };
                    let named_value = node.value.ok_or(RunResult::InternalError)?;
                    self.bind_named(parameter_list, ns, named_symbol, named_value)?;
                    node = self.tree_next(value, Some(current))?;
                }
            } else {
                return Err(RunResult::MalformedFunctionCall);
            }
            cursor = self.sequence_next(argument_list, Some(element), true)?;
        }

        // Fill phase: defaults, and empty containers for unbound groups.
        let mut cursor = self.sequence_next(parameter_list, None, true)?;
        while let (Some(element), Some(parameter)) = (cursor.element, cursor.value) {
            iterations += 1;
            if iterations > self.cycle_detection_limit {
                return Err(RunResult::CycleDetected);
            }
            let EntryData::Parameter { symbol, default, group } = *self.heap.data(parameter) else {
                return Err(RunResult::InternalError);
            };
            if self.find_symbol(ns, symbol)?.is_none() {
                match group {
                    ParameterGroup::Tuple => {
                        let group = self.heap.alloc(EntryData::Tuple(Sequence::default()))?;
                        self.tree_try_insert_by_symbol(ns, symbol, group)?;
                        self.unref(group)?;
                    }
                    ParameterGroup::Dictionary => {
                        let group = self.heap.alloc(EntryData::Dictionary(Tree::default()))?;
                        self.tree_try_insert_by_symbol(ns, symbol, group)?;
                        self.unref(group)?;
                    }
                    ParameterGroup::None => {
                        let Some(default) = default else {
                            return Err(RunResult::MalformedFunctionCall);
                        };
                        self.tree_try_insert_by_symbol(ns, symbol, default)?;
                    }
                }
            }
            cursor = self.sequence_next(parameter_list, Some(element), true)?;
        }

        let bound = self.heap.data(ns).as_tree().ok_or(RunResult::InternalError)?.count;
        let declared = self
            .heap
            .data(parameter_list)
            .as_sequence()
            .ok_or(RunResult::InternalError)?
            .count;
        if bound != declared {
            return Err(RunResult::MalformedFunctionCall);
        }
        Ok(())
    }

    /// Binds one positional value: the next positional parameter, or the
    /// tuple group once positionals are exhausted.
    fn bind_positional(
        &mut self,
        binder: &mut Binder,
        parameter_list: HeapId,
        ns: HeapId,
        value: HeapId,
    ) -> EngineResult<()> {
        if let Some(group) = binder.tuple_group {
            self.sequence_append(group, value)?;
            return Ok(());
        }

        let next = self.sequence_next(parameter_list, binder.parameter_cursor, true)?;
        let (Some(element), Some(parameter)) = (next.element, next.value) else {
            return Err(RunResult::MalformedFunctionCall);
        };
        binder.parameter_cursor = Some(element);
        let EntryData::Parameter { symbol, group, .. } = *self.heap.data(parameter) else {
            return Err(RunResult::InternalError);
        };
        match group {
            ParameterGroup::Tuple => {
                let group = self.heap.alloc(EntryData::Tuple(Sequence::default()))?;
                self.tree_try_insert_by_symbol(ns, symbol, group)?;
                self.unref(group)?;
                binder.tuple_group = Some(group);
                self.sequence_append(group, value)?;
            }
            ParameterGroup::Dictionary => return Err(RunResult::MalformedFunctionCall),
            ParameterGroup::None => {
                self.tree_try_insert_by_symbol(ns, symbol, value)?;
            }
        }
        Ok(())
    }

    /// Binds one named value: a matching positional parameter, or the
    /// dictionary group keyed by the argument's symbol.
    fn bind_named(&mut self, parameter_list: HeapId, ns: HeapId, symbol: i32, value: HeapId) -> EngineResult<()> {
        let mut dictionary_group: Option<i32> = None;
        let mut cursor = self.sequence_next(parameter_list, None, true)?;
        let mut iterations: u32 = 0;
        while let (Some(element), Some(parameter)) = (cursor.element, cursor.value) {
            iterations += 1;
            if iterations > self.cycle_detection_limit {
                return Err(RunResult::CycleDetected);
            }
            let EntryData::Parameter {
                symbol: parameter_symbol,
                group,
                ..
            } = *self.heap.data(parameter)
            else {
                return Err(RunResult::InternalError);
            };
            if parameter_symbol == symbol {
                if group != ParameterGroup::None {
                    // Group parameters cannot be assigned by name.
                    return Err(RunResult::MalformedFunctionCall);
                }
                if self.find_symbol(ns, symbol)?.is_some() {
                    return Err(RunResult::MalformedFunctionCall);
                }
                self.tree_try_insert_by_symbol(ns, symbol, value)?;
                return Ok(());
            }
            if group == ParameterGroup::Dictionary {
                dictionary_group = Some(parameter_symbol);
            }
            cursor = self.sequence_next(parameter_list, Some(element), true)?;
        }

        // No parameter by this name: spill into the dictionary group.
        let Some(group_symbol) = dictionary_group else {
            return Err(RunResult::MalformedFunctionCall);
        };
        let group = match self.find_symbol(ns, group_symbol)? {
            Some((_, group)) => group,
            None => {
                let group = self.heap.alloc(EntryData::Dictionary(Tree::default()))?;
                self.tree_try_insert_by_symbol(ns, group_symbol, group)?;
                self.unref(group)?;
                group
            }
        };
        engine_assert(self.heap.kind(group) == DataKind::Dictionary)?;
        let key = self.heap.alloc(EntryData::Integer(symbol))?;
        if self.tree_find(group, key)?.is_some() {
            self.unref(key)?;
            return Err(RunResult::MalformedFunctionCall);
        }
        self.tree_insert(group, key, Some(value))?;
        self.unref(key)?;
        Ok(())
    }

    /// Reads a bound parameter's value from a call namespace.
    pub fn parameter_value(&self, ns: HeapId, symbol: i32) -> Result<Option<HeapId>, RunResult> {
        Ok(self.find_symbol(ns, symbol)?.map(|(_, value)| value))
    }

    /// Reads a group parameter's container from a call namespace.
    ///
    /// The value must be the tuple or dictionary the binder created.
    pub fn group_parameter_value(&self, ns: HeapId, symbol: i32) -> Result<HeapId, RunResult> {
        let Some((_, value)) = self.find_symbol(ns, symbol)? else {
            return Err(RunResult::InternalError);
        };
        if !matches!(self.heap.kind(value), DataKind::Tuple | DataKind::Dictionary) {
            return Err(RunResult::InternalError);
        }
        Ok(value)
    }
}

/// Positional binding state carried through one `load_arguments` call.
struct Binder {
    parameter_cursor: Option<HeapId>,
    tuple_group: Option<HeapId>,
}
