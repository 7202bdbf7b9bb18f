//! Application specifications: the host's function table contract.
//!
//! An application spec binds a compiled script image to a particular host.
//! It carries the serialized function records (parameter symbols, flags,
//! default values), the 32-bit check value the image header must match,
//! and the dispatch entry the engine calls when a script invokes one of
//! the host's functions.

use crate::{
    engine::Engine,
    heap::HeapId,
    result::RunResult,
};

/// Host dispatch entry point.
///
/// Called with the engine, the function's symbol, and the namespace that
/// holds the bound parameters. The implementation reads parameters with
/// [`Engine::parameter_value`] / [`Engine::group_parameter_value`], builds
/// a return object with the constructor API, and returns it (or `None`
/// for a `None` result). Returning `Err` halts the run with that result;
/// a symbol the host does not recognize should report
/// [`RunResult::UndefinedAppFunction`].
///
/// Reentering the engine from inside the callback is forbidden:
/// [`Engine::step`] reports `InvalidState` until the callback returns.
pub type DispatchFn = fn(&mut Engine, symbol: i32, ns: HeapId) -> Result<Option<HeapId>, RunResult>;

/// An application's function table, check value, and dispatch callback.
#[derive(Clone)]
pub struct AppSpec {
    spec: Vec<u8>,
    check_value: u32,
    dispatch: DispatchFn,
}

impl AppSpec {
    /// Wraps serialized function records and a dispatch callback.
    ///
    /// `spec` is the concatenated per-function records: a parameter count
    /// byte, then per parameter a 4-byte big-endian word (low 28 bits the
    /// symbol, bit 28 has-default, bit 29 tuple-group, bit 30
    /// dictionary-group), followed by a serialized default value when the
    /// has-default flag is set. Function symbols are assigned in record
    /// order starting at [`crate::symbols::SCRIPT_SYMBOL_BASE`].
    #[must_use]
    pub fn new(spec: Vec<u8>, check_value: u32, dispatch: DispatchFn) -> Self {
        Self {
            spec,
            check_value,
            dispatch,
        }
    }

    /// An empty spec for hosts that expose no functions.
    #[must_use]
    pub fn empty(check_value: u32) -> Self {
        fn no_functions(_: &mut Engine, _: i32, _: HeapId) -> Result<Option<HeapId>, RunResult> {
            Err(RunResult::UndefinedAppFunction)
        }
        Self::new(Vec::new(), check_value, no_functions)
    }

    #[inline]
    pub(crate) fn bytes(&self) -> &[u8] {
        &self.spec
    }

    #[inline]
    #[must_use]
    pub fn check_value(&self) -> u32 {
        self.check_value
    }

    #[inline]
    pub(crate) fn dispatch(&self) -> DispatchFn {
        self.dispatch
    }
}

impl std::fmt::Debug for AppSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppSpec")
            .field("spec_len", &self.spec.len())
            .field("check_value", &self.check_value)
            .finish_non_exhaustive()
    }
}

/// Parameter spec word flags (§ record layout in [`AppSpec::new`]).
pub(crate) const PARAMETER_SYMBOL_MASK: u32 = 0x0FFF_FFFF;
pub(crate) const PARAMETER_FLAG_HAS_DEFAULT: u32 = 0x1000_0000;
pub(crate) const PARAMETER_FLAG_TUPLE_GROUP: u32 = 0x2000_0000;
pub(crate) const PARAMETER_FLAG_DICTIONARY_GROUP: u32 = 0x4000_0000;

/// Serialized default value type tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SpecValueType {
    None = 0x00,
    Ellipsis = 0x01,
    Boolean = 0x02,
    Integer = 0x03,
    Float = 0x04,
    String = 0x05,
}

impl SpecValueType {
    pub fn decode(byte: u8) -> Option<Self> {
        match byte {
            0x00 => Some(Self::None),
            0x01 => Some(Self::Ellipsis),
            0x02 => Some(Self::Boolean),
            0x03 => Some(Self::Integer),
            0x04 => Some(Self::Float),
            0x05 => Some(Self::String),
            _ => None,
        }
    }
}

/// Helper for hosts and tests that assemble spec records by hand.
///
/// Produces the same byte layout the spec compiler emits.
#[derive(Debug, Default)]
pub struct AppSpecBuilder {
    bytes: Vec<u8>,
    parameters: Vec<u8>,
    parameter_count: u8,
}

impl AppSpecBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn push_word(&mut self, word: u32) {
        self.parameters.extend_from_slice(&word.to_be_bytes());
    }

    /// Adds a positional parameter to the function under construction.
    pub fn parameter(&mut self, symbol: i32) -> &mut Self {
        self.push_word(symbol as u32 & PARAMETER_SYMBOL_MASK);
        self.parameter_count += 1;
        self
    }

    /// Adds a parameter with an integer default.
    pub fn parameter_with_integer_default(&mut self, symbol: i32, value: i32) -> &mut Self {
        self.push_word((symbol as u32 & PARAMETER_SYMBOL_MASK) | PARAMETER_FLAG_HAS_DEFAULT);
        self.parameters.push(SpecValueType::Integer as u8);
        self.parameters.extend_from_slice(&value.to_be_bytes());
        self.parameter_count += 1;
        self
    }

    /// Adds a parameter defaulting to `None`.
    pub fn parameter_with_none_default(&mut self, symbol: i32) -> &mut Self {
        self.push_word((symbol as u32 & PARAMETER_SYMBOL_MASK) | PARAMETER_FLAG_HAS_DEFAULT);
        self.parameters.push(SpecValueType::None as u8);
        self.parameter_count += 1;
        self
    }

    /// Adds a parameter with a string default.
    pub fn parameter_with_string_default(&mut self, symbol: i32, value: &str) -> &mut Self {
        self.push_word((symbol as u32 & PARAMETER_SYMBOL_MASK) | PARAMETER_FLAG_HAS_DEFAULT);
        self.parameters.push(SpecValueType::String as u8);
        self.parameters.extend_from_slice(&(value.len() as u32).to_be_bytes());
        self.parameters.extend_from_slice(value.as_bytes());
        self.parameter_count += 1;
        self
    }

    /// Adds a tuple-group (`*args`) parameter.
    pub fn tuple_group_parameter(&mut self, symbol: i32) -> &mut Self {
        self.push_word((symbol as u32 & PARAMETER_SYMBOL_MASK) | PARAMETER_FLAG_TUPLE_GROUP);
        self.parameter_count += 1;
        self
    }

    /// Adds a dictionary-group (`**kwargs`) parameter.
    pub fn dictionary_group_parameter(&mut self, symbol: i32) -> &mut Self {
        self.push_word((symbol as u32 & PARAMETER_SYMBOL_MASK) | PARAMETER_FLAG_DICTIONARY_GROUP);
        self.parameter_count += 1;
        self
    }

    /// Closes the function under construction and starts the next one.
    ///
    /// Functions receive symbols in the order they are finished.
    pub fn finish_function(&mut self) -> &mut Self {
        self.bytes.push(self.parameter_count);
        self.bytes.append(&mut self.parameters);
        self.parameter_count = 0;
        self
    }

    /// Returns the serialized record bytes.
    #[must_use]
    pub fn build(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.bytes)
    }
}
