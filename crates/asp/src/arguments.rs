//! Host argument injection: populating `sys.args` before the first step.
//!
//! The arguments tuple always starts with the whole command line as one
//! string, escaped so it can round-trip through the string tokenizer,
//! followed by the individual tokens.

use crate::{
    engine::Engine,
    heap::{DataKind, EntryData, HeapId},
    result::{EngineResult, EngineState, RunResult},
    symbols::SYSTEM_ARGUMENTS_SYMBOL,
};

impl Engine {
    /// Sets `sys.args` from discrete argument strings.
    ///
    /// Element 0 becomes the whitespace-joined command line with
    /// backslash, quote, and whitespace characters escaped; elements 1
    /// onward are the arguments verbatim. Only valid in the ready state.
    pub fn set_arguments(&mut self, args: &[&str]) -> Result<(), RunResult> {
        let (arguments, argument0) = self.initialize_arguments()?;
        for (i, arg) in args.iter().enumerate() {
            if i > 0 {
                self.string_append_buffer(argument0, b" ")?;
            }
            for &byte in arg.as_bytes() {
                if matches!(byte, b'\\' | b'\'' | b'"') || byte.is_ascii_whitespace() {
                    self.string_append_buffer(argument0, b"\\")?;
                }
                self.string_append_buffer(argument0, &[byte])?;
            }
            let argument = self.append_argument(arguments)?;
            self.string_append_buffer(argument, arg.as_bytes())?;
        }
        Ok(())
    }

    /// Sets `sys.args` from a single command line string.
    ///
    /// Tokens split on unquoted whitespace; single and double quotes
    /// group, and backslash escapes outside single quotes. An unclosed
    /// quote or trailing escape clears the arguments and fails.
    pub fn set_arguments_string(&mut self, line: &str) -> Result<(), RunResult> {
        let (arguments, argument0) = self.initialize_arguments()?;

        let mut in_argument = false;
        let mut in_string = false;
        let mut escape = false;
        let mut quote = 0u8;
        let mut argument_index = self.tuple_count(arguments)?;
        let mut argument: Option<HeapId> = None;

        for &byte in line.as_bytes() {
            self.string_append_buffer(argument0, &[byte])?;

            if !escape {
                if in_string {
                    if quote == b'"' && byte == b'\\' {
                        escape = true;
                        continue;
                    }
                    if byte == quote {
                        in_string = false;
                        continue;
                    }
                } else {
                    if byte == b'\\' {
                        in_argument = true;
                        escape = true;
                        continue;
                    }
                    if byte == b'\'' || byte == b'"' {
                        quote = byte;
                        in_argument = true;
                        in_string = true;
                        continue;
                    }
                    if byte.is_ascii_whitespace() {
                        if in_argument {
                            argument_index += 1;
                        }
                        in_argument = false;
                        continue;
                    }
                }
                in_argument = true;
            }
            escape = false;

            while self.tuple_count(arguments)? <= argument_index {
                argument = Some(self.append_argument(arguments)?);
            }
            self.string_append_buffer(argument.ok_or(RunResult::InternalError)?, &[byte])?;
        }

        if in_string || escape {
            self.clear_arguments(arguments)?;
            return Err(RunResult::InitializationError);
        }

        // Quoted empty tokens at the end still produce arguments.
        if in_argument {
            while self.tuple_count(arguments)? <= argument_index {
                self.append_argument(arguments)?;
            }
        }
        Ok(())
    }

    /// Locates the arguments tuple, empties it, and seeds element 0.
    fn initialize_arguments(&mut self) -> EngineResult<(HeapId, HeapId)> {
        if self.state != EngineState::Ready {
            return Err(RunResult::InvalidState);
        }
        let Some((_, arguments)) = self.find_symbol(self.system_namespace, SYSTEM_ARGUMENTS_SYMBOL)? else {
            return Err(RunResult::InternalError);
        };
        if self.heap.kind(arguments) != DataKind::Tuple {
            return Err(RunResult::UnexpectedType);
        }
        self.clear_arguments(arguments)?;
        let argument0 = self.append_argument(arguments)?;
        Ok((arguments, argument0))
    }

    fn clear_arguments(&mut self, arguments: HeapId) -> EngineResult<()> {
        let mut iterations: u32 = 0;
        while self.tuple_count(arguments)? != 0 {
            iterations += 1;
            if iterations > self.cycle_detection_limit {
                return Err(RunResult::CycleDetected);
            }
            self.sequence_erase(arguments, 0, true)?;
        }
        Ok(())
    }

    /// Appends a fresh empty string argument, owned by the tuple.
    fn append_argument(&mut self, arguments: HeapId) -> EngineResult<HeapId> {
        let argument = self.heap.alloc(EntryData::String(crate::heap::Sequence::default()))?;
        self.sequence_append(arguments, argument)?;
        self.unref(argument)?;
        Ok(argument)
    }

    fn tuple_count(&self, tuple: HeapId) -> EngineResult<u32> {
        Ok(self
            .heap
            .data(tuple)
            .as_sequence()
            .ok_or(RunResult::InternalError)?
            .count)
    }
}
