//! System library functions for hosts to wire into their dispatch.
//!
//! These implement the standard script-visible system calls. A host's
//! dispatch callback routes the matching symbols here and returns the
//! produced value.

use crate::{
    engine::Engine,
    heap::{EntryData, HeapId},
    result::{APPLICATION_CODE_CEILING, RunResult},
};

/// `exit(code)`: end the run.
///
/// `None` or integer zero completes normally; any other integer becomes
/// an application exit with that code (clamped to the representable
/// ceiling); any other value exits with code zero. The result is stored
/// in the engine's sticky slot and takes effect as the call returns.
pub fn exit(engine: &mut Engine, code: Option<HeapId>) -> Result<Option<HeapId>, RunResult> {
    let result = match code {
        None => RunResult::Complete,
        Some(id) => match engine.heap_data_for_exit(id) {
            Some(0) => RunResult::Complete,
            Some(value) => {
                let clamped = if value < 0 || value as u32 > APPLICATION_CODE_CEILING {
                    APPLICATION_CODE_CEILING
                } else {
                    value as u32
                };
                RunResult::Application(clamped)
            }
            None if engine.is_none(id) => RunResult::Complete,
            None => RunResult::Application(0),
        },
    };
    engine.set_run_result(result);
    Ok(None)
}

/// `module()`: the currently executing module.
pub fn module(engine: &mut Engine) -> Result<Option<HeapId>, RunResult> {
    let module = engine.current_module();
    engine.claim(module);
    Ok(Some(module))
}

/// `id(object)`: the object identity (its entry index).
pub fn id(engine: &mut Engine, object: HeapId) -> Result<Option<HeapId>, RunResult> {
    let value = engine.new_integer(object.index() as i32)?;
    Ok(Some(value))
}

impl Engine {
    fn heap_data_for_exit(&self, id: HeapId) -> Option<i32> {
        match self.heap.data(id) {
            EntryData::Integer(v) => Some(*v),
            _ => None,
        }
    }

    /// The currently executing module entry.
    #[must_use]
    pub fn current_module(&self) -> HeapId {
        self.module
    }

    /// Claims a use of an object on the host's behalf.
    pub fn claim(&mut self, id: HeapId) {
        self.ref_value(id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::appspec::AppSpec;

    fn engine() -> Engine {
        Engine::new(256, 8192, AppSpec::empty(0)).unwrap()
    }

    #[test]
    fn exit_with_zero_or_none_completes() {
        let mut engine = engine();
        let zero = engine.new_integer(0).unwrap();
        exit(&mut engine, Some(zero)).unwrap();
        assert_eq!(engine.run_result(), RunResult::Complete);

        let mut engine2 = self::engine();
        let none = engine2.new_none().unwrap();
        exit(&mut engine2, Some(none)).unwrap();
        assert_eq!(engine2.run_result(), RunResult::Complete);
    }

    #[test]
    fn exit_with_code_becomes_application_result() {
        let mut engine = engine();
        let code = engine.new_integer(14).unwrap();
        exit(&mut engine, Some(code)).unwrap();
        assert_eq!(engine.run_result(), RunResult::Application(14));
    }

    #[test]
    fn out_of_range_codes_clamp_to_the_ceiling() {
        let mut engine = engine();
        let code = engine.new_integer(-5).unwrap();
        exit(&mut engine, Some(code)).unwrap();
        assert_eq!(engine.run_result(), RunResult::Application(APPLICATION_CODE_CEILING));

        let mut engine2 = self::engine();
        let code = engine2.new_integer(100_000).unwrap();
        exit(&mut engine2, Some(code)).unwrap();
        assert_eq!(engine2.run_result(), RunResult::Application(APPLICATION_CODE_CEILING));
    }

    #[test]
    fn id_reports_the_entry_index() {
        let mut engine = engine();
        let value = engine.new_integer(9).unwrap();
        let result = id(&mut engine, value).unwrap().unwrap();
        assert_eq!(engine.integer_value(result), Some(value.index() as i32));
    }
}
