//! Instruction tracing.
//!
//! A tracer sees every fetched instruction before it executes, with read
//! access to the engine for inspecting the stack or heap. The default is
//! no tracer at all; [`StderrTracer`] gives a quick execution log and
//! [`RecordingTracer`] captures the instruction stream for tests.

use crate::{engine::Engine, opcode::OpCode};

/// Observer of the dispatcher's fetch-execute loop.
pub trait StepTracer {
    /// Called once per instruction, after fetch and before execution.
    fn on_instruction(&mut self, pc: u32, opcode: OpCode, engine: &Engine);
}

/// Discards everything.
#[derive(Debug, Default)]
pub struct NoopTracer;

impl StepTracer for NoopTracer {
    fn on_instruction(&mut self, _pc: u32, _opcode: OpCode, _engine: &Engine) {}
}

/// Writes one line per instruction to stderr.
#[derive(Debug, Default)]
pub struct StderrTracer;

impl StepTracer for StderrTracer {
    fn on_instruction(&mut self, pc: u32, opcode: OpCode, engine: &Engine) {
        let top = match engine.stack_top {
            Some(_) => engine
                .top()
                .map_or_else(|_| "?".to_string(), |id| engine.heap.describe(id)),
            None => "-".to_string(),
        };
        eprintln!(
            "@{pc:07X} {mnemonic:<8} stack[{depth}] top={top}",
            mnemonic = opcode.mnemonic(),
            depth = engine.stack_count,
        );
    }
}

/// Records (pc, opcode) pairs for later inspection.
///
/// Clones share the same record buffer, so a test can hand one clone to
/// the engine and read the records through another.
#[derive(Debug, Clone, Default)]
pub struct RecordingTracer {
    records: std::rc::Rc<std::cell::RefCell<Vec<(u32, OpCode)>>>,
}

impl RecordingTracer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn records(&self) -> Vec<(u32, OpCode)> {
        self.records.borrow().clone()
    }
}

impl StepTracer for RecordingTracer {
    fn on_instruction(&mut self, pc: u32, opcode: OpCode, _engine: &Engine) {
        self.records.borrow_mut().push((pc, opcode));
    }
}
