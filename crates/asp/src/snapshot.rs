//! Whole-machine snapshots.
//!
//! Because every link in the data heap is an index, the complete machine
//! state (code, heap, stack, namespaces, program counter, state tags)
//! serializes as one block. A snapshot taken between steps restores to
//! an engine that continues exactly where the original stood. The host's
//! application spec (and any tracer or context) is re-supplied at
//! restore time; the check value must match the snapshotted one.

use serde::{Deserialize, Serialize};

use crate::{
    appspec::AppSpec,
    engine::Engine,
    heap::{Heap, HeapId},
    loader::HEADER_SIZE,
    result::{EngineState, LoadResult, RunResult},
};

#[derive(Serialize, Deserialize)]
struct MachineState {
    state: EngineState,
    load_result: LoadResult,
    run_result: RunResult,
    header: [u8; HEADER_SIZE],
    header_index: usize,
    code: Vec<u8>,
    code_capacity: u64,
    pc: u32,
    heap: Heap,
    stack_top: Option<HeapId>,
    stack_count: u32,
    modules: HeapId,
    module: HeapId,
    system_namespace: HeapId,
    global_namespace: HeapId,
    local_namespace: HeapId,
    check_value: u32,
    cycle_detection_limit: u32,
}

impl Engine {
    /// Serializes the machine state.
    ///
    /// Not available while a host callback is on the stack.
    pub fn snapshot(&self) -> Result<Vec<u8>, RunResult> {
        if self.in_app {
            return Err(RunResult::InvalidState);
        }
        let state = MachineState {
            state: self.state,
            load_result: self.load_result,
            run_result: self.run_result,
            header: self.header,
            header_index: self.header_index,
            code: self.code.clone(),
            code_capacity: self.code_capacity as u64,
            pc: self.pc,
            heap: self.heap.clone(),
            stack_top: self.stack_top,
            stack_count: self.stack_count,
            modules: self.modules,
            module: self.module,
            system_namespace: self.system_namespace,
            global_namespace: self.global_namespace,
            local_namespace: self.local_namespace,
            check_value: self.app_spec.check_value(),
            cycle_detection_limit: self.cycle_detection_limit,
        };
        postcard::to_allocvec(&state).map_err(|_| RunResult::InternalError)
    }

    /// Rebuilds an engine from a snapshot and the matching application
    /// spec.
    pub fn restore(bytes: &[u8], app_spec: AppSpec) -> Result<Self, RunResult> {
        let state: MachineState = postcard::from_bytes(bytes).map_err(|_| RunResult::InitializationError)?;
        if state.check_value != app_spec.check_value() {
            return Err(RunResult::InitializationError);
        }
        let mut code = Vec::with_capacity(state.code_capacity as usize);
        code.extend_from_slice(&state.code);
        Ok(Self {
            state: state.state,
            load_result: state.load_result,
            run_result: state.run_result,
            header: state.header,
            header_index: state.header_index,
            code,
            code_capacity: state.code_capacity as usize,
            pc: state.pc,
            heap: state.heap,
            stack_top: state.stack_top,
            stack_count: state.stack_count,
            modules: state.modules,
            module: state.module,
            system_namespace: state.system_namespace,
            global_namespace: state.global_namespace,
            local_namespace: state.local_namespace,
            app_spec,
            in_app: false,
            context: None,
            tracer: None,
            cycle_detection_limit: state.cycle_detection_limit.max(1),
        })
    }
}
