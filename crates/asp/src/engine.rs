//! The engine: lifecycle, registers, and the step entry point.

use std::any::Any;

use crate::{
    appspec::AppSpec,
    heap::{DATA_ENTRY_SIZE, EntryData, Heap, HeapId, HeapStats},
    result::{EngineResult, EngineState, LoadResult, RunResult, engine_assert},
    symbols::{SYSTEM_ARGUMENTS_SYMBOL, SYSTEM_MODULE_SYMBOL},
    tracer::StepTracer,
};

/// Code addresses are 28-bit; images larger than this are rejected.
pub const MAX_CODE_SIZE: usize = 1 << 28;

/// Default bound for every cycle-capped traversal.
pub const DEFAULT_CYCLE_DETECTION_LIMIT: u32 = 1_000_000;

/// A script execution engine.
///
/// The engine owns two fixed-capacity buffers chosen at construction: a
/// code buffer the host fills through [`Engine::add_code`], and the data
/// heap where every runtime value lives. Neither grows afterwards; when
/// the heap runs dry the run fails with
/// [`RunResult::OutOfDataMemory`], and [`Engine::low_free_count`] tells
/// the host how close previous runs came.
///
/// Execution is cooperative: [`Engine::step`] runs exactly one
/// instruction and returns. Any non-`Ok` result is sticky until
/// [`Engine::reset`] or [`Engine::restart`].
pub struct Engine {
    pub(crate) state: EngineState,
    pub(crate) load_result: LoadResult,
    pub(crate) run_result: RunResult,

    /* Code space. */
    pub(crate) header: [u8; crate::loader::HEADER_SIZE],
    pub(crate) header_index: usize,
    pub(crate) code: Vec<u8>,
    pub(crate) code_capacity: usize,
    pub(crate) pc: u32,

    /* Data space. */
    pub(crate) heap: Heap,

    /* Work stack registers. */
    pub(crate) stack_top: Option<HeapId>,
    pub(crate) stack_count: u32,

    /* Module and namespace registers. */
    pub(crate) modules: HeapId,
    pub(crate) module: HeapId,
    pub(crate) system_namespace: HeapId,
    pub(crate) global_namespace: HeapId,
    pub(crate) local_namespace: HeapId,

    /* Host surface. */
    pub(crate) app_spec: AppSpec,
    pub(crate) in_app: bool,
    pub(crate) context: Option<Box<dyn Any>>,
    pub(crate) tracer: Option<Box<dyn StepTracer>>,

    pub(crate) cycle_detection_limit: u32,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("state", &self.state)
            .field("run_result", &self.run_result)
            .field("pc", &self.pc)
            .field("stack_count", &self.stack_count)
            .field("free_count", &self.heap.free_count())
            .finish_non_exhaustive()
    }
}

impl Engine {
    /// Creates an engine with fixed code and data capacities (in bytes).
    ///
    /// The data heap holds `data_size / 16` entries. Construction resets
    /// the engine, which builds the initial world (the `None` singleton,
    /// the module table, the system namespace and its `args` tuple, and
    /// one function entry per application spec record); a heap too small
    /// for that fails with `OutOfDataMemory`.
    pub fn new(code_size: usize, data_size: usize, app_spec: AppSpec) -> Result<Self, RunResult> {
        if code_size > MAX_CODE_SIZE {
            return Err(RunResult::InitializationError);
        }
        let entry_count = (data_size / DATA_ENTRY_SIZE) as u32;
        let mut engine = Self {
            state: EngineState::Reset,
            load_result: LoadResult::Ok,
            run_result: RunResult::Ok,
            header: [0; crate::loader::HEADER_SIZE],
            header_index: 0,
            code: Vec::with_capacity(code_size),
            code_capacity: code_size,
            pc: 0,
            heap: Heap::new(entry_count),
            stack_top: None,
            stack_count: 0,
            modules: HeapId::NONE,
            module: HeapId::NONE,
            system_namespace: HeapId::NONE,
            global_namespace: HeapId::NONE,
            local_namespace: HeapId::NONE,
            app_spec,
            in_app: false,
            context: None,
            tracer: None,
            cycle_detection_limit: DEFAULT_CYCLE_DETECTION_LIMIT,
        };
        engine.reset()?;
        Ok(engine)
    }

    /// Discards all loaded code and data and returns to the reset state.
    pub fn reset(&mut self) -> Result<(), RunResult> {
        if self.in_app {
            return Err(RunResult::InvalidState);
        }
        self.state = EngineState::Reset;
        self.header_index = 0;
        self.load_result = LoadResult::Ok;
        self.run_result = RunResult::Ok;
        self.pc = 0;
        self.code.clear();
        self.reset_data()
    }

    /// Rewinds a loaded program for another run, keeping the code.
    pub fn restart(&mut self) -> Result<(), RunResult> {
        if self.in_app {
            return Err(RunResult::InvalidState);
        }
        if !matches!(
            self.state,
            EngineState::Ready | EngineState::Running | EngineState::RunError | EngineState::Ended
        ) {
            return Err(RunResult::InvalidState);
        }
        self.state = EngineState::Ready;
        self.run_result = RunResult::Ok;
        self.pc = 0;
        self.reset_data()
    }

    /// Rebuilds the data heap's initial world.
    fn reset_data(&mut self) -> Result<(), RunResult> {
        self.heap.clear();
        self.stack_top = None;
        self.stack_count = 0;

        // The None singleton must land in slot 0; only here is a zero
        // index a valid allocation result.
        let none = self.heap.alloc(EntryData::None)?;
        engine_assert(none == HeapId::NONE)?;

        // Module table and system namespace.
        self.modules = self.heap.alloc(EntryData::Namespace(crate::heap::Tree::default()))?;
        self.system_namespace = self.heap.alloc(EntryData::Namespace(crate::heap::Tree::default()))?;
        let system_module = self.heap.alloc(EntryData::Module {
            code_address: 0,
            namespace: self.system_namespace,
            is_loaded: true,
        })?;
        self.module = system_module;
        self.local_namespace = self.system_namespace;
        self.global_namespace = self.system_namespace;

        let insert = self.tree_try_insert_by_symbol(self.modules, SYSTEM_MODULE_SYMBOL, system_module)?;
        engine_assert(insert.inserted)?;
        // The system namespace also names the module so scripts can
        // resolve it and reach its members.
        let insert = self.tree_try_insert_by_symbol(self.system_namespace, SYSTEM_MODULE_SYMBOL, system_module)?;
        engine_assert(insert.inserted)?;
        self.unref(system_module)?;

        // Empty arguments tuple; populated by the host before stepping.
        let args = self
            .heap
            .alloc(EntryData::Tuple(crate::heap::Sequence::default()))?;
        let insert = self.tree_try_insert_by_symbol(self.system_namespace, SYSTEM_ARGUMENTS_SYMBOL, args)?;
        engine_assert(insert.inserted)?;
        self.unref(args)?;

        self.init_app_functions()
    }

    /// Runs one instruction and returns the (possibly sticky) result.
    ///
    /// While a host callback is on the stack the engine refuses to
    /// advance with `InvalidState`. Any non-`Ok` outcome latches:
    /// `Complete` parks the engine in the ended state, everything else in
    /// the run-error state, and later calls return the same code without
    /// executing.
    pub fn step(&mut self) -> RunResult {
        if self.in_app {
            return RunResult::InvalidState;
        }
        if self.state == EngineState::Ready {
            self.state = EngineState::Running;
        }
        match self.state {
            EngineState::Running => {}
            EngineState::Ended | EngineState::RunError => return self.run_result,
            _ => return RunResult::InvalidState,
        }

        let step_result = match self.execute_instruction() {
            Ok(()) => RunResult::Ok,
            Err(result) => result,
        };
        // A result stored directly by a host callback (exit) wins over
        // the step's own outcome.
        if self.run_result.is_ok() {
            self.run_result = step_result;
        }
        if !self.run_result.is_ok() {
            self.state = if self.run_result == RunResult::Complete {
                EngineState::Ended
            } else {
                EngineState::RunError
            };
        }
        self.run_result
    }

    /// True while the engine is between its first step and its last.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.state == EngineState::Running
    }

    /// Current engine lifecycle state.
    #[must_use]
    pub fn state(&self) -> EngineState {
        self.state
    }

    /// The latched run result.
    #[must_use]
    pub fn run_result(&self) -> RunResult {
        self.run_result
    }

    /// Offset of the next instruction within the code.
    #[must_use]
    pub fn program_counter(&self) -> u32 {
        self.pc
    }

    /// Minimum number of free data entries observed since reset.
    #[must_use]
    pub fn low_free_count(&self) -> u32 {
        self.heap.low_free_count()
    }

    /// Free data entries right now.
    #[must_use]
    pub fn free_count(&self) -> u32 {
        self.heap.free_count()
    }

    /// Census of the data heap.
    #[must_use]
    pub fn heap_stats(&self) -> HeapStats {
        self.heap.stats()
    }

    /// Installs an instruction tracer (replaces any previous one).
    pub fn set_tracer(&mut self, tracer: Box<dyn StepTracer>) {
        self.tracer = Some(tracer);
    }

    /// Removes and returns the installed tracer.
    pub fn take_tracer(&mut self) -> Option<Box<dyn StepTracer>> {
        self.tracer.take()
    }

    /// Caps bounded traversals (tear-down, comparison, long scans).
    ///
    /// Exceeding the cap fails the run with `CycleDetected`.
    pub fn set_cycle_detection_limit(&mut self, limit: u32) {
        self.cycle_detection_limit = limit.max(1);
    }

    /// Host-owned context carried across dispatch callbacks.
    pub fn set_context(&mut self, context: Box<dyn Any>) {
        self.context = Some(context);
    }

    /// Borrows the host context, if any.
    pub fn context<T: 'static>(&self) -> Option<&T> {
        self.context.as_ref().and_then(|c| c.downcast_ref())
    }

    /// Mutably borrows the host context, if any.
    pub fn context_mut<T: 'static>(&mut self) -> Option<&mut T> {
        self.context.as_mut().and_then(|c| c.downcast_mut())
    }

    /// Stores a run result directly, as host callbacks do for `exit`.
    ///
    /// The stored result takes effect when the current step finishes.
    pub fn set_run_result(&mut self, result: RunResult) {
        self.run_result = result;
    }

    /* Internal helpers shared across modules. */

    /// Allocates an entry, routing `None` to the singleton.
    pub(crate) fn alloc(&mut self, data: EntryData) -> EngineResult<HeapId> {
        if matches!(data, EntryData::None) {
            self.ref_value(HeapId::NONE);
            return Ok(HeapId::NONE);
        }
        self.heap.alloc(data)
    }

    /// Reads a code byte at `address` without advancing the pc.
    pub(crate) fn code_byte(&self, address: u32) -> EngineResult<u8> {
        self.code
            .get(address as usize)
            .copied()
            .ok_or(RunResult::BeyondEndOfCode)
    }

    /// End of the loaded code, as a code address.
    #[inline]
    pub(crate) fn code_end(&self) -> u32 {
        self.code.len() as u32
    }
}
