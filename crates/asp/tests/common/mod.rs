//! Shared test host: an application spec with a few functions, a byte
//! assembler for compiled images, and a step-driver.
#![allow(dead_code)]

use asp::{AppSpec, AppSpecBuilder, DataKind, ENGINE_VERSION, Engine, HeapId, OpCode, RunResult};

/// Check value stamped into test images and the test app spec.
pub const CHECK_VALUE: u32 = 0x5A5A_0001;

/// Application function symbols (assigned from the script symbol base).
pub const EXIT_SYMBOL: u8 = 3;
pub const LEN_SYMBOL: u8 = 4;
pub const RECORD_SYMBOL: u8 = 5;

/// Parameter symbols used by the test functions.
const EXIT_CODE_PARAM: i32 = 100;
const LEN_VALUE_PARAM: i32 = 101;
const RECORD_VALUE_PARAM: i32 = 102;

/// The test host: `exit(code=None)`, `len(value)`, `record(value)`.
fn dispatch(engine: &mut Engine, symbol: i32, ns: HeapId) -> Result<Option<HeapId>, RunResult> {
    match symbol {
        s if s == i32::from(EXIT_SYMBOL) => {
            let code = engine.parameter_value(ns, EXIT_CODE_PARAM)?;
            asp::syslib::exit(engine, code)
        }
        s if s == i32::from(LEN_SYMBOL) => {
            let value = engine
                .parameter_value(ns, LEN_VALUE_PARAM)?
                .ok_or(RunResult::InternalError)?;
            let length = engine.object_length(value).ok_or(RunResult::UnexpectedType)?;
            Ok(Some(engine.new_integer(length as i32)?))
        }
        s if s == i32::from(RECORD_SYMBOL) => {
            let value = engine
                .parameter_value(ns, RECORD_VALUE_PARAM)?
                .ok_or(RunResult::InternalError)?;
            let text = match engine.kind_of(value) {
                DataKind::String => String::from_utf8_lossy(&engine.string_value(value)?).into_owned(),
                DataKind::Integer => engine.integer_value(value).unwrap().to_string(),
                other => format!("<{name}>", name = other.name()),
            };
            if let Some(log) = engine.context_mut::<Vec<String>>() {
                log.push(text);
            }
            Ok(None)
        }
        _ => Err(RunResult::UndefinedAppFunction),
    }
}

/// Builds the test application spec.
pub fn app_spec() -> AppSpec {
    let mut builder = AppSpecBuilder::new();
    builder.parameter_with_none_default(EXIT_CODE_PARAM).finish_function();
    builder.parameter(LEN_VALUE_PARAM).finish_function();
    builder.parameter(RECORD_VALUE_PARAM).finish_function();
    AppSpec::new(builder.build(), CHECK_VALUE, dispatch)
}

pub fn new_engine() -> Engine {
    Engine::new(4096, 64 * 1024, app_spec()).expect("engine construction")
}

/// Assembles a compiled image: header plus instruction bytes.
pub struct Image {
    bytes: Vec<u8>,
}

const HEADER_LEN: usize = 12;

impl Image {
    pub fn new() -> Self {
        Self::with_check(CHECK_VALUE)
    }

    pub fn with_check(check_value: u32) -> Self {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(b"AspE");
        bytes.extend_from_slice(&ENGINE_VERSION);
        bytes.extend_from_slice(&check_value.to_be_bytes());
        Self { bytes }
    }

    /// Current code address (offset past the header).
    pub fn pos(&self) -> u32 {
        (self.bytes.len() - HEADER_LEN) as u32
    }

    pub fn op(&mut self, op: OpCode) -> &mut Self {
        self.bytes.push(op as u8);
        self
    }

    pub fn byte(&mut self, byte: u8) -> &mut Self {
        self.bytes.push(byte);
        self
    }

    pub fn word(&mut self, value: u32) -> &mut Self {
        self.bytes.extend_from_slice(&value.to_be_bytes());
        self
    }

    /// Emits a 4-byte address placeholder; patch it once known.
    pub fn placeholder(&mut self) -> usize {
        let at = self.bytes.len();
        self.bytes.extend_from_slice(&[0; 4]);
        at
    }

    pub fn patch(&mut self, at: usize, address: u32) -> &mut Self {
        self.bytes[at..at + 4].copy_from_slice(&address.to_be_bytes());
        self
    }

    /* Instruction idioms. */

    /// Push a small integer constant.
    pub fn pushi(&mut self, value: i8) -> &mut Self {
        self.op(OpCode::PushInteger1).byte(value as u8)
    }

    /// Push a short string constant.
    pub fn pushs(&mut self, text: &str) -> &mut Self {
        self.op(OpCode::PushString1).byte(text.len() as u8);
        self.bytes.extend_from_slice(text.as_bytes());
        self
    }

    /// Load a variable by 1-byte symbol.
    pub fn ld(&mut self, symbol: u8) -> &mut Self {
        self.op(OpCode::Load1).byte(symbol)
    }

    /// Load a variable address by 1-byte symbol.
    pub fn lda(&mut self, symbol: u8) -> &mut Self {
        self.op(OpCode::LoadAddress1).byte(symbol)
    }

    /// Assign the top value to `symbol` and pop it.
    pub fn store(&mut self, symbol: u8) -> &mut Self {
        self.lda(symbol).op(OpCode::SetPop)
    }

    /// Wrap the top of stack as a positional argument and add it to the
    /// argument list beneath.
    pub fn arg(&mut self) -> &mut Self {
        self.op(OpCode::MakeArgument).op(OpCode::Build)
    }

    /// Call `exit` with the top of stack as the code.
    pub fn exit_with_top(&mut self) -> &mut Self {
        // The value is below the argument list; rotate it in by loading
        // through a scratch variable.
        self.store(SCRATCH_SYMBOL)
            .op(OpCode::PushArgumentList)
            .ld(SCRATCH_SYMBOL)
            .arg()
            .ld(EXIT_SYMBOL)
            .op(OpCode::Call)
    }

    pub fn end(&mut self) -> &mut Self {
        self.op(OpCode::End)
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }
}

/// Scratch variable used by assembler idioms.
pub const SCRATCH_SYMBOL: u8 = 120;

/// Loads and runs an image to its terminal result.
pub fn run_image(image: &Image) -> (Engine, RunResult) {
    let mut engine = new_engine();
    let load = engine.add_code(image.bytes());
    assert_eq!(load, asp::LoadResult::Ok, "image must load");
    assert_eq!(engine.seal(), asp::LoadResult::Ok);
    let result = drive(&mut engine);
    (engine, result)
}

/// Steps an engine until it stops, with a safety cap.
pub fn drive(engine: &mut Engine) -> RunResult {
    for _ in 0..100_000 {
        let result = engine.step();
        if result != RunResult::Ok {
            return result;
        }
    }
    panic!("program did not terminate");
}
