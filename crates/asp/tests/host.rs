//! Host surface tests: argument injection, dispatch, snapshots, heap
//! accounting, and tracing.

mod common;

use asp::{
    AppSpec, AppSpecBuilder, Engine, LoadResult, OpCode, RecordingTracer, RunResult,
};
use common::{
    CHECK_VALUE, EXIT_SYMBOL, Image, LEN_SYMBOL, RECORD_SYMBOL, app_spec, drive, new_engine, run_image,
};

const ARGS_SYMBOL: u8 = 1;

// =============================================================================
// 1. Argument injection
// =============================================================================

/// sys.args gets the joined escaped line first, then the tokens.
#[test]
fn set_arguments_populates_sys_args() {
    let mut img = Image::new();
    // record(args[0]); exit(len(args))
    img.op(OpCode::PushArgumentList)
        .ld(ARGS_SYMBOL)
        .pushi(0)
        .op(OpCode::Index)
        .arg()
        .ld(RECORD_SYMBOL)
        .op(OpCode::Call)
        .op(OpCode::Pop)
        .op(OpCode::PushArgumentList)
        .op(OpCode::PushArgumentList)
        .ld(ARGS_SYMBOL)
        .arg()
        .ld(LEN_SYMBOL)
        .op(OpCode::Call)
        .arg()
        .ld(EXIT_SYMBOL)
        .op(OpCode::Call)
        .end();

    let mut engine = new_engine();
    engine.set_context(Box::new(Vec::<String>::new()));
    assert_eq!(engine.add_code(img.bytes()), LoadResult::Ok);
    assert_eq!(engine.seal(), LoadResult::Ok);
    engine.set_arguments(&["ab", "c d"]).unwrap();

    let result = drive(&mut engine);
    assert_eq!(result, RunResult::Application(3), "joined line plus two tokens");
    let log = engine.context::<Vec<String>>().unwrap();
    assert_eq!(log[0], "ab c\\ d", "element 0 is the escaped joined line");
}

#[test]
fn set_arguments_string_tokenizes_quotes_and_escapes() {
    let mut img = Image::new();
    img.op(OpCode::PushArgumentList)
        .op(OpCode::PushArgumentList)
        .ld(ARGS_SYMBOL)
        .arg()
        .ld(LEN_SYMBOL)
        .op(OpCode::Call)
        .arg()
        .ld(EXIT_SYMBOL)
        .op(OpCode::Call)
        .end();

    let mut engine = new_engine();
    assert_eq!(engine.add_code(img.bytes()), LoadResult::Ok);
    assert_eq!(engine.seal(), LoadResult::Ok);
    engine.set_arguments_string("one 'two words' three").unwrap();
    let result = drive(&mut engine);
    assert_eq!(result, RunResult::Application(4), "line plus three tokens");
}

#[test]
fn unclosed_quote_in_arguments_string_fails() {
    let mut img = Image::new();
    img.end();
    let mut engine = new_engine();
    assert_eq!(engine.add_code(img.bytes()), LoadResult::Ok);
    assert_eq!(engine.seal(), LoadResult::Ok);
    assert_eq!(
        engine.set_arguments_string("broken 'token"),
        Err(RunResult::InitializationError)
    );
}

#[test]
fn arguments_require_the_ready_state() {
    let mut engine = new_engine();
    assert_eq!(engine.set_arguments(&["x"]), Err(RunResult::InvalidState));
}

// =============================================================================
// 2. Dispatch protocol
// =============================================================================

#[test]
fn unknown_app_function_symbol_is_reported() {
    // A spec with one more function than the host recognizes.
    fn narrow_dispatch(engine: &mut Engine, symbol: i32, ns: asp::HeapId) -> Result<Option<asp::HeapId>, RunResult> {
        if symbol == 3 {
            let code = engine.parameter_value(ns, 100)?;
            asp::syslib::exit(engine, code)
        } else {
            Err(RunResult::UndefinedAppFunction)
        }
    }
    let mut builder = AppSpecBuilder::new();
    builder.parameter_with_none_default(100).finish_function();
    builder.finish_function(); // symbol 4, which the host does not know
    let spec = AppSpec::new(builder.build(), CHECK_VALUE, narrow_dispatch);

    let mut img = Image::new();
    img.op(OpCode::PushArgumentList).ld(4).op(OpCode::Call).end();

    let mut engine = Engine::new(4096, 64 * 1024, spec).unwrap();
    assert_eq!(engine.add_code(img.bytes()), LoadResult::Ok);
    assert_eq!(engine.seal(), LoadResult::Ok);
    assert_eq!(drive(&mut engine), RunResult::UndefinedAppFunction);
}

#[test]
fn app_function_defaults_come_from_the_spec() {
    // exit() with no arguments uses the None default and completes.
    let mut img = Image::new();
    img.op(OpCode::PushArgumentList).ld(EXIT_SYMBOL).op(OpCode::Call).end();
    let (_, result) = run_image(&img);
    assert_eq!(result, RunResult::Complete);
}

#[test]
fn step_is_refused_before_sealing() {
    let mut engine = new_engine();
    assert_eq!(engine.step(), RunResult::InvalidState);
    let mut img = Image::new();
    img.end();
    engine.add_code(img.bytes());
    assert_eq!(engine.step(), RunResult::InvalidState, "still loading");
}

#[test]
fn add_code_is_refused_after_sealing() {
    let mut engine = new_engine();
    let mut img = Image::new();
    img.end();
    engine.add_code(img.bytes());
    engine.seal();
    assert_eq!(engine.add_code(&[0x00]), LoadResult::InvalidState);
}

// =============================================================================
// 3. Heap accounting
// =============================================================================

/// After every clean step, free plus live entries equals capacity.
#[test]
fn entry_conservation_holds_across_a_run() {
    let mut img = Image::new();
    img.op(OpCode::PushDictionary)
        .pushi(1)
        .pushs("a")
        .op(OpCode::MakeDictionaryEntry)
        .op(OpCode::Build)
        .store(30)
        .ld(30)
        .pushs("a")
        .op(OpCode::Erase)
        .end();

    let mut engine = new_engine();
    engine.add_code(img.bytes());
    engine.seal();
    loop {
        let result = engine.step();
        let stats = engine.heap_stats();
        assert_eq!(
            stats.live_entries + stats.free_entries,
            stats.capacity,
            "every entry is either live or free"
        );
        if result != RunResult::Ok {
            assert_eq!(result, RunResult::Complete);
            break;
        }
    }
}

/// Reloading the same image reproduces the same low-water mark.
#[test]
fn reload_reproduces_low_free_count() {
    let mut img = Image::new();
    img.op(OpCode::PushList)
        .pushi(1)
        .op(OpCode::Build)
        .pushi(2)
        .op(OpCode::Build)
        .store(31)
        .op(OpCode::PushArgumentList)
        .op(OpCode::PushArgumentList)
        .ld(31)
        .arg()
        .ld(LEN_SYMBOL)
        .op(OpCode::Call)
        .arg()
        .ld(EXIT_SYMBOL)
        .op(OpCode::Call)
        .end();

    let mut engine = new_engine();
    engine.add_code(img.bytes());
    engine.seal();
    let first = drive(&mut engine);
    let first_low = engine.low_free_count();

    engine.reset().unwrap();
    engine.add_code(img.bytes());
    engine.seal();
    let second = drive(&mut engine);
    assert_eq!(first, second);
    assert_eq!(engine.low_free_count(), first_low);
}

#[test]
fn restart_runs_the_same_image_again() {
    let mut img = Image::new();
    img.pushi(4)
        .pushi(3)
        .op(OpCode::Multiply)
        .pushi(2)
        .op(OpCode::Add)
        .exit_with_top()
        .end();
    let (mut engine, result) = run_image(&img);
    assert_eq!(result, RunResult::Application(14));
    engine.restart().unwrap();
    assert_eq!(drive(&mut engine), RunResult::Application(14));
}

// =============================================================================
// 4. Snapshots
// =============================================================================

#[test]
fn snapshot_restores_to_the_same_outcome() {
    let mut img = Image::new();
    img.pushi(4)
        .pushi(3)
        .op(OpCode::Multiply)
        .pushi(2)
        .op(OpCode::Add)
        .exit_with_top()
        .end();

    let mut engine = new_engine();
    engine.add_code(img.bytes());
    engine.seal();
    for _ in 0..3 {
        assert_eq!(engine.step(), RunResult::Ok);
    }
    let snapshot = engine.snapshot().unwrap();

    let mut restored = Engine::restore(&snapshot, app_spec()).unwrap();
    assert_eq!(restored.program_counter(), engine.program_counter());

    let original = drive(&mut engine);
    let resumed = drive(&mut restored);
    assert_eq!(original, resumed);
    assert_eq!(original, RunResult::Application(14));
    assert_eq!(restored.low_free_count(), engine.low_free_count());
}

#[test]
fn restore_rejects_a_mismatched_spec() {
    let mut img = Image::new();
    img.end();
    let (engine, _) = run_image(&img);
    let snapshot = engine.snapshot().unwrap();
    let wrong = AppSpec::empty(CHECK_VALUE ^ 1);
    assert!(Engine::restore(&snapshot, wrong).is_err());
}

// =============================================================================
// 5. Tracing
// =============================================================================

#[test]
fn recording_tracer_sees_every_instruction() {
    let mut img = Image::new();
    img.pushi(1).op(OpCode::Pop).end();

    let tracer = RecordingTracer::new();
    let mut engine = new_engine();
    engine.set_tracer(Box::new(tracer.clone()));
    engine.add_code(img.bytes());
    engine.seal();
    drive(&mut engine);

    let opcodes: Vec<OpCode> = tracer.records().iter().map(|&(_, op)| op).collect();
    assert_eq!(opcodes, vec![OpCode::PushInteger1, OpCode::Pop, OpCode::End]);
}
