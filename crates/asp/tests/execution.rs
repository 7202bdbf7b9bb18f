//! End-to-end execution tests over hand-assembled images.
//!
//! Each test assembles a small program the way the script compiler
//! would, runs it to its terminal result, and checks the outcome (most
//! often an application exit code produced through the host's `exit`).

mod common;

use asp::{EngineState, OpCode, RunResult};
use common::{EXIT_SYMBOL, Image, LEN_SYMBOL, RECORD_SYMBOL, drive, new_engine, run_image};

const X: u8 = 10;
const D: u8 = 11;
const F: u8 = 12;
const S: u8 = 13;
const T: u8 = 14;
const ACC: u8 = 15;
const Y: u8 = 16;
const MOD: u8 = 17;
const A: u8 = 20;
const B: u8 = 21;
const R: u8 = 22;
const K: u8 = 23;
const NAMED_X: u8 = 24;

// =============================================================================
// 1. Arithmetic and exit codes
// =============================================================================

/// x = 2 + 3 * 4; exit(x)
#[test]
fn arithmetic_exits_with_fourteen() {
    let mut img = Image::new();
    img.pushi(4)
        .pushi(3)
        .op(OpCode::Multiply)
        .pushi(2)
        .op(OpCode::Add)
        .store(X)
        .op(OpCode::PushArgumentList)
        .ld(X)
        .arg()
        .ld(EXIT_SYMBOL)
        .op(OpCode::Call)
        .end();
    let (engine, result) = run_image(&img);
    assert_eq!(result, RunResult::Application(14));
    assert_eq!(engine.state(), EngineState::RunError);
}

#[test]
fn division_by_zero_halts_the_run() {
    let mut img = Image::new();
    img.pushi(0).pushi(1).op(OpCode::Divide).end();
    let (_, result) = run_image(&img);
    assert_eq!(result, RunResult::DivideByZero);
}

// =============================================================================
// 2. Dictionaries
// =============================================================================

/// d = {"a": 1, "b": 2}; del d["a"]; exit(len(d))
#[test]
fn dictionary_erase_leaves_one_entry() {
    let mut img = Image::new();
    img.op(OpCode::PushDictionary)
        .pushi(1)
        .pushs("a")
        .op(OpCode::MakeDictionaryEntry)
        .op(OpCode::Build)
        .pushi(2)
        .pushs("b")
        .op(OpCode::MakeDictionaryEntry)
        .op(OpCode::Build)
        .store(D)
        .ld(D)
        .pushs("a")
        .op(OpCode::Erase)
        .op(OpCode::PushArgumentList)
        .op(OpCode::PushArgumentList)
        .ld(D)
        .arg()
        .ld(LEN_SYMBOL)
        .op(OpCode::Call)
        .arg()
        .ld(EXIT_SYMBOL)
        .op(OpCode::Call)
        .end();
    let (_, result) = run_image(&img);
    assert_eq!(result, RunResult::Application(1));
}

#[test]
fn dictionary_index_address_creates_then_index_reads() {
    let mut img = Image::new();
    img.op(OpCode::PushDictionary)
        .store(D)
        .pushi(3)
        .ld(D)
        .pushs("a")
        .op(OpCode::IndexAddress)
        .op(OpCode::SetPop)
        .ld(D)
        .pushs("a")
        .op(OpCode::Index)
        .exit_with_top()
        .end();
    let (_, result) = run_image(&img);
    assert_eq!(result, RunResult::Application(3));
}

#[test]
fn missing_dictionary_key_is_reported() {
    let mut img = Image::new();
    img.op(OpCode::PushDictionary)
        .store(D)
        .ld(D)
        .pushs("zz")
        .op(OpCode::Index)
        .end();
    let (_, result) = run_image(&img);
    assert_eq!(result, RunResult::KeyNotFound);
}

// =============================================================================
// 3. Script functions and group parameters
// =============================================================================

/// def f(a, b=10, *r, **k): return a + b + len(r) + len(k)
/// exit(f(1, 2, 3, 4, x=5))   ->  1 + 2 + 2 + 1
#[test]
fn group_parameters_bind_spillover() {
    let mut img = Image::new();
    img.op(OpCode::Jump);
    let skip = img.placeholder();

    let body = img.pos();
    img.op(OpCode::PushArgumentList)
        .ld(K)
        .arg()
        .ld(LEN_SYMBOL)
        .op(OpCode::Call)
        .op(OpCode::PushArgumentList)
        .ld(R)
        .arg()
        .ld(LEN_SYMBOL)
        .op(OpCode::Call)
        .op(OpCode::Add)
        .ld(B)
        .op(OpCode::Add)
        .ld(A)
        .op(OpCode::Add)
        .op(OpCode::Return);

    let after = img.pos();
    img.patch(skip, after);
    img.op(OpCode::PushParameterList)
        .op(OpCode::MakeParameter1)
        .byte(A)
        .op(OpCode::Build)
        .pushi(10)
        .op(OpCode::MakeDefaultParameter1)
        .byte(B)
        .op(OpCode::Build)
        .op(OpCode::MakeTupleGroupParameter1)
        .byte(R)
        .op(OpCode::Build)
        .op(OpCode::MakeDictionaryGroupParameter1)
        .byte(K)
        .op(OpCode::Build)
        .op(OpCode::PushCodeAddress)
        .word(body)
        .op(OpCode::MakeFunction)
        .store(F)
        .op(OpCode::PushArgumentList)
        .op(OpCode::PushArgumentList)
        .pushi(1)
        .arg()
        .pushi(2)
        .arg()
        .pushi(3)
        .arg()
        .pushi(4)
        .arg()
        .pushi(5)
        .op(OpCode::MakeNamedArgument1)
        .byte(NAMED_X)
        .op(OpCode::Build)
        .ld(F)
        .op(OpCode::Call)
        .arg()
        .ld(EXIT_SYMBOL)
        .op(OpCode::Call)
        .end();
    let (_, result) = run_image(&img);
    assert_eq!(result, RunResult::Application(6));
}

/// Default parameters fill in when a call leaves them unbound.
#[test]
fn defaults_apply_when_arguments_are_short() {
    let mut img = Image::new();
    img.op(OpCode::Jump);
    let skip = img.placeholder();

    let body = img.pos();
    img.ld(B).ld(A).op(OpCode::Add).op(OpCode::Return);

    let after = img.pos();
    img.patch(skip, after);
    img.op(OpCode::PushParameterList)
        .op(OpCode::MakeParameter1)
        .byte(A)
        .op(OpCode::Build)
        .pushi(10)
        .op(OpCode::MakeDefaultParameter1)
        .byte(B)
        .op(OpCode::Build)
        .op(OpCode::PushCodeAddress)
        .word(body)
        .op(OpCode::MakeFunction)
        .store(F)
        .op(OpCode::PushArgumentList)
        .op(OpCode::PushArgumentList)
        .pushi(7)
        .arg()
        .ld(F)
        .op(OpCode::Call)
        .arg()
        .ld(EXIT_SYMBOL)
        .op(OpCode::Call)
        .end();
    let (_, result) = run_image(&img);
    assert_eq!(result, RunResult::Application(17));
}

/// global overrides write through to the module scope.
#[test]
fn global_override_writes_the_module_variable() {
    let mut img = Image::new();
    img.pushi(1).store(X);

    img.op(OpCode::Jump);
    let skip = img.placeholder();
    let body = img.pos();
    img.op(OpCode::Global1)
        .byte(X)
        .pushi(7)
        .store(X)
        .op(OpCode::PushNone)
        .op(OpCode::Return);

    let after = img.pos();
    img.patch(skip, after);
    img.op(OpCode::PushParameterList)
        .op(OpCode::PushCodeAddress)
        .word(body)
        .op(OpCode::MakeFunction)
        .store(F)
        .op(OpCode::PushArgumentList)
        .ld(F)
        .op(OpCode::Call)
        .op(OpCode::Pop)
        .ld(X)
        .exit_with_top()
        .end();
    let (_, result) = run_image(&img);
    assert_eq!(result, RunResult::Application(7));
}

// =============================================================================
// 4. Iteration
// =============================================================================

/// s = "ab"; t = ""; for c in s: t = t + c; exit(len(t))
#[test]
fn string_iteration_rebuilds_the_string() {
    let mut img = Image::new();
    img.pushs("ab")
        .store(S)
        .op(OpCode::PushString0)
        .store(T)
        .ld(S)
        .op(OpCode::StartIterator);

    let loop_top = img.pos();
    img.op(OpCode::TestIterator).op(OpCode::JumpFalse);
    let to_end = img.placeholder();
    img.op(OpCode::DerefIterator)
        .ld(T)
        .op(OpCode::Add)
        .store(T)
        .op(OpCode::NextIterator)
        .op(OpCode::Jump);
    let back = img.placeholder();
    img.patch(back, loop_top);

    let loop_end = img.pos();
    img.patch(to_end, loop_end);
    img.op(OpCode::Pop)
        .op(OpCode::PushArgumentList)
        .op(OpCode::PushArgumentList)
        .ld(T)
        .arg()
        .ld(LEN_SYMBOL)
        .op(OpCode::Call)
        .arg()
        .ld(EXIT_SYMBOL)
        .op(OpCode::Call)
        .end();
    let (_, result) = run_image(&img);
    assert_eq!(result, RunResult::Application(2));
}

/// Iterating 0..5:2 sums to 6.
#[test]
fn range_iteration_sums_stepped_values() {
    let mut img = Image::new();
    img.pushi(0)
        .store(ACC)
        .pushi(2)
        .pushi(5)
        .pushi(0)
        .op(OpCode::MakeRangeFull)
        .op(OpCode::StartIterator);

    let loop_top = img.pos();
    img.op(OpCode::TestIterator).op(OpCode::JumpFalse);
    let to_end = img.placeholder();
    img.op(OpCode::DerefIterator)
        .ld(ACC)
        .op(OpCode::Add)
        .store(ACC)
        .op(OpCode::NextIterator)
        .op(OpCode::Jump);
    let back = img.placeholder();
    img.patch(back, loop_top);

    let loop_end = img.pos();
    img.patch(to_end, loop_end);
    img.op(OpCode::Pop).ld(ACC).exit_with_top().end();
    let (_, result) = run_image(&img);
    assert_eq!(result, RunResult::Application(6));
}

#[test]
fn zero_step_range_construction_is_rejected() {
    let mut img = Image::new();
    img.pushi(0).pushi(5).pushi(0).op(OpCode::MakeRangeFull).end();
    let (_, result) = run_image(&img);
    assert_eq!(result, RunResult::ValueOutOfRange);
}

// =============================================================================
// 5. Control flow
// =============================================================================

#[test]
fn logical_or_keeps_the_deciding_operand() {
    for (first, expected) in [(0i8, 5u32), (7, 7)] {
        let mut img = Image::new();
        img.pushi(first).op(OpCode::LogicalOr);
        let short = img.placeholder();
        img.pushi(5);
        let after = img.pos();
        img.patch(short, after);
        img.exit_with_top().end();
        let (_, result) = run_image(&img);
        assert_eq!(result, RunResult::Application(expected), "{first} or 5");
    }
}

#[test]
fn logical_and_keeps_the_deciding_operand() {
    for (first, expected) in [(0i8, 0u32), (7, 5)] {
        let mut img = Image::new();
        img.pushi(first).op(OpCode::LogicalAnd);
        let short = img.placeholder();
        img.pushi(5);
        let after = img.pos();
        img.patch(short, after);
        img.exit_with_top().end();
        let (_, result) = run_image(&img);
        assert_eq!(result, RunResult::Application(expected), "{first} and 5");
    }
}

#[test]
fn conditional_selects_by_truth() {
    for (condition, expected) in [(1i8, 30u32), (0, 40)] {
        let mut img = Image::new();
        img.pushi(40).pushi(30).pushi(condition).op(OpCode::Conditional);
        img.exit_with_top().end();
        let (_, result) = run_image(&img);
        assert_eq!(result, RunResult::Application(expected));
    }
}

// =============================================================================
// 6. Modules
// =============================================================================

/// A module body runs exactly once; its members are reachable after.
#[test]
fn module_loads_once_and_exposes_members() {
    let mut img = Image::new();
    img.op(OpCode::Jump);
    let skip = img.placeholder();

    let body = img.pos();
    img.op(OpCode::PushArgumentList)
        .pushi(9)
        .arg()
        .ld(RECORD_SYMBOL)
        .op(OpCode::Call)
        .op(OpCode::Pop)
        .pushi(9)
        .store(Y)
        .op(OpCode::ExitModule);

    let main = img.pos();
    img.patch(skip, main);
    img.op(OpCode::AddModule1)
        .byte(MOD)
        .word(body)
        .op(OpCode::LoadModule1)
        .byte(MOD)
        .op(OpCode::LoadModule1)
        .byte(MOD)
        .op(OpCode::PushModule1)
        .byte(MOD)
        .op(OpCode::Member1)
        .byte(Y)
        .exit_with_top()
        .end();

    let mut engine = new_engine();
    engine.set_context(Box::new(Vec::<String>::new()));
    assert_eq!(engine.add_code(img.bytes()), asp::LoadResult::Ok);
    assert_eq!(engine.seal(), asp::LoadResult::Ok);
    let result = drive(&mut engine);
    assert_eq!(result, RunResult::Application(9));
    let log = engine.context::<Vec<String>>().unwrap();
    assert_eq!(log.len(), 1, "module body must run exactly once");
}

// =============================================================================
// 7. Unpacking assignment
// =============================================================================

/// a, b = (1, 2); exit(10 * a + b)
#[test]
fn tuple_unpacking_assigns_in_order() {
    let mut img = Image::new();
    img.op(OpCode::PushTuple)
        .pushi(1)
        .op(OpCode::Build)
        .pushi(2)
        .op(OpCode::Build)
        .op(OpCode::PushTuple)
        .lda(A)
        .op(OpCode::Build)
        .lda(B)
        .op(OpCode::Build)
        .op(OpCode::SetPop)
        .ld(B)
        .pushi(10)
        .ld(A)
        .op(OpCode::Multiply)
        .op(OpCode::Add)
        .exit_with_top()
        .end();
    let (_, result) = run_image(&img);
    assert_eq!(result, RunResult::Application(12));
}

#[test]
fn unpacking_shape_mismatch_is_reported() {
    let mut img = Image::new();
    img.op(OpCode::PushTuple)
        .pushi(1)
        .op(OpCode::Build)
        .pushi(2)
        .op(OpCode::Build)
        .pushi(3)
        .op(OpCode::Build)
        .op(OpCode::PushTuple)
        .lda(A)
        .op(OpCode::Build)
        .lda(B)
        .op(OpCode::Build)
        .op(OpCode::SetPop)
        .end();
    let (_, result) = run_image(&img);
    assert_eq!(result, RunResult::SequenceMismatch);
}

// =============================================================================
// 8. Termination and structural failures
// =============================================================================

#[test]
fn end_with_empty_stack_completes_exactly_once_then_sticks() {
    let mut img = Image::new();
    img.end();
    let (mut engine, result) = run_image(&img);
    assert_eq!(result, RunResult::Complete);
    assert_eq!(engine.state(), EngineState::Ended);
    assert!(!engine.is_running());
    assert_eq!(engine.step(), RunResult::Complete, "result is sticky");
    assert_eq!(engine.state(), EngineState::Ended);
}

#[test]
fn end_with_occupied_stack_is_invalid() {
    let mut img = Image::new();
    img.pushi(7).end();
    let (_, result) = run_image(&img);
    assert_eq!(result, RunResult::InvalidEnd);
}

#[test]
fn abort_reports_abort() {
    let mut img = Image::new();
    img.op(OpCode::Abort).end();
    let (_, result) = run_image(&img);
    assert_eq!(result, RunResult::Abort);
}

#[test]
fn running_off_the_code_is_detected() {
    let mut img = Image::new();
    img.pushi(1);
    let (_, result) = run_image(&img);
    assert_eq!(result, RunResult::BeyondEndOfCode);
}

#[test]
fn unassigned_opcode_byte_is_invalid() {
    let mut img = Image::new();
    img.byte(0x41).end();
    let (_, result) = run_image(&img);
    assert_eq!(result, RunResult::InvalidInstruction);
}

#[test]
fn unknown_name_is_reported() {
    let mut img = Image::new();
    img.ld(99).end();
    let (_, result) = run_image(&img);
    assert_eq!(result, RunResult::NameNotFound);
}

#[test]
fn sticky_error_does_not_advance() {
    let mut img = Image::new();
    img.ld(99).end();
    let (mut engine, result) = run_image(&img);
    assert_eq!(result, RunResult::NameNotFound);
    let pc = engine.program_counter();
    assert_eq!(engine.step(), RunResult::NameNotFound);
    assert_eq!(engine.program_counter(), pc);
}
