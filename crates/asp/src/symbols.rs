//! Reserved symbols shared between the compiler toolchain and the engine.

/// Symbol of the system module (`sys`).
pub const SYSTEM_MODULE_SYMBOL: i32 = 0;

/// Symbol of the command line arguments tuple (`sys.args`).
pub const SYSTEM_ARGUMENTS_SYMBOL: i32 = 1;

/// Symbol of the main module (`__main__`).
pub const SYSTEM_MAIN_MODULE_SYMBOL: i32 = 2;

/// First symbol available to application functions and script names.
pub const SCRIPT_SYMBOL_BASE: i32 = 3;

/// Returns true for symbols the engine assigns itself.
#[must_use]
pub fn is_symbol_reserved(symbol: i32) -> bool {
    matches!(
        symbol,
        SYSTEM_MODULE_SYMBOL | SYSTEM_ARGUMENTS_SYMBOL | SYSTEM_MAIN_MODULE_SYMBOL
    )
}
