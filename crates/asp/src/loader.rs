//! Image loading: header validation and code append.
//!
//! A compiled image starts with a 12-byte header (the `"AspE"`
//! signature, four version bytes, and a big-endian check value that must
//! match the application spec) followed by the instruction stream. The
//! header may arrive split across any number of [`Engine::add_code`]
//! calls; instruction bytes are appended verbatim once it validates.

use crate::{
    engine::Engine,
    result::{EngineState, LoadResult, RunResult},
};

/// Image header size: signature, version, check value.
pub(crate) const HEADER_SIZE: usize = 12;

const SIGNATURE: [u8; 4] = *b"AspE";

/// Engine version stamped into compatible images (major, minor, patch,
/// tweak). Images must match the major version.
pub const ENGINE_VERSION: [u8; 4] = [0, 7, 0, 0];

impl Engine {
    /// Feeds a chunk of a compiled image to the engine.
    ///
    /// Any failure latches the load-error state; further chunks are
    /// refused with the same result until [`Engine::reset`].
    pub fn add_code(&mut self, mut chunk: &[u8]) -> LoadResult {
        match self.state {
            EngineState::LoadError => return self.load_result,
            EngineState::Reset => {
                self.state = EngineState::LoadingHeader;
                self.header_index = 0;
            }
            EngineState::LoadingHeader | EngineState::LoadingCode => {}
            _ => return LoadResult::InvalidState,
        }

        if self.state == EngineState::LoadingHeader {
            while self.header_index < HEADER_SIZE && !chunk.is_empty() {
                self.header[self.header_index] = chunk[0];
                self.header_index += 1;
                chunk = &chunk[1..];

                if self.header_index == HEADER_SIZE {
                    if self.header[0..4] != SIGNATURE {
                        return self.fail_load(LoadResult::InvalidFormat);
                    }
                    if self.header[4] != ENGINE_VERSION[0] {
                        return self.fail_load(LoadResult::InvalidVersion);
                    }
                    let mut check = [0u8; 4];
                    check.copy_from_slice(&self.header[8..12]);
                    if u32::from_be_bytes(check) != self.app_spec.check_value() {
                        return self.fail_load(LoadResult::InvalidCheckValue);
                    }
                    self.state = EngineState::LoadingCode;
                }
            }
            if self.state == EngineState::LoadingHeader {
                // Waiting for the rest of the header.
                return self.load_result;
            }
        }

        if self.code.len() + chunk.len() > self.code_capacity {
            return self.fail_load(LoadResult::OutOfCodeMemory);
        }
        self.code.extend_from_slice(chunk);
        self.load_result
    }

    /// Finalizes loading; the engine becomes ready to step.
    pub fn seal(&mut self) -> LoadResult {
        if self.state != EngineState::LoadingCode {
            return self.fail_load(LoadResult::InvalidFormat);
        }
        self.state = EngineState::Ready;
        self.run_result = RunResult::Ok;
        self.load_result
    }

    /// The latched load result.
    #[must_use]
    pub fn load_result(&self) -> LoadResult {
        self.load_result
    }

    fn fail_load(&mut self, result: LoadResult) -> LoadResult {
        self.state = EngineState::LoadError;
        self.load_result = result;
        result
    }
}
