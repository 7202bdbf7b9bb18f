//! Range resolution: start/end/step defaults and the end-of-range test.

use crate::{
    engine::Engine,
    heap::{EntryData, HeapId},
    result::{EngineResult, RunResult},
};

/// A range's resolved components.
///
/// A missing start defaults to 0 and a missing step to 1. A missing end
/// leaves the range unbounded: `end` then reads 0 and `bounded` is false,
/// and iteration never reaches an end on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct RangeParts {
    pub start: i32,
    pub end: i32,
    pub step: i32,
    pub bounded: bool,
}

impl RangeParts {
    /// True when `value` has crossed the end in the step direction.
    pub fn is_at_end(&self, value: i32) -> bool {
        if !self.bounded {
            return false;
        }
        if self.step > 0 {
            value >= self.end
        } else if self.step < 0 {
            value <= self.end
        } else {
            true
        }
    }
}

impl Engine {
    /// Resolves a range entry's components.
    pub(crate) fn get_range(&self, range: HeapId) -> EngineResult<RangeParts> {
        let EntryData::Range { start, end, step } = *self.heap.data(range) else {
            return Err(RunResult::UnexpectedType);
        };
        let read = |child: Option<HeapId>, default: i32| -> EngineResult<i32> {
            match child {
                Some(id) => match self.heap.data(id) {
                    EntryData::Integer(v) => Ok(*v),
                    _ => Err(RunResult::UnexpectedType),
                },
                None => Ok(default),
            }
        };
        Ok(RangeParts {
            start: read(start, 0)?,
            end: read(end, 0)?,
            step: read(step, 1)?,
            bounded: end.is_some(),
        })
    }
}
