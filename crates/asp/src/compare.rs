//! The comparator: one total entry point for all object comparisons.
//!
//! Four modes share the machinery. Equality serves `==`/`!=` and
//! membership, relational serves the ordering operators, key gives the
//! total order that set and dictionary trees sort by, and order is the
//! observable object ordering. Containers are compared element-wise
//! without native recursion: pending pairs ride the work stack, the left
//! side in the entry's value slot and the right side in its auxiliary
//! slot.

use std::cmp::Ordering;

use crate::{
    engine::Engine,
    heap::{DataKind, EntryData, FunctionTarget, HeapId},
    result::{EngineResult, RunResult, engine_assert},
};

/// Comparison mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CompareKind {
    /// Value equality (`==`, `!=`, membership).
    Equality,
    /// Ordering operators (`<`, `<=`, `>`, `>=`).
    Relational,
    /// Total order for tree keys; rejects mutable keys.
    Key,
    /// Observable object order; total across all kinds.
    Order,
}

/// Byte cursor over a string's fragment chain.
struct StringCursor {
    string: HeapId,
    element: Option<HeapId>,
    offset: usize,
}

impl StringCursor {
    fn start(engine: &Engine, string: HeapId) -> EngineResult<Self> {
        let first = engine.sequence_next(string, None, true)?;
        Ok(Self {
            string,
            element: first.element,
            offset: 0,
        })
    }

    fn next(&mut self, engine: &Engine) -> EngineResult<Option<u8>> {
        while let Some(element) = self.element {
            let EntryData::Element { value, .. } = *engine.heap.data(element) else {
                return Err(RunResult::InternalError);
            };
            let EntryData::StringFragment(fragment) = engine.heap.data(value) else {
                return Err(RunResult::InternalError);
            };
            if self.offset < fragment.as_slice().len() {
                let byte = fragment.as_slice()[self.offset];
                self.offset += 1;
                return Ok(Some(byte));
            }
            self.element = engine.sequence_next(self.string, Some(element), true)?.element;
            self.offset = 0;
        }
        Ok(None)
    }
}

/// Float ordering with the NaN policy.
///
/// Outside key/order modes a NaN operand is only flagged; the raw IEEE
/// outcome (never equal, never less) is returned. In key/order modes
/// NaNs sort before every number, and two NaNs order by bit pattern so
/// tree keys stay deterministic.
fn compare_floats(left: f64, right: f64, kind: CompareKind, nan_detected: &mut bool) -> Ordering {
    let left_nan = left.is_nan();
    let right_nan = right.is_nan();
    let any_nan = left_nan || right_nan;
    if !matches!(kind, CompareKind::Key | CompareKind::Order) || !any_nan {
        *nan_detected = *nan_detected || any_nan;
        return if left == right {
            Ordering::Equal
        } else if left < right {
            Ordering::Less
        } else {
            Ordering::Greater
        };
    }
    if left_nan != right_nan {
        return if left_nan { Ordering::Less } else { Ordering::Greater };
    }
    left.to_bits().cmp(&right.to_bits())
}

fn numeric_int(data: &EntryData) -> Option<i32> {
    match data {
        EntryData::Boolean(b) => Some(i32::from(*b)),
        EntryData::Integer(v) => Some(*v),
        _ => None,
    }
}

fn is_numeric_kind(kind: DataKind) -> bool {
    matches!(kind, DataKind::Boolean | DataKind::Integer | DataKind::Float)
}

impl Engine {
    /// Compares two objects, returning the ordering and whether a NaN
    /// was involved.
    pub(crate) fn compare(
        &mut self,
        left: HeapId,
        right: HeapId,
        kind: CompareKind,
    ) -> EngineResult<(Ordering, bool)> {
        engine_assert(self.heap.kind(left).is_object())?;
        engine_assert(self.heap.kind(right).is_object())?;

        let start_top = self.stack_top;
        let mut comparison = Ordering::Equal;
        let mut nan_detected = false;
        let (mut left, mut right) = (left, right);
        let mut left_cursor: Option<HeapId> = None;
        let mut right_cursor: Option<HeapId> = None;

        let mut iterations: u32 = 0;
        loop {
            iterations += 1;
            if iterations > self.cycle_detection_limit {
                return Err(RunResult::CycleDetected);
            }

            let left_kind = self.heap.kind(left);
            let right_kind = self.heap.kind(right);
            if left_kind != right_kind {
                comparison = self.compare_mixed(left, right, kind, &mut nan_detected)?;
            } else {
                match kind {
                    CompareKind::Relational
                        if matches!(
                            left_kind,
                            DataKind::Range
                                | DataKind::Set
                                | DataKind::Dictionary
                                | DataKind::Iterator
                                | DataKind::Function
                                | DataKind::Module
                                | DataKind::Type
                        ) =>
                    {
                        return Err(RunResult::UnexpectedType);
                    }
                    CompareKind::Key
                        if matches!(
                            left_kind,
                            DataKind::List | DataKind::Set | DataKind::Dictionary | DataKind::Iterator
                        ) =>
                    {
                        return Err(RunResult::UnexpectedType);
                    }
                    _ => {}
                }

                if left != right {
                    comparison = self.compare_same_kind(
                        left,
                        right,
                        kind,
                        left_cursor,
                        right_cursor,
                        &mut left_cursor,
                        &mut right_cursor,
                        &mut nan_detected,
                    )?;
                } else if left_kind == DataKind::Float {
                    // Same entry, but NaN breaks reflexivity.
                    let (EntryData::Float(l), EntryData::Float(r)) = (self.heap.data(left), self.heap.data(right))
                    else {
                        return Err(RunResult::InternalError);
                    };
                    comparison = compare_floats(*l, *r, kind, &mut nan_detected);
                }
            }

            if comparison != Ordering::Equal || nan_detected || self.stack_top == start_top {
                break;
            }

            // Resume the deferred pair on top of the stack.
            let right_pair = self.top_value2()?;
            engine_assert(right_pair.is_some())?;
            let left_item = self.top()?;
            self.pop_no_erase()?;
            match self.heap.kind(left_item) {
                // A cursor pair: restore the iteration and fetch the
                // containers beneath it.
                DataKind::Element | DataKind::SetNode | DataKind::DictionaryNode => {
                    left_cursor = Some(left_item);
                    right_cursor = right_pair;
                    let containers_right = self.top_value2()?;
                    engine_assert(containers_right.is_some())?;
                    left = self.top()?;
                    right = containers_right.ok_or(RunResult::InternalError)?;
                    self.pop_no_erase()?;
                }
                _ => {
                    left = left_item;
                    right = right_pair.ok_or(RunResult::InternalError)?;
                    left_cursor = None;
                    right_cursor = None;
                }
            }
        }

        // Unwind whatever comparison state remains parked.
        let mut iterations: u32 = 0;
        while self.stack_top != start_top {
            iterations += 1;
            if iterations > self.cycle_detection_limit {
                return Err(RunResult::CycleDetected);
            }
            self.pop_no_erase()?;
        }

        Ok((comparison, nan_detected))
    }

    /// Ordering of two objects of different kinds.
    fn compare_mixed(
        &mut self,
        left: HeapId,
        right: HeapId,
        kind: CompareKind,
        nan_detected: &mut bool,
    ) -> EngineResult<Ordering> {
        let left_kind = self.heap.kind(left);
        let right_kind = self.heap.kind(right);
        if matches!(kind, CompareKind::Key | CompareKind::Order) {
            return Ok((left_kind as u8).cmp(&(right_kind as u8)));
        }
        if is_numeric_kind(left_kind) && is_numeric_kind(right_kind) {
            let left_data = self.heap.data(left);
            let right_data = self.heap.data(right);
            return Ok(match (numeric_int(left_data), numeric_int(right_data)) {
                (Some(l), Some(r)) => l.cmp(&r),
                _ => {
                    let to_float = |data: &EntryData| match data {
                        EntryData::Float(v) => *v,
                        other => f64::from(numeric_int(other).unwrap_or(0)),
                    };
                    compare_floats(to_float(left_data), to_float(right_data), kind, nan_detected)
                }
            });
        }
        if kind == CompareKind::Equality {
            // Different kinds are simply unequal.
            return Ok(Ordering::Greater);
        }
        Err(RunResult::UnexpectedType)
    }

    /// Ordering of two distinct objects of the same kind. Container
    /// comparisons defer one element pair per call onto the work stack.
    #[allow(clippy::too_many_arguments)]
    fn compare_same_kind(
        &mut self,
        left: HeapId,
        right: HeapId,
        kind: CompareKind,
        left_cursor: Option<HeapId>,
        right_cursor: Option<HeapId>,
        left_cursor_out: &mut Option<HeapId>,
        right_cursor_out: &mut Option<HeapId>,
        nan_detected: &mut bool,
    ) -> EngineResult<Ordering> {
        match self.heap.kind(left) {
            DataKind::None | DataKind::Ellipsis => Ok(Ordering::Equal),

            DataKind::Boolean => {
                let (EntryData::Boolean(l), EntryData::Boolean(r)) = (self.heap.data(left), self.heap.data(right))
                else {
                    return Err(RunResult::InternalError);
                };
                Ok(l.cmp(r))
            }
            DataKind::Integer => {
                let (EntryData::Integer(l), EntryData::Integer(r)) = (self.heap.data(left), self.heap.data(right))
                else {
                    return Err(RunResult::InternalError);
                };
                Ok(l.cmp(r))
            }
            DataKind::Float => {
                let (EntryData::Float(l), EntryData::Float(r)) = (self.heap.data(left), self.heap.data(right)) else {
                    return Err(RunResult::InternalError);
                };
                Ok(compare_floats(*l, *r, kind, nan_detected))
            }

            DataKind::Range => {
                let l = self.get_range(left)?;
                let r = self.get_range(right)?;
                Ok(if l.bounded != r.bounded {
                    if l.bounded { Ordering::Less } else { Ordering::Greater }
                } else if l.start != r.start {
                    l.start.cmp(&r.start)
                } else if l.end != r.end {
                    l.end.cmp(&r.end)
                } else {
                    l.step.cmp(&r.step)
                })
            }

            DataKind::String => self.compare_strings(left, right),

            DataKind::Tuple | DataKind::List => {
                if matches!(kind, CompareKind::Key | CompareKind::Order) {
                    let l_count = self.heap.data(left).as_sequence().ok_or(RunResult::InternalError)?.count;
                    let r_count = self.heap.data(right).as_sequence().ok_or(RunResult::InternalError)?.count;
                    if l_count != r_count {
                        return Ok(l_count.cmp(&r_count));
                    }
                }
                let left_next = self.sequence_next(left, left_cursor, true)?;
                let right_next = self.sequence_next(right, right_cursor, true)?;
                *left_cursor_out = left_next.element;
                *right_cursor_out = right_next.element;
                match (left_next.element, right_next.element) {
                    (None, None) => Ok(Ordering::Equal),
                    (None, Some(_)) => Ok(Ordering::Less),
                    (Some(_), None) => Ok(Ordering::Greater),
                    (Some(left_element), Some(right_element)) => {
                        // Defer the element comparison to the next loop
                        // iteration: containers, cursors, then values.
                        let containers = self.push_no_use(left)?;
                        self.set_entry_value2(containers, Some(right))?;
                        let cursors = self.push_no_use(left_element)?;
                        self.set_entry_value2(cursors, Some(right_element))?;
                        let left_value = left_next.value.ok_or(RunResult::InternalError)?;
                        let right_value = right_next.value.ok_or(RunResult::InternalError)?;
                        let values = self.push_no_use(left_value)?;
                        self.set_entry_value2(values, Some(right_value))?;
                        Ok(Ordering::Equal)
                    }
                }
            }

            DataKind::Set | DataKind::Dictionary => {
                let is_dictionary = self.heap.kind(left) == DataKind::Dictionary;
                if kind == CompareKind::Order {
                    let l_count = self.heap.data(left).as_tree().ok_or(RunResult::InternalError)?.count;
                    let r_count = self.heap.data(right).as_tree().ok_or(RunResult::InternalError)?.count;
                    if l_count != r_count {
                        return Ok(l_count.cmp(&r_count));
                    }
                }
                let left_next = self.tree_next(left, left_cursor)?;
                let right_next = self.tree_next(right, right_cursor)?;
                *left_cursor_out = left_next.node;
                *right_cursor_out = right_next.node;
                match (left_next.node, right_next.node) {
                    (None, None) => Ok(Ordering::Equal),
                    (None, Some(_)) => Ok(Ordering::Less),
                    (Some(_), None) => Ok(Ordering::Greater),
                    (Some(left_node), Some(right_node)) => {
                        let containers = self.push_no_use(left)?;
                        self.set_entry_value2(containers, Some(right))?;
                        let cursors = self.push_no_use(left_node)?;
                        self.set_entry_value2(cursors, Some(right_node))?;
                        let left_key = left_next.key.ok_or(RunResult::InternalError)?;
                        let right_key = right_next.key.ok_or(RunResult::InternalError)?;
                        let keys = self.push_no_use(left_key)?;
                        self.set_entry_value2(keys, Some(right_key))?;
                        if is_dictionary {
                            let left_value = left_next.value.ok_or(RunResult::InternalError)?;
                            let right_value = right_next.value.ok_or(RunResult::InternalError)?;
                            let values = self.push_no_use(left_value)?;
                            self.set_entry_value2(values, Some(right_value))?;
                        }
                        Ok(Ordering::Equal)
                    }
                }
            }

            DataKind::Iterator => {
                let (
                    EntryData::Iterator {
                        iterable: li,
                        member: lm,
                        string_index: ls,
                        ..
                    },
                    EntryData::Iterator {
                        iterable: ri,
                        member: rm,
                        string_index: rs,
                        ..
                    },
                ) = (self.heap.data(left), self.heap.data(right))
                else {
                    return Err(RunResult::InternalError);
                };
                Ok(if li == ri && lm == rm && ls == rs {
                    Ordering::Equal
                } else {
                    Ordering::Greater
                })
            }

            DataKind::Function => {
                let (EntryData::Function { target: lt, .. }, EntryData::Function { target: rt, .. }) =
                    (self.heap.data(left), self.heap.data(right))
                else {
                    return Err(RunResult::InternalError);
                };
                Ok(match (lt, rt) {
                    (FunctionTarget::Script { code_address: l }, FunctionTarget::Script { code_address: r }) => {
                        l.cmp(r)
                    }
                    (FunctionTarget::App { symbol: l }, FunctionTarget::App { symbol: r }) => l.cmp(r),
                    (FunctionTarget::Script { .. }, FunctionTarget::App { .. }) => Ordering::Less,
                    (FunctionTarget::App { .. }, FunctionTarget::Script { .. }) => Ordering::Greater,
                })
            }

            DataKind::Module => {
                let (EntryData::Module { code_address: l, .. }, EntryData::Module { code_address: r, .. }) =
                    (self.heap.data(left), self.heap.data(right))
                else {
                    return Err(RunResult::InternalError);
                };
                Ok(l.cmp(r))
            }

            DataKind::Type => {
                let (EntryData::Type(l), EntryData::Type(r)) = (self.heap.data(left), self.heap.data(right)) else {
                    return Err(RunResult::InternalError);
                };
                Ok((*l as u8).cmp(&(*r as u8)))
            }

            _ => Err(RunResult::InternalError),
        }
    }

    /// Byte-lexicographic string ordering; a shorter prefix sorts first.
    fn compare_strings(&self, left: HeapId, right: HeapId) -> EngineResult<Ordering> {
        let mut left_cursor = StringCursor::start(self, left)?;
        let mut right_cursor = StringCursor::start(self, right)?;
        let mut iterations: u32 = 0;
        loop {
            iterations += 1;
            if iterations > self.cycle_detection_limit {
                return Err(RunResult::CycleDetected);
            }
            match (left_cursor.next(self)?, right_cursor.next(self)?) {
                (None, None) => return Ok(Ordering::Equal),
                (None, Some(_)) => return Ok(Ordering::Less),
                (Some(_), None) => return Ok(Ordering::Greater),
                (Some(l), Some(r)) => {
                    if l != r {
                        return Ok(l.cmp(&r));
                    }
                }
            }
        }
    }
}
