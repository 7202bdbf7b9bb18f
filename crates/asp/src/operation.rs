//! Value semantics of the unary and binary operators.
//!
//! Numeric operands promote through the boolean/integer/float family.
//! Integer `+ - *` wrap at 32 bits; `/` and `**` always produce floats;
//! `//` and `%` follow the floor convention, so the modulo result carries
//! the divisor's sign. Sequence `+` concatenates and sequence `*`
//! repeats, both into fresh containers.

use num_integer::Integer;

use crate::{
    compare::CompareKind,
    engine::Engine,
    heap::{DataKind, EntryData, HeapId, Sequence},
    opcode::OpCode,
    result::{EngineResult, RunResult, engine_assert},
};

fn is_sequence_operand(kind: DataKind) -> bool {
    matches!(kind, DataKind::String | DataKind::Tuple | DataKind::List)
}

fn numeric_int(data: &EntryData) -> Option<i32> {
    match data {
        EntryData::Boolean(b) => Some(i32::from(*b)),
        EntryData::Integer(v) => Some(*v),
        _ => None,
    }
}

impl Engine {
    /// The truth rule: `None`, numeric zero, and empty containers are
    /// false; everything else is true.
    pub(crate) fn is_true(&self, id: HeapId) -> EngineResult<bool> {
        Ok(match self.heap.data(id) {
            EntryData::None => false,
            EntryData::Boolean(b) => *b,
            EntryData::Integer(v) => *v != 0,
            EntryData::Float(v) => *v != 0.0,
            EntryData::String(s) | EntryData::Tuple(s) | EntryData::List(s) => s.count != 0,
            EntryData::Set(t) | EntryData::Dictionary(t) => t.count != 0,
            EntryData::Range { .. } => {
                let parts = self.get_range(id)?;
                !parts.is_at_end(parts.start)
            }
            _ => true,
        })
    }

    /// Applies a unary operator, returning a fresh result object.
    pub(crate) fn unary_operation(&mut self, op: OpCode, operand: HeapId) -> EngineResult<HeapId> {
        engine_assert(self.heap.kind(operand).is_object())?;
        match op {
            OpCode::LogicalNot => {
                let truth = self.is_true(operand)?;
                self.alloc(EntryData::Boolean(!truth))
            }
            OpCode::Positive => match *self.heap.data(operand) {
                EntryData::Boolean(b) => self.alloc(EntryData::Integer(i32::from(b))),
                EntryData::Integer(v) => self.alloc(EntryData::Integer(v)),
                EntryData::Float(v) => self.alloc(EntryData::Float(v)),
                _ => Err(RunResult::UnexpectedType),
            },
            OpCode::Negate => match *self.heap.data(operand) {
                EntryData::Boolean(b) => self.alloc(EntryData::Integer(-i32::from(b))),
                EntryData::Integer(v) => self.alloc(EntryData::Integer(v.wrapping_neg())),
                EntryData::Float(v) => self.alloc(EntryData::Float(-v)),
                _ => Err(RunResult::UnexpectedType),
            },
            OpCode::BitwiseNot => match *self.heap.data(operand) {
                EntryData::Boolean(b) => self.alloc(EntryData::Integer(!i32::from(b))),
                EntryData::Integer(v) => self.alloc(EntryData::Integer(!v)),
                _ => Err(RunResult::UnexpectedType),
            },
            _ => Err(RunResult::InvalidInstruction),
        }
    }

    /// Applies a binary operator, returning a fresh result object.
    pub(crate) fn binary_operation(&mut self, op: OpCode, left: HeapId, right: HeapId) -> EngineResult<HeapId> {
        engine_assert(self.heap.kind(left).is_object())?;
        engine_assert(self.heap.kind(right).is_object())?;
        let left_kind = self.heap.kind(left);
        let right_kind = self.heap.kind(right);

        match op {
            OpCode::BitOr | OpCode::BitXor | OpCode::BitAnd | OpCode::LeftShift | OpCode::RightShift => {
                self.bitwise_operation(op, left, right)
            }

            OpCode::Add if is_sequence_operand(left_kind) && is_sequence_operand(right_kind) => {
                if left_kind != right_kind {
                    return Err(RunResult::UnexpectedType);
                }
                self.concatenate(left, right)
            }

            OpCode::Multiply
                if is_sequence_operand(left_kind) && matches!(right_kind, DataKind::Boolean | DataKind::Integer) =>
            {
                let count = numeric_int(self.heap.data(right)).ok_or(RunResult::InternalError)?;
                self.repeat(left, count)
            }
            OpCode::Multiply
                if is_sequence_operand(right_kind) && matches!(left_kind, DataKind::Boolean | DataKind::Integer) =>
            {
                let count = numeric_int(self.heap.data(left)).ok_or(RunResult::InternalError)?;
                self.repeat(right, count)
            }

            OpCode::Add
            | OpCode::Subtract
            | OpCode::Multiply
            | OpCode::Divide
            | OpCode::FloorDivide
            | OpCode::Modulo
            | OpCode::Power => self.arithmetic_operation(op, left, right),

            OpCode::Equal | OpCode::NotEqual => {
                let (ordering, _) = self.compare(left, right, CompareKind::Equality)?;
                let equal = ordering == std::cmp::Ordering::Equal;
                self.alloc(EntryData::Boolean(if op == OpCode::Equal { equal } else { !equal }))
            }

            OpCode::Less | OpCode::LessOrEqual | OpCode::Greater | OpCode::GreaterOrEqual => {
                let (ordering, nan_detected) = self.compare(left, right, CompareKind::Relational)?;
                // Orderings involving a NaN are all false.
                let value = !nan_detected
                    && match op {
                        OpCode::Less => ordering == std::cmp::Ordering::Less,
                        OpCode::LessOrEqual => ordering != std::cmp::Ordering::Greater,
                        OpCode::Greater => ordering == std::cmp::Ordering::Greater,
                        _ => ordering != std::cmp::Ordering::Less,
                    };
                self.alloc(EntryData::Boolean(value))
            }

            OpCode::In | OpCode::NotIn => {
                let found = self.membership(left, right)?;
                self.alloc(EntryData::Boolean(if op == OpCode::In { found } else { !found }))
            }

            OpCode::Is | OpCode::IsNot => {
                let same = left == right;
                self.alloc(EntryData::Boolean(if op == OpCode::Is { same } else { !same }))
            }

            OpCode::Order => {
                let (ordering, _) = self.compare(left, right, CompareKind::Order)?;
                self.alloc(EntryData::Integer(match ordering {
                    std::cmp::Ordering::Less => -1,
                    std::cmp::Ordering::Equal => 0,
                    std::cmp::Ordering::Greater => 1,
                }))
            }

            _ => Err(RunResult::InvalidInstruction),
        }
    }

    fn bitwise_operation(&mut self, op: OpCode, left: HeapId, right: HeapId) -> EngineResult<HeapId> {
        let left_value = numeric_int(self.heap.data(left)).ok_or(RunResult::UnexpectedType)?;
        let right_value = numeric_int(self.heap.data(right)).ok_or(RunResult::UnexpectedType)?;
        let left_bits = left_value as u32;
        let bits = match op {
            OpCode::BitOr => left_bits | right_value as u32,
            OpCode::BitXor => left_bits ^ right_value as u32,
            OpCode::BitAnd => left_bits & right_value as u32,
            OpCode::LeftShift | OpCode::RightShift => {
                if right_value < 0 {
                    return Err(RunResult::ValueOutOfRange);
                }
                if right_value >= 32 {
                    // The operand is a 32-bit pattern; it shifts out.
                    0
                } else if op == OpCode::LeftShift {
                    left_bits << right_value
                } else {
                    left_bits >> right_value
                }
            }
            _ => return Err(RunResult::InvalidInstruction),
        };
        self.alloc(EntryData::Integer(bits as i32))
    }

    fn arithmetic_operation(&mut self, op: OpCode, left: HeapId, right: HeapId) -> EngineResult<HeapId> {
        let left_int = numeric_int(self.heap.data(left));
        let right_int = numeric_int(self.heap.data(right));
        if let (Some(l), Some(r)) = (left_int, right_int) {
            return match op {
                OpCode::Add => self.alloc(EntryData::Integer(l.wrapping_add(r))),
                OpCode::Subtract => self.alloc(EntryData::Integer(l.wrapping_sub(r))),
                OpCode::Multiply => self.alloc(EntryData::Integer(l.wrapping_mul(r))),
                OpCode::Divide => {
                    if r == 0 {
                        return Err(RunResult::DivideByZero);
                    }
                    self.alloc(EntryData::Float(f64::from(l) / f64::from(r)))
                }
                OpCode::FloorDivide => {
                    if r == 0 {
                        return Err(RunResult::DivideByZero);
                    }
                    self.alloc(EntryData::Integer(Integer::div_floor(&l, &r)))
                }
                OpCode::Modulo => {
                    if r == 0 {
                        return Err(RunResult::DivideByZero);
                    }
                    self.alloc(EntryData::Integer(Integer::mod_floor(&l, &r)))
                }
                OpCode::Power => self.alloc(EntryData::Float(f64::from(l).powf(f64::from(r)))),
                _ => Err(RunResult::InvalidInstruction),
            };
        }

        let to_float = |data: &EntryData| -> Option<f64> {
            match data {
                EntryData::Float(v) => Some(*v),
                other => numeric_int(other).map(f64::from),
            }
        };
        let left_float = to_float(self.heap.data(left));
        let right_float = to_float(self.heap.data(right));
        let (Some(l), Some(r)) = (left_float, right_float) else {
            return Err(RunResult::UnexpectedType);
        };
        match op {
            OpCode::Add => self.alloc(EntryData::Float(l + r)),
            OpCode::Subtract => self.alloc(EntryData::Float(l - r)),
            OpCode::Multiply => self.alloc(EntryData::Float(l * r)),
            OpCode::Divide => {
                if r == 0.0 {
                    return Err(RunResult::DivideByZero);
                }
                self.alloc(EntryData::Float(l / r))
            }
            OpCode::FloorDivide => {
                if r == 0.0 {
                    return Err(RunResult::DivideByZero);
                }
                self.alloc(EntryData::Float((l / r).floor()))
            }
            OpCode::Modulo => {
                if r == 0.0 {
                    return Err(RunResult::DivideByZero);
                }
                self.alloc(EntryData::Float(l - (l / r).floor() * r))
            }
            OpCode::Power => self.alloc(EntryData::Float(l.powf(r))),
            _ => Err(RunResult::InvalidInstruction),
        }
    }

    /// Concatenates two same-kind sequences into a fresh container.
    fn concatenate(&mut self, left: HeapId, right: HeapId) -> EngineResult<HeapId> {
        if self.heap.kind(left) == DataKind::String {
            let result = self.heap.alloc(EntryData::String(Sequence::default()))?;
            let bytes = self.string_bytes(left)?;
            self.string_append_buffer(result, &bytes)?;
            let bytes = self.string_bytes(right)?;
            self.string_append_buffer(result, &bytes)?;
            return Ok(result);
        }

        let result = match self.heap.kind(left) {
            DataKind::Tuple => self.heap.alloc(EntryData::Tuple(Sequence::default()))?,
            DataKind::List => self.heap.alloc(EntryData::List(Sequence::default()))?,
            _ => return Err(RunResult::UnexpectedType),
        };
        for source in [left, right] {
            let mut cursor = self.sequence_next(source, None, true)?;
            let mut iterations: u32 = 0;
            while let (Some(element), Some(value)) = (cursor.element, cursor.value) {
                iterations += 1;
                if iterations > self.cycle_detection_limit {
                    return Err(RunResult::CycleDetected);
                }
                self.sequence_append(result, value)?;
                cursor = self.sequence_next(source, Some(element), true)?;
            }
        }
        Ok(result)
    }

    /// Repeats a sequence `count` times into a fresh container; a count
    /// of zero or less yields an empty one.
    fn repeat(&mut self, sequence: HeapId, count: i32) -> EngineResult<HeapId> {
        let count = count.max(0) as u32;
        if self.heap.kind(sequence) == DataKind::String {
            let result = self.heap.alloc(EntryData::String(Sequence::default()))?;
            let bytes = self.string_bytes(sequence)?;
            for _ in 0..count {
                self.string_append_buffer(result, &bytes)?;
            }
            return Ok(result);
        }

        let result = match self.heap.kind(sequence) {
            DataKind::Tuple => self.heap.alloc(EntryData::Tuple(Sequence::default()))?,
            DataKind::List => self.heap.alloc(EntryData::List(Sequence::default()))?,
            _ => return Err(RunResult::UnexpectedType),
        };
        for _ in 0..count {
            let mut cursor = self.sequence_next(sequence, None, true)?;
            let mut iterations: u32 = 0;
            while let (Some(element), Some(value)) = (cursor.element, cursor.value) {
                iterations += 1;
                if iterations > self.cycle_detection_limit {
                    return Err(RunResult::CycleDetected);
                }
                self.sequence_append(result, value)?;
                cursor = self.sequence_next(sequence, Some(element), true)?;
            }
        }
        Ok(result)
    }

    /// Membership by value equality: `item in container`.
    fn membership(&mut self, item: HeapId, container: HeapId) -> EngineResult<bool> {
        match self.heap.kind(container) {
            DataKind::String => {
                if self.heap.kind(item) != DataKind::String {
                    return Err(RunResult::UnexpectedType);
                }
                let needle = self.string_bytes(item)?;
                let haystack = self.string_bytes(container)?;
                if needle.is_empty() {
                    return Ok(true);
                }
                Ok(haystack.windows(needle.len()).any(|window| window == needle))
            }
            DataKind::Tuple | DataKind::List => {
                let mut cursor = self.sequence_next(container, None, true)?;
                let mut iterations: u32 = 0;
                while let (Some(element), Some(value)) = (cursor.element, cursor.value) {
                    iterations += 1;
                    if iterations > self.cycle_detection_limit {
                        return Err(RunResult::CycleDetected);
                    }
                    let (ordering, nan_detected) = self.compare(item, value, CompareKind::Equality)?;
                    if ordering == std::cmp::Ordering::Equal && !nan_detected {
                        return Ok(true);
                    }
                    cursor = self.sequence_next(container, Some(element), true)?;
                }
                Ok(false)
            }
            DataKind::Set | DataKind::Dictionary => Ok(self.tree_find(container, item)?.is_some()),
            _ => Err(RunResult::UnexpectedType),
        }
    }
}
