//! The dispatcher: fetch, decode, execute.
//!
//! One instruction per call. Operands are big-endian; integer operands
//! sign-extend from their encoded width. Every program-counter advance is
//! bounds-checked against the end of the loaded code.

use crate::{
    engine::Engine,
    heap::{DataKind, EntryData, FunctionTarget, HeapId, Sequence, Tree},
    opcode::OpCode,
    result::{EngineResult, RunResult},
};

impl Engine {
    /// Executes exactly one instruction.
    pub(crate) fn execute_instruction(&mut self) -> EngineResult<()> {
        let instruction_pc = self.pc;
        let byte = self.code_byte(self.pc)?;
        self.pc += 1;
        let opcode = OpCode::decode(byte).ok_or(RunResult::InvalidInstruction)?;

        if let Some(mut tracer) = self.tracer.take() {
            tracer.on_instruction(instruction_pc, opcode, self);
            self.tracer = Some(tracer);
        }

        match opcode {
            OpCode::PushNone => {
                self.push(HeapId::NONE)?;
            }

            OpCode::PushEllipsis => {
                let value = self.alloc(EntryData::Ellipsis)?;
                self.push(value)?;
                self.unref(value)?;
            }

            OpCode::PushFalse | OpCode::PushTrue => {
                let value = self.alloc(EntryData::Boolean(opcode == OpCode::PushTrue))?;
                self.push(value)?;
                self.unref(value)?;
            }

            OpCode::PushInteger0 | OpCode::PushInteger1 | OpCode::PushInteger2 | OpCode::PushInteger4 => {
                let size = match opcode {
                    OpCode::PushInteger0 => 0,
                    OpCode::PushInteger1 => 1,
                    OpCode::PushInteger2 => 2,
                    _ => 4,
                };
                let value = self.load_signed_operand(size)?;
                let entry = self.alloc(EntryData::Integer(value))?;
                self.push(entry)?;
                self.unref(entry)?;
            }

            OpCode::PushFloat => {
                let value = self.load_float_operand()?;
                let entry = self.alloc(EntryData::Float(value))?;
                self.push(entry)?;
                self.unref(entry)?;
            }

            OpCode::PushString0 | OpCode::PushString1 | OpCode::PushString2 | OpCode::PushString4 => {
                let size = match opcode {
                    OpCode::PushString0 => 0,
                    OpCode::PushString1 => 1,
                    OpCode::PushString2 => 2,
                    _ => 4,
                };
                let length = self.load_unsigned_operand(size)? as usize;
                let end = self.pc as usize + length;
                if end > self.code.len() {
                    return Err(RunResult::BeyondEndOfCode);
                }
                let bytes = self.code[self.pc as usize..end].to_vec();
                self.pc = end as u32;
                let string = self.heap.alloc(EntryData::String(Sequence::default()))?;
                self.string_append_buffer(string, &bytes)?;
                self.push(string)?;
                self.unref(string)?;
            }

            OpCode::PushTuple
            | OpCode::PushList
            | OpCode::PushSet
            | OpCode::PushDictionary
            | OpCode::PushArgumentList
            | OpCode::PushParameterList => {
                let value = self.heap.alloc(match opcode {
                    OpCode::PushTuple => EntryData::Tuple(Sequence::default()),
                    OpCode::PushList => EntryData::List(Sequence::default()),
                    OpCode::PushSet => EntryData::Set(Tree::default()),
                    OpCode::PushDictionary => EntryData::Dictionary(Tree::default()),
                    OpCode::PushArgumentList => EntryData::ArgumentList(Sequence::default()),
                    _ => EntryData::ParameterList(Sequence::default()),
                })?;
                self.push(value)?;
                if self.heap.kind(value).is_object() {
                    self.unref(value)?;
                }
            }

            OpCode::PushCodeAddress => {
                let address = self.load_unsigned_operand(4)?;
                if address >= self.code_end() {
                    return Err(RunResult::BeyondEndOfCode);
                }
                let entry = self.heap.alloc(EntryData::CodeAddress(address))?;
                self.push(entry)?;
            }

            OpCode::PushModule1 | OpCode::PushModule2 | OpCode::PushModule4 => {
                let size = symbol_operand_size(opcode);
                let symbol = self.load_signed_operand(size)?;
                let Some((_, module)) = self.find_symbol(self.modules, symbol)? else {
                    return Err(RunResult::NameNotFound);
                };
                if self.heap.kind(module) != DataKind::Module {
                    return Err(RunResult::UnexpectedType);
                }
                self.push(module)?;
            }

            OpCode::Pop => {
                let top = self.top()?;
                if !self.heap.kind(top).is_object() {
                    return Err(RunResult::UnexpectedType);
                }
                self.pop()?;
            }

            OpCode::PopCount => {
                let count = self.load_unsigned_operand(1)?;
                for _ in 0..count {
                    let top = self.top()?;
                    if !self.heap.kind(top).is_object() {
                        return Err(RunResult::UnexpectedType);
                    }
                    self.pop()?;
                }
            }

            OpCode::LogicalNot | OpCode::Positive | OpCode::Negate | OpCode::BitwiseNot => {
                let operand = self.top()?;
                if !self.heap.kind(operand).is_object() {
                    return Err(RunResult::UnexpectedType);
                }
                self.ref_value(operand);
                self.pop()?;
                let result = self.unary_operation(opcode, operand)?;
                self.push(result)?;
                self.unref(result)?;
                self.unref(operand)?;
            }

            OpCode::BitOr
            | OpCode::BitXor
            | OpCode::BitAnd
            | OpCode::LeftShift
            | OpCode::RightShift
            | OpCode::Add
            | OpCode::Subtract
            | OpCode::Multiply
            | OpCode::Divide
            | OpCode::FloorDivide
            | OpCode::Modulo
            | OpCode::Power
            | OpCode::NotEqual
            | OpCode::Equal
            | OpCode::Less
            | OpCode::LessOrEqual
            | OpCode::Greater
            | OpCode::GreaterOrEqual
            | OpCode::NotIn
            | OpCode::In
            | OpCode::IsNot
            | OpCode::Is
            | OpCode::Order => {
                let left = self.top()?;
                if !self.heap.kind(left).is_object() {
                    return Err(RunResult::UnexpectedType);
                }
                self.ref_value(left);
                self.pop()?;
                let right = self.top()?;
                if !self.heap.kind(right).is_object() {
                    return Err(RunResult::UnexpectedType);
                }
                self.ref_value(right);
                self.pop()?;

                let result = self.binary_operation(opcode, left, right)?;
                self.push(result)?;
                self.unref(result)?;
                self.unref(left)?;
                self.unref(right)?;
            }

            OpCode::Conditional => {
                let condition = self.top()?;
                if !self.heap.kind(condition).is_object() {
                    return Err(RunResult::UnexpectedType);
                }
                self.ref_value(condition);
                self.pop()?;
                let true_value = self.top()?;
                if !self.heap.kind(true_value).is_object() {
                    return Err(RunResult::UnexpectedType);
                }
                self.ref_value(true_value);
                self.pop()?;
                let false_value = self.top()?;
                if !self.heap.kind(false_value).is_object() {
                    return Err(RunResult::UnexpectedType);
                }
                self.ref_value(false_value);
                self.pop()?;

                let chosen = if self.is_true(condition)? { true_value } else { false_value };
                self.push(chosen)?;
                self.unref(condition)?;
                self.unref(true_value)?;
                self.unref(false_value)?;
            }

            OpCode::Load1 | OpCode::Load2 | OpCode::Load4 => {
                let symbol = self.load_signed_operand(symbol_operand_size(opcode))?;
                self.op_load(symbol)?;
            }

            OpCode::LoadAddress1 | OpCode::LoadAddress2 | OpCode::LoadAddress4 => {
                let symbol = self.load_signed_operand(symbol_operand_size(opcode))?;
                self.op_load_address(symbol)?;
            }

            OpCode::Set | OpCode::SetPop => {
                let address = self.top()?;
                if !matches!(
                    self.heap.kind(address),
                    DataKind::Element | DataKind::DictionaryNode | DataKind::NamespaceNode | DataKind::Tuple
                ) {
                    return Err(RunResult::UnexpectedType);
                }
                self.ref_value(address);
                self.pop()?;
                let value = self.top()?;
                if self.heap.kind(address) == DataKind::Tuple {
                    self.assign_tuple(address, value)?;
                } else {
                    self.assign_simple(address, value)?;
                }
                if opcode == OpCode::SetPop {
                    self.pop()?;
                }
            }

            OpCode::Erase => {
                let index = self.top()?;
                if !self.heap.kind(index).is_object() {
                    return Err(RunResult::UnexpectedType);
                }
                self.ref_value(index);
                self.pop()?;
                let container = self.top()?;
                self.ref_value(container);
                self.pop()?;

                match self.heap.kind(container) {
                    DataKind::List => {
                        let EntryData::Integer(position) = *self.heap.data(index) else {
                            return Err(RunResult::UnexpectedType);
                        };
                        self.sequence_erase(container, position, true)?;
                    }
                    DataKind::Set | DataKind::Dictionary => {
                        let Some((node, _)) = self.tree_find(container, index)? else {
                            return Err(RunResult::KeyNotFound);
                        };
                        self.tree_erase_node(container, node, true, true)?;
                    }
                    _ => return Err(RunResult::UnexpectedType),
                }
                self.unref(index)?;
                self.unref(container)?;
            }

            OpCode::Delete1 | OpCode::Delete2 | OpCode::Delete4 => {
                let symbol = self.load_signed_operand(symbol_operand_size(opcode))?;
                self.op_delete(symbol)?;
            }

            OpCode::Global1 | OpCode::Global2 | OpCode::Global4 => {
                let symbol = self.load_signed_operand(symbol_operand_size(opcode))?;
                self.op_global_override(symbol)?;
            }

            OpCode::Local1 | OpCode::Local2 | OpCode::Local4 => {
                let symbol = self.load_signed_operand(symbol_operand_size(opcode))?;
                self.op_local_revert(symbol)?;
            }

            OpCode::StartIterator => self.op_start_iterator()?,
            OpCode::TestIterator => self.op_test_iterator()?,
            OpCode::NextIterator => self.op_next_iterator()?,
            OpCode::DerefIterator => self.op_deref_iterator()?,

            OpCode::NoOp => {}

            OpCode::JumpFalse | OpCode::JumpTrue | OpCode::Jump => {
                let address = self.load_unsigned_operand(4)?;
                if address >= self.code_end() {
                    return Err(RunResult::BeyondEndOfCode);
                }
                let mut condition = true;
                if opcode != OpCode::Jump {
                    let value = self.top()?;
                    if !self.heap.kind(value).is_object() {
                        return Err(RunResult::UnexpectedType);
                    }
                    condition = self.is_true(value)?;
                    self.pop()?;
                }
                if condition == (opcode != OpCode::JumpFalse) {
                    self.pc = address;
                }
            }

            OpCode::LogicalOr | OpCode::LogicalAnd => {
                let address = self.load_unsigned_operand(4)?;
                if address >= self.code_end() {
                    return Err(RunResult::BeyondEndOfCode);
                }
                let value = self.top()?;
                if !self.heap.kind(value).is_object() {
                    return Err(RunResult::UnexpectedType);
                }
                let truth = self.is_true(value)?;
                // The deciding operand stays on the stack as the result.
                if truth == (opcode == OpCode::LogicalOr) {
                    self.pc = address;
                } else {
                    self.pop()?;
                }
            }

            OpCode::Call => self.op_call()?,
            OpCode::Return => self.op_return()?,

            OpCode::AddModule1 | OpCode::AddModule2 | OpCode::AddModule4 => {
                let symbol = self.load_signed_operand(symbol_operand_size(opcode))?;
                let address = self.load_unsigned_operand(4)?;
                if address >= self.code_end() {
                    return Err(RunResult::BeyondEndOfCode);
                }
                let namespace = self.heap.alloc(EntryData::Namespace(Tree::default()))?;
                let module = self.heap.alloc(EntryData::Module {
                    code_address: address,
                    namespace,
                    is_loaded: false,
                })?;
                self.tree_try_insert_by_symbol(self.modules, symbol, module)?;
                self.unref(module)?;
            }

            OpCode::ExitModule => self.op_exit_module()?,

            OpCode::LoadModule1 | OpCode::LoadModule2 | OpCode::LoadModule4 => {
                let symbol = self.load_signed_operand(symbol_operand_size(opcode))?;
                self.op_load_module(symbol)?;
            }

            OpCode::MakeArgument => {
                let value = self.top()?;
                if !self.heap.kind(value).is_object() {
                    return Err(RunResult::UnexpectedType);
                }
                let argument = self.heap.alloc(EntryData::Argument {
                    symbol: 0,
                    has_name: false,
                    is_group: false,
                    value,
                })?;
                self.set_top_value(argument)?;
            }

            OpCode::MakeNamedArgument1 | OpCode::MakeNamedArgument2 | OpCode::MakeNamedArgument4 => {
                let symbol = self.load_signed_operand(symbol_operand_size(opcode))?;
                let value = self.top()?;
                if !self.heap.kind(value).is_object() {
                    return Err(RunResult::UnexpectedType);
                }
                let argument = self.heap.alloc(EntryData::Argument {
                    symbol,
                    has_name: true,
                    is_group: false,
                    value,
                })?;
                self.set_top_value(argument)?;
            }

            OpCode::MakeIterableGroupArgument | OpCode::MakeDictionaryGroupArgument => {
                let value = self.top()?;
                if !self.heap.kind(value).is_object() {
                    return Err(RunResult::UnexpectedType);
                }
                let argument = self.heap.alloc(EntryData::Argument {
                    symbol: 0,
                    has_name: false,
                    is_group: true,
                    value,
                })?;
                self.set_top_value(argument)?;
            }

            OpCode::MakeParameter1 | OpCode::MakeParameter2 | OpCode::MakeParameter4 => {
                let symbol = self.load_signed_operand(symbol_operand_size(opcode))?;
                let parameter = self.heap.alloc(EntryData::Parameter {
                    symbol,
                    default: None,
                    group: crate::heap::ParameterGroup::None,
                })?;
                self.push(parameter)?;
            }

            OpCode::MakeDefaultParameter1 | OpCode::MakeDefaultParameter2 | OpCode::MakeDefaultParameter4 => {
                let symbol = self.load_signed_operand(symbol_operand_size(opcode))?;
                let default = self.top()?;
                if !self.heap.kind(default).is_object() {
                    return Err(RunResult::UnexpectedType);
                }
                let parameter = self.heap.alloc(EntryData::Parameter {
                    symbol,
                    default: Some(default),
                    group: crate::heap::ParameterGroup::None,
                })?;
                self.set_top_value(parameter)?;
            }

            OpCode::MakeTupleGroupParameter1
            | OpCode::MakeTupleGroupParameter2
            | OpCode::MakeTupleGroupParameter4
            | OpCode::MakeDictionaryGroupParameter1
            | OpCode::MakeDictionaryGroupParameter2
            | OpCode::MakeDictionaryGroupParameter4 => {
                let symbol = self.load_signed_operand(symbol_operand_size(opcode))?;
                let group = if matches!(
                    opcode,
                    OpCode::MakeTupleGroupParameter1
                        | OpCode::MakeTupleGroupParameter2
                        | OpCode::MakeTupleGroupParameter4
                ) {
                    crate::heap::ParameterGroup::Tuple
                } else {
                    crate::heap::ParameterGroup::Dictionary
                };
                let parameter = self.heap.alloc(EntryData::Parameter {
                    symbol,
                    default: None,
                    group,
                })?;
                self.push(parameter)?;
            }

            OpCode::MakeFunction => {
                let entry = self.top()?;
                let EntryData::CodeAddress(address) = *self.heap.data(entry) else {
                    return Err(RunResult::UnexpectedType);
                };
                if address >= self.code_end() {
                    return Err(RunResult::BeyondEndOfCode);
                }
                self.pop()?;
                self.unref(entry)?;

                let parameters = self.top()?;
                if self.heap.kind(parameters) != DataKind::ParameterList {
                    return Err(RunResult::UnexpectedType);
                }
                let function = self.heap.alloc(EntryData::Function {
                    target: FunctionTarget::Script { code_address: address },
                    module: self.module,
                    parameters,
                })?;
                self.ref_value(self.module);
                self.set_top_value(function)?;
            }

            OpCode::MakeDictionaryEntry => {
                let key = self.top()?;
                if !self.heap.kind(key).is_object() {
                    return Err(RunResult::UnexpectedType);
                }
                self.ref_value(key);
                self.pop()?;
                let value = self.top()?;
                if !self.heap.kind(value).is_object() {
                    return Err(RunResult::UnexpectedType);
                }
                let pair = self.heap.alloc(EntryData::KeyValuePair { key, value })?;
                self.set_top_value(pair)?;
            }

            OpCode::MakeRange
            | OpCode::MakeRangeStart
            | OpCode::MakeRangeEnd
            | OpCode::MakeRangeStartEnd
            | OpCode::MakeRangeStep
            | OpCode::MakeRangeStartStep
            | OpCode::MakeRangeEndStep
            | OpCode::MakeRangeFull => self.op_make_range(opcode)?,

            OpCode::Build => self.op_build()?,

            OpCode::Index | OpCode::IndexAddress => self.op_index(opcode == OpCode::IndexAddress)?,

            OpCode::Member1 | OpCode::Member2 | OpCode::Member4 => {
                let symbol = self.load_signed_operand(symbol_operand_size(opcode))?;
                self.op_member(symbol, false)?;
            }
            OpCode::MemberAddress1 | OpCode::MemberAddress2 | OpCode::MemberAddress4 => {
                let symbol = self.load_signed_operand(symbol_operand_size(opcode))?;
                self.op_member(symbol, true)?;
            }

            OpCode::Abort => return Err(RunResult::Abort),

            OpCode::End => {
                return if self.stack_top.is_none() {
                    Err(RunResult::Complete)
                } else {
                    Err(RunResult::InvalidEnd)
                };
            }
        }

        Ok(())
    }

    /* Multi-step opcode bodies. */

    /// Variable load: local, then global (honoring overrides), then
    /// system.
    fn op_load(&mut self, symbol: i32) -> EngineResult<()> {
        let mut found = self.find_symbol(self.local_namespace, symbol)?;
        let defer_to_global = match found {
            None => true,
            Some((node, _)) => matches!(
                self.heap.data(node),
                EntryData::NamespaceNode { is_global: true, .. }
            ),
        };
        if defer_to_global && self.global_namespace != self.local_namespace {
            found = self.find_symbol(self.global_namespace, symbol)?;
        }
        if found.is_none() {
            found = self.find_symbol(self.system_namespace, symbol)?;
        }
        let Some((_, value)) = found else {
            return Err(RunResult::NameNotFound);
        };
        if !self.heap.kind(value).is_object() {
            return Err(RunResult::UnexpectedType);
        }
        self.push(value)?;
        Ok(())
    }

    /// Address load: the namespace node, created on first use.
    fn op_load_address(&mut self, symbol: i32) -> EngineResult<()> {
        let insert = self.tree_try_insert_by_symbol(self.local_namespace, symbol, HeapId::NONE)?;
        let mut node = insert.node;
        if insert.inserted {
            let in_function = self.local_namespace != self.global_namespace;
            let EntryData::NamespaceNode {
                is_global, is_local, ..
            } = self.heap.data_mut(node)
            else {
                return Err(RunResult::InternalError);
            };
            if in_function {
                *is_local = true;
            } else {
                *is_global = true;
            }
        } else {
            let overridden = matches!(
                self.heap.data(node),
                EntryData::NamespaceNode { is_global: true, .. }
            );
            if overridden && self.local_namespace != self.global_namespace {
                let insert = self.tree_try_insert_by_symbol(self.global_namespace, symbol, HeapId::NONE)?;
                node = insert.node;
            }
        }
        self.push(node)?;
        Ok(())
    }

    /// Variable deletion from the owning namespace.
    fn op_delete(&mut self, symbol: i32) -> EngineResult<()> {
        let mut ns = self.local_namespace;
        let mut found = self.find_symbol(ns, symbol)?;
        if let Some((node, _)) = found {
            let overridden = matches!(
                self.heap.data(node),
                EntryData::NamespaceNode { is_global: true, .. }
            );
            if overridden && self.global_namespace != self.local_namespace {
                ns = self.global_namespace;
                found = self.find_symbol(ns, symbol)?;
            }
        }
        // System-namespace bindings are not deletable through here.
        let Some((node, _)) = found else {
            return Err(RunResult::NameNotFound);
        };
        self.tree_erase_node(ns, node, true, true)
    }

    /// Marks a local name as a global override.
    fn op_global_override(&mut self, symbol: i32) -> EngineResult<()> {
        if self.local_namespace == self.global_namespace {
            return Err(RunResult::InvalidContext);
        }
        let node = match self.find_symbol(self.local_namespace, symbol)? {
            Some((node, _)) => {
                if matches!(
                    self.heap.data(node),
                    EntryData::NamespaceNode { is_global: true, .. }
                ) {
                    return Err(RunResult::Redundant);
                }
                node
            }
            None => {
                self.tree_try_insert_by_symbol(self.local_namespace, symbol, HeapId::NONE)?
                    .node
            }
        };
        let EntryData::NamespaceNode {
            is_global, is_local, ..
        } = self.heap.data_mut(node)
        else {
            return Err(RunResult::InternalError);
        };
        *is_global = true;
        *is_local = false;
        Ok(())
    }

    /// Reverts a global override back to local scope.
    fn op_local_revert(&mut self, symbol: i32) -> EngineResult<()> {
        if self.local_namespace == self.global_namespace {
            return Err(RunResult::InvalidContext);
        }
        let Some((node, _)) = self.find_symbol(self.local_namespace, symbol)? else {
            return Err(RunResult::NameNotFound);
        };
        let EntryData::NamespaceNode {
            is_global, is_local, ..
        } = self.heap.data_mut(node)
        else {
            return Err(RunResult::InternalError);
        };
        if !*is_global {
            return Err(RunResult::Redundant);
        }
        *is_global = false;
        *is_local = true;
        Ok(())
    }

    /// Function call: bind arguments, then either enter a host callback
    /// or push a frame and jump into script code.
    fn op_call(&mut self) -> EngineResult<()> {
        let function = self.top()?;
        if self.heap.kind(function) != DataKind::Function {
            return Err(RunResult::UnexpectedType);
        }
        self.ref_value(function);
        self.pop()?;

        let arguments = self.top()?;
        if self.heap.kind(arguments) != DataKind::ArgumentList {
            return Err(RunResult::UnexpectedType);
        }
        self.pop()?;

        let EntryData::Function {
            target,
            module: function_module,
            parameters,
        } = *self.heap.data(function)
        else {
            return Err(RunResult::InternalError);
        };
        if self.heap.kind(parameters) != DataKind::ParameterList {
            return Err(RunResult::UnexpectedType);
        }

        let ns = self.heap.alloc(EntryData::Namespace(Tree::default()))?;
        self.load_arguments(arguments, parameters, ns)?;
        self.unref(arguments)?;

        match target {
            FunctionTarget::App { symbol } => {
                let dispatch = self.app_spec.dispatch();
                self.in_app = true;
                let outcome = dispatch(self, symbol, ns);
                self.in_app = false;
                let return_value = outcome?;

                self.unref(ns)?;
                match return_value {
                    // The host's ownership transfers to the stack.
                    Some(value) => {
                        self.push(value)?;
                        self.unref(value)?;
                    }
                    None => {
                        self.push(HeapId::NONE)?;
                    }
                }
            }
            FunctionTarget::Script { code_address } => {
                if code_address >= self.code_end() {
                    return Err(RunResult::BeyondEndOfCode);
                }
                let frame = self.heap.alloc(EntryData::Frame {
                    return_address: self.pc,
                    module: self.module,
                    local_namespace: self.local_namespace,
                })?;
                self.ref_value(self.module);
                self.push(frame)?;

                let EntryData::Module { namespace, .. } = *self.heap.data(function_module) else {
                    return Err(RunResult::UnexpectedType);
                };
                self.module = function_module;
                self.global_namespace = namespace;
                self.local_namespace = ns;
                self.pc = code_address;
            }
        }

        self.unref(function)
    }

    /// Return from a script function: restore the caller's context and
    /// leave the return value on the stack.
    fn op_return(&mut self) -> EngineResult<()> {
        let return_value = self.top()?;
        if !self.heap.kind(return_value).is_object() {
            return Err(RunResult::UnexpectedType);
        }
        self.ref_value(return_value);
        self.pop()?;

        // The function's local namespace dies with the call.
        self.unref(self.local_namespace)?;

        let frame = self.top()?;
        let EntryData::Frame {
            return_address,
            module,
            local_namespace,
        } = *self.heap.data(frame)
        else {
            return Err(RunResult::UnexpectedType);
        };
        self.local_namespace = local_namespace;
        let EntryData::Module { namespace, .. } = *self.heap.data(module) else {
            return Err(RunResult::UnexpectedType);
        };
        self.global_namespace = namespace;
        self.module = module;

        self.pop()?;
        // Releasing the frame releases its claim on the caller module.
        self.unref(frame)?;

        self.push(return_value)?;
        self.unref(return_value)?;
        self.pc = return_address;
        Ok(())
    }

    /// Module body exit: like a return with no value or local namespace.
    fn op_exit_module(&mut self) -> EngineResult<()> {
        let frame = self.top()?;
        let EntryData::Frame {
            return_address,
            module,
            local_namespace,
        } = *self.heap.data(frame)
        else {
            return Err(RunResult::UnexpectedType);
        };
        self.local_namespace = local_namespace;
        let EntryData::Module { namespace, .. } = *self.heap.data(module) else {
            return Err(RunResult::UnexpectedType);
        };
        self.global_namespace = namespace;
        self.module = module;

        self.pop()?;
        self.unref(frame)?;
        self.pc = return_address;
        Ok(())
    }

    /// First load of a module runs its body; later loads are no-ops.
    fn op_load_module(&mut self, symbol: i32) -> EngineResult<()> {
        let Some((_, module)) = self.find_symbol(self.modules, symbol)? else {
            return Err(RunResult::NameNotFound);
        };
        let EntryData::Module {
            code_address,
            namespace,
            is_loaded,
        } = *self.heap.data(module)
        else {
            return Err(RunResult::UnexpectedType);
        };
        if is_loaded {
            return Ok(());
        }
        let EntryData::Module { is_loaded, .. } = self.heap.data_mut(module) else {
            return Err(RunResult::InternalError);
        };
        *is_loaded = true;

        let frame = self.heap.alloc(EntryData::Frame {
            return_address: self.pc,
            module: self.module,
            local_namespace: self.local_namespace,
        })?;
        self.ref_value(self.module);
        self.push(frame)?;

        self.module = module;
        self.global_namespace = namespace;
        self.local_namespace = namespace;
        self.pc = code_address;
        Ok(())
    }

    /// Builds a range from the operands selected by the opcode.
    fn op_make_range(&mut self, opcode: OpCode) -> EngineResult<()> {
        let has_start = matches!(
            opcode,
            OpCode::MakeRangeStart | OpCode::MakeRangeStartEnd | OpCode::MakeRangeStartStep | OpCode::MakeRangeFull
        );
        let has_end = matches!(
            opcode,
            OpCode::MakeRangeEnd | OpCode::MakeRangeStartEnd | OpCode::MakeRangeEndStep | OpCode::MakeRangeFull
        );
        let has_step = matches!(
            opcode,
            OpCode::MakeRangeStep | OpCode::MakeRangeStartStep | OpCode::MakeRangeEndStep | OpCode::MakeRangeFull
        );

        let pop_integer = |engine: &mut Self| -> EngineResult<HeapId> {
            let value = engine.top()?;
            if engine.heap.kind(value) != DataKind::Integer {
                return Err(RunResult::UnexpectedType);
            }
            engine.ref_value(value);
            engine.pop()?;
            Ok(value)
        };

        let start = if has_start { Some(pop_integer(self)?) } else { None };
        let end = if has_end { Some(pop_integer(self)?) } else { None };
        let step = if has_step { Some(pop_integer(self)?) } else { None };

        if let Some(step) = step {
            if self.heap.data(step) == &EntryData::Integer(0) {
                return Err(RunResult::ValueOutOfRange);
            }
        }

        let range = self.heap.alloc(EntryData::Range { start, end, step })?;
        self.push(range)?;
        self.unref(range)
    }

    /// Adds the top item into the container beneath it.
    fn op_build(&mut self) -> EngineResult<()> {
        let item = self.top()?;
        self.ref_value(item);
        self.pop()?;
        let item_kind = self.heap.kind(item);

        let container = self.top()?;
        match self.heap.kind(container) {
            DataKind::Tuple => {
                // Tuples may also collect addresses for unpacking targets.
                if !item_kind.is_object()
                    && !matches!(
                        item_kind,
                        DataKind::Element | DataKind::DictionaryNode | DataKind::NamespaceNode
                    )
                {
                    return Err(RunResult::UnexpectedType);
                }
                self.sequence_append(container, item)?;
            }
            DataKind::List => {
                if !item_kind.is_object() {
                    return Err(RunResult::UnexpectedType);
                }
                self.sequence_append(container, item)?;
            }
            DataKind::Set => {
                if !item_kind.is_object() {
                    return Err(RunResult::UnexpectedType);
                }
                self.tree_insert(container, item, None)?;
            }
            DataKind::ParameterList => {
                if item_kind != DataKind::Parameter {
                    return Err(RunResult::UnexpectedType);
                }
                self.sequence_append(container, item)?;
            }
            DataKind::ArgumentList => {
                if item_kind != DataKind::Argument {
                    return Err(RunResult::UnexpectedType);
                }
                self.sequence_append(container, item)?;
            }
            DataKind::Dictionary => {
                let EntryData::KeyValuePair { key, value } = *self.heap.data(item) else {
                    return Err(RunResult::UnexpectedType);
                };
                if !self.heap.kind(key).is_object() || !self.heap.kind(value).is_object() {
                    return Err(RunResult::UnexpectedType);
                }
                self.tree_insert(container, key, Some(value))?;
                self.unref(item)?;
            }
            _ => return Err(RunResult::UnexpectedType),
        }

        if item_kind.is_object() {
            self.unref(item)?;
        }
        Ok(())
    }

    /// Indexing, by value or by address.
    fn op_index(&mut self, by_address: bool) -> EngineResult<()> {
        let index = self.top()?;
        if !self.heap.kind(index).is_object() {
            return Err(RunResult::UnexpectedType);
        }
        self.ref_value(index);
        self.pop()?;
        let container = self.top()?;
        self.ref_value(container);
        self.pop()?;

        match self.heap.kind(container) {
            DataKind::String => {
                if by_address {
                    // Strings are immutable; they have no addresses.
                    return Err(RunResult::UnexpectedType);
                }
                let EntryData::Integer(position) = *self.heap.data(index) else {
                    return Err(RunResult::UnexpectedType);
                };
                let byte = self.string_element(container, position)?;
                let result = self.heap.alloc(EntryData::String(Sequence::default()))?;
                self.string_append_buffer(result, &[byte])?;
                self.push(result)?;
                self.unref(result)?;
            }
            DataKind::Tuple | DataKind::List => {
                if by_address && self.heap.kind(container) == DataKind::Tuple {
                    return Err(RunResult::NotImplemented);
                }
                let EntryData::Integer(position) = *self.heap.data(index) else {
                    return Err(RunResult::UnexpectedType);
                };
                let (element, value) = self.sequence_index(container, position)?;
                self.push(if by_address { element } else { value })?;
            }
            DataKind::Dictionary => {
                let found = self.tree_find(container, index)?;
                if by_address {
                    let node = match found {
                        Some((node, _)) => node,
                        None => self.tree_insert(container, index, Some(HeapId::NONE))?.node,
                    };
                    self.push(node)?;
                } else {
                    let Some((_, value)) = found else {
                        return Err(RunResult::KeyNotFound);
                    };
                    self.push(value.ok_or(RunResult::InternalError)?)?;
                }
            }
            _ => return Err(RunResult::UnexpectedType),
        }

        self.unref(index)?;
        self.unref(container)
    }

    /// Module member lookup, by value or by address.
    fn op_member(&mut self, symbol: i32, by_address: bool) -> EngineResult<()> {
        let module = self.top()?;
        if self.heap.kind(module) != DataKind::Module {
            return Err(RunResult::UnexpectedType);
        }
        self.ref_value(module);
        self.pop()?;

        let EntryData::Module { namespace, .. } = *self.heap.data(module) else {
            return Err(RunResult::InternalError);
        };
        if self.heap.kind(namespace) != DataKind::Namespace {
            return Err(RunResult::UnexpectedType);
        }
        let Some((node, value)) = self.find_symbol(namespace, symbol)? else {
            return Err(RunResult::NameNotFound);
        };
        self.push(if by_address { node } else { value })?;
        self.unref(module)
    }

    /* Operand loaders. */

    fn load_unsigned_operand(&mut self, size: u32) -> EngineResult<u32> {
        let mut operand = 0u32;
        for _ in 0..size {
            let byte = self.code_byte(self.pc)?;
            self.pc += 1;
            operand = operand << 8 | u32::from(byte);
        }
        Ok(operand)
    }

    fn load_signed_operand(&mut self, size: u32) -> EngineResult<i32> {
        let operand = self.load_unsigned_operand(size)?;
        if size == 0 || size == 4 {
            return Ok(operand as i32);
        }
        // Sign-extend from the encoded width.
        let sign_bit = 1u32 << (8 * size - 1);
        Ok(if operand & sign_bit != 0 {
            (operand | !((sign_bit << 1).wrapping_sub(1))) as i32
        } else {
            operand as i32
        })
    }

    fn load_float_operand(&mut self) -> EngineResult<f64> {
        let mut bytes = [0u8; 8];
        for byte in &mut bytes {
            *byte = self.code_byte(self.pc)?;
            self.pc += 1;
        }
        Ok(f64::from_bits(u64::from_be_bytes(bytes)))
    }
}

/// Operand width encoded in the opcode's suffix.
fn symbol_operand_size(opcode: OpCode) -> u32 {
    match opcode {
        OpCode::PushModule1
        | OpCode::Load1
        | OpCode::LoadAddress1
        | OpCode::Delete1
        | OpCode::Global1
        | OpCode::Local1
        | OpCode::AddModule1
        | OpCode::LoadModule1
        | OpCode::MakeNamedArgument1
        | OpCode::MakeParameter1
        | OpCode::MakeDefaultParameter1
        | OpCode::MakeTupleGroupParameter1
        | OpCode::MakeDictionaryGroupParameter1
        | OpCode::Member1
        | OpCode::MemberAddress1 => 1,
        OpCode::PushModule2
        | OpCode::Load2
        | OpCode::LoadAddress2
        | OpCode::Delete2
        | OpCode::Global2
        | OpCode::Local2
        | OpCode::AddModule2
        | OpCode::LoadModule2
        | OpCode::MakeNamedArgument2
        | OpCode::MakeParameter2
        | OpCode::MakeDefaultParameter2
        | OpCode::MakeTupleGroupParameter2
        | OpCode::MakeDictionaryGroupParameter2
        | OpCode::Member2
        | OpCode::MemberAddress2 => 2,
        _ => 4,
    }
}
