//! Register-based instruction model.
//!
//! Instructions follow the register-machine convention: an optional destination
//! register, a list of source registers, and opcode-specific payloads (a
//! literal, a field reference, a method reference, a type, or a branch target).
//! The uniform shape keeps the value-numbering engine free of per-opcode
//! pattern matching; classification helpers on [`Opcode`] and [`Instruction`]
//! answer the questions the optimizer actually asks (is this pure, does it
//! write memory, is it a terminator).

use std::fmt;
use std::sync::Arc;

/// A virtual register.
///
/// Registers are method-local; parameter registers occupy the low indices
/// (`v0` is `this` for instance methods, parameters follow).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Reg(pub u16);

impl fmt::Display for Reg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// Symbolic identity of a class or primitive type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeId(Arc<str>);

impl TypeId {
    /// Creates a type identity from its fully qualified name.
    pub fn new(name: &str) -> Self {
        Self(Arc::from(name))
    }

    /// The fully qualified name of this type.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.0
    }
}

impl From<&str> for TypeId {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl fmt::Display for TypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Symbolic reference to a field, by declaring type and name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FieldRef {
    /// Declaring type of the field.
    pub owner: TypeId,
    /// Field name.
    pub name: Arc<str>,
}

impl FieldRef {
    /// Creates a field reference.
    pub fn new(owner: impl Into<TypeId>, name: &str) -> Self {
        Self {
            owner: owner.into(),
            name: Arc::from(name),
        }
    }
}

impl fmt::Display for FieldRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.owner, self.name)
    }
}

/// Symbolic reference to a method, by declaring type, name, and arity.
///
/// Also serves as the method's identity within a
/// [`Scope`](crate::ir::Scope): two methods with the same owner, name, and
/// arity are the same method.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MethodRef {
    /// Declaring type of the method.
    pub owner: TypeId,
    /// Method name.
    pub name: Arc<str>,
    /// Number of declared parameters (excluding `this`).
    pub params: u8,
}

impl MethodRef {
    /// Creates a method reference.
    pub fn new(owner: impl Into<TypeId>, name: &str, params: u8) -> Self {
        Self {
            owner: owner.into(),
            name: Arc::from(name),
            params,
        }
    }
}

impl fmt::Display for MethodRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}/{}", self.owner, self.name, self.params)
    }
}

/// Register-machine opcodes.
///
/// The set covers what the optimizer needs to reason about: pure
/// computations, memory access through fields and arrays, allocation, calls,
/// and control flow. `CheckEq` exists only for the runtime-assertion mode of
/// the value-numbering engine; it traps at runtime if its operands differ.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, strum::Display, strum::EnumIter)]
#[strum(serialize_all = "snake_case")]
#[allow(missing_docs)]
pub enum Opcode {
    Nop,
    Const,
    ConstClass,
    ConstString,
    Move,
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    And,
    Or,
    Xor,
    Shl,
    Shr,
    Neg,
    Not,
    Cmp,
    Cast,
    GetField,
    PutField,
    GetStatic,
    PutStatic,
    NewInstance,
    NewArray,
    ArrayGet,
    ArrayPut,
    ArrayLength,
    InvokeStatic,
    InvokeVirtual,
    InvokeDirect,
    Goto,
    IfZero,
    IfCmp,
    Return,
    ReturnValue,
    CheckEq,
}

impl Opcode {
    /// Whether this opcode is a side-effect-free computation whose result
    /// depends only on its operands.
    ///
    /// `Div` and `Rem` are excluded: they can throw on a zero divisor, so
    /// hoisting or eliminating them would change observable behavior.
    #[must_use]
    pub fn is_pure_computation(self) -> bool {
        matches!(
            self,
            Self::Add
                | Self::Sub
                | Self::Mul
                | Self::And
                | Self::Or
                | Self::Xor
                | Self::Shl
                | Self::Shr
                | Self::Neg
                | Self::Not
                | Self::Cmp
                | Self::Cast
                | Self::ConstClass
                | Self::ConstString
        )
    }

    /// Whether operand order is irrelevant for this opcode.
    #[must_use]
    pub fn is_commutative(self) -> bool {
        matches!(
            self,
            Self::Add | Self::Mul | Self::And | Self::Or | Self::Xor
        )
    }

    /// Whether this opcode writes to memory observable outside the method.
    #[must_use]
    pub fn writes_memory(self) -> bool {
        matches!(self, Self::PutField | Self::PutStatic | Self::ArrayPut)
    }

    /// Whether this opcode is a call.
    #[must_use]
    pub fn is_invoke(self) -> bool {
        matches!(
            self,
            Self::InvokeStatic | Self::InvokeVirtual | Self::InvokeDirect
        )
    }

    /// Whether this opcode ends a basic block.
    #[must_use]
    pub fn is_terminator(self) -> bool {
        matches!(
            self,
            Self::Goto | Self::IfZero | Self::IfCmp | Self::Return | Self::ReturnValue
        )
    }

    /// Whether this opcode is a conditional or unconditional branch with an
    /// explicit target.
    #[must_use]
    pub fn is_branch(self) -> bool {
        matches!(self, Self::Goto | Self::IfZero | Self::IfCmp)
    }
}

/// A single register-machine instruction.
///
/// Only the payload fields relevant to the opcode are populated; the rest
/// stay `None`. Branch targets are indices into the linear instruction list
/// while a method is in linear form, and block ids while its control-flow
/// graph is built (the graph owns that translation).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    /// The operation performed.
    pub opcode: Opcode,
    /// Destination register, if the instruction produces a value.
    pub dest: Option<Reg>,
    /// Source registers, in operand order.
    pub srcs: Vec<Reg>,
    /// Literal payload (`Const` value, `ConstString` pool index).
    pub literal: Option<i64>,
    /// Field payload for field access opcodes.
    pub field: Option<FieldRef>,
    /// Method payload for invoke opcodes.
    pub method: Option<MethodRef>,
    /// Type payload (`Cast`, `ConstClass`, allocation, array element type).
    pub type_ref: Option<TypeId>,
    /// Branch target for branch opcodes.
    pub target: Option<usize>,
}

impl Instruction {
    fn raw(opcode: Opcode) -> Self {
        Self {
            opcode,
            dest: None,
            srcs: Vec::new(),
            literal: None,
            field: None,
            method: None,
            type_ref: None,
            target: None,
        }
    }

    /// `dest = literal`
    #[must_use]
    pub fn const_(dest: Reg, literal: i64) -> Self {
        Self {
            dest: Some(dest),
            literal: Some(literal),
            ..Self::raw(Opcode::Const)
        }
    }

    /// `dest = class(ty)`
    #[must_use]
    pub fn const_class(dest: Reg, ty: TypeId) -> Self {
        Self {
            dest: Some(dest),
            type_ref: Some(ty),
            ..Self::raw(Opcode::ConstClass)
        }
    }

    /// `dest = string-pool[index]`
    #[must_use]
    pub fn const_string(dest: Reg, index: i64) -> Self {
        Self {
            dest: Some(dest),
            literal: Some(index),
            ..Self::raw(Opcode::ConstString)
        }
    }

    /// `dest = src`
    #[must_use]
    pub fn move_(dest: Reg, src: Reg) -> Self {
        Self {
            dest: Some(dest),
            srcs: vec![src],
            ..Self::raw(Opcode::Move)
        }
    }

    /// `dest = left <op> right` for a binary opcode.
    #[must_use]
    pub fn binop(opcode: Opcode, dest: Reg, left: Reg, right: Reg) -> Self {
        Self {
            dest: Some(dest),
            srcs: vec![left, right],
            ..Self::raw(opcode)
        }
    }

    /// `dest = <op> src` for a unary opcode (`Neg`, `Not`).
    #[must_use]
    pub fn unop(opcode: Opcode, dest: Reg, src: Reg) -> Self {
        Self {
            dest: Some(dest),
            srcs: vec![src],
            ..Self::raw(opcode)
        }
    }

    /// `dest = (ty) src`
    #[must_use]
    pub fn cast(dest: Reg, src: Reg, ty: TypeId) -> Self {
        Self {
            dest: Some(dest),
            srcs: vec![src],
            type_ref: Some(ty),
            ..Self::raw(Opcode::Cast)
        }
    }

    /// `dest = object.field`
    #[must_use]
    pub fn get_field(dest: Reg, object: Reg, field: FieldRef) -> Self {
        Self {
            dest: Some(dest),
            srcs: vec![object],
            field: Some(field),
            ..Self::raw(Opcode::GetField)
        }
    }

    /// `object.field = src`
    #[must_use]
    pub fn put_field(src: Reg, object: Reg, field: FieldRef) -> Self {
        Self {
            srcs: vec![src, object],
            field: Some(field),
            ..Self::raw(Opcode::PutField)
        }
    }

    /// `dest = field` (static)
    #[must_use]
    pub fn get_static(dest: Reg, field: FieldRef) -> Self {
        Self {
            dest: Some(dest),
            field: Some(field),
            ..Self::raw(Opcode::GetStatic)
        }
    }

    /// `field = src` (static)
    #[must_use]
    pub fn put_static(src: Reg, field: FieldRef) -> Self {
        Self {
            srcs: vec![src],
            field: Some(field),
            ..Self::raw(Opcode::PutStatic)
        }
    }

    /// `dest = new ty`
    #[must_use]
    pub fn new_instance(dest: Reg, ty: TypeId) -> Self {
        Self {
            dest: Some(dest),
            type_ref: Some(ty),
            ..Self::raw(Opcode::NewInstance)
        }
    }

    /// `dest = new ty[length]`
    #[must_use]
    pub fn new_array(dest: Reg, length: Reg, elem_ty: TypeId) -> Self {
        Self {
            dest: Some(dest),
            srcs: vec![length],
            type_ref: Some(elem_ty),
            ..Self::raw(Opcode::NewArray)
        }
    }

    /// `dest = array[index]`, element type attached when known.
    #[must_use]
    pub fn array_get(dest: Reg, array: Reg, index: Reg, elem_ty: Option<TypeId>) -> Self {
        Self {
            dest: Some(dest),
            srcs: vec![array, index],
            type_ref: elem_ty,
            ..Self::raw(Opcode::ArrayGet)
        }
    }

    /// `array[index] = src`, element type attached when known.
    #[must_use]
    pub fn array_put(src: Reg, array: Reg, index: Reg, elem_ty: Option<TypeId>) -> Self {
        Self {
            srcs: vec![src, array, index],
            type_ref: elem_ty,
            ..Self::raw(Opcode::ArrayPut)
        }
    }

    /// `dest = array.length`
    #[must_use]
    pub fn array_length(dest: Reg, array: Reg) -> Self {
        Self {
            dest: Some(dest),
            srcs: vec![array],
            ..Self::raw(Opcode::ArrayLength)
        }
    }

    /// Call with an optional result.
    #[must_use]
    pub fn invoke(opcode: Opcode, dest: Option<Reg>, args: Vec<Reg>, method: MethodRef) -> Self {
        debug_assert!(opcode.is_invoke());
        Self {
            dest,
            srcs: args,
            method: Some(method),
            ..Self::raw(opcode)
        }
    }

    /// Unconditional branch to a linear instruction index.
    #[must_use]
    pub fn goto(target: usize) -> Self {
        Self {
            target: Some(target),
            ..Self::raw(Opcode::Goto)
        }
    }

    /// Branch to `target` when `src == 0`, fall through otherwise.
    #[must_use]
    pub fn if_zero(src: Reg, target: usize) -> Self {
        Self {
            srcs: vec![src],
            target: Some(target),
            ..Self::raw(Opcode::IfZero)
        }
    }

    /// Branch to `target` when `left == right`, fall through otherwise.
    #[must_use]
    pub fn if_cmp(left: Reg, right: Reg, target: usize) -> Self {
        Self {
            srcs: vec![left, right],
            target: Some(target),
            ..Self::raw(Opcode::IfCmp)
        }
    }

    /// Return without a value.
    #[must_use]
    pub fn ret() -> Self {
        Self::raw(Opcode::Return)
    }

    /// Return `src`.
    #[must_use]
    pub fn ret_val(src: Reg) -> Self {
        Self {
            srcs: vec![src],
            ..Self::raw(Opcode::ReturnValue)
        }
    }

    /// No-op placeholder.
    #[must_use]
    pub fn nop() -> Self {
        Self::raw(Opcode::Nop)
    }

    /// Runtime verification: trap unless `left == right`.
    #[must_use]
    pub fn check_eq(left: Reg, right: Reg) -> Self {
        Self {
            srcs: vec![left, right],
            ..Self::raw(Opcode::CheckEq)
        }
    }

    /// Returns a copy of this instruction with a different destination.
    #[must_use]
    pub fn with_dest(&self, dest: Reg) -> Self {
        let mut copy = self.clone();
        copy.dest = Some(dest);
        copy
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.opcode)?;
        if let Some(dest) = self.dest {
            write!(f, " {dest} <-")?;
        }
        for src in &self.srcs {
            write!(f, " {src}")?;
        }
        if let Some(lit) = self.literal {
            write!(f, " #{lit}")?;
        }
        if let Some(field) = &self.field {
            write!(f, " {field}")?;
        }
        if let Some(method) = &self.method {
            write!(f, " {method}")?;
        }
        if let Some(ty) = &self.type_ref {
            write!(f, " <{ty}>")?;
        }
        if let Some(target) = self.target {
            write!(f, " @{target}")?;
        }
        Ok(())
    }
}
