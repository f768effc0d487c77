//! Programmatic method construction.
//!
//! [`MethodBuilder`] exists so tests and benchmarks can assemble method
//! bodies without hand-counting registers. It tracks the highest register
//! index it sees and sizes the register file accordingly on
//! [`MethodBuilder::build`].

use crate::ir::{
    FieldRef, Instruction, Method, MethodFlags, MethodRef, Opcode, Reg, TypeId,
};

/// Builder for [`Method`] bodies.
#[derive(Debug)]
pub struct MethodBuilder {
    id: MethodRef,
    flags: MethodFlags,
    param_types: Vec<TypeId>,
    code: Vec<Instruction>,
    max_reg: Option<u16>,
}

impl MethodBuilder {
    /// Starts a static method with no parameters.
    #[must_use]
    pub fn new(owner: &str, name: &str) -> Self {
        Self {
            id: MethodRef::new(owner, name, 0),
            flags: MethodFlags::STATIC,
            param_types: Vec::new(),
            code: Vec::new(),
            max_reg: None,
        }
    }

    /// Makes the method an instance method (`v0` becomes `this`).
    #[must_use]
    pub fn instance(mut self) -> Self {
        self.flags.remove(MethodFlags::STATIC);
        self.note_reg(Reg(0));
        self
    }

    /// Flags the method as excluded from optimization.
    #[must_use]
    pub fn no_optimize(mut self) -> Self {
        self.flags.insert(MethodFlags::NO_OPTIMIZE);
        self
    }

    /// Declares a parameter. Parameters occupy the low registers, after
    /// `this` for instance methods.
    #[must_use]
    pub fn param(mut self, ty: &str) -> Self {
        self.param_types.push(TypeId::new(ty));
        let base = if self.flags.contains(MethodFlags::STATIC) {
            0
        } else {
            1
        };
        let reg = base + self.param_types.len() as u16 - 1;
        self.note_reg(Reg(reg));
        self.id = MethodRef::new(
            self.id.owner.clone(),
            &self.id.name,
            self.param_types.len() as u8,
        );
        self
    }

    fn note_reg(&mut self, reg: Reg) {
        self.max_reg = Some(self.max_reg.map_or(reg.0, |m| m.max(reg.0)));
    }

    fn note_instr(&mut self, instr: &Instruction) {
        if let Some(dest) = instr.dest {
            self.note_reg(dest);
        }
        for &src in &instr.srcs {
            self.note_reg(src);
        }
    }

    /// Index the next pushed instruction will occupy; usable as a branch
    /// target for backward branches.
    #[must_use]
    pub fn pos(&self) -> usize {
        self.code.len()
    }

    /// Appends a raw instruction.
    #[must_use]
    pub fn push(mut self, instr: Instruction) -> Self {
        self.note_instr(&instr);
        self.code.push(instr);
        self
    }

    /// Appends `dest = literal`.
    #[must_use]
    pub fn const_(self, dest: Reg, literal: i64) -> Self {
        self.push(Instruction::const_(dest, literal))
    }

    /// Appends `dest = left <op> right`.
    #[must_use]
    pub fn binop(self, opcode: Opcode, dest: Reg, left: Reg, right: Reg) -> Self {
        self.push(Instruction::binop(opcode, dest, left, right))
    }

    /// Appends `dest = left + right`.
    #[must_use]
    pub fn add(self, dest: Reg, left: Reg, right: Reg) -> Self {
        self.binop(Opcode::Add, dest, left, right)
    }

    /// Appends `dest = src`.
    #[must_use]
    pub fn move_(self, dest: Reg, src: Reg) -> Self {
        self.push(Instruction::move_(dest, src))
    }

    /// Appends `dest = object.field`.
    #[must_use]
    pub fn get_field(self, dest: Reg, object: Reg, field: FieldRef) -> Self {
        self.push(Instruction::get_field(dest, object, field))
    }

    /// Appends `object.field = src`.
    #[must_use]
    pub fn put_field(self, src: Reg, object: Reg, field: FieldRef) -> Self {
        self.push(Instruction::put_field(src, object, field))
    }

    /// Appends `dest = array.length`.
    #[must_use]
    pub fn array_length(self, dest: Reg, array: Reg) -> Self {
        self.push(Instruction::array_length(dest, array))
    }

    /// Appends a call.
    #[must_use]
    pub fn invoke(
        self,
        opcode: Opcode,
        dest: Option<Reg>,
        args: Vec<Reg>,
        method: MethodRef,
    ) -> Self {
        self.push(Instruction::invoke(opcode, dest, args, method))
    }

    /// Appends `return src`.
    #[must_use]
    pub fn ret_val(self, src: Reg) -> Self {
        self.push(Instruction::ret_val(src))
    }

    /// Appends `return`.
    #[must_use]
    pub fn ret(self) -> Self {
        self.push(Instruction::ret())
    }

    /// Finishes the method.
    #[must_use]
    pub fn build(self) -> Method {
        let registers = self.max_reg.map_or(0, |m| m + 1);
        Method::new(
            self.id,
            self.flags,
            self.param_types,
            registers,
            self.code,
        )
    }
}
