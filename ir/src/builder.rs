use crate::{
    BlockId, Definition, Instruction, Opcode, Operand, PhysReg, RegClass, Temp, TempAllocator,
};

/// Appends instructions to an instruction list, allocating new temporaries as needed.
///
/// The builder only borrows the program's [TempAllocator], so it can be used on an instruction
/// list that was taken out of a block while other blocks are inspected.
pub struct Builder<'a> {
    temps: &'a TempAllocator,
    instructions: &'a mut Vec<Instruction>,
}

impl<'a> Builder<'a> {
    pub fn new(temps: &'a TempAllocator, instructions: &'a mut Vec<Instruction>) -> Self {
        Self {
            temps,
            instructions,
        }
    }

    /// Allocate a new temporary without defining it
    #[inline]
    pub fn tmp(&self, rc: RegClass) -> Temp {
        self.temps.allocate(rc)
    }

    /// A definition of a new temporary
    #[inline]
    pub fn def(&self, rc: RegClass) -> Definition {
        Definition::new(self.tmp(rc))
    }

    /// A definition of a new temporary which must be placed in `reg`
    #[inline]
    pub fn def_fixed(&self, rc: RegClass, reg: PhysReg) -> Definition {
        Definition::fixed(self.tmp(rc), reg)
    }

    /// A definition of a new lane mask which is written to `exec`
    #[inline]
    pub fn exec_def(&self) -> Definition {
        self.def_fixed(RegClass::S2, PhysReg::EXEC)
    }

    /// A definition of a new condition flag which is written to `scc`
    #[inline]
    pub fn scc_def(&self) -> Definition {
        self.def_fixed(RegClass::S1, PhysReg::SCC)
    }

    /// Read `mask` from the `exec` register
    #[inline]
    pub fn exec(mask: Temp) -> Operand {
        Operand::fixed(mask, PhysReg::EXEC)
    }

    /// Read `cond` from the `scc` register
    #[inline]
    pub fn scc(cond: Temp) -> Operand {
        Operand::fixed(cond, PhysReg::SCC)
    }

    /// Append `inst`, returning a reference to it so it can be refined further
    pub fn emit(&mut self, inst: Instruction) -> &mut Instruction {
        self.instructions.push(inst);
        let last = self.instructions.len() - 1;
        &mut self.instructions[last]
    }

    /// Append `inst` and return the temporary of its first definition
    pub fn insert(&mut self, inst: Instruction) -> Temp {
        let temp = inst
            .definitions()
            .first()
            .map(|def| def.temp())
            .unwrap_or_else(|| panic!("{} has no definitions", inst.opcode));
        self.instructions.push(inst);
        temp
    }

    /// Build an instruction in the default format of `opcode`, returning its first definition
    pub fn build(
        &mut self,
        opcode: Opcode,
        definitions: impl Into<Box<[Definition]>>,
        operands: impl Into<Box<[Operand]>>,
    ) -> Temp {
        self.insert(Instruction::new(opcode, definitions, operands))
    }

    /// A single-entry parallel copy
    pub fn copy(&mut self, dst: Definition, src: Operand) -> Temp {
        self.build(Opcode::PParallelCopy, [dst], [src])
    }

    /// Materialize `op` in a scalar register.
    ///
    /// Scalar temporaries are returned as-is, vector values go through `p_as_uniform`.
    pub fn as_uniform(&mut self, op: Operand) -> Temp {
        match op.as_temp() {
            Some(temp) if temp.reg_class().is_sgpr() => temp,
            _ => {
                let rc = RegClass::new(crate::RegType::Sgpr, op.size() as u8);
                self.build(Opcode::PAsUniform, [self.def(rc)], [op])
            }
        }
    }

    /// Append a pseudo-branch to the given targets, `[taken, not taken]`
    pub fn branch(
        &mut self,
        opcode: Opcode,
        operands: impl Into<Box<[Operand]>>,
        taken: BlockId,
        not_taken: Option<BlockId>,
    ) {
        let mut inst = Instruction::new(opcode, [], operands);
        inst.set_branch_targets([Some(taken), not_taken]);
        self.instructions.push(inst);
    }

    /// The number of instructions in the underlying list
    #[inline]
    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    /// Remove and return the last instruction of the underlying list
    pub fn pop(&mut self) -> Option<Instruction> {
        self.instructions.pop()
    }
}
