use core::fmt;

use smallvec::SmallVec;
use wavec_ir::{Builder, Definition, Opcode, Operand, PhysReg, RegClass, Temp};

bitflags::bitflags! {
    /// What an entry of the exec mask stack represents
    #[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash)]
    pub struct MaskType: u8 {
        /// The mask of the whole program at this point, outside any divergent control flow
        const GLOBAL = 1 << 0;
        /// Helper lanes are disabled
        const EXACT = 1 << 1;
        /// Helper lanes are enabled
        const WQM = 1 << 2;
        /// The lanes still active in the innermost loop
        const LOOP = 1 << 3;
    }
}

/// An entry of the exec mask stack: a lane mask, and what it represents
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ExecEntry {
    pub mask: Temp,
    pub ty: MaskType,
}

impl ExecEntry {
    #[inline]
    pub const fn new(mask: Temp, ty: MaskType) -> Self {
        Self { mask, ty }
    }
}

impl fmt::Display for ExecEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{:?}", self.mask, self.ty)
    }
}

/// The nested lane masks live at some point of the program, innermost last.
///
/// The bottom entry is the mask of the whole program, the top entry is the one in `exec`.
#[derive(Debug, Clone, Default)]
pub struct ExecStack(SmallVec<[ExecEntry; 4]>);

impl ExecStack {
    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[inline]
    pub fn push(&mut self, mask: Temp, ty: MaskType) {
        self.0.push(ExecEntry::new(mask, ty));
    }

    pub fn pop(&mut self) -> ExecEntry {
        self.0.pop().unwrap_or_else(|| panic!("exec mask stack underflow"))
    }

    /// The entry currently in `exec`
    pub fn top(&self) -> ExecEntry {
        *self.0.last().unwrap_or_else(|| panic!("exec mask stack is empty"))
    }

    pub fn top_mut(&mut self) -> &mut ExecEntry {
        self.0.last_mut().unwrap_or_else(|| panic!("exec mask stack is empty"))
    }

    /// Drop all but the top entry, which becomes the bottom of the stack
    pub fn collapse(&mut self) {
        let top = self.top();
        self.0.clear();
        self.0.push(top);
    }

    /// Put the mask of the top entry in `exec` again.
    ///
    /// This is needed wherever control flow joins, as each predecessor leaves its own mask in
    /// `exec`.
    pub fn restore_top(&mut self, bld: &mut Builder<'_>) {
        let top = self.top_mut();
        top.mask = bld.copy(bld.exec_def(), Operand::temp(top.mask));
    }

    /// Enable helper lanes.
    ///
    /// At the top level, the WQM mask is computed from the exact mask and pushed, so that the
    /// exact mask can be restored later. Anywhere else, the exact mask is on top of the WQM mask it
    /// was derived from, so it is dropped.
    pub fn transition_to_wqm(&mut self, bld: &mut Builder<'_>) {
        let top = self.top();
        if top.ty.contains(MaskType::WQM) {
            return;
        }
        log::trace!(target: "insert-exec-mask", "transition to wqm from {top}");
        if top.ty.contains(MaskType::GLOBAL) {
            let wqm = bld.build(
                Opcode::SWqmB64,
                [bld.exec_def(), bld.scc_def()],
                [Builder::exec(top.mask)],
            );
            self.push(wqm, MaskType::GLOBAL | MaskType::WQM);
            return;
        }
        self.pop();
        assert!(
            self.top().ty.contains(MaskType::WQM),
            "an exact mask must sit on top of the mask it was derived from"
        );
        self.restore_top(bld);
    }

    /// Disable helper lanes.
    ///
    /// The inverse of [ExecStack::transition_to_wqm]: a global WQM mask is dropped to reveal the
    /// exact mask beneath it, anything else is narrowed to the lanes of the program's exact mask.
    pub fn transition_to_exact(&mut self, bld: &mut Builder<'_>) {
        let top = self.top();
        if top.ty.contains(MaskType::EXACT) {
            return;
        }
        log::trace!(target: "insert-exec-mask", "transition to exact from {top}");
        if top.ty.contains(MaskType::GLOBAL) {
            self.pop();
            assert!(
                self.top().ty.contains(MaskType::EXACT),
                "a global wqm mask must sit on top of the exact mask"
            );
            self.restore_top(bld);
            return;
        }
        let exact = bld.tmp(RegClass::S2);
        let saved = bld.build(
            Opcode::SAndSaveexecB64,
            [
                bld.def(RegClass::S2),
                bld.scc_def(),
                Definition::fixed(exact, PhysReg::EXEC),
            ],
            [Operand::temp(self[0].mask), Builder::exec(top.mask)],
        );
        self.top_mut().mask = saved;
        self.push(exact, MaskType::EXACT);
    }
}

impl core::ops::Index<usize> for ExecStack {
    type Output = ExecEntry;

    fn index(&self, index: usize) -> &Self::Output {
        &self.0[index]
    }
}

impl core::ops::IndexMut<usize> for ExecStack {
    fn index_mut(&mut self, index: usize) -> &mut Self::Output {
        &mut self.0[index]
    }
}

impl fmt::Display for ExecStack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[")?;
        for (i, entry) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{entry}")?;
        }
        f.write_str("]")
    }
}
