//! Stream emission and branch-target fixups.
//!
//! A branch whose target offset is not known yet is written with an
//! [`INVALID_OFFSET`] placeholder and its position recorded in a fixup list.
//! Label fixups are keyed by depth counted from the function's outermost
//! label, which stays stable while inner labels are pushed and popped. Call
//! fixups are keyed by defined-function index and are resolved when the
//! callee's body starts.

use wisp_checker::DropKeep;
use wisp_types::{ErrorCode, Opcode, INVALID_OFFSET};

use crate::compiler::ModuleCompiler;
use crate::error::{invalid, CodegenError, CodegenResult};

/// A compiler-side label, parallel to the checker's label stack.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct Label {
    /// Branch target; known up front only for loops.
    pub offset: Option<u32>,
    /// Placeholder of the pending `br_unless` / `br` of an if or else arm.
    pub fixup_offset: Option<u32>,
}

fn append_fixup(fixups: &mut Vec<Vec<u32>>, index: usize, offset: u32) {
    if index >= fixups.len() {
        fixups.resize_with(index + 1, Vec::new);
    }
    fixups[index].push(offset);
}

impl ModuleCompiler<'_> {
    // ── Raw emission ─────────────────────────────────────────────────────

    pub(crate) fn istream_offset(&self) -> u32 {
        self.env.istream.len() as u32
    }

    pub(crate) fn emit_opcode(&mut self, opcode: Opcode) {
        self.env.istream.push(opcode.byte());
    }

    pub(crate) fn emit_u8(&mut self, value: u8) {
        self.env.istream.push(value);
    }

    pub(crate) fn emit_u32(&mut self, value: u32) {
        self.env.istream.extend_from_slice(&value.to_le_bytes());
    }

    pub(crate) fn emit_u64(&mut self, value: u64) {
        self.env.istream.extend_from_slice(&value.to_le_bytes());
    }

    pub(crate) fn emit_u32_at(&mut self, offset: u32, value: u32) {
        let at = offset as usize;
        self.env.istream[at..at + 4].copy_from_slice(&value.to_le_bytes());
    }

    /// Emit a `u32` placeholder and return its position.
    pub(crate) fn emit_placeholder(&mut self) -> u32 {
        let at = self.istream_offset();
        self.emit_u32(INVALID_OFFSET);
        at
    }

    // ── Drop/keep ────────────────────────────────────────────────────────

    fn keep_count(dk: DropKeep) -> CodegenResult<u8> {
        u8::try_from(dk.keep).map_err(|_| {
            invalid(
                ErrorCode::LIMIT_EXCEEDED,
                format!("branch keeps {} values (max 255)", dk.keep),
            )
        })
    }

    pub(crate) fn emit_drop_keep(&mut self, dk: DropKeep) -> CodegenResult<()> {
        let keep = Self::keep_count(dk)?;
        match (dk.drop, keep) {
            (0, _) => {}
            (1, 0) => self.emit_opcode(Opcode::Drop),
            (drop, keep) => {
                self.emit_opcode(Opcode::DropKeep);
                self.emit_u32(drop);
                self.emit_u8(keep);
            }
        }
        Ok(())
    }

    // ── Labels ───────────────────────────────────────────────────────────

    pub(crate) fn push_label(&mut self, offset: Option<u32>, fixup_offset: Option<u32>) {
        self.labels.push(Label {
            offset,
            fixup_offset,
        });
    }

    pub(crate) fn pop_label(&mut self) {
        self.labels.pop();
        if self.depth_fixups.len() > self.labels.len() {
            self.depth_fixups.truncate(self.labels.len());
        }
    }

    pub(crate) fn top_label_mut(&mut self) -> CodegenResult<&mut Label> {
        self.labels
            .last_mut()
            .ok_or_else(|| invalid(ErrorCode::INVALID_DEPTH, "no open label"))
    }

    fn label(&self, depth: usize) -> CodegenResult<Label> {
        self.labels
            .len()
            .checked_sub(depth + 1)
            .map(|i| self.labels[i])
            .ok_or_else(|| {
                invalid(
                    ErrorCode::INVALID_DEPTH,
                    format!("invalid depth: {depth} (max {})", self.labels.len().saturating_sub(1)),
                )
            })
    }

    /// Patch every pending branch to the innermost label with the current
    /// offset.
    pub(crate) fn fixup_top_label(&mut self) {
        let Some(top) = self.labels.len().checked_sub(1) else {
            return;
        };
        if top >= self.depth_fixups.len() {
            return;
        }
        let offset = self.istream_offset();
        for fixup in std::mem::take(&mut self.depth_fixups[top]) {
            self.emit_u32_at(fixup, offset);
        }
    }

    // ── Branches ─────────────────────────────────────────────────────────

    fn emit_br_offset(&mut self, depth: usize) -> CodegenResult<()> {
        match self.label(depth)?.offset {
            Some(offset) => self.emit_u32(offset),
            None => {
                let key = self.labels.len() - 1 - depth;
                let at = self.emit_placeholder();
                append_fixup(&mut self.depth_fixups, key, at);
            }
        }
        Ok(())
    }

    pub(crate) fn emit_br(&mut self, depth: usize, dk: DropKeep) -> CodegenResult<()> {
        self.emit_drop_keep(dk)?;
        self.emit_opcode(Opcode::Br);
        self.emit_br_offset(depth)
    }

    /// One `offset drop keep` entry of a branch table.
    pub(crate) fn emit_br_table_entry(&mut self, depth: usize) -> CodegenResult<()> {
        let dk = self.checker.br_drop_keep(depth)?;
        let keep = Self::keep_count(dk)?;
        self.emit_br_offset(depth)?;
        self.emit_u32(dk.drop);
        self.emit_u8(keep);
        Ok(())
    }

    // ── Calls ────────────────────────────────────────────────────────────

    /// Emit the body offset of a defined callee, deferring it if the callee
    /// has not been compiled yet.
    pub(crate) fn emit_func_offset(
        &mut self,
        func_index: usize,
        module_func_index: usize,
    ) -> CodegenResult<()> {
        let offset = self.env.funcs[func_index]
            .as_defined()
            .and_then(|f| f.offset);
        match offset {
            Some(offset) => self.emit_u32(offset),
            None => {
                let defined_index = module_func_index
                    .checked_sub(self.num_func_imports)
                    .ok_or_else(|| {
                        CodegenError::Internal(format!("imported function {func_index} has no body"))
                    })?;
                let at = self.emit_placeholder();
                append_fixup(&mut self.func_fixups, defined_index, at);
            }
        }
        Ok(())
    }
}
