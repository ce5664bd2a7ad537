//! Stack-based type checker for function bodies.
//!
//! The checker is driven one instruction at a time by the compiler. It keeps
//! a symbolic operand-type stack and a label stack, and after an
//! unconditional transfer of control it lets the stack behave polymorphically
//! until the enclosing label ends.
//!
//! Error codes emitted:
//! - E200: type mismatch / stack height mismatch
//! - E201: br_table targets with different branch types
//! - E202: `if` without `else` whose params differ from its results
//! - E203: `else`/`end` on the wrong kind of label
//! - E304: branch depth out of range

use wisp_types::{format_types, ErrorCode, Opcode, ValidationError, ValueType};

use crate::label::{format_stack, LabelKind, StackType, TypeCheckerLabel};
use crate::CheckResult;

/// Most entries shown from the actual stack when nothing was expected.
const MAX_ACTUAL_STACK_TO_PRINT: usize = 4;

/// Stack truncation needed by a branch to some label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DropKeep {
    /// Values discarded beneath the kept ones.
    pub drop: u32,
    /// Values preserved on top.
    pub keep: u32,
}

// ══════════════════════════════════════════════════════════════════════════════
// TypeChecker
// ══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Default)]
pub struct TypeChecker {
    type_stack: Vec<StackType>,
    label_stack: Vec<TypeCheckerLabel>,
    /// Branch types of the first target of the br_table being checked.
    br_table_sig: Option<Vec<ValueType>>,
}

impl TypeChecker {
    pub fn new() -> Self {
        Self::default()
    }

    // ── Queries ──────────────────────────────────────────────────────────

    /// Label `depth` levels from the innermost one.
    pub fn get_label(&self, depth: usize) -> CheckResult<&TypeCheckerLabel> {
        let len = self.label_stack.len();
        if depth >= len {
            return Err(ValidationError::new(
                ErrorCode::INVALID_DEPTH,
                format!("invalid depth: {depth} (max {})", len.saturating_sub(1)),
            ));
        }
        Ok(&self.label_stack[len - depth - 1])
    }

    pub fn type_stack_len(&self) -> usize {
        self.type_stack.len()
    }

    pub fn label_count(&self) -> usize {
        self.label_stack.len()
    }

    /// Whether the innermost label has been made unreachable.
    pub fn is_unreachable(&self) -> bool {
        self.label_stack.last().map_or(true, |l| l.unreachable)
    }

    /// Drop/keep counts for a branch to the label at `depth`, read from the
    /// live type stack.
    pub fn br_drop_keep(&self, depth: usize) -> CheckResult<DropKeep> {
        let label = self.get_label(depth)?;
        let keep = label.br_types().len();
        let drop = if self.is_unreachable() {
            0
        } else {
            (self.type_stack.len() - label.type_stack_limit).saturating_sub(keep)
        };
        Ok(DropKeep {
            drop: drop as u32,
            keep: keep as u32,
        })
    }

    // ── Stack primitives ─────────────────────────────────────────────────

    fn limit(&self) -> usize {
        self.label_stack.last().map_or(0, |l| l.type_stack_limit)
    }

    /// Type `depth` slots below the top. Below the label's limit this yields
    /// `Any` when unreachable and `None` otherwise.
    fn peek_type(&self, depth: usize) -> Option<StackType> {
        if self.limit() + depth >= self.type_stack.len() {
            return self.is_unreachable().then_some(StackType::Any);
        }
        Some(self.type_stack[self.type_stack.len() - depth - 1])
    }

    fn peek_and_check(&self, depth: usize, expected: StackType) -> bool {
        self.peek_type(depth).is_some_and(|t| t.matches(expected))
    }

    /// Pop `count` slots, clamping at the label's limit. Over-dropping is
    /// only accepted while unreachable.
    fn drop_types(&mut self, count: usize) -> bool {
        let limit = self.limit();
        if limit + count > self.type_stack.len() {
            self.type_stack.truncate(limit);
            return self.is_unreachable();
        }
        let len = self.type_stack.len();
        self.type_stack.truncate(len - count);
        true
    }

    fn push_type(&mut self, ty: StackType) {
        self.type_stack.push(ty);
    }

    fn push_types(&mut self, types: &[ValueType]) {
        self.type_stack.extend(types.iter().copied().map(StackType::Known));
    }

    fn push_label(&mut self, kind: LabelKind, params: &[ValueType], results: &[ValueType]) {
        self.label_stack.push(TypeCheckerLabel::new(
            kind,
            params.to_vec(),
            results.to_vec(),
            self.type_stack.len(),
        ));
    }

    fn reset_type_stack_to_top_label(&mut self) {
        let limit = self.limit();
        self.type_stack.truncate(limit);
    }

    fn set_unreachable(&mut self) -> CheckResult<()> {
        if self.label_stack.is_empty() {
            return self.get_label(0).map(|_| ());
        }
        let limit = self.limit();
        if let Some(label) = self.label_stack.last_mut() {
            label.unreachable = true;
        }
        self.type_stack.truncate(limit);
        Ok(())
    }

    // ── Checks ───────────────────────────────────────────────────────────

    /// Build the mismatch error for `desc`, showing as much of the live stack
    /// as was expected.
    fn mismatch(&self, desc: &str, expected: &[StackType]) -> ValidationError {
        let max_depth = self.type_stack.len().saturating_sub(self.limit());
        let actual_size = if expected.is_empty() {
            MAX_ACTUAL_STACK_TO_PRINT.min(max_depth)
        } else {
            expected.len().min(max_depth)
        };
        let actual = &self.type_stack[self.type_stack.len() - actual_size..];
        ValidationError::new(
            ErrorCode::TYPE_MISMATCH,
            format!(
                "type mismatch in {desc}, expected {} but got {}",
                format_stack(expected, false),
                format_stack(actual, actual_size != max_depth)
            ),
        )
    }

    fn check_signature(&self, sig: &[ValueType], desc: &str) -> CheckResult<()> {
        let ok = sig
            .iter()
            .enumerate()
            .all(|(i, &ty)| self.peek_and_check(sig.len() - i - 1, ty.into()));
        if ok {
            Ok(())
        } else {
            let expected: Vec<StackType> = sig.iter().copied().map(StackType::Known).collect();
            Err(self.mismatch(desc, &expected))
        }
    }

    fn pop_and_check_signature(&mut self, sig: &[ValueType], desc: &str) -> CheckResult<()> {
        self.check_signature(sig, desc)?;
        if !self.drop_types(sig.len()) {
            let expected: Vec<StackType> = sig.iter().copied().map(StackType::Known).collect();
            return Err(self.mismatch(desc, &expected));
        }
        Ok(())
    }

    fn pop_and_check_1(&mut self, ty: ValueType, desc: &str) -> CheckResult<()> {
        self.pop_and_check_signature(&[ty], desc)
    }

    fn check_type_stack_end(&self, desc: &str) -> CheckResult<()> {
        if self.type_stack.len() == self.limit() {
            Ok(())
        } else {
            Err(self.mismatch(desc, &[]))
        }
    }

    fn check_opcode(&mut self, opcode: Opcode) -> CheckResult<()> {
        self.pop_and_check_signature(opcode.params(), opcode.name())?;
        self.push_types(opcode.results());
        Ok(())
    }

    // ══════════════════════════════════════════════════════════════════════
    // Functions
    // ══════════════════════════════════════════════════════════════════════

    /// Reset both stacks and open the implicit function label.
    pub fn begin_function(&mut self, result_types: &[ValueType]) {
        self.type_stack.clear();
        self.label_stack.clear();
        self.br_table_sig = None;
        self.push_label(LabelKind::Func, &[], result_types);
    }

    /// Close the function label. The type stack is empty afterwards.
    pub fn end_function(&mut self) -> CheckResult<()> {
        let label = self.get_label(0)?;
        if label.kind != LabelKind::Func {
            return Err(ValidationError::new(
                ErrorCode::LABEL_KIND_MISMATCH,
                format!("function ended inside an open {}", label.kind.name()),
            ));
        }
        let results = label.result_types.clone();
        self.pop_and_check_signature(&results, "implicit return")?;
        self.check_type_stack_end("function")?;
        self.label_stack.pop();
        self.type_stack.clear();
        Ok(())
    }

    // ══════════════════════════════════════════════════════════════════════
    // Structured control
    // ══════════════════════════════════════════════════════════════════════

    pub fn on_block(&mut self, params: &[ValueType], results: &[ValueType]) -> CheckResult<()> {
        self.pop_and_check_signature(params, "block")?;
        self.push_label(LabelKind::Block, params, results);
        self.push_types(params);
        Ok(())
    }

    pub fn on_loop(&mut self, params: &[ValueType], results: &[ValueType]) -> CheckResult<()> {
        self.pop_and_check_signature(params, "loop")?;
        self.push_label(LabelKind::Loop, params, results);
        self.push_types(params);
        Ok(())
    }

    pub fn on_if(&mut self, params: &[ValueType], results: &[ValueType]) -> CheckResult<()> {
        self.pop_and_check_1(ValueType::I32, "if")?;
        self.pop_and_check_signature(params, "if")?;
        self.push_label(LabelKind::If, params, results);
        self.push_types(params);
        Ok(())
    }

    pub fn on_else(&mut self) -> CheckResult<()> {
        let label = self.get_label(0)?;
        if label.kind != LabelKind::If {
            return Err(ValidationError::new(
                ErrorCode::LABEL_KIND_MISMATCH,
                format!("else inside {}, expected if", label.kind.name()),
            ));
        }
        let results = label.result_types.clone();
        let params = label.param_types.clone();
        self.pop_and_check_signature(&results, "if true branch")?;
        self.check_type_stack_end("if true branch")?;
        self.reset_type_stack_to_top_label();
        self.push_types(&params);
        if let Some(label) = self.label_stack.last_mut() {
            label.kind = LabelKind::Else;
            label.unreachable = false;
        }
        Ok(())
    }

    /// Close a block, loop, if or else. The label's result types are left on
    /// the stack.
    pub fn on_end(&mut self) -> CheckResult<()> {
        let label = self.get_label(0)?;
        let kind = label.kind;
        if kind == LabelKind::Func {
            return Err(ValidationError::new(
                ErrorCode::LABEL_KIND_MISMATCH,
                "end of function body outside end_function",
            ));
        }
        if kind == LabelKind::If && label.param_types != label.result_types {
            return Err(ValidationError::new(
                ErrorCode::IF_WITHOUT_ELSE_SIGNATURE,
                format!(
                    "if without else must have matching params and results, got {} -> {}",
                    format_types(&label.param_types),
                    format_types(&label.result_types)
                ),
            ));
        }
        let results = label.result_types.clone();
        self.pop_and_check_signature(&results, kind.name())?;
        self.check_type_stack_end(kind.name())?;
        self.reset_type_stack_to_top_label();
        self.label_stack.pop();
        self.push_types(&results);
        Ok(())
    }

    // ══════════════════════════════════════════════════════════════════════
    // Branches
    // ══════════════════════════════════════════════════════════════════════

    pub fn on_br(&mut self, depth: usize) -> CheckResult<()> {
        let br_types = self.get_label(depth)?.br_types().to_vec();
        self.check_signature(&br_types, "br")?;
        self.set_unreachable()
    }

    pub fn on_br_if(&mut self, depth: usize) -> CheckResult<()> {
        self.pop_and_check_1(ValueType::I32, "br_if")?;
        let br_types = self.get_label(depth)?.br_types().to_vec();
        self.pop_and_check_signature(&br_types, "br_if")?;
        self.push_types(&br_types);
        Ok(())
    }

    pub fn begin_br_table(&mut self) -> CheckResult<()> {
        self.br_table_sig = None;
        self.pop_and_check_1(ValueType::I32, "br_table")
    }

    /// Check one target (or the default). Every target must share the branch
    /// types of the first.
    pub fn on_br_table_target(&mut self, depth: usize) -> CheckResult<()> {
        let br_types = self.get_label(depth)?.br_types().to_vec();
        self.check_signature(&br_types, "br_table")?;
        match &self.br_table_sig {
            None => self.br_table_sig = Some(br_types),
            Some(first) if *first != br_types => {
                return Err(ValidationError::new(
                    ErrorCode::INCONSISTENT_BR_TABLE,
                    format!(
                        "br_table labels have inconsistent types: expected {}, got {}",
                        format_types(first),
                        format_types(&br_types)
                    ),
                ));
            }
            Some(_) => {}
        }
        Ok(())
    }

    pub fn end_br_table(&mut self) -> CheckResult<()> {
        self.br_table_sig = None;
        self.set_unreachable()
    }

    pub fn on_return(&mut self) -> CheckResult<()> {
        let results = match self.label_stack.first() {
            Some(func) => func.result_types.clone(),
            None => return self.get_label(0).map(|_| ()),
        };
        self.pop_and_check_signature(&results, "return")?;
        self.set_unreachable()
    }

    pub fn on_unreachable(&mut self) -> CheckResult<()> {
        self.set_unreachable()
    }

    // ══════════════════════════════════════════════════════════════════════
    // Calls
    // ══════════════════════════════════════════════════════════════════════

    pub fn on_call(&mut self, params: &[ValueType], results: &[ValueType]) -> CheckResult<()> {
        self.pop_and_check_signature(params, "call")?;
        self.push_types(results);
        Ok(())
    }

    /// Like [`on_call`](Self::on_call), after popping the i32 table index.
    pub fn on_call_indirect(&mut self, params: &[ValueType], results: &[ValueType]) -> CheckResult<()> {
        self.pop_and_check_1(ValueType::I32, "call_indirect")?;
        self.pop_and_check_signature(params, "call_indirect")?;
        self.push_types(results);
        Ok(())
    }

    // ══════════════════════════════════════════════════════════════════════
    // Simple operators
    // ══════════════════════════════════════════════════════════════════════

    pub fn on_const(&mut self, ty: ValueType) -> CheckResult<()> {
        self.push_type(ty.into());
        Ok(())
    }

    pub fn on_get_local(&mut self, ty: ValueType) -> CheckResult<()> {
        self.push_type(ty.into());
        Ok(())
    }

    pub fn on_set_local(&mut self, ty: ValueType) -> CheckResult<()> {
        self.pop_and_check_1(ty, "set_local")
    }

    pub fn on_tee_local(&mut self, ty: ValueType) -> CheckResult<()> {
        self.pop_and_check_1(ty, "tee_local")?;
        self.push_type(ty.into());
        Ok(())
    }

    pub fn on_get_global(&mut self, ty: ValueType) -> CheckResult<()> {
        self.push_type(ty.into());
        Ok(())
    }

    pub fn on_set_global(&mut self, ty: ValueType) -> CheckResult<()> {
        self.pop_and_check_1(ty, "set_global")
    }

    pub fn on_unary(&mut self, opcode: Opcode) -> CheckResult<()> {
        self.check_opcode(opcode)
    }

    pub fn on_binary(&mut self, opcode: Opcode) -> CheckResult<()> {
        self.check_opcode(opcode)
    }

    pub fn on_compare(&mut self, opcode: Opcode) -> CheckResult<()> {
        self.check_opcode(opcode)
    }

    pub fn on_convert(&mut self, opcode: Opcode) -> CheckResult<()> {
        self.check_opcode(opcode)
    }

    pub fn on_load(&mut self, opcode: Opcode) -> CheckResult<()> {
        self.check_opcode(opcode)
    }

    pub fn on_store(&mut self, opcode: Opcode) -> CheckResult<()> {
        self.check_opcode(opcode)
    }

    pub fn on_current_memory(&mut self) -> CheckResult<()> {
        self.push_type(ValueType::I32.into());
        Ok(())
    }

    pub fn on_grow_memory(&mut self) -> CheckResult<()> {
        self.check_opcode(Opcode::GrowMemory)
    }

    pub fn on_drop(&mut self) -> CheckResult<()> {
        if self.drop_types(1) {
            Ok(())
        } else {
            Err(self.mismatch("drop", &[StackType::Any]))
        }
    }

    /// `select`, with the operand type given for the typed form.
    pub fn on_select(&mut self, expected: Option<ValueType>) -> CheckResult<()> {
        let cond_ok = self.peek_and_check(0, ValueType::I32.into());
        let type1 = self.peek_type(1);
        let type2 = self.peek_type(2);
        let mut ok = cond_ok && type1.is_some() && type2.is_some();
        let type1 = type1.unwrap_or(StackType::Any);
        let type2 = type2.unwrap_or(StackType::Any);
        let result_type = match expected {
            None => {
                ok &= type1.matches(type2);
                if type1 == StackType::Any {
                    type2
                } else {
                    type1
                }
            }
            Some(ty) => {
                let ty = StackType::Known(ty);
                ok &= type1.matches(ty) && type2.matches(ty);
                ty
            }
        };
        if !ok {
            return Err(self.mismatch(
                "select",
                &[result_type, result_type, ValueType::I32.into()],
            ));
        }
        if !self.drop_types(3) {
            return Err(self.mismatch(
                "select",
                &[result_type, result_type, ValueType::I32.into()],
            ));
        }
        self.push_type(result_type);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ValueType::*;

    fn checker(results: &[ValueType]) -> TypeChecker {
        let mut tc = TypeChecker::new();
        tc.begin_function(results);
        tc
    }

    #[test]
    fn test_peek_below_limit_is_any_only_when_unreachable() {
        let mut tc = checker(&[]);
        assert_eq!(tc.peek_type(0), None);
        tc.on_unreachable().unwrap();
        assert_eq!(tc.peek_type(0), Some(StackType::Any));
    }

    #[test]
    fn test_over_drop_clamps_to_label_limit() {
        let mut tc = checker(&[]);
        tc.on_const(I32).unwrap();
        tc.on_block(&[], &[]).unwrap();
        tc.on_unreachable().unwrap();
        tc.on_drop().unwrap();
        tc.on_drop().unwrap();
        assert_eq!(tc.type_stack_len(), 1, "outer i32 untouched");
    }

    #[test]
    fn test_mismatch_message_shows_expected_and_actual() {
        let mut tc = checker(&[]);
        tc.on_const(F32).unwrap();
        tc.on_const(I32).unwrap();
        let err = tc.on_binary(Opcode::I32Add).unwrap_err();
        assert_eq!(err.code, ErrorCode::TYPE_MISMATCH);
        assert_eq!(
            err.message,
            "type mismatch in i32.add, expected [i32, i32] but got [f32, i32]"
        );
    }

    #[test]
    fn test_stack_end_message_truncates_deep_stacks() {
        let mut tc = checker(&[]);
        for _ in 0..6 {
            tc.on_const(I64).unwrap();
        }
        let err = tc.end_function().unwrap_err();
        assert_eq!(
            err.message,
            "type mismatch in function, expected [] but got [... i64, i64, i64, i64]"
        );
    }

    #[test]
    fn test_drop_keep_reads_live_depth() {
        let mut tc = checker(&[I32]);
        tc.on_const(I64).unwrap();
        tc.on_block(&[], &[I32]).unwrap();
        tc.on_const(F32).unwrap();
        tc.on_const(I32).unwrap();
        assert_eq!(tc.br_drop_keep(0).unwrap(), DropKeep { drop: 1, keep: 1 });
        assert_eq!(tc.br_drop_keep(1).unwrap(), DropKeep { drop: 2, keep: 1 });
        tc.on_br(0).unwrap();
        assert_eq!(tc.br_drop_keep(0).unwrap(), DropKeep { drop: 0, keep: 1 });
    }

    #[test]
    fn test_select_prefers_concrete_operand_over_wildcard() {
        // Only reachable through unreachable code: [f64, any, i32].
        let mut tc = checker(&[I64]);
        tc.on_unreachable().unwrap();
        tc.push_type(StackType::Known(F64));
        tc.push_type(StackType::Any);
        tc.on_const(I32).unwrap();
        tc.on_select(None).unwrap();
        assert_eq!(tc.type_stack, vec![StackType::Known(F64)]);
        // The concrete result still has to match the function's results.
        let err = tc.end_function().unwrap_err();
        assert_eq!(err.code, ErrorCode::TYPE_MISMATCH);
    }
}

