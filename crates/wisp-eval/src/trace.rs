//! Instruction tracing.

use wisp_types::{Environment, Opcode, Operands, StreamReader, TypedValue, Value, ValueType};

use crate::thread::Thread;

/// Describe the instruction at the thread's pc together with the stack
/// operands it is about to consume, e.g. ` 42| i32.add i32:1, i32:2`.
///
/// Reads only; neither the thread nor the environment changes.
pub fn trace_pc(env: &Environment, thread: &Thread) -> String {
    let pc = thread.pc();
    let Some(instr) = StreamReader::new(&env.istream, pc as usize).next_instruction() else {
        return format!("{pc:4}| <invalid>");
    };

    let operands = operand_types(env, instr.opcode, instr.operands);
    let values = thread.values();
    let count = operands.len().min(values.len());
    let shown: Vec<String> = operands[operands.len() - count..]
        .iter()
        .zip(&values[values.len() - count..])
        .map(|(ty, &value)| match ty {
            Some(ty) => TypedValue::new(*ty, value).to_string(),
            None => raw(value),
        })
        .collect();

    if shown.is_empty() {
        format!("{pc:4}| {}", instr.text())
    } else {
        format!("{pc:4}| {} {}", instr.text(), shown.join(", "))
    }
}

/// Types of the values an instruction pops, bottom first. `None` marks a
/// slot whose type the stream does not record.
fn operand_types(env: &Environment, opcode: Opcode, operands: Operands) -> Vec<Option<ValueType>> {
    use Opcode::*;
    match (opcode, operands) {
        (BrUnless | BrTable | CallIndirect, _) => vec![Some(ValueType::I32)],
        (Drop | SetLocal | TeeLocal, _) => vec![None],
        (Select, _) => vec![None, None, Some(ValueType::I32)],
        (SetGlobal, Operands::U32(index)) => env
            .globals
            .get(index as usize)
            .map(|global| vec![Some(global.typed_value.ty)])
            .unwrap_or_default(),
        (CallHost, Operands::U32(index)) => env
            .funcs
            .get(index as usize)
            .map(|func| {
                env.sigs[func.sig_index()]
                    .param_types
                    .iter()
                    .map(|&ty| Some(ty))
                    .collect()
            })
            .unwrap_or_default(),
        _ => opcode.params().iter().map(|&ty| Some(ty)).collect(),
    }
}

fn raw(value: Value) -> String {
    format!("{:#x}", value.bits())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trace_shows_typed_operands_without_mutation() {
        let mut env = Environment::new();
        env.istream.push(Opcode::I32Add.byte());
        let mut thread = Thread::default();
        thread.push(Value::from_i32(1)).unwrap();
        thread.push(Value::from_i32(2)).unwrap();

        let line = trace_pc(&env, &thread);
        assert_eq!(line, "   0| i32.add i32:1, i32:2");
        assert_eq!(thread.value_stack_top(), 2);
        assert_eq!(thread.pc(), 0);
    }

    #[test]
    fn test_trace_invalid_byte() {
        let mut env = Environment::new();
        env.istream.push(0xff);
        let thread = Thread::default();
        assert_eq!(trace_pc(&env, &thread), "   0| <invalid>");
    }

    #[test]
    fn test_trace_raw_slots() {
        let mut env = Environment::new();
        env.istream.push(Opcode::Drop.byte());
        let mut thread = Thread::default();
        thread.push(Value::from_i64(255)).unwrap();
        assert_eq!(trace_pc(&env, &thread), "   0| drop 0xff");
    }
}
