//! Integration tests for the bytecode compiler.
//!
//! Modules are written in the text format, compiled into a fresh
//! environment, and validate:
//! - The lowered stream: local slots, drop/keep, branch and call targets
//! - Every placeholder is patched by the end of the module
//! - Import linking against defined modules and host delegates
//! - Element/data segments, written only when every segment fits
//! - Error codes for malformed, mistyped and mislinked modules
//! - A rejected module leaves the environment exactly as it was

use std::rc::Rc;

use wasm_encoder::{
    CodeSection, ExportKind, ExportSection, Function, FunctionSection, Instruction as WasmInstr,
    TypeSection, ValType,
};
use wisp_codegen::{compile_and_register, compile_module, CodegenError, CodegenResult};
use wisp_types::{
    Environment, ErrorCode, ExternalKind, FuncSignature, Global, HostCallback, HostError, HostFunc,
    HostImportDelegate, HostImportError, Import, Instruction, Memory, Operands, Opcode,
    StreamReader, Table, TableEntry, TypedValue, ValueType, INVALID_OFFSET,
};

// ══════════════════════════════════════════════════════════════════════════════
// Helpers
// ══════════════════════════════════════════════════════════════════════════════

fn compile(env: &mut Environment, src: &str) -> CodegenResult<usize> {
    let wasm = wat::parse_str(src).expect("test module must parse");
    compile_module(env, &wasm)
}

fn compile_ok(env: &mut Environment, src: &str) -> usize {
    match compile(env, src) {
        Ok(index) => index,
        Err(e) => panic!("compile failed: {e}"),
    }
}

fn expect_code(result: CodegenResult<usize>, code: ErrorCode) -> String {
    match result {
        Ok(index) => panic!("expected {code}, got module {index}"),
        Err(e) => {
            assert_eq!(e.code(), Some(code), "wrong code for: {e}");
            e.to_string()
        }
    }
}

/// Decoded instructions of a defined module's stream range.
fn instructions(env: &Environment, module_index: usize) -> Vec<Instruction> {
    let module = env.modules[module_index]
        .as_defined()
        .expect("defined module");
    let mut reader = StreamReader::new(&env.istream, module.istream_start);
    let mut out = Vec::new();
    while reader.position() < module.istream_end {
        out.push(reader.next_instruction().expect("valid instruction"));
    }
    out
}

fn opcodes(instrs: &[Instruction]) -> Vec<Opcode> {
    instrs.iter().map(|i| i.opcode).collect()
}

fn assert_no_placeholders(instrs: &[Instruction]) {
    for instr in instrs {
        if let (Opcode::Br | Opcode::BrUnless | Opcode::Call, Operands::U32(target)) =
            (instr.opcode, instr.operands)
        {
            assert_ne!(target, INVALID_OFFSET, "unpatched {}", instr.text());
        }
    }
}

fn noop_callback() -> HostCallback {
    Rc::new(|_args: &[TypedValue], _results: &mut [TypedValue]| -> Result<(), HostError> { Ok(()) })
}

/// Accepts `print` functions, any memory, and i32 globals (set to 42).
struct TestHost;

impl HostImportDelegate for TestHost {
    fn import_func(
        &self,
        import: &Import,
        func: &mut HostFunc,
        _sig: &FuncSignature,
    ) -> Result<(), HostImportError> {
        if import.field_name == "print" {
            func.callback = Some(noop_callback());
            Ok(())
        } else {
            Err(HostImportError::unknown("function", import))
        }
    }

    fn import_table(&self, import: &Import, _table: &mut Table) -> Result<(), HostImportError> {
        Err(HostImportError::unknown("table", import))
    }

    fn import_memory(&self, _import: &Import, _memory: &mut Memory) -> Result<(), HostImportError> {
        Ok(())
    }

    fn import_global(&self, _import: &Import, global: &mut Global) -> Result<(), HostImportError> {
        if global.typed_value.ty == ValueType::I32 {
            global.typed_value = TypedValue::i32(42);
        }
        Ok(())
    }
}

fn env_with_host() -> (Environment, usize) {
    let mut env = Environment::new();
    let host = env.append_host_module("host", Rc::new(TestHost));
    (env, host)
}

const LIB: &str = r#"
    (module
      (func (export "inc") (param i32) (result i32)
        local.get 0
        i32.const 1
        i32.add)
      (memory (export "mem") 1 2)
      (global (export "g") i32 (i32.const 5)))
"#;

fn env_with_lib() -> Environment {
    let mut env = Environment::new();
    let wasm = wat::parse_str(LIB).unwrap();
    compile_and_register(&mut env, "lib", &wasm).unwrap();
    env
}

// ══════════════════════════════════════════════════════════════════════════════
// Stream shape
// ══════════════════════════════════════════════════════════════════════════════

#[test]
fn test_add_lowers_to_slots_and_drop_keep() {
    let mut env = Environment::new();
    let m = compile_ok(
        &mut env,
        r#"(module (func (export "add") (param i32 i32) (result i32)
              local.get 0 local.get 1 i32.add))"#,
    );
    let instrs = instructions(&env, m);
    assert_eq!(
        opcodes(&instrs),
        vec![
            Opcode::GetLocal,
            Opcode::GetLocal,
            Opcode::I32Add,
            Opcode::DropKeep,
            Opcode::Return
        ]
    );
    // Both reads sit two slots below the top at their point of execution.
    assert_eq!(instrs[0].operands, Operands::U32(2));
    assert_eq!(instrs[1].operands, Operands::U32(2));
    assert_eq!(instrs[3].operands, Operands::DropKeep(2, 1));

    let export = env.get_export(m, "add").unwrap();
    assert_eq!(export.kind, ExternalKind::Func);
    assert_eq!(env.funcs[export.index].as_defined().unwrap().offset, Some(0));
}

#[test]
fn test_locals_emit_alloca() {
    let mut env = Environment::new();
    let m = compile_ok(
        &mut env,
        r#"(module (func (param i32) (local i64 f32)
              i32.const 7 local.set 0))"#,
    );
    let instrs = instructions(&env, m);
    assert_eq!(instrs[0].opcode, Opcode::Alloca);
    assert_eq!(instrs[0].operands, Operands::U32(2));
    // set_local slot is taken after the operand is popped: 0 + 3 - 0.
    assert_eq!(instrs[2].opcode, Opcode::SetLocal);
    assert_eq!(instrs[2].operands, Operands::U32(3));
    assert_eq!(instrs[3].operands, Operands::DropKeep(3, 0));

    let func = env.funcs[0].as_defined().unwrap();
    assert_eq!(func.local_count, 2);
    assert_eq!(func.local_decl_count, 2);
    assert_eq!(
        func.param_and_local_types,
        vec![ValueType::I32, ValueType::I64, ValueType::F32]
    );
}

#[test]
fn test_block_br_drops_extra_operands() {
    let mut env = Environment::new();
    let m = compile_ok(
        &mut env,
        r#"(module (func (result i32)
              (block (result i32) i32.const 1 i32.const 2 br 0)))"#,
    );
    let instrs = instructions(&env, m);
    assert_eq!(
        opcodes(&instrs),
        vec![
            Opcode::I32Const,
            Opcode::I32Const,
            Opcode::DropKeep,
            Opcode::Br,
            Opcode::Return
        ]
    );
    assert_eq!(instrs[2].operands, Operands::DropKeep(1, 1));
    assert_eq!(instrs[3].operands, Operands::U32(instrs[4].offset as u32));
}

#[test]
fn test_if_else_targets() {
    let mut env = Environment::new();
    let m = compile_ok(
        &mut env,
        r#"(module (func (param i32) (result i32)
              local.get 0
              if (result i32) i32.const 1 else i32.const 2 end))"#,
    );
    let instrs = instructions(&env, m);
    assert_eq!(
        opcodes(&instrs),
        vec![
            Opcode::GetLocal,
            Opcode::BrUnless,
            Opcode::I32Const,
            Opcode::Br,
            Opcode::I32Const,
            Opcode::DropKeep,
            Opcode::Return
        ]
    );
    // br_unless skips to the false arm; the true arm jumps past it.
    assert_eq!(instrs[1].operands, Operands::U32(instrs[4].offset as u32));
    assert_eq!(instrs[3].operands, Operands::U32(instrs[5].offset as u32));
}

#[test]
fn test_loop_br_if_jumps_back() {
    let mut env = Environment::new();
    let m = compile_ok(
        &mut env,
        r#"(module (func (param i32) (result i32)
              (loop $l (result i32)
                local.get 0
                i32.const 1
                i32.sub
                local.tee 0
                br_if $l
                local.get 0)))"#,
    );
    let instrs = instructions(&env, m);
    assert_eq!(
        opcodes(&instrs),
        vec![
            Opcode::GetLocal,
            Opcode::I32Const,
            Opcode::I32Sub,
            Opcode::TeeLocal,
            Opcode::BrUnless,
            Opcode::Br,
            Opcode::GetLocal,
            Opcode::DropKeep,
            Opcode::Return
        ]
    );
    assert_eq!(instrs[3].operands, Operands::U32(2));
    assert_eq!(instrs[4].operands, Operands::U32(instrs[6].offset as u32));
    assert_eq!(instrs[5].operands, Operands::U32(instrs[0].offset as u32));
}

#[test]
fn test_br_table_layout() {
    let mut env = Environment::new();
    let m = compile_ok(
        &mut env,
        r#"(module (func (param i32) (result i32)
              (block
                (block
                  local.get 0
                  br_table 0 1)
                i32.const 10
                return)
              i32.const 20))"#,
    );
    let instrs = instructions(&env, m);
    let table = instrs
        .iter()
        .position(|i| i.opcode == Opcode::BrTable)
        .unwrap();
    let Operands::Pair(count, table_offset) = instrs[table].operands else {
        panic!("br_table operands");
    };
    assert_eq!(count, 1);
    assert_eq!(instrs[table + 1].opcode, Opcode::Data);
    assert_eq!(instrs[table + 1].operands, Operands::Data(18));
    assert_eq!(table_offset as usize, instrs[table + 1].offset + 5);

    let ten = instrs
        .iter()
        .find(|i| i.opcode == Opcode::I32Const && i.operands == Operands::U32(10))
        .unwrap();
    let twenty = instrs
        .iter()
        .find(|i| i.opcode == Opcode::I32Const && i.operands == Operands::U32(20))
        .unwrap();
    let inner = TableEntry::read(&env.istream, table_offset, 0);
    let outer = TableEntry::read(&env.istream, table_offset, 1);
    assert_eq!(inner.offset as usize, ten.offset);
    assert_eq!(outer.offset as usize, twenty.offset);
    assert_eq!((inner.drop, inner.keep), (0, 0));
}

#[test]
fn test_forward_call_is_patched() {
    let mut env = Environment::new();
    let m = compile_ok(
        &mut env,
        r#"(module
              (func $a (export "a") (result i32) call $b)
              (func $b (result i32) i32.const 7))"#,
    );
    let instrs = instructions(&env, m);
    assert_no_placeholders(&instrs);
    let b_offset = env.funcs[1].as_defined().unwrap().offset.unwrap();
    assert_eq!(instrs[0].opcode, Opcode::Call);
    assert_eq!(instrs[0].operands, Operands::U32(b_offset));
}

#[test]
fn test_nested_control_has_no_placeholders() {
    let mut env = Environment::new();
    let m = compile_ok(
        &mut env,
        r#"(module (func $fac (export "fac") (param i64) (result i64)
              (local i64)
              i64.const 1
              local.set 1
              (block $done
                (loop $next
                  local.get 0
                  i64.eqz
                  br_if $done
                  local.get 1
                  local.get 0
                  i64.mul
                  local.set 1
                  local.get 0
                  i64.const 1
                  i64.sub
                  local.set 0
                  br $next))
              local.get 1))"#,
    );
    assert_no_placeholders(&instructions(&env, m));
}

#[test]
fn test_disassembly_lists_instructions() {
    let mut env = Environment::new();
    let m = compile_ok(
        &mut env,
        r#"(module (func (param i32 i32) (result i32)
              local.get 0 local.get 1 i32.add))"#,
    );
    let text = env.disassemble_module(m);
    assert!(text.contains("get_local $2"), "{text}");
    assert!(text.contains("i32.add"), "{text}");
    assert!(text.contains("drop_keep $2 $1"), "{text}");
    assert_eq!(text.lines().count(), 5);
}

#[test]
fn test_compilation_determinism_100_iterations() {
    let src = r#"(module (func (param i32) (result i32)
          local.get 0
          if (result i32) i32.const 1 else i32.const 2 end))"#;
    let wasm = wat::parse_str(src).unwrap();
    let mut first = Environment::new();
    compile_module(&mut first, &wasm).unwrap();
    for _ in 0..100 {
        let mut env = Environment::new();
        compile_module(&mut env, &wasm).unwrap();
        assert_eq!(env.istream, first.istream);
    }
}

// ══════════════════════════════════════════════════════════════════════════════
// Import linking
// ══════════════════════════════════════════════════════════════════════════════

#[test]
fn test_import_from_registered_module() {
    let mut env = env_with_lib();
    let m = compile_ok(
        &mut env,
        r#"(module
              (import "lib" "inc" (func $inc (param i32) (result i32)))
              (func (export "run") (result i32) i32.const 1 call $inc))"#,
    );
    let instrs = instructions(&env, m);
    let inc_offset = env.funcs[0].as_defined().unwrap().offset.unwrap();
    assert_eq!(instrs[1].opcode, Opcode::Call);
    assert_eq!(instrs[1].operands, Operands::U32(inc_offset));
    assert_eq!(env.modules[m].as_defined().unwrap().imports.len(), 1);
}

#[test]
fn test_import_shares_memory() {
    let mut env = env_with_lib();
    let m = compile_ok(&mut env, r#"(module (import "lib" "mem" (memory 1)))"#);
    assert_eq!(env.modules[m].memory_index, env.modules[0].memory_index);
    assert_eq!(env.memories.len(), 1);
}

#[test]
fn test_unknown_import_module() {
    let mut env = Environment::new();
    let msg = expect_code(
        compile(&mut env, r#"(module (import "nope" "f" (func)))"#),
        ErrorCode::UNKNOWN_IMPORT_MODULE,
    );
    assert!(msg.contains("unknown import module \"nope\""), "{msg}");
}

#[test]
fn test_unknown_import_field() {
    let mut env = env_with_lib();
    expect_code(
        compile(&mut env, r#"(module (import "lib" "dec" (func)))"#),
        ErrorCode::UNKNOWN_IMPORT_FIELD,
    );
}

#[test]
fn test_import_kind_mismatch() {
    let mut env = env_with_lib();
    expect_code(
        compile(&mut env, r#"(module (import "lib" "inc" (memory 1)))"#),
        ErrorCode::IMPORT_KIND_MISMATCH,
    );
}

#[test]
fn test_import_signature_mismatch() {
    let mut env = env_with_lib();
    let msg = expect_code(
        compile(&mut env, r#"(module (import "lib" "inc" (func (param i64) (result i32))))"#),
        ErrorCode::IMPORT_SIGNATURE_MISMATCH,
    );
    assert!(msg.contains("import signature mismatch"), "{msg}");
}

#[test]
fn test_import_memory_max_too_large() {
    let mut env = env_with_lib();
    let msg = expect_code(
        compile(&mut env, r#"(module (import "lib" "mem" (memory 1 1)))"#),
        ErrorCode::IMPORT_LIMITS_MISMATCH,
    );
    assert!(msg.contains("max size (2) larger than declared (1)"), "{msg}");
}

#[test]
fn test_import_global_mutability_mismatch() {
    let mut env = env_with_lib();
    expect_code(
        compile(&mut env, r#"(module (import "lib" "g" (global (mut i32))))"#),
        ErrorCode::IMPORT_GLOBAL_MISMATCH,
    );
}

#[test]
fn test_host_delegate_supplies_function() {
    let (mut env, host) = env_with_host();
    let m = compile_ok(
        &mut env,
        r#"(module
              (import "host" "print" (func $p))
              (func call $p))"#,
    );
    let instrs = instructions(&env, m);
    assert_eq!(instrs[0].opcode, Opcode::CallHost);
    assert_eq!(instrs[0].operands, Operands::U32(0));
    assert!(env.funcs[0].is_host());
    // The synthesized function is now a host export.
    assert_eq!(env.get_export(host, "print").map(|e| e.index), Some(0));

    // A second importer binds to the same function.
    compile_ok(&mut env, r#"(module (import "host" "print" (func)))"#);
    assert_eq!(env.funcs.len(), 2, "one host func and one defined func");
}

#[test]
fn test_host_delegate_rejection() {
    let (mut env, _) = env_with_host();
    let msg = expect_code(
        compile(&mut env, r#"(module (import "host" "missing" (func)))"#),
        ErrorCode::HOST_IMPORT_REJECTED,
    );
    assert!(msg.contains("unknown host function import \"host.missing\""), "{msg}");
}

#[test]
fn test_host_global_feeds_initializer() {
    let (mut env, _) = env_with_host();
    compile_ok(
        &mut env,
        r#"(module
              (import "host" "g" (global i32))
              (global i32 (global.get 0)))"#,
    );
    assert_eq!(env.globals.len(), 2);
    assert_eq!(env.globals[1].typed_value, TypedValue::i32(42));
}

#[test]
fn test_appended_host_func_is_imported_directly() {
    let (mut env, host) = env_with_host();
    let log = env
        .append_host_func(
            host,
            "log",
            FuncSignature::new(vec![ValueType::I32], vec![]),
            noop_callback(),
        )
        .unwrap();
    compile_ok(&mut env, r#"(module (import "host" "log" (func (param i32))))"#);
    assert_eq!(env.funcs.len(), log + 1);

    expect_code(
        compile(&mut env, r#"(module (import "host" "log" (func (param i64))))"#),
        ErrorCode::IMPORT_SIGNATURE_MISMATCH,
    );
}

// ══════════════════════════════════════════════════════════════════════════════
// Segments
// ══════════════════════════════════════════════════════════════════════════════

#[test]
fn test_data_segment_is_written() {
    let mut env = Environment::new();
    let m = compile_ok(
        &mut env,
        r#"(module (memory 1) (data (i32.const 8) "hi"))"#,
    );
    let memory = &env.memories[env.modules[m].memory_index.unwrap()];
    assert_eq!(&memory.data[8..10], b"hi");
    assert_eq!(memory.byte_size(), 65536);
}

#[test]
fn test_elem_segment_is_written() {
    let mut env = Environment::new();
    let m = compile_ok(
        &mut env,
        r#"(module
              (table 3 funcref)
              (func $f) (func $g)
              (elem (i32.const 1) $f $g))"#,
    );
    let table = &env.tables[env.modules[m].table_index.unwrap()];
    assert_eq!(table.func_indexes, vec![None, Some(0), Some(1)]);
}

#[test]
fn test_elem_segment_out_of_bounds() {
    let mut env = Environment::new();
    let msg = expect_code(
        compile(
            &mut env,
            r#"(module (table 1 funcref) (func $f) (elem (i32.const 1) $f))"#,
        ),
        ErrorCode::SEGMENT_OUT_OF_BOUNDS,
    );
    assert!(msg.contains("elem segment offset is out of bounds"), "{msg}");
}

#[test]
fn test_failed_segments_leave_shared_memory_untouched() {
    let mut env = env_with_lib();
    let msg = expect_code(
        compile(
            &mut env,
            r#"(module
                  (import "lib" "mem" (memory 1))
                  (data (i32.const 0) "abc")
                  (data (i32.const 65535) "xy"))"#,
        ),
        ErrorCode::SEGMENT_OUT_OF_BOUNDS,
    );
    assert!(msg.contains("data segment is out of bounds: [65535, 65537)"), "{msg}");
    assert_eq!(&env.memories[0].data[0..3], &[0, 0, 0]);
}

#[test]
fn test_passive_data_is_unsupported() {
    let mut env = Environment::new();
    expect_code(
        compile(&mut env, r#"(module (memory 1) (data "x"))"#),
        ErrorCode::UNSUPPORTED_FEATURE,
    );
}

// ══════════════════════════════════════════════════════════════════════════════
// Module structure errors
// ══════════════════════════════════════════════════════════════════════════════

#[test]
fn test_malformed_binary() {
    let mut env = Environment::new();
    let err = compile_module(&mut env, b"not wasm").unwrap_err();
    assert_eq!(err.code(), Some(ErrorCode::MALFORMED_BINARY));
    assert!(env.modules.is_empty());
}

#[test]
fn test_body_type_mismatch_reports_offset() {
    let mut env = Environment::new();
    let result = compile(&mut env, r#"(module (func (result i32) i64.const 0))"#);
    let err = result.as_ref().map(|_| ()).unwrap_err();
    assert!(err.offset().is_some());
    expect_code(result, ErrorCode::TYPE_MISMATCH);
}

#[test]
fn test_start_function_must_be_nullary() {
    let mut env = Environment::new();
    expect_code(
        compile(&mut env, r#"(module (func $s (param i32)) (start $s))"#),
        ErrorCode::INVALID_START_FUNCTION,
    );

    let m = compile_ok(&mut env, r#"(module (func $s) (start $s))"#);
    assert_eq!(env.modules[m].as_defined().unwrap().start_func_index, Some(0));
}

#[test]
fn test_mutable_global_export_rejected() {
    let mut env = Environment::new();
    expect_code(
        compile(
            &mut env,
            r#"(module (global (export "g") (mut i32) (i32.const 0)))"#,
        ),
        ErrorCode::MUTABLE_GLOBAL_EXPORT,
    );
}

#[test]
fn test_multiple_memories_rejected() {
    let mut env = Environment::new();
    expect_code(
        compile(&mut env, r#"(module (memory 1) (memory 1))"#),
        ErrorCode::MULTIPLE_MEMORIES,
    );
}

#[test]
fn test_set_immutable_global_rejected() {
    let mut env = Environment::new();
    let msg = expect_code(
        compile(
            &mut env,
            r#"(module (global $g i32 (i32.const 0)) (func i32.const 1 global.set $g))"#,
        ),
        ErrorCode::IMMUTABLE_GLOBAL_SET,
    );
    assert!(msg.contains("can't set_global on immutable global at index 0."), "{msg}");
}

#[test]
fn test_load_without_memory_rejected() {
    let mut env = Environment::new();
    let msg = expect_code(
        compile(&mut env, r#"(module (func i32.const 0 i32.load drop))"#),
        ErrorCode::MISSING_MEMORY,
    );
    assert!(msg.contains("i32.load requires an imported or defined memory."), "{msg}");
}

#[test]
fn test_over_aligned_load_rejected() {
    let mut env = Environment::new();
    let msg = expect_code(
        compile(
            &mut env,
            r#"(module (memory 1) (func i32.const 0 i32.load align=8 drop))"#,
        ),
        ErrorCode::INVALID_ALIGNMENT,
    );
    assert!(msg.contains("natural alignment (4)"), "{msg}");
}

#[test]
fn test_invalid_local_index() {
    let mut env = Environment::new();
    expect_code(
        compile(&mut env, r#"(module (func local.get 3 drop))"#),
        ErrorCode::INVALID_LOCAL_INDEX,
    );
}

#[test]
fn test_duplicate_export_rejected() {
    let mut types = TypeSection::new();
    types.ty().function(vec![], vec![]);
    let mut funcs = FunctionSection::new();
    funcs.function(0);
    let mut exports = ExportSection::new();
    exports.export("a", ExportKind::Func, 0);
    exports.export("a", ExportKind::Func, 0);
    let mut code = CodeSection::new();
    let mut body = Function::new(vec![]);
    body.instruction(&WasmInstr::End);
    code.function(&body);

    let mut module = wasm_encoder::Module::new();
    module
        .section(&types)
        .section(&funcs)
        .section(&exports)
        .section(&code);
    let wasm = module.finish();

    let mut env = Environment::new();
    let msg = expect_code(compile_module(&mut env, &wasm), ErrorCode::DUPLICATE_EXPORT);
    assert!(msg.contains("duplicate export \"a\""), "{msg}");
}

#[test]
fn test_too_many_locals_rejected() {
    let mut types = TypeSection::new();
    types.ty().function(vec![], vec![]);
    let mut funcs = FunctionSection::new();
    funcs.function(0);
    let mut code = CodeSection::new();
    let mut body = Function::new(vec![(50_001, ValType::I32)]);
    body.instruction(&WasmInstr::End);
    code.function(&body);

    let mut module = wasm_encoder::Module::new();
    module.section(&types).section(&funcs).section(&code);
    let wasm = module.finish();

    let mut env = Environment::new();
    expect_code(compile_module(&mut env, &wasm), ErrorCode::LIMIT_EXCEEDED);
}

// ══════════════════════════════════════════════════════════════════════════════
// Rollback
// ══════════════════════════════════════════════════════════════════════════════

#[test]
fn test_rejected_module_restores_environment() {
    let mut env = env_with_lib();
    let before = env.mark();
    let istream = env.istream.clone();
    expect_code(
        compile(
            &mut env,
            r#"(module
                  (import "lib" "inc" (func (param i32) (result i32)))
                  (memory 1)
                  (global (mut i32) (i32.const 0))
                  (func (result i32) i64.const 0))"#,
        ),
        ErrorCode::TYPE_MISMATCH,
    );
    assert_eq!(env.mark(), before);
    assert_eq!(env.istream, istream);
    assert_eq!(env.find_registered_module("lib"), Some(0));
}

#[test]
fn test_rejected_module_drops_synthesized_host_exports() {
    let (mut env, host) = env_with_host();
    let before = env.mark();
    expect_code(
        compile(
            &mut env,
            r#"(module
                  (import "host" "print" (func))
                  (func (result i32) i64.const 0))"#,
        ),
        ErrorCode::TYPE_MISMATCH,
    );
    assert!(env.get_export(host, "print").is_none());
    assert!(env.funcs.is_empty());
    assert_eq!(env.mark(), before);
}

#[test]
fn test_environment_usable_after_rejection() {
    let mut env = Environment::new();
    expect_code(
        compile(&mut env, r#"(module (func (result i32) i64.const 0))"#),
        ErrorCode::TYPE_MISMATCH,
    );
    let m = compile_ok(&mut env, r#"(module (func (result i32) i32.const 3))"#);
    assert_eq!(m, 0);
    assert_eq!(env.modules[m].as_defined().unwrap().istream_start, 0);
}

#[test]
fn test_rejection_reports_structured_json() {
    let mut env = Environment::new();
    let err = match compile(&mut env, r#"(module (func (result i32) i64.const 0))"#) {
        Ok(index) => panic!("expected rejection, got module {index}"),
        Err(e) => e,
    };
    let CodegenError::Validation(validation) = err else {
        panic!("expected a validation error, got {err}");
    };

    let json: serde_json::Value = serde_json::from_str(&validation.to_json()).unwrap();
    assert_eq!(json["code"], 200);
    assert_eq!(json["category"], "type");
    assert!(json["offset"].is_u64(), "function body errors carry an offset");
    assert!(json["message"].as_str().unwrap().contains("i32"));
}
