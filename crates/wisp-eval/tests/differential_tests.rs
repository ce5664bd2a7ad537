//! Differential tests: the interpreter against `wasmi`.
//!
//! The same binary is compiled by both engines and every export is called
//! over a grid of edge-case inputs. Validates:
//! - Integer arithmetic, shifts and rotations agree bit for bit
//! - Trapping inputs trap in both engines
//! - Float min/max/copysign/nearest/conversions agree on non-NaN results
//! - Whole programs (loops, recursion, memory) compute the same values

use wasmi::{Engine, Linker, Module, Store};
use wisp_codegen::compile_module;
use wisp_eval::{run_export, Thread};
use wisp_types::{Environment, TypedValue};

// ══════════════════════════════════════════════════════════════════════════════
// Helpers
// ══════════════════════════════════════════════════════════════════════════════

/// Both engines, instantiated from one binary.
struct Engines {
    env: Environment,
    module: usize,
    thread: Thread,
    store: Store<()>,
    instance: wasmi::Instance,
}

impl Engines {
    fn new(src: &str) -> Self {
        let wasm = wat::parse_str(src).expect("test module must parse");

        let mut env = Environment::new();
        let module = match compile_module(&mut env, &wasm) {
            Ok(index) => index,
            Err(e) => panic!("compile failed: {e}"),
        };

        let engine = Engine::default();
        let wasmi_module = Module::new(&engine, &wasm[..]).expect("wasmi must accept the module");
        let mut store = Store::new(&engine, ());
        let linker = Linker::<()>::new(&engine);
        let instance = linker
            .instantiate(&mut store, &wasmi_module)
            .expect("failed to instantiate")
            .start(&mut store)
            .expect("failed to start instance");

        Self {
            env,
            module,
            thread: Thread::default(),
            store,
            instance,
        }
    }

    /// Call `name` in this interpreter; `None` on a trap.
    fn ours(&mut self, name: &str, args: &[TypedValue]) -> Option<u64> {
        run_export(&mut self.env, &mut self.thread, self.module, name, args)
            .ok()
            .map(|results| results[0].value.bits())
    }

    fn binary_i32(&mut self, name: &str, a: i32, b: i32) -> (Option<u64>, Option<u64>) {
        let ours = self.ours(name, &[TypedValue::i32(a), TypedValue::i32(b)]);
        let theirs = self
            .instance
            .get_typed_func::<(i32, i32), i32>(&self.store, name)
            .unwrap_or_else(|_| panic!("{name} export missing"))
            .call(&mut self.store, (a, b))
            .ok()
            .map(|v| u64::from(v as u32));
        (ours, theirs)
    }

    fn binary_i64(&mut self, name: &str, a: i64, b: i64) -> (Option<u64>, Option<u64>) {
        let ours = self.ours(name, &[TypedValue::i64(a), TypedValue::i64(b)]);
        let theirs = self
            .instance
            .get_typed_func::<(i64, i64), i64>(&self.store, name)
            .unwrap_or_else(|_| panic!("{name} export missing"))
            .call(&mut self.store, (a, b))
            .ok()
            .map(|v| v as u64);
        (ours, theirs)
    }

    fn unary_i32(&mut self, name: &str, a: i32) -> (Option<u64>, Option<u64>) {
        let ours = self.ours(name, &[TypedValue::i32(a)]);
        let theirs = self
            .instance
            .get_typed_func::<i32, i32>(&self.store, name)
            .unwrap_or_else(|_| panic!("{name} export missing"))
            .call(&mut self.store, a)
            .ok()
            .map(|v| u64::from(v as u32));
        (ours, theirs)
    }
}

const I32_EDGES: &[i32] = &[0, 1, -1, 2, 7, -7, 31, 32, 33, i32::MIN, i32::MAX];
const I64_EDGES: &[i64] = &[0, 1, -1, 3, -3, 63, 64, 65, i64::MIN, i64::MAX];

/// f32 bit patterns without NaNs: zeros, halves, infinities, extremes.
const F32_EDGES: &[u32] = &[
    0x0000_0000, // 0.0
    0x8000_0000, // -0.0
    0x3fc0_0000, // 1.5
    0xc020_0000, // -2.5
    0x4020_0000, // 2.5
    0x7f80_0000, // inf
    0xff80_0000, // -inf
    0x7f7f_ffff, // f32::MAX
    0x0000_0001, // smallest subnormal
    0x4f00_0000, // 2^31
    0xcf00_0000, // -2^31
];

fn is_f32_nan(bits: Option<u64>) -> bool {
    bits.is_some_and(|b| f32::from_bits(b as u32).is_nan())
}

// ══════════════════════════════════════════════════════════════════════════════
// Integer operators
// ══════════════════════════════════════════════════════════════════════════════

const I32_OPS: &[&str] = &[
    "add", "sub", "mul", "div_s", "div_u", "rem_s", "rem_u", "and", "or", "xor", "shl", "shr_s",
    "shr_u", "rotl", "rotr", "lt_s", "lt_u", "ge_s",
];

fn i32_module() -> String {
    let mut src = String::from("(module\n");
    for op in I32_OPS {
        src.push_str(&format!(
            "  (func (export \"{op}\") (param i32 i32) (result i32) \
             local.get 0 local.get 1 i32.{op})\n"
        ));
    }
    for op in ["clz", "ctz", "popcnt", "extend8_s", "extend16_s", "eqz"] {
        src.push_str(&format!(
            "  (func (export \"{op}\") (param i32) (result i32) local.get 0 i32.{op})\n"
        ));
    }
    src.push(')');
    src
}

#[test]
fn test_i32_binary_ops_match_wasmi() {
    let mut engines = Engines::new(&i32_module());
    for op in I32_OPS {
        for &a in I32_EDGES {
            for &b in I32_EDGES {
                let (ours, theirs) = engines.binary_i32(op, a, b);
                assert_eq!(ours, theirs, "i32.{op}({a}, {b})");
            }
        }
    }
}

#[test]
fn test_i32_unary_ops_match_wasmi() {
    let mut engines = Engines::new(&i32_module());
    for op in ["clz", "ctz", "popcnt", "extend8_s", "extend16_s", "eqz"] {
        for &a in I32_EDGES {
            let (ours, theirs) = engines.unary_i32(op, a);
            assert_eq!(ours, theirs, "i32.{op}({a})");
        }
    }
}

#[test]
fn test_i64_ops_match_wasmi() {
    const OPS: &[&str] = &[
        "add", "sub", "mul", "div_s", "div_u", "rem_s", "rem_u", "shl", "shr_s", "shr_u", "rotl",
        "rotr",
    ];
    let mut src = String::from("(module\n");
    for op in OPS {
        src.push_str(&format!(
            "  (func (export \"{op}\") (param i64 i64) (result i64) \
             local.get 0 local.get 1 i64.{op})\n"
        ));
    }
    src.push(')');

    let mut engines = Engines::new(&src);
    for op in OPS {
        for &a in I64_EDGES {
            for &b in I64_EDGES {
                let (ours, theirs) = engines.binary_i64(op, a, b);
                assert_eq!(ours, theirs, "i64.{op}({a}, {b})");
            }
        }
    }
}

// ══════════════════════════════════════════════════════════════════════════════
// Float operators (through i32 bit patterns)
// ══════════════════════════════════════════════════════════════════════════════

#[test]
fn test_f32_ops_match_wasmi() {
    const BINARY: &[&str] = &["min", "max", "copysign", "add", "mul", "div"];
    const UNARY: &[&str] = &["nearest", "ceil", "floor", "trunc", "abs", "neg", "sqrt"];
    let mut src = String::from("(module\n");
    for op in BINARY {
        src.push_str(&format!(
            "  (func (export \"{op}\") (param i32 i32) (result i32) \
             local.get 0 f32.reinterpret_i32 local.get 1 f32.reinterpret_i32 \
             f32.{op} i32.reinterpret_f32)\n"
        ));
    }
    for op in UNARY {
        src.push_str(&format!(
            "  (func (export \"{op}\") (param i32) (result i32) \
             local.get 0 f32.reinterpret_i32 f32.{op} i32.reinterpret_f32)\n"
        ));
    }
    src.push_str(
        "  (func (export \"trunc_s\") (param i32) (result i32) \
         local.get 0 f32.reinterpret_i32 i32.trunc_f32_s)\n\
         (func (export \"trunc_sat_u\") (param i32) (result i32) \
         local.get 0 f32.reinterpret_i32 i32.trunc_sat_f32_u))",
    );

    let mut engines = Engines::new(&src);
    for op in BINARY {
        for &a in F32_EDGES {
            for &b in F32_EDGES {
                let (ours, theirs) = engines.binary_i32(op, a as i32, b as i32);
                if is_f32_nan(ours) || is_f32_nan(theirs) {
                    // NaN sign and payload are nondeterministic across engines.
                    assert!(is_f32_nan(ours) && is_f32_nan(theirs), "f32.{op}({a:#x}, {b:#x})");
                } else {
                    assert_eq!(ours, theirs, "f32.{op}({a:#x}, {b:#x})");
                }
            }
        }
    }
    for op in UNARY.iter().chain(&["trunc_s", "trunc_sat_u"]) {
        for &a in F32_EDGES {
            let (ours, theirs) = engines.unary_i32(op, a as i32);
            if is_f32_nan(ours) || is_f32_nan(theirs) {
                assert!(is_f32_nan(ours) && is_f32_nan(theirs), "{op}({a:#x})");
            } else {
                assert_eq!(ours, theirs, "{op}({a:#x})");
            }
        }
    }
}

// ══════════════════════════════════════════════════════════════════════════════
// Programs
// ══════════════════════════════════════════════════════════════════════════════

const PROGRAMS: &str = r#"
    (module
      (memory 1)
      (func $fib (export "fib") (param i32) (result i32)
        local.get 0
        i32.const 2
        i32.lt_u
        if (result i32)
          local.get 0
        else
          local.get 0
          i32.const 1
          i32.sub
          call $fib
          local.get 0
          i32.const 2
          i32.sub
          call $fib
          i32.add
        end)
      (func (export "sieve") (param i32) (result i32) (local i32 i32 i32)
        ;; count primes below n using bytes at [0, n)
        i32.const 2
        local.set 1
        block
          loop
            local.get 1
            local.get 0
            i32.ge_u
            br_if 1
            local.get 1
            i32.load8_u
            i32.eqz
            if
              local.get 3
              i32.const 1
              i32.add
              local.set 3
              local.get 1
              local.get 1
              i32.mul
              local.set 2
              block
                loop
                  local.get 2
                  local.get 0
                  i32.ge_u
                  br_if 1
                  local.get 2
                  i32.const 1
                  i32.store8
                  local.get 2
                  local.get 1
                  i32.add
                  local.set 2
                  br 0
                end
              end
            end
            local.get 1
            i32.const 1
            i32.add
            local.set 1
            br 0
          end
        end
        local.get 3)
      (func (export "collatz") (param i32) (result i32) (local i32)
        block
          loop
            local.get 0
            i32.const 1
            i32.le_u
            br_if 1
            local.get 1
            i32.const 1
            i32.add
            local.set 1
            local.get 0
            i32.const 1
            i32.and
            if (result i32)
              local.get 0
              i32.const 3
              i32.mul
              i32.const 1
              i32.add
            else
              local.get 0
              i32.const 1
              i32.shr_u
            end
            local.set 0
            br 0
          end
        end
        local.get 1))
"#;

#[test]
fn test_programs_match_wasmi() {
    let mut engines = Engines::new(PROGRAMS);
    for n in 0..20 {
        let (ours, theirs) = engines.unary_i32("fib", n);
        assert_eq!(ours, theirs, "fib({n})");
    }
    for n in [0, 2, 10, 100, 1000, 60000] {
        let (ours, theirs) = engines.unary_i32("sieve", n);
        assert_eq!(ours, theirs, "sieve({n})");
    }
    for n in [1, 6, 27, 97, 871] {
        let (ours, theirs) = engines.unary_i32("collatz", n);
        assert_eq!(ours, theirs, "collatz({n})");
    }
}

#[test]
fn test_known_program_values() {
    let mut engines = Engines::new(PROGRAMS);
    assert_eq!(engines.unary_i32("fib", 19).0, Some(4181));
    assert_eq!(engines.unary_i32("sieve", 100).0, Some(25));
    assert_eq!(engines.unary_i32("collatz", 27).0, Some(111));
}
