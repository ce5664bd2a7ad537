//! Instruction-stream opcodes.
//!
//! The stream reuses the binary format's MVP opcode numbering for every
//! instruction it executes directly, and adds a handful of internal opcodes
//! in otherwise unused byte ranges:
//!
//! | Byte        | Opcode      | Immediates                     |
//! |-------------|-------------|--------------------------------|
//! | `0xe0`      | `alloca`    | `count:u32`                    |
//! | `0xe1`      | `br_unless` | `offset:u32`                   |
//! | `0xe2`      | `call_host` | `func_index:u32`               |
//! | `0xe3`      | `data`      | `size:u32` then `size` bytes   |
//! | `0xe4`      | `drop_keep` | `drop:u32 keep:u8`             |
//! | `0xf0–0xf7` | `*.trunc_sat_*` | none                       |
//!
//! Instructions that only exist for validation (`nop`, `block`, `loop`,
//! `if`, `else`, `end`, `br_if`) never reach the stream.

use crate::ValueType;

/// Layout of the immediates following an opcode byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Immediates {
    None,
    /// One little-endian `u32` (index, slot, offset or count).
    U32,
    /// One little-endian `u64`.
    U64,
    /// `f32` bit pattern.
    F32,
    /// `f64` bit pattern.
    F64,
    /// `memory_index:u32 offset:u32`.
    MemArg,
    /// Two `u32`s: `table:u32 sig:u32` or `count:u32 table_offset:u32`.
    U32Pair,
    /// `drop:u32 keep:u8`.
    DropKeep,
    /// `size:u32` followed by `size` raw bytes.
    Data,
}

impl Immediates {
    /// Encoded size in bytes, excluding any trailing `Data` payload.
    pub fn size(self) -> usize {
        match self {
            Self::None => 0,
            Self::U32 | Self::F32 | Self::Data => 4,
            Self::U64 | Self::F64 | Self::MemArg | Self::U32Pair => 8,
            Self::DropKeep => 5,
        }
    }
}

/// How the type checker treats an opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpClass {
    Control,
    Parametric,
    Variable,
    Const,
    Load,
    Store,
    Memory,
    Unary,
    Binary,
    Compare,
    Convert,
    Internal,
}

macro_rules! define_opcodes {
    ($(
        $variant:ident = $byte:literal, $text:literal, $imm:ident, $class:ident,
            [$($param:ident),*] -> [$($result:ident),*];
    )*) => {
        /// A stream opcode.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr(u8)]
        pub enum Opcode {
            $( $variant = $byte, )*
        }

        impl Opcode {
            /// Every opcode, in byte order.
            pub const ALL: &'static [Opcode] = &[ $( Opcode::$variant, )* ];

            /// Decode an opcode byte.
            pub fn from_byte(byte: u8) -> Option<Self> {
                match byte {
                    $( $byte => Some(Self::$variant), )*
                    _ => None,
                }
            }

            /// The text-format mnemonic.
            pub fn name(self) -> &'static str {
                match self {
                    $( Self::$variant => $text, )*
                }
            }

            pub fn immediates(self) -> Immediates {
                match self {
                    $( Self::$variant => Immediates::$imm, )*
                }
            }

            pub fn class(self) -> OpClass {
                match self {
                    $( Self::$variant => OpClass::$class, )*
                }
            }

            /// Operand types popped by a simple (non-control) opcode.
            pub fn params(self) -> &'static [ValueType] {
                match self {
                    $( Self::$variant => &[$(ValueType::$param),*], )*
                }
            }

            /// Result types pushed by a simple (non-control) opcode.
            pub fn results(self) -> &'static [ValueType] {
                match self {
                    $( Self::$variant => &[$(ValueType::$result),*], )*
                }
            }
        }
    };
}

define_opcodes! {
    // ── Control ──────────────────────────────────────────────────────────
    Unreachable = 0x00, "unreachable", None, Control, [] -> [];
    Br = 0x0c, "br", U32, Control, [] -> [];
    BrTable = 0x0e, "br_table", U32Pair, Control, [] -> [];
    Return = 0x0f, "return", None, Control, [] -> [];
    Call = 0x10, "call", U32, Control, [] -> [];
    CallIndirect = 0x11, "call_indirect", U32Pair, Control, [] -> [];

    // ── Parametric ───────────────────────────────────────────────────────
    Drop = 0x1a, "drop", None, Parametric, [] -> [];
    Select = 0x1b, "select", None, Parametric, [] -> [];

    // ── Variables ────────────────────────────────────────────────────────
    GetLocal = 0x20, "get_local", U32, Variable, [] -> [];
    SetLocal = 0x21, "set_local", U32, Variable, [] -> [];
    TeeLocal = 0x22, "tee_local", U32, Variable, [] -> [];
    GetGlobal = 0x23, "get_global", U32, Variable, [] -> [];
    SetGlobal = 0x24, "set_global", U32, Variable, [] -> [];

    // ── Loads ────────────────────────────────────────────────────────────
    I32Load = 0x28, "i32.load", MemArg, Load, [I32] -> [I32];
    I64Load = 0x29, "i64.load", MemArg, Load, [I32] -> [I64];
    F32Load = 0x2a, "f32.load", MemArg, Load, [I32] -> [F32];
    F64Load = 0x2b, "f64.load", MemArg, Load, [I32] -> [F64];
    I32Load8S = 0x2c, "i32.load8_s", MemArg, Load, [I32] -> [I32];
    I32Load8U = 0x2d, "i32.load8_u", MemArg, Load, [I32] -> [I32];
    I32Load16S = 0x2e, "i32.load16_s", MemArg, Load, [I32] -> [I32];
    I32Load16U = 0x2f, "i32.load16_u", MemArg, Load, [I32] -> [I32];
    I64Load8S = 0x30, "i64.load8_s", MemArg, Load, [I32] -> [I64];
    I64Load8U = 0x31, "i64.load8_u", MemArg, Load, [I32] -> [I64];
    I64Load16S = 0x32, "i64.load16_s", MemArg, Load, [I32] -> [I64];
    I64Load16U = 0x33, "i64.load16_u", MemArg, Load, [I32] -> [I64];
    I64Load32S = 0x34, "i64.load32_s", MemArg, Load, [I32] -> [I64];
    I64Load32U = 0x35, "i64.load32_u", MemArg, Load, [I32] -> [I64];

    // ── Stores ───────────────────────────────────────────────────────────
    I32Store = 0x36, "i32.store", MemArg, Store, [I32, I32] -> [];
    I64Store = 0x37, "i64.store", MemArg, Store, [I32, I64] -> [];
    F32Store = 0x38, "f32.store", MemArg, Store, [I32, F32] -> [];
    F64Store = 0x39, "f64.store", MemArg, Store, [I32, F64] -> [];
    I32Store8 = 0x3a, "i32.store8", MemArg, Store, [I32, I32] -> [];
    I32Store16 = 0x3b, "i32.store16", MemArg, Store, [I32, I32] -> [];
    I64Store8 = 0x3c, "i64.store8", MemArg, Store, [I32, I64] -> [];
    I64Store16 = 0x3d, "i64.store16", MemArg, Store, [I32, I64] -> [];
    I64Store32 = 0x3e, "i64.store32", MemArg, Store, [I32, I64] -> [];
    CurrentMemory = 0x3f, "current_memory", U32, Memory, [] -> [I32];
    GrowMemory = 0x40, "grow_memory", U32, Memory, [I32] -> [I32];

    // ── Constants ────────────────────────────────────────────────────────
    I32Const = 0x41, "i32.const", U32, Const, [] -> [I32];
    I64Const = 0x42, "i64.const", U64, Const, [] -> [I64];
    F32Const = 0x43, "f32.const", F32, Const, [] -> [F32];
    F64Const = 0x44, "f64.const", F64, Const, [] -> [F64];

    // ── i32 comparisons ──────────────────────────────────────────────────
    I32Eqz = 0x45, "i32.eqz", None, Compare, [I32] -> [I32];
    I32Eq = 0x46, "i32.eq", None, Compare, [I32, I32] -> [I32];
    I32Ne = 0x47, "i32.ne", None, Compare, [I32, I32] -> [I32];
    I32LtS = 0x48, "i32.lt_s", None, Compare, [I32, I32] -> [I32];
    I32LtU = 0x49, "i32.lt_u", None, Compare, [I32, I32] -> [I32];
    I32GtS = 0x4a, "i32.gt_s", None, Compare, [I32, I32] -> [I32];
    I32GtU = 0x4b, "i32.gt_u", None, Compare, [I32, I32] -> [I32];
    I32LeS = 0x4c, "i32.le_s", None, Compare, [I32, I32] -> [I32];
    I32LeU = 0x4d, "i32.le_u", None, Compare, [I32, I32] -> [I32];
    I32GeS = 0x4e, "i32.ge_s", None, Compare, [I32, I32] -> [I32];
    I32GeU = 0x4f, "i32.ge_u", None, Compare, [I32, I32] -> [I32];

    // ── i64 comparisons ──────────────────────────────────────────────────
    I64Eqz = 0x50, "i64.eqz", None, Compare, [I64] -> [I32];
    I64Eq = 0x51, "i64.eq", None, Compare, [I64, I64] -> [I32];
    I64Ne = 0x52, "i64.ne", None, Compare, [I64, I64] -> [I32];
    I64LtS = 0x53, "i64.lt_s", None, Compare, [I64, I64] -> [I32];
    I64LtU = 0x54, "i64.lt_u", None, Compare, [I64, I64] -> [I32];
    I64GtS = 0x55, "i64.gt_s", None, Compare, [I64, I64] -> [I32];
    I64GtU = 0x56, "i64.gt_u", None, Compare, [I64, I64] -> [I32];
    I64LeS = 0x57, "i64.le_s", None, Compare, [I64, I64] -> [I32];
    I64LeU = 0x58, "i64.le_u", None, Compare, [I64, I64] -> [I32];
    I64GeS = 0x59, "i64.ge_s", None, Compare, [I64, I64] -> [I32];
    I64GeU = 0x5a, "i64.ge_u", None, Compare, [I64, I64] -> [I32];

    // ── float comparisons ────────────────────────────────────────────────
    F32Eq = 0x5b, "f32.eq", None, Compare, [F32, F32] -> [I32];
    F32Ne = 0x5c, "f32.ne", None, Compare, [F32, F32] -> [I32];
    F32Lt = 0x5d, "f32.lt", None, Compare, [F32, F32] -> [I32];
    F32Gt = 0x5e, "f32.gt", None, Compare, [F32, F32] -> [I32];
    F32Le = 0x5f, "f32.le", None, Compare, [F32, F32] -> [I32];
    F32Ge = 0x60, "f32.ge", None, Compare, [F32, F32] -> [I32];
    F64Eq = 0x61, "f64.eq", None, Compare, [F64, F64] -> [I32];
    F64Ne = 0x62, "f64.ne", None, Compare, [F64, F64] -> [I32];
    F64Lt = 0x63, "f64.lt", None, Compare, [F64, F64] -> [I32];
    F64Gt = 0x64, "f64.gt", None, Compare, [F64, F64] -> [I32];
    F64Le = 0x65, "f64.le", None, Compare, [F64, F64] -> [I32];
    F64Ge = 0x66, "f64.ge", None, Compare, [F64, F64] -> [I32];

    // ── i32 arithmetic ───────────────────────────────────────────────────
    I32Clz = 0x67, "i32.clz", None, Unary, [I32] -> [I32];
    I32Ctz = 0x68, "i32.ctz", None, Unary, [I32] -> [I32];
    I32Popcnt = 0x69, "i32.popcnt", None, Unary, [I32] -> [I32];
    I32Add = 0x6a, "i32.add", None, Binary, [I32, I32] -> [I32];
    I32Sub = 0x6b, "i32.sub", None, Binary, [I32, I32] -> [I32];
    I32Mul = 0x6c, "i32.mul", None, Binary, [I32, I32] -> [I32];
    I32DivS = 0x6d, "i32.div_s", None, Binary, [I32, I32] -> [I32];
    I32DivU = 0x6e, "i32.div_u", None, Binary, [I32, I32] -> [I32];
    I32RemS = 0x6f, "i32.rem_s", None, Binary, [I32, I32] -> [I32];
    I32RemU = 0x70, "i32.rem_u", None, Binary, [I32, I32] -> [I32];
    I32And = 0x71, "i32.and", None, Binary, [I32, I32] -> [I32];
    I32Or = 0x72, "i32.or", None, Binary, [I32, I32] -> [I32];
    I32Xor = 0x73, "i32.xor", None, Binary, [I32, I32] -> [I32];
    I32Shl = 0x74, "i32.shl", None, Binary, [I32, I32] -> [I32];
    I32ShrS = 0x75, "i32.shr_s", None, Binary, [I32, I32] -> [I32];
    I32ShrU = 0x76, "i32.shr_u", None, Binary, [I32, I32] -> [I32];
    I32Rotl = 0x77, "i32.rotl", None, Binary, [I32, I32] -> [I32];
    I32Rotr = 0x78, "i32.rotr", None, Binary, [I32, I32] -> [I32];

    // ── i64 arithmetic ───────────────────────────────────────────────────
    I64Clz = 0x79, "i64.clz", None, Unary, [I64] -> [I64];
    I64Ctz = 0x7a, "i64.ctz", None, Unary, [I64] -> [I64];
    I64Popcnt = 0x7b, "i64.popcnt", None, Unary, [I64] -> [I64];
    I64Add = 0x7c, "i64.add", None, Binary, [I64, I64] -> [I64];
    I64Sub = 0x7d, "i64.sub", None, Binary, [I64, I64] -> [I64];
    I64Mul = 0x7e, "i64.mul", None, Binary, [I64, I64] -> [I64];
    I64DivS = 0x7f, "i64.div_s", None, Binary, [I64, I64] -> [I64];
    I64DivU = 0x80, "i64.div_u", None, Binary, [I64, I64] -> [I64];
    I64RemS = 0x81, "i64.rem_s", None, Binary, [I64, I64] -> [I64];
    I64RemU = 0x82, "i64.rem_u", None, Binary, [I64, I64] -> [I64];
    I64And = 0x83, "i64.and", None, Binary, [I64, I64] -> [I64];
    I64Or = 0x84, "i64.or", None, Binary, [I64, I64] -> [I64];
    I64Xor = 0x85, "i64.xor", None, Binary, [I64, I64] -> [I64];
    I64Shl = 0x86, "i64.shl", None, Binary, [I64, I64] -> [I64];
    I64ShrS = 0x87, "i64.shr_s", None, Binary, [I64, I64] -> [I64];
    I64ShrU = 0x88, "i64.shr_u", None, Binary, [I64, I64] -> [I64];
    I64Rotl = 0x89, "i64.rotl", None, Binary, [I64, I64] -> [I64];
    I64Rotr = 0x8a, "i64.rotr", None, Binary, [I64, I64] -> [I64];

    // ── f32 arithmetic ───────────────────────────────────────────────────
    F32Abs = 0x8b, "f32.abs", None, Unary, [F32] -> [F32];
    F32Neg = 0x8c, "f32.neg", None, Unary, [F32] -> [F32];
    F32Ceil = 0x8d, "f32.ceil", None, Unary, [F32] -> [F32];
    F32Floor = 0x8e, "f32.floor", None, Unary, [F32] -> [F32];
    F32Trunc = 0x8f, "f32.trunc", None, Unary, [F32] -> [F32];
    F32Nearest = 0x90, "f32.nearest", None, Unary, [F32] -> [F32];
    F32Sqrt = 0x91, "f32.sqrt", None, Unary, [F32] -> [F32];
    F32Add = 0x92, "f32.add", None, Binary, [F32, F32] -> [F32];
    F32Sub = 0x93, "f32.sub", None, Binary, [F32, F32] -> [F32];
    F32Mul = 0x94, "f32.mul", None, Binary, [F32, F32] -> [F32];
    F32Div = 0x95, "f32.div", None, Binary, [F32, F32] -> [F32];
    F32Min = 0x96, "f32.min", None, Binary, [F32, F32] -> [F32];
    F32Max = 0x97, "f32.max", None, Binary, [F32, F32] -> [F32];
    F32Copysign = 0x98, "f32.copysign", None, Binary, [F32, F32] -> [F32];

    // ── f64 arithmetic ───────────────────────────────────────────────────
    F64Abs = 0x99, "f64.abs", None, Unary, [F64] -> [F64];
    F64Neg = 0x9a, "f64.neg", None, Unary, [F64] -> [F64];
    F64Ceil = 0x9b, "f64.ceil", None, Unary, [F64] -> [F64];
    F64Floor = 0x9c, "f64.floor", None, Unary, [F64] -> [F64];
    F64Trunc = 0x9d, "f64.trunc", None, Unary, [F64] -> [F64];
    F64Nearest = 0x9e, "f64.nearest", None, Unary, [F64] -> [F64];
    F64Sqrt = 0x9f, "f64.sqrt", None, Unary, [F64] -> [F64];
    F64Add = 0xa0, "f64.add", None, Binary, [F64, F64] -> [F64];
    F64Sub = 0xa1, "f64.sub", None, Binary, [F64, F64] -> [F64];
    F64Mul = 0xa2, "f64.mul", None, Binary, [F64, F64] -> [F64];
    F64Div = 0xa3, "f64.div", None, Binary, [F64, F64] -> [F64];
    F64Min = 0xa4, "f64.min", None, Binary, [F64, F64] -> [F64];
    F64Max = 0xa5, "f64.max", None, Binary, [F64, F64] -> [F64];
    F64Copysign = 0xa6, "f64.copysign", None, Binary, [F64, F64] -> [F64];

    // ── Conversions ──────────────────────────────────────────────────────
    I32WrapI64 = 0xa7, "i32.wrap/i64", None, Convert, [I64] -> [I32];
    I32TruncSF32 = 0xa8, "i32.trunc_s/f32", None, Convert, [F32] -> [I32];
    I32TruncUF32 = 0xa9, "i32.trunc_u/f32", None, Convert, [F32] -> [I32];
    I32TruncSF64 = 0xaa, "i32.trunc_s/f64", None, Convert, [F64] -> [I32];
    I32TruncUF64 = 0xab, "i32.trunc_u/f64", None, Convert, [F64] -> [I32];
    I64ExtendSI32 = 0xac, "i64.extend_s/i32", None, Convert, [I32] -> [I64];
    I64ExtendUI32 = 0xad, "i64.extend_u/i32", None, Convert, [I32] -> [I64];
    I64TruncSF32 = 0xae, "i64.trunc_s/f32", None, Convert, [F32] -> [I64];
    I64TruncUF32 = 0xaf, "i64.trunc_u/f32", None, Convert, [F32] -> [I64];
    I64TruncSF64 = 0xb0, "i64.trunc_s/f64", None, Convert, [F64] -> [I64];
    I64TruncUF64 = 0xb1, "i64.trunc_u/f64", None, Convert, [F64] -> [I64];
    F32ConvertSI32 = 0xb2, "f32.convert_s/i32", None, Convert, [I32] -> [F32];
    F32ConvertUI32 = 0xb3, "f32.convert_u/i32", None, Convert, [I32] -> [F32];
    F32ConvertSI64 = 0xb4, "f32.convert_s/i64", None, Convert, [I64] -> [F32];
    F32ConvertUI64 = 0xb5, "f32.convert_u/i64", None, Convert, [I64] -> [F32];
    F32DemoteF64 = 0xb6, "f32.demote/f64", None, Convert, [F64] -> [F32];
    F64ConvertSI32 = 0xb7, "f64.convert_s/i32", None, Convert, [I32] -> [F64];
    F64ConvertUI32 = 0xb8, "f64.convert_u/i32", None, Convert, [I32] -> [F64];
    F64ConvertSI64 = 0xb9, "f64.convert_s/i64", None, Convert, [I64] -> [F64];
    F64ConvertUI64 = 0xba, "f64.convert_u/i64", None, Convert, [I64] -> [F64];
    F64PromoteF32 = 0xbb, "f64.promote/f32", None, Convert, [F32] -> [F64];
    I32ReinterpretF32 = 0xbc, "i32.reinterpret/f32", None, Convert, [F32] -> [I32];
    I64ReinterpretF64 = 0xbd, "i64.reinterpret/f64", None, Convert, [F64] -> [I64];
    F32ReinterpretI32 = 0xbe, "f32.reinterpret/i32", None, Convert, [I32] -> [F32];
    F64ReinterpretI64 = 0xbf, "f64.reinterpret/i64", None, Convert, [I64] -> [F64];

    // ── Sign extension ───────────────────────────────────────────────────
    I32Extend8S = 0xc0, "i32.extend8_s", None, Unary, [I32] -> [I32];
    I32Extend16S = 0xc1, "i32.extend16_s", None, Unary, [I32] -> [I32];
    I64Extend8S = 0xc2, "i64.extend8_s", None, Unary, [I64] -> [I64];
    I64Extend16S = 0xc3, "i64.extend16_s", None, Unary, [I64] -> [I64];
    I64Extend32S = 0xc4, "i64.extend32_s", None, Unary, [I64] -> [I64];

    // ── Internal ─────────────────────────────────────────────────────────
    Alloca = 0xe0, "alloca", U32, Internal, [] -> [];
    BrUnless = 0xe1, "br_unless", U32, Internal, [] -> [];
    CallHost = 0xe2, "call_host", U32, Internal, [] -> [];
    Data = 0xe3, "data", Data, Internal, [] -> [];
    DropKeep = 0xe4, "drop_keep", DropKeep, Internal, [] -> [];

    // ── Saturating truncation ────────────────────────────────────────────
    I32TruncSatSF32 = 0xf0, "i32.trunc_sat_s/f32", None, Convert, [F32] -> [I32];
    I32TruncSatUF32 = 0xf1, "i32.trunc_sat_u/f32", None, Convert, [F32] -> [I32];
    I32TruncSatSF64 = 0xf2, "i32.trunc_sat_s/f64", None, Convert, [F64] -> [I32];
    I32TruncSatUF64 = 0xf3, "i32.trunc_sat_u/f64", None, Convert, [F64] -> [I32];
    I64TruncSatSF32 = 0xf4, "i64.trunc_sat_s/f32", None, Convert, [F32] -> [I64];
    I64TruncSatUF32 = 0xf5, "i64.trunc_sat_u/f32", None, Convert, [F32] -> [I64];
    I64TruncSatSF64 = 0xf6, "i64.trunc_sat_s/f64", None, Convert, [F64] -> [I64];
    I64TruncSatUF64 = 0xf7, "i64.trunc_sat_u/f64", None, Convert, [F64] -> [I64];
}

impl Opcode {
    /// Bytes touched by a load or store; zero for every other opcode.
    pub fn memory_size(self) -> u32 {
        use Opcode::*;
        match self {
            I32Load8S | I32Load8U | I64Load8S | I64Load8U | I32Store8 | I64Store8 => 1,
            I32Load16S | I32Load16U | I64Load16S | I64Load16U | I32Store16 | I64Store16 => 2,
            I32Load | F32Load | I64Load32S | I64Load32U | I32Store | F32Store | I64Store32 => 4,
            I64Load | F64Load | I64Store | F64Store => 8,
            _ => 0,
        }
    }

    pub fn byte(self) -> u8 {
        self as u8
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_byte_matches_discriminant() {
        for &op in Opcode::ALL {
            assert_eq!(Opcode::from_byte(op.byte()), Some(op), "{}", op.name());
        }
        assert_eq!(Opcode::from_byte(0x01), None, "nop is never emitted");
        assert_eq!(Opcode::from_byte(0x0d), None, "br_if is lowered");
    }

    #[test]
    fn test_memory_access_sizes() {
        for &op in Opcode::ALL {
            let is_access = matches!(op.class(), OpClass::Load | OpClass::Store);
            assert_eq!(is_access, op.memory_size() > 0, "{}", op.name());
            assert_eq!(is_access, op.immediates() == Immediates::MemArg);
        }
        assert_eq!(Opcode::I64Load32U.memory_size(), 4);
        assert_eq!(Opcode::F64Store.memory_size(), 8);
    }

    #[test]
    fn test_simple_opcode_signatures() {
        assert_eq!(Opcode::I32Add.params(), &[ValueType::I32, ValueType::I32]);
        assert_eq!(Opcode::I64Eqz.results(), &[ValueType::I32]);
        assert_eq!(Opcode::F64Store.params(), &[ValueType::I32, ValueType::F64]);
        assert!(Opcode::F64Store.results().is_empty());
        assert_eq!(Opcode::F32DemoteF64.params(), &[ValueType::F64]);
    }
}
