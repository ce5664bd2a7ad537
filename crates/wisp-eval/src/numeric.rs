//! Numeric semantics on raw bit patterns.
//!
//! Integer helpers take and return unsigned bit patterns; floats are passed
//! as their IEEE-754 bits so NaN payloads and signed zeros survive exactly.

use crate::error::{EvalResult, Trap};

pub const F32_SIGN: u32 = 0x8000_0000;
pub const F32_INF: u32 = 0x7f80_0000;
pub const F32_QUIET: u32 = 0x0040_0000;
pub const F32_QUIET_NAN: u32 = 0x7fc0_0000;

pub const F64_SIGN: u64 = 0x8000_0000_0000_0000;
pub const F64_INF: u64 = 0x7ff0_0000_0000_0000;
pub const F64_QUIET: u64 = 0x0008_0000_0000_0000;
pub const F64_QUIET_NAN: u64 = 0x7ff8_0000_0000_0000;
const F64_FRACTION: u64 = 0x000f_ffff_ffff_ffff;

// ══════════════════════════════════════════════════════════════════════════════
// Integer division
// ══════════════════════════════════════════════════════════════════════════════

macro_rules! int_division {
    ($bits:ty, $signed:ty, $div_s:ident, $div_u:ident, $rem_s:ident, $rem_u:ident) => {
        pub fn $div_s(lhs: $bits, rhs: $bits) -> EvalResult<$bits> {
            let (l, r) = (lhs as $signed, rhs as $signed);
            if r == 0 {
                return Err(Trap::IntegerDivideByZero);
            }
            if l == <$signed>::MIN && r == -1 {
                return Err(Trap::IntegerOverflow);
            }
            Ok((l / r) as $bits)
        }

        pub fn $div_u(lhs: $bits, rhs: $bits) -> EvalResult<$bits> {
            lhs.checked_div(rhs).ok_or(Trap::IntegerDivideByZero)
        }

        /// `MIN % -1` is 0.
        pub fn $rem_s(lhs: $bits, rhs: $bits) -> EvalResult<$bits> {
            let (l, r) = (lhs as $signed, rhs as $signed);
            if r == 0 {
                return Err(Trap::IntegerDivideByZero);
            }
            Ok(l.wrapping_rem(r) as $bits)
        }

        pub fn $rem_u(lhs: $bits, rhs: $bits) -> EvalResult<$bits> {
            lhs.checked_rem(rhs).ok_or(Trap::IntegerDivideByZero)
        }
    };
}

int_division!(u32, i32, i32_div_s, i32_div_u, i32_rem_s, i32_rem_u);
int_division!(u64, i64, i64_div_s, i64_div_u, i64_rem_s, i64_rem_u);

// ══════════════════════════════════════════════════════════════════════════════
// Floats
// ══════════════════════════════════════════════════════════════════════════════

macro_rules! float_ops {
    (
        $float:ty, $bits:ty, $sign:expr, $inf:expr, $quiet:expr, $quiet_nan:expr;
        $min:ident, $max:ident, $div:ident, $nearest:ident, $copysign:ident
    ) => {
        pub fn $min(lhs: $bits, rhs: $bits) -> $bits {
            let (l, r) = (<$float>::from_bits(lhs), <$float>::from_bits(rhs));
            if l.is_nan() {
                lhs | $quiet
            } else if r.is_nan() {
                rhs | $quiet
            } else if (lhs ^ rhs) & $sign != 0 {
                // Signs differ: the negative operand has the larger bits.
                if lhs > rhs {
                    lhs
                } else {
                    rhs
                }
            } else if l < r {
                lhs
            } else {
                rhs
            }
        }

        pub fn $max(lhs: $bits, rhs: $bits) -> $bits {
            let (l, r) = (<$float>::from_bits(lhs), <$float>::from_bits(rhs));
            if l.is_nan() {
                lhs | $quiet
            } else if r.is_nan() {
                rhs | $quiet
            } else if (lhs ^ rhs) & $sign != 0 {
                if lhs < rhs {
                    lhs
                } else {
                    rhs
                }
            } else if l > r {
                lhs
            } else {
                rhs
            }
        }

        pub fn $div(lhs: $bits, rhs: $bits) -> $bits {
            let (l, r) = (<$float>::from_bits(lhs), <$float>::from_bits(rhs));
            if r != 0.0 {
                return (l / r).to_bits();
            }
            if l.is_nan() {
                lhs | $quiet
            } else if l == 0.0 {
                $quiet_nan
            } else {
                ((lhs ^ rhs) & $sign) | $inf
            }
        }

        /// Round to nearest, ties to even.
        pub fn $nearest(bits: $bits) -> $bits {
            let x = <$float>::from_bits(bits);
            if x.is_nan() {
                return bits | $quiet;
            }
            if x.is_infinite() || x == 0.0 {
                return bits;
            }
            let rounded = if (x - x.trunc()).abs() == 0.5 {
                2.0 * (x / 2.0).round()
            } else {
                x.round()
            };
            rounded.to_bits()
        }

        pub fn $copysign(lhs: $bits, rhs: $bits) -> $bits {
            (lhs & !$sign) | (rhs & $sign)
        }
    };
}

float_ops!(f32, u32, F32_SIGN, F32_INF, F32_QUIET, F32_QUIET_NAN;
    f32_min, f32_max, f32_div, f32_nearest, f32_copysign);
float_ops!(f64, u64, F64_SIGN, F64_INF, F64_QUIET, F64_QUIET_NAN;
    f64_min, f64_max, f64_div, f64_nearest, f64_copysign);

/// f64 → f32, keeping the top of a NaN payload.
pub fn f32_demote_f64(bits: u64) -> u32 {
    let x = f64::from_bits(bits);
    if x.is_nan() {
        let sign = ((bits >> 32) as u32) & F32_SIGN;
        sign | F32_INF | F32_QUIET | ((bits & F64_FRACTION) >> 29) as u32
    } else {
        (x as f32).to_bits()
    }
}

// ══════════════════════════════════════════════════════════════════════════════
// Float → integer truncation
// ══════════════════════════════════════════════════════════════════════════════

macro_rules! trunc {
    ($name:ident, $float:ty, $bits:ty, $int:ty, $out:ty, |$b:ident| $in_range:expr) => {
        pub fn $name($b: $bits) -> EvalResult<$out> {
            let value = <$float>::from_bits($b);
            if value.is_nan() {
                return Err(Trap::InvalidConversionToInteger);
            }
            if !($in_range) {
                return Err(Trap::IntegerOverflow);
            }
            Ok(value as $int as $out)
        }
    };
}

trunc!(i32_trunc_s_f32, f32, u32, i32, u32,
    |b| b < 0x4f00_0000 || (0x8000_0000..=0xcf00_0000).contains(&b));
trunc!(i32_trunc_u_f32, f32, u32, u32, u32,
    |b| b < 0x4f80_0000 || (0x8000_0000..0xbf80_0000).contains(&b));
trunc!(i64_trunc_s_f32, f32, u32, i64, u64,
    |b| b < 0x5f00_0000 || (0x8000_0000..=0xdf00_0000).contains(&b));
trunc!(i64_trunc_u_f32, f32, u32, u64, u64,
    |b| b < 0x5f80_0000 || (0x8000_0000..0xbf80_0000).contains(&b));
trunc!(i32_trunc_s_f64, f64, u64, i32, u32,
    |b| b <= 0x41df_ffff_ffc0_0000
        || (0x8000_0000_0000_0000..=0xc1e0_0000_0000_0000).contains(&b));
trunc!(i32_trunc_u_f64, f64, u64, u32, u32,
    |b| b <= 0x41ef_ffff_ffe0_0000
        || (0x8000_0000_0000_0000..0xbff0_0000_0000_0000).contains(&b));
trunc!(i64_trunc_s_f64, f64, u64, i64, u64,
    |b| b < 0x43e0_0000_0000_0000
        || (0x8000_0000_0000_0000..=0xc3e0_0000_0000_0000).contains(&b));
trunc!(i64_trunc_u_f64, f64, u64, u64, u64,
    |b| b < 0x43f0_0000_0000_0000
        || (0x8000_0000_0000_0000..0xbff0_0000_0000_0000).contains(&b));

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_div_s_traps() {
        assert_eq!(i32_div_s(7, 0), Err(Trap::IntegerDivideByZero));
        assert_eq!(
            i32_div_s(i32::MIN as u32, -1i32 as u32),
            Err(Trap::IntegerOverflow)
        );
        assert_eq!(i32_div_s(-7i32 as u32, 2), Ok(-3i32 as u32));
        assert_eq!(
            i64_div_s(i64::MIN as u64, -1i64 as u64),
            Err(Trap::IntegerOverflow)
        );
    }

    #[test]
    fn test_rem_s_min_by_minus_one_is_zero() {
        assert_eq!(i32_rem_s(i32::MIN as u32, -1i32 as u32), Ok(0));
        assert_eq!(i64_rem_s(i64::MIN as u64, -1i64 as u64), Ok(0));
        assert_eq!(i32_rem_u(5, 0), Err(Trap::IntegerDivideByZero));
    }

    #[test]
    fn test_min_max_signed_zero() {
        let (neg, pos) = ((-0.0f32).to_bits(), 0.0f32.to_bits());
        assert_eq!(f32_min(neg, pos), neg);
        assert_eq!(f32_min(pos, neg), neg);
        assert_eq!(f32_max(neg, pos), pos);
        assert_eq!(f64_min(0.0f64.to_bits(), (-0.0f64).to_bits()), (-0.0f64).to_bits());
    }

    #[test]
    fn test_min_max_quiet_nan_operands() {
        let signalling = 0x7f80_0001;
        assert_eq!(f32_min(signalling, 1.0f32.to_bits()), 0x7fc0_0001);
        assert_eq!(f32_max(2.0f32.to_bits(), signalling), 0x7fc0_0001);
        assert_eq!(f32_min(1.0f32.to_bits(), 2.0f32.to_bits()), 1.0f32.to_bits());
        assert_eq!(f64_max((-1.0f64).to_bits(), (-2.0f64).to_bits()), (-1.0f64).to_bits());
    }

    #[test]
    fn test_div_by_zero_is_explicit() {
        assert_eq!(f32_div(0.0f32.to_bits(), 0.0f32.to_bits()), F32_QUIET_NAN);
        assert_eq!(f32_div(1.0f32.to_bits(), (-0.0f32).to_bits()), f32::NEG_INFINITY.to_bits());
        assert_eq!(f64_div((-3.0f64).to_bits(), (-0.0f64).to_bits()), f64::INFINITY.to_bits());
        assert_eq!(f32_div(0x7f80_0001, 0.0f32.to_bits()), 0x7fc0_0001);
        assert_eq!(f64_div(6.0f64.to_bits(), 3.0f64.to_bits()), 2.0f64.to_bits());
    }

    #[test]
    fn test_nearest_ties_to_even() {
        let n = |x: f32| f32::from_bits(f32_nearest(x.to_bits()));
        assert_eq!(n(2.5), 2.0);
        assert_eq!(n(3.5), 4.0);
        assert_eq!(n(-2.5), -2.0);
        assert_eq!(n(1.4), 1.0);
        assert_eq!(f32_nearest((-0.5f32).to_bits()), (-0.0f32).to_bits());
        assert_eq!(f64_nearest(4.5f64.to_bits()), 4.0f64.to_bits());
    }

    #[test]
    fn test_copysign_on_bits() {
        assert_eq!(f32_copysign(1.0f32.to_bits(), (-0.0f32).to_bits()), (-1.0f32).to_bits());
        assert_eq!(f64_copysign((-2.0f64).to_bits(), 1.0f64.to_bits()), 2.0f64.to_bits());
    }

    #[test]
    fn test_demote_nan_keeps_payload_top() {
        let nan = F64_SIGN | F64_INF | (0x5u64 << 49);
        assert_eq!(f32_demote_f64(nan), F32_SIGN | F32_INF | F32_QUIET | (0x5 << 20));
        assert_eq!(f32_demote_f64(1.5f64.to_bits()), 1.5f32.to_bits());
    }

    #[test]
    fn test_trunc_boundaries() {
        assert_eq!(i32_trunc_s_f32(2147483648.0f32.to_bits()), Err(Trap::IntegerOverflow));
        assert_eq!(i32_trunc_s_f32((-2147483648.0f32).to_bits()), Ok(i32::MIN as u32));
        assert_eq!(i32_trunc_s_f64(2147483647.0f64.to_bits()), Ok(i32::MAX as u32));
        assert_eq!(i32_trunc_s_f64(2147483648.0f64.to_bits()), Err(Trap::IntegerOverflow));
        assert_eq!(i32_trunc_u_f32((-0.9f32).to_bits()), Ok(0));
        assert_eq!(i32_trunc_u_f32((-1.0f32).to_bits()), Err(Trap::IntegerOverflow));
        assert_eq!(i64_trunc_u_f64(1e19f64.to_bits()), Ok(10_000_000_000_000_000_000));
        assert_eq!(i64_trunc_s_f64(9.3e18f64.to_bits()), Err(Trap::IntegerOverflow));
        assert_eq!(
            i32_trunc_s_f32(f32::NAN.to_bits()),
            Err(Trap::InvalidConversionToInteger)
        );
    }
}
