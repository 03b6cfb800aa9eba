use core::fmt;
use core::iter::{Product, Sum};
use core::ops::{Add, AddAssign, Div, DivAssign, Mul, MulAssign, Neg, Rem, Sub, SubAssign};
use core::str::FromStr;

#[cfg(feature = "serde")]
use serde::{Deserialize, Deserializer, Serialize, Serializer, de};

use crate::NumericError;
use crate::fixed_int::{FixedInt, FixedUint, POWERS_OF_TEN_U128, extend_and_multiply};
use crate::format::add_decimal_point_and_adjust_zeros;
use crate::parse::{parse_exponent, parse_number, split_e_notation};

/// 128-bit fixed-point decimal with 9 decimal places of precision.
///
/// The value is a signed scaled integer `v` representing the rational
/// `v / 10^9`, with `|v| <= 10^38 - 1` (38 decimal digits: 29 before the
/// point, 9 after).
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct Numeric {
    value: i128,
}

/// The scaling factor as a bare u64 for wide-integer arithmetic.
const SCALE_U64: u64 = 1_000_000_000;

/// 10^18; intermediate "double-scaled" values carry this factor.
const DOUBLE_SCALE: u64 = SCALE_U64 * SCALE_U64;

/// 10^27; triple-scaled numerators in the power algorithm.
const TRIPLE_SCALE: u128 = DOUBLE_SCALE as u128 * SCALE_U64 as u128;

/// Largest valid scaled magnitude, 10^38 - 1.
const MAX_PACKED: u128 = POWERS_OF_TEN_U128[38] - 1;

// ============================================================================
// Constants
// ============================================================================

impl Numeric {
    /// The scale factor: 10^9
    pub const SCALE: i128 = 1_000_000_000;

    /// The number of decimal places
    pub const DECIMALS: u8 = 9;

    /// Maximum number of digits before the decimal point
    pub const MAX_INTEGER_DIGITS: u8 = 29;

    /// Maximum value: 99999999999999999999999999999.999999999
    pub const MAX: Self = Self {
        value: POWERS_OF_TEN_U128[38] as i128 - 1,
    };

    /// Minimum value: -99999999999999999999999999999.999999999
    pub const MIN: Self = Self {
        value: -(POWERS_OF_TEN_U128[38] as i128 - 1),
    };

    /// Zero
    pub const ZERO: Self = Self { value: 0 };

    /// One (1.0)
    pub const ONE: Self = Self { value: Self::SCALE };
}

// ============================================================================
// Constructors and Raw Access
// ============================================================================

impl Default for Numeric {
    fn default() -> Self {
        Self::ZERO
    }
}

impl Numeric {
    /// Creates a Numeric from a raw scaled value (the rational is
    /// `value / 10^9`). Returns `None` if the magnitude exceeds the valid
    /// 38-digit range.
    #[inline(always)]
    pub const fn from_raw(value: i128) -> Option<Self> {
        if value.unsigned_abs() <= MAX_PACKED {
            Some(Self { value })
        } else {
            None
        }
    }

    /// Returns the raw internal value (scaled by 10^9).
    #[inline(always)]
    pub const fn to_raw(self) -> i128 {
        self.value
    }

    /// Builds a value from an unsigned magnitude of any width, applying a
    /// sign and checking the range.
    pub(crate) fn from_fixed_uint<const N: usize>(
        magnitude: &FixedUint<N>,
        negative: bool,
    ) -> Option<Self> {
        if magnitude.non_zero_length() <= 2 {
            let value = FixedUint::<2>::convert_from(magnitude).low_u128();
            if value <= MAX_PACKED {
                let value = value as i128;
                return Some(Self {
                    value: if negative { -value } else { value },
                });
            }
        }
        None
    }

    /// Builds a value from a wide signed integer, checking the range.
    pub(crate) fn from_fixed_int<const N: usize>(value: &FixedInt<N>) -> Option<Self> {
        value.to_i128_checked().and_then(Self::from_raw)
    }

    /// Creates a Numeric from an i64 integer (always in range).
    #[inline(always)]
    pub const fn from_i64(value: i64) -> Self {
        Self {
            value: value as i128 * Self::SCALE,
        }
    }

    /// Creates a Numeric from a u64 integer (always in range).
    #[inline(always)]
    pub const fn from_u64(value: u64) -> Self {
        Self {
            value: value as i128 * Self::SCALE,
        }
    }

    /// Creates a Numeric from an i32 integer (always in range).
    #[inline(always)]
    pub const fn from_i32(value: i32) -> Self {
        Self::from_i64(value as i64)
    }

    /// Creates a Numeric from a u32 integer (always in range).
    #[inline(always)]
    pub const fn from_u32(value: u32) -> Self {
        Self::from_u64(value as u64)
    }

    /// Creates a Numeric from an i128 integer, if it fits 29 digits.
    #[inline]
    pub const fn from_i128(value: i128) -> Option<Self> {
        match value.checked_mul(Self::SCALE) {
            Some(scaled) => Self::from_raw(scaled),
            None => None,
        }
    }

    /// Converts to i64, rounding half away from zero.
    pub const fn to_i64(self) -> Option<i64> {
        let offset = if self.value < 0 {
            -(Self::SCALE / 2)
        } else {
            Self::SCALE / 2
        };
        let rounded = (self.value + offset) / Self::SCALE;
        if rounded >= i64::MIN as i128 && rounded <= i64::MAX as i128 {
            Some(rounded as i64)
        } else {
            None
        }
    }
}

// ============================================================================
// Sign Checks
// ============================================================================

impl Numeric {
    /// Returns `true` if `self` is positive.
    #[inline(always)]
    pub const fn is_positive(self) -> bool {
        self.value > 0
    }

    /// Returns `true` if `self` is negative.
    #[inline(always)]
    pub const fn is_negative(self) -> bool {
        self.value < 0
    }

    /// Returns `true` if `self` is zero.
    #[inline(always)]
    pub const fn is_zero(self) -> bool {
        self.value == 0
    }

    /// Returns the sign of `self` as -1, 0, or 1.
    #[inline(always)]
    pub const fn signum(self) -> i32 {
        if self.value > 0 {
            1
        } else if self.value < 0 {
            -1
        } else {
            0
        }
    }

    /// Returns the absolute value. Always in range: the minimum is the
    /// negation of the maximum.
    #[inline(always)]
    pub const fn abs(self) -> Self {
        Self {
            value: if self.value < 0 { -self.value } else { self.value },
        }
    }

    /// Returns `true` if `self` has a non-zero digit after the decimal
    /// point.
    #[inline(always)]
    pub const fn has_fractional_part(self) -> bool {
        self.fractional_part() != 0
    }

    /// The signed fractional part of the scaled value, in (-10^9, 10^9).
    #[inline(always)]
    const fn fractional_part(self) -> i128 {
        self.value % Self::SCALE
    }
}

// ============================================================================
// Arithmetic Operations - Addition and Subtraction
// ============================================================================

impl Numeric {
    /// Checked addition. Returns `None` if the result leaves the 38-digit
    /// range.
    #[inline(always)]
    #[must_use = "this returns the result of the operation, without modifying the original"]
    pub const fn checked_add(self, rhs: Self) -> Option<Self> {
        // MAX + MAX exceeds i128 as well as the decimal range.
        match self.value.checked_add(rhs.value) {
            Some(sum) => Self::from_raw(sum),
            None => None,
        }
    }

    /// Checked addition. Returns an error carrying both operands.
    #[inline(always)]
    #[must_use = "this returns the result of the operation, without modifying the original"]
    pub fn try_add(self, rhs: Self) -> crate::Result<Self> {
        self.checked_add(rhs)
            .ok_or_else(|| NumericError::Overflow(format!("{self} + {rhs}")))
    }

    /// Checked subtraction. Returns `None` if the result leaves the
    /// 38-digit range.
    #[inline(always)]
    #[must_use = "this returns the result of the operation, without modifying the original"]
    pub const fn checked_sub(self, rhs: Self) -> Option<Self> {
        match self.value.checked_sub(rhs.value) {
            Some(difference) => Self::from_raw(difference),
            None => None,
        }
    }

    /// Checked subtraction. Returns an error carrying both operands.
    #[inline(always)]
    #[must_use = "this returns the result of the operation, without modifying the original"]
    pub fn try_sub(self, rhs: Self) -> crate::Result<Self> {
        self.checked_sub(rhs)
            .ok_or_else(|| NumericError::Overflow(format!("{self} - {rhs}")))
    }
}

// ============================================================================
// Arithmetic Operations - Multiplication
// ============================================================================

impl Numeric {
    /// Checked multiplication, rounding half away from zero on the 10th
    /// fractional digit. Returns `None` on range overflow.
    #[must_use = "this returns the result of the operation, without modifying the original"]
    pub fn checked_mul(self, rhs: Self) -> Option<Self> {
        let negative = (self.value < 0) != (rhs.value < 0);
        let mut product: FixedUint<4> = extend_and_multiply(
            &FixedUint::<2>::from_u128(self.value.unsigned_abs()),
            &FixedUint::<2>::from_u128(rhs.value.unsigned_abs()),
        );
        // (10^38 - 1) * 10^9 + 10^9 / 2: the smallest double-scaled product
        // that would rescale past the valid range.
        const OVERFLOW_THRESHOLD: FixedUint<4> = FixedUint::from_limbs([
            6450984253243169536,
            13015503840481697412,
            293873587,
            0,
        ]);
        if product < OVERFLOW_THRESHOLD {
            product.add_overflow_u64(SCALE_U64 / 2);
            let (rescaled, _) = product.div_mod_u64(SCALE_U64);
            let magnitude = rescaled.low_u128();
            return Some(Self {
                value: if negative {
                    -(magnitude as i128)
                } else {
                    magnitude as i128
                },
            });
        }
        None
    }

    /// Checked multiplication. Returns an error carrying both operands.
    #[inline(always)]
    #[must_use = "this returns the result of the operation, without modifying the original"]
    pub fn try_mul(self, rhs: Self) -> crate::Result<Self> {
        self.checked_mul(rhs)
            .ok_or_else(|| NumericError::Overflow(format!("{self} * {rhs}")))
    }
}

// ============================================================================
// Arithmetic Operations - Division
// ============================================================================

impl Numeric {
    /// Checked division, rounding half away from zero. Returns `None` if
    /// `rhs` is zero or the quotient leaves the range.
    #[must_use = "this returns the result of the operation, without modifying the original"]
    pub fn checked_div(self, rhs: Self) -> Option<Self> {
        if rhs.value == 0 {
            return None;
        }
        let negative = (self.value < 0) != (rhs.value < 0);
        let divisor_magnitude = rhs.value.unsigned_abs();

        // Scale the dividend up first so the quotient keeps the scale.
        let mut dividend = FixedUint::<3>::from_u128(self.value.unsigned_abs());
        dividend.mul_u64(SCALE_U64);
        dividend.add_overflow(&FixedUint::from_u128(divisor_magnitude >> 1));
        let (quotient, _) = dividend.div_mod(&FixedUint::from_u128(divisor_magnitude));
        Self::from_fixed_uint(&quotient, negative)
    }

    /// Checked division. Distinguishes division by zero from overflow in
    /// the returned error.
    #[must_use = "this returns the result of the operation, without modifying the original"]
    pub fn try_div(self, rhs: Self) -> crate::Result<Self> {
        if rhs.value == 0 {
            return Err(NumericError::DivisionByZero(format!("{self} / {rhs}")));
        }
        self.checked_div(rhs)
            .ok_or_else(|| NumericError::Overflow(format!("{self} / {rhs}")))
    }

    /// Division truncated toward zero to a whole number.
    pub fn integer_divide(self, rhs: Self) -> crate::Result<Self> {
        if rhs.value == 0 {
            return Err(NumericError::DivisionByZero(format!("{self} / {rhs}")));
        }
        let quotient = self.value / rhs.value;
        if quotient.unsigned_abs() <= MAX_PACKED / SCALE_U64 as u128 {
            Ok(Self {
                value: quotient * Self::SCALE,
            })
        } else {
            Err(NumericError::Overflow(format!("{self} / {rhs}")))
        }
    }

    /// Checked remainder: `self - integer_divide(self, rhs) * rhs`.
    /// Returns `None` if `rhs` is zero.
    #[inline(always)]
    #[must_use = "this returns the result of the operation, without modifying the original"]
    pub const fn checked_rem(self, rhs: Self) -> Option<Self> {
        if rhs.value == 0 {
            None
        } else {
            Some(Self {
                value: self.value % rhs.value,
            })
        }
    }

    /// Checked remainder. Returns an error if `rhs` is zero.
    #[inline(always)]
    #[must_use = "this returns the result of the operation, without modifying the original"]
    pub fn try_rem(self, rhs: Self) -> crate::Result<Self> {
        self.checked_rem(rhs)
            .ok_or_else(|| NumericError::DivisionByZero(format!("MOD({self}, {rhs})")))
    }
}

// ============================================================================
// Rounding Operations
// ============================================================================

impl Numeric {
    fn round_internal(self, digits: i64, round_away_from_zero: bool) -> Option<Self> {
        if digits >= Self::DECIMALS as i64 {
            // Rounding beyond the supported fractional digits is a no-op.
            return Some(self);
        }
        if digits < -(Self::MAX_INTEGER_DIGITS as i64) {
            // Rounding 30 or more integer digits away always yields zero;
            // rounding exactly 29 away may overflow instead.
            return Some(Self::ZERO);
        }
        let mut value = self.value;
        let trunc_factor = POWERS_OF_TEN_U128[(Self::DECIMALS as i64 - digits) as usize] as i128;
        if round_away_from_zero {
            let offset = trunc_factor >> 1;
            // The adjusted magnitude stays below 1.5 * 10^38 < 2^127.
            value += if value < 0 { -offset } else { offset };
        }
        value -= value % trunc_factor;
        Self::from_raw(value)
    }

    /// Rounds to `digits` decimal places, half away from zero. Negative
    /// `digits` round off integer digits; anything below -29 saturates to
    /// zero even where true rounding would overflow.
    #[must_use = "this returns the result of the operation, without modifying the original"]
    pub fn round(self, digits: i64) -> crate::Result<Self> {
        self.round_internal(digits, true)
            .ok_or_else(|| NumericError::Overflow(format!("ROUND({self}, {digits})")))
    }

    /// Truncates toward zero at `digits` decimal places. Never overflows:
    /// the magnitude only shrinks.
    #[must_use = "this returns the result of the operation, without modifying the original"]
    pub fn trunc(self, digits: i64) -> Self {
        self.round_internal(digits, false)
            .expect("truncation cannot overflow")
    }

    /// Returns the smallest whole value greater than or equal to `self`.
    pub fn ceiling(self) -> crate::Result<Self> {
        let fract = self.fractional_part();
        let value = self.value
            - if fract > 0 {
                fract - Self::SCALE
            } else {
                fract
            };
        Self::from_raw(value).ok_or_else(|| NumericError::Overflow(format!("CEIL({self})")))
    }

    /// Returns the largest whole value less than or equal to `self`.
    pub fn floor(self) -> crate::Result<Self> {
        let fract = self.fractional_part();
        let value = self.value
            - if fract < 0 {
                fract + Self::SCALE
            } else {
                fract
            };
        Self::from_raw(value).ok_or_else(|| NumericError::Overflow(format!("FLOOR({self})")))
    }
}

// ============================================================================
// Power
// ============================================================================

/// Divides a double-scaled value by 10^18 with rounding, narrowing by one
/// limb. Fails if the quotient does not fit `M = N - 1` limbs.
fn remove_double_scale<const N: usize, const M: usize>(
    input: &mut FixedUint<N>,
) -> Option<FixedUint<M>> {
    debug_assert_eq!(N - 1, M);
    if input.add_overflow_u64(DOUBLE_SCALE / 2) || input.limbs()[N - 1] >= DOUBLE_SCALE {
        return None;
    }
    let (quotient, _) = input.div_mod_u64(SCALE_U64);
    let (quotient, _) = quotient.div_mod_u64(SCALE_U64);
    Some(FixedUint::convert_from(&quotient))
}

/// Square-and-multiply on a double-scaled (x 10^18) base. The extra scale
/// preserves one more decimal of precision through each step. Returns
/// false when an intermediate exceeds the working width, which the caller
/// may treat as overflow or as underflow to zero depending on the sign of
/// the exponent.
fn double_scaled_power(double_scaled_value: &mut FixedUint<3>, unscaled_exp: u128) -> bool {
    let mut result = FixedUint::<3>::from_u64(DOUBLE_SCALE);
    let mut power = *double_scaled_value;
    let mut exp = unscaled_exp;
    loop {
        if exp & 1 != 0 {
            let product: FixedUint<6> = extend_and_multiply(&result, &power);
            if product.limbs()[4] != 0 || product.limbs()[5] != 0 {
                return false;
            }
            let mut truncated = FixedUint::<4>::convert_from(&product);
            match remove_double_scale::<4, 3>(&mut truncated) {
                Some(rescaled) => result = rescaled,
                None => return false,
            }
        }
        if exp <= 1 {
            *double_scaled_value = result;
            return true;
        }
        if power.limbs()[2] != 0 {
            return false;
        }
        let narrow = FixedUint::<2>::convert_from(&power);
        let mut squared: FixedUint<4> = extend_and_multiply(&narrow, &narrow);
        match remove_double_scale::<4, 3>(&mut squared) {
            Some(rescaled) => power = rescaled,
            None => return false,
        }
        exp >>= 1;
    }
}

/// `dest *= pow(abs_value / 10^9, fract_exp / 10^9) * 10^9`.
///
/// The fractional part of an exponent goes through f64::powf on the
/// precision-preserving double conversions; the integer part never does.
fn multiply_by_fractional_power(
    abs_value: u128,
    fract_exp: i64,
    dest: &mut FixedUint<3>,
) -> crate::Result<()> {
    let fract_pow = remove_scale_and_convert_to_double(abs_value as i128)
        .powf(remove_scale_and_convert_to_double(fract_exp as i128));
    let fract_term = Numeric::from_f64(fract_pow)?;
    let product: FixedUint<5> = extend_and_multiply(
        dest,
        &FixedUint::<2>::from_u128(fract_term.value as u128),
    );
    if product.limbs()[3] == 0 && product.limbs()[4] == 0 {
        *dest = FixedUint::convert_from(&product);
        Ok(())
    } else {
        Err(NumericError::Overflow(String::new()))
    }
}

impl Numeric {
    /// Raises `self` to the power `exp`, which may be fractional and
    /// negative. `power(0, 0)` is 1; a negative base requires a whole
    /// exponent.
    pub fn power(self, exp: Self) -> crate::Result<Self> {
        self.power_internal(exp)
            .map_err(|e| e.annotate(&format!("POW({self}, {exp})")))
    }

    fn power_internal(self, exp: Self) -> crate::Result<Self> {
        // Any value raised to the zero power is one.
        if exp.value == 0 {
            return Ok(Self::ONE);
        }
        let exp_is_negative = exp.value < 0;
        if self.value == 0 {
            if exp_is_negative {
                return Err(NumericError::DivisionByZero(String::new()));
            }
            return Ok(Self::ZERO);
        }

        let (integer_exp_wide, fract_exp_magnitude) =
            FixedUint::<2>::from_u128(exp.value.unsigned_abs()).div_mod_u64(SCALE_U64);
        let abs_integer_exp = integer_exp_wide.low_u128();
        let fract_exp = if exp_is_negative {
            -(fract_exp_magnitude as i64)
        } else {
            fract_exp_magnitude as i64
        };

        let mut result_is_negative = false;
        let abs_value = self.value.unsigned_abs();
        if self.value < 0 {
            if fract_exp != 0 {
                return Err(NumericError::FailedPrecondition(
                    "negative value cannot be raised to a fractional power".to_string(),
                ));
            }
            result_is_negative = abs_integer_exp & 1 != 0;
        }

        let overflow = || NumericError::Overflow(String::new());
        let mut double_scaled_value;
        if !exp_is_negative {
            double_scaled_value = FixedUint::<3>::from_u128(abs_value);
            double_scaled_value.mul_u64(SCALE_U64);
        } else if abs_value > SCALE_U64 as u128 {
            // Negative exponent, |base| > 1: raise first, invert once at
            // the end, so the lossy division happens a single time.
            double_scaled_value = FixedUint::<3>::from_u128(abs_value);
            double_scaled_value.mul_u64(SCALE_U64);
            if !double_scaled_power(&mut double_scaled_value, abs_integer_exp)
                || double_scaled_value > FixedUint::<3>::from_u128(TRIPLE_SCALE * 2)
            {
                // The reciprocal rounds to zero.
                return Ok(Self::ZERO);
            }
            if fract_exp == 0 {
                let mut numerator = FixedUint::<3>::from_u128(TRIPLE_SCALE);
                numerator.div_and_round_away_from_zero(&double_scaled_value);
                return Self::from_fixed_uint(&numerator, result_is_negative).ok_or_else(overflow);
            }
            let mut numerator = FixedUint::<3>::from_u64(DOUBLE_SCALE);
            // fract_exp < 0 bounds the fractional factor by 10^9, so the
            // triple-scaled numerator cannot overflow here.
            multiply_by_fractional_power(abs_value, fract_exp, &mut numerator)?;
            numerator.div_and_round_away_from_zero(&double_scaled_value);
            return Self::from_fixed_uint(&numerator, result_is_negative).ok_or_else(overflow);
        } else {
            // Negative exponent, |base| <= 1: invert up front.
            double_scaled_value = FixedUint::<3>::from_u128(TRIPLE_SCALE);
            double_scaled_value.div_and_round_away_from_zero(&FixedUint::from_u128(abs_value));
        }

        if !double_scaled_power(&mut double_scaled_value, abs_integer_exp) {
            return Err(overflow());
        }

        if fract_exp == 0 {
            double_scaled_value.div_and_round_away_from_zero_u64(SCALE_U64);
            return Self::from_fixed_uint(&double_scaled_value, result_is_negative)
                .ok_or_else(overflow);
        }

        // Now triple-scaled; remove the double scale to get back to one.
        multiply_by_fractional_power(abs_value, fract_exp, &mut double_scaled_value)?;
        let rescaled = remove_double_scale::<3, 2>(&mut double_scaled_value).ok_or_else(overflow)?;
        Self::from_fixed_uint(&rescaled, result_is_negative).ok_or_else(overflow)
    }
}

// ============================================================================
// Float Conversions
// ============================================================================

/// Splits a non-zero finite double into an integer mantissa and a binary
/// exponent with `value == mantissa * 2^exponent`.
pub(crate) fn decompose_double(value: f64) -> (i64, i32) {
    let bits = value.to_bits();
    let biased_exponent = ((bits >> 52) & 0x7ff) as i32;
    let fraction = bits & ((1u64 << 52) - 1);
    let (magnitude, exponent) = if biased_exponent == 0 {
        (fraction, -1074)
    } else {
        (fraction | (1u64 << 52), biased_exponent - 1075)
    };
    if bits >> 63 != 0 {
        (-(magnitude as i64), exponent)
    } else {
        (magnitude as i64, exponent)
    }
}

/// `value * 10^9` rounded half away from zero, as a packed i128, or `None`
/// if the result cannot fit 128 bits.
fn scale_and_round_away_from_zero(value: f64) -> Option<i128> {
    if value == 0.0 {
        return Some(0);
    }
    let (mantissa, exponent) = decompose_double(value);
    debug_assert!(mantissa != 0);
    if exponent <= -128 {
        return Some(0);
    }
    if exponent >= 127 {
        return None;
    }
    let negative = mantissa < 0;
    let mut magnitude =
        FixedUint::<2>::from_u128(mantissa.unsigned_abs() as u128 * SCALE_U64 as u128);
    if exponent < 0 {
        // Shift one bit short, add one, and shift again: the discarded
        // half-bit rounds away from zero.
        magnitude.shr_assign((-1 - exponent) as u32);
        magnitude.add_overflow_u64(1);
        magnitude.shr_assign(1);
    } else if exponent > 0 {
        if magnitude.find_msb_set_nonzero() as i32 >= 127 - exponent {
            return None;
        }
        magnitude.shl_assign(exponent as u32);
    }
    // mantissa (53 bits) * 10^9 (30 bits) shifted below bit 127: the
    // magnitude never reaches the sign bit, so the negation is exact.
    let magnitude = magnitude.low_u128() as i128;
    Some(if negative { -magnitude } else { magnitude })
}

/// `value / 10^9` as a double with a single correct rounding.
fn remove_scale_and_convert_to_double(value: i128) -> f64 {
    if value == 0 {
        return 0.0;
    }
    let abs = value.unsigned_abs();
    let mut magnitude = FixedUint::<2>::from_u128(abs);
    // The binary scaling factor is a power of two, so dividing it back out
    // of the double is exact. Shift until at least 96 significant bits
    // remain; after the 10^9 division at least 64 survive.
    let mut binary_scaling_factor = 1.0f64;
    if abs < 1u128 << 96 {
        if abs >= 1u128 << 64 {
            magnitude.shl_assign(32);
            binary_scaling_factor = f64::powi(2.0, 32);
        } else if abs >= 1u128 << 32 {
            magnitude.shl_assign(64);
            binary_scaling_factor = f64::powi(2.0, 64);
        } else {
            magnitude.shl_assign(96);
            binary_scaling_factor = f64::powi(2.0, 96);
        }
    }
    let (quotient, remainder) = magnitude.div_mod_u64(SCALE_U64);
    let mut limbs = *quotient.limbs();
    // A non-zero remainder means the quotient is not exact; setting the
    // least significant bit keeps round-to-even from seeing a false tie.
    limbs[0] |= (remainder != 0) as u64;
    let result = FixedUint::<2>::from_limbs(limbs).to_f64() / binary_scaling_factor;
    if value >= 0 { result } else { -result }
}

impl Numeric {
    /// Converts a finite double, rounding half away from zero on the 10th
    /// fractional digit.
    pub fn from_f64(value: f64) -> crate::Result<Self> {
        if !value.is_finite() {
            return Err(NumericError::FailedPrecondition(format!(
                "illegal conversion of non-finite floating point number to numeric: {value}"
            )));
        }
        scale_and_round_away_from_zero(value)
            .and_then(Self::from_raw)
            .ok_or_else(|| NumericError::Overflow(format!("{value}")))
    }

    /// Converts to the nearest double with a single rounding step.
    pub fn to_f64(self) -> f64 {
        remove_scale_and_convert_to_double(self.value)
    }
}

// ============================================================================
// String Parsing
// ============================================================================

impl Numeric {
    fn from_str_internal(input: &str, strict: bool) -> crate::Result<Self> {
        let fail = || NumericError::InvalidValue(input.to_string());
        let parts = split_e_notation(input.as_bytes()).ok_or_else(fail)?;
        let exp =
            parse_exponent(parts.exp_part, Self::DECIMALS as u32).ok_or_else(fail)?;
        let magnitude =
            parse_number::<2>(parts.int_part, parts.fract_part, exp, strict).ok_or_else(fail)?;
        Self::from_fixed_uint(&magnitude, parts.negative).ok_or_else(fail)
    }

    /// Parses a decimal string, erroring if any digit past the 9th
    /// fractional place is non-zero.
    ///
    /// Accepts `[ws][sign]digits[.digits][(e|E)[sign]digits][ws]`.
    pub fn from_str_exact(input: &str) -> crate::Result<Self> {
        Self::from_str_internal(input, true)
    }

    /// Parses a decimal string, rounding half away from zero on the first
    /// digit past the 9th fractional place.
    pub fn from_str_lossy(input: &str) -> crate::Result<Self> {
        Self::from_str_internal(input, false)
    }
}

impl FromStr for Numeric {
    type Err = NumericError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_str_exact(s)
    }
}

// ============================================================================
// Bytes Operations
// ============================================================================

impl Numeric {
    /// Appends the minimal little-endian two's-complement encoding of the
    /// scaled value. Zero encodes as a single 0x00 byte.
    pub fn serialize_and_append_to_bytes(&self, bytes: &mut Vec<u8>) {
        FixedInt::<2>::from_i128(self.value).serialize_to_bytes(bytes);
    }

    /// The minimal little-endian two's-complement encoding.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(16);
        self.serialize_and_append_to_bytes(&mut bytes);
        bytes
    }

    /// Decodes 1 to 16 bytes produced by [`Self::to_bytes`], sign
    /// extending from the top bit of the last byte.
    pub fn from_bytes(bytes: &[u8]) -> crate::Result<Self> {
        FixedInt::<2>::deserialize_from_bytes(bytes)
            .and_then(|wide| Self::from_fixed_int(&wide))
            .ok_or_else(|| NumericError::InvalidValue("invalid numeric encoding".to_string()))
    }
}

// ============================================================================
// Display and Debug
// ============================================================================

impl Numeric {
    /// Appends the canonical decimal form: at most 9 fractional digits,
    /// trailing fractional zeros stripped, zero rendered as "0".
    pub fn append_to_string(&self, output: &mut String) {
        if self.value == 0 {
            output.push('0');
            return;
        }
        let old_size = output.len();
        FixedInt::<2>::from_i128(self.value).append_to_string(output);
        let first_digit_index = old_size + usize::from(self.value < 0);
        add_decimal_point_and_adjust_zeros(first_digit_index, Self::DECIMALS as usize, output);
    }
}

impl fmt::Display for Numeric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut output = String::with_capacity(41);
        self.append_to_string(&mut output);
        f.write_str(&output)
    }
}

impl fmt::Debug for Numeric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if f.alternate() {
            // {:#?} shows raw internals
            f.debug_struct("Numeric").field("value", &self.value).finish()
        } else {
            // {:?} shows the formatted decimal
            write!(f, "Numeric({self})")
        }
    }
}

// ============================================================================
// Operator Overloading
// ============================================================================

impl Add for Numeric {
    type Output = Self;

    #[inline(always)]
    fn add(self, rhs: Self) -> Self::Output {
        self.checked_add(rhs).expect("attempt to add with overflow")
    }
}

impl Sub for Numeric {
    type Output = Self;

    #[inline(always)]
    fn sub(self, rhs: Self) -> Self::Output {
        self.checked_sub(rhs)
            .expect("attempt to subtract with overflow")
    }
}

impl Mul for Numeric {
    type Output = Self;

    #[inline(always)]
    fn mul(self, rhs: Self) -> Self::Output {
        self.checked_mul(rhs)
            .expect("attempt to multiply with overflow")
    }
}

impl Div for Numeric {
    type Output = Self;

    #[inline(always)]
    fn div(self, rhs: Self) -> Self::Output {
        self.checked_div(rhs)
            .expect("attempt to divide by zero or overflow")
    }
}

impl Rem for Numeric {
    type Output = Self;

    #[inline(always)]
    fn rem(self, rhs: Self) -> Self::Output {
        self.checked_rem(rhs).expect("attempt to take MOD by zero")
    }
}

impl Neg for Numeric {
    type Output = Self;

    /// Negation never overflows: the range is symmetric.
    #[inline(always)]
    fn neg(self) -> Self::Output {
        Self { value: -self.value }
    }
}

impl AddAssign for Numeric {
    #[inline(always)]
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

impl SubAssign for Numeric {
    #[inline(always)]
    fn sub_assign(&mut self, rhs: Self) {
        *self = *self - rhs;
    }
}

impl MulAssign for Numeric {
    #[inline(always)]
    fn mul_assign(&mut self, rhs: Self) {
        *self = *self * rhs;
    }
}

impl DivAssign for Numeric {
    #[inline(always)]
    fn div_assign(&mut self, rhs: Self) {
        *self = *self / rhs;
    }
}

// ============================================================================
// Iterator Trait Implementations
// ============================================================================

impl Sum for Numeric {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::ZERO, |acc, x| acc + x)
    }
}

impl<'a> Sum<&'a Numeric> for Numeric {
    fn sum<I: Iterator<Item = &'a Self>>(iter: I) -> Self {
        iter.fold(Self::ZERO, |acc, x| acc + *x)
    }
}

impl Product for Numeric {
    fn product<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::ONE, |acc, x| acc * x)
    }
}

impl<'a> Product<&'a Numeric> for Numeric {
    fn product<I: Iterator<Item = &'a Self>>(iter: I) -> Self {
        iter.fold(Self::ONE, |acc, x| acc * *x)
    }
}

// ============================================================================
// Serde Support
// ============================================================================

#[cfg(feature = "serde")]
impl Serialize for Numeric {
    fn serialize<S>(&self, serializer: S) -> core::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if serializer.is_human_readable() {
            // JSON, TOML, etc. - the canonical decimal string
            serializer.collect_str(self)
        } else {
            // Bincode, MessagePack, etc. - the raw scaled integer
            self.value.serialize(serializer)
        }
    }
}

#[cfg(feature = "serde")]
impl<'de> Deserialize<'de> for Numeric {
    fn deserialize<D>(deserializer: D) -> core::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        if deserializer.is_human_readable() {
            let s = String::deserialize(deserializer)?;
            Self::from_str(&s).map_err(de::Error::custom)
        } else {
            let value = i128::deserialize(deserializer)?;
            Self::from_raw(value)
                .ok_or_else(|| de::Error::custom("numeric value out of range"))
        }
    }
}
