use core::fmt;
use core::iter::{Product, Sum};
use core::ops::{Add, AddAssign, Div, DivAssign, Mul, MulAssign, Neg, Rem, Sub, SubAssign};
use core::str::FromStr;

#[cfg(feature = "serde")]
use serde::{Deserialize, Deserializer, Serialize, Serializer, de};

use crate::NumericError;
use crate::fixed_int::{
    FixedInt, FixedUint, POWERS_OF_TEN_U128, POW_10_19, extend_and_multiply,
};
use crate::format::add_decimal_point_and_adjust_zeros;
use crate::numeric::decompose_double;
use crate::parse::{parse_exponent, parse_number, split_e_notation};

/// 256-bit fixed-point decimal with 38 decimal places of precision.
///
/// The value is a signed scaled integer `v` representing the rational
/// `v / 10^38`; every 256-bit `v` is valid, giving roughly 39 digits
/// before the point and exactly 38 after.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct BigNumeric {
    value: FixedInt<4>,
}

/// The scaling factor, 10^38.
const SCALE_U128: u128 = POWERS_OF_TEN_U128[38];

/// 10^76 (the "double scale"), 10^114 (the "triple scale") and twice the
/// triple scale, as raw limbs.
const DOUBLE_SCALE_LIMBS: [u64; 6] = [
    0,
    8607968719199866880,
    532749306367912313,
    1593091911132452277,
    0,
    0,
];
const TRIPLE_SCALE_LIMBS: [u64; 6] = [
    0,
    15088184651598004224,
    7168134292250469724,
    2139829035213121871,
    13200212276745551059,
    468167635469219832,
];
const TWO_TRIPLE_SCALE_LIMBS: [u64; 6] = [
    0,
    11729625229486456832,
    14336268584500939449,
    4279658070426243742,
    7953680479781550502,
    936335270938439665,
];

// ============================================================================
// Constants
// ============================================================================

impl BigNumeric {
    /// The number of decimal places
    pub const DECIMALS: u8 = 38;

    /// Maximum number of digits before the decimal point
    pub const MAX_INTEGER_DIGITS: u8 = 39;

    /// Maximum value: (2^255 - 1) / 10^38
    pub const MAX: Self = Self {
        value: FixedInt::from_bits(FixedUint::from_limbs([
            u64::MAX,
            u64::MAX,
            u64::MAX,
            i64::MAX as u64,
        ])),
    };

    /// Minimum value: -2^255 / 10^38
    pub const MIN: Self = Self {
        value: FixedInt::from_bits(FixedUint::from_limbs([0, 0, 0, 1 << 63])),
    };

    /// Zero
    pub const ZERO: Self = Self {
        value: FixedInt::ZERO,
    };

    /// One (1.0)
    pub const ONE: Self = Self {
        value: FixedInt::from_bits(FixedUint::from_limbs([
            687399551400673280,
            5421010862427522170,
            0,
            0,
        ])),
    };
}

// ============================================================================
// Constructors and Raw Access
// ============================================================================

impl Default for BigNumeric {
    fn default() -> Self {
        Self::ZERO
    }
}

impl BigNumeric {
    #[inline(always)]
    const fn wrap(value: FixedInt<4>) -> Self {
        Self { value }
    }

    /// The scaled 256-bit integer backing this value.
    #[inline(always)]
    pub(crate) const fn raw(&self) -> &FixedInt<4> {
        &self.value
    }

    /// Builds a value from an unsigned scaled magnitude, applying a sign.
    /// Fails if the magnitude does not fit the signed 256-bit range.
    pub(crate) fn from_fixed_uint<const N: usize>(
        magnitude: &FixedUint<N>,
        negative: bool,
    ) -> Option<Self> {
        if magnitude.non_zero_length() > 4 {
            return None;
        }
        FixedInt::set_sign_and_abs(negative, FixedUint::<4>::convert_from(magnitude))
            .map(Self::wrap)
    }

    /// Builds a value from a wide signed scaled integer, if it fits.
    pub(crate) fn from_fixed_int<const N: usize>(value: &FixedInt<N>) -> Option<Self> {
        value.narrow_checked::<4>().map(Self::wrap)
    }

    /// Creates a BigNumeric from an i64 integer (always in range).
    pub fn from_i64(value: i64) -> Self {
        let magnitude: FixedUint<4> = extend_and_multiply(
            &FixedUint::<2>::from_u128(value.unsigned_abs() as u128),
            &FixedUint::<2>::from_u128(SCALE_U128),
        );
        Self::from_fixed_uint(&magnitude, value < 0).unwrap_or(Self::ZERO)
    }

    /// Creates a BigNumeric from a u64 integer (always in range).
    pub fn from_u64(value: u64) -> Self {
        let magnitude: FixedUint<4> = extend_and_multiply(
            &FixedUint::<2>::from_u128(value as u128),
            &FixedUint::<2>::from_u128(SCALE_U128),
        );
        Self::from_fixed_uint(&magnitude, false).unwrap_or(Self::ZERO)
    }

    /// Creates a BigNumeric from an i32 integer (always in range).
    pub fn from_i32(value: i32) -> Self {
        Self::from_i64(value as i64)
    }

    /// Creates a BigNumeric from an i128 integer (always in range: even
    /// i128::MIN scaled by 10^38 stays within 256 bits).
    pub fn from_i128(value: i128) -> Self {
        let magnitude: FixedUint<4> = extend_and_multiply(
            &FixedUint::<2>::from_u128(value.unsigned_abs()),
            &FixedUint::<2>::from_u128(SCALE_U128),
        );
        Self::from_fixed_uint(&magnitude, value < 0).unwrap_or(Self::ZERO)
    }

    /// Converts a Numeric losslessly: the scale widens from 9 to 38.
    pub fn from_numeric(value: crate::Numeric) -> Self {
        let raw = value.to_raw();
        let magnitude: FixedUint<4> = extend_and_multiply(
            &FixedUint::<2>::from_u128(raw.unsigned_abs()),
            &FixedUint::<2>::from_u128(POWERS_OF_TEN_U128[29]),
        );
        Self::from_fixed_uint(&magnitude, raw < 0).unwrap_or(Self::ZERO)
    }

    /// Converts to i64, rounding half away from zero.
    pub fn to_i64(self) -> Option<i64> {
        let negative = self.value.is_negative();
        let magnitude = self.value.abs();
        let (quotient, low) = magnitude.div_mod_u64(POW_10_19);
        let (mut int_part, high) = quotient.div_mod_u64(POW_10_19);
        let fract = high as u128 * POW_10_19 as u128 + low as u128;
        if fract >= SCALE_U128 / 2 {
            int_part.add_overflow_u64(1);
        }
        if int_part.non_zero_length() > 1 {
            return None;
        }
        let int_part = int_part.limbs()[0];
        if negative {
            if int_part > i64::MAX as u64 + 1 {
                None
            } else {
                Some((int_part as i128).wrapping_neg() as i64)
            }
        } else if int_part > i64::MAX as u64 {
            None
        } else {
            Some(int_part as i64)
        }
    }
}

// ============================================================================
// Sign Checks
// ============================================================================

impl BigNumeric {
    /// Returns `true` if `self` is positive.
    #[inline(always)]
    pub fn is_positive(&self) -> bool {
        !self.value.is_negative() && !self.value.is_zero()
    }

    /// Returns `true` if `self` is negative.
    #[inline(always)]
    pub const fn is_negative(&self) -> bool {
        self.value.is_negative()
    }

    /// Returns `true` if `self` is zero.
    #[inline(always)]
    pub fn is_zero(&self) -> bool {
        self.value.is_zero()
    }

    /// Returns the sign of `self` as -1, 0, or 1.
    #[inline(always)]
    pub fn signum(&self) -> i32 {
        if self.value.is_negative() {
            -1
        } else if self.value.is_zero() {
            0
        } else {
            1
        }
    }

    /// Checked absolute value. `None` for the minimum value, whose
    /// magnitude has no positive counterpart.
    #[must_use = "this returns the result of the operation, without modifying the original"]
    pub fn checked_abs(self) -> Option<Self> {
        if self.value.is_negative() {
            self.checked_neg()
        } else {
            Some(self)
        }
    }

    /// Checked absolute value as an error-returning form.
    #[inline(always)]
    #[must_use = "this returns the result of the operation, without modifying the original"]
    pub fn try_abs(self) -> crate::Result<Self> {
        self.checked_abs()
            .ok_or_else(|| NumericError::Overflow(format!("ABS({self})")))
    }

    /// Checked negation. `None` for the minimum value.
    #[must_use = "this returns the result of the operation, without modifying the original"]
    pub fn checked_neg(self) -> Option<Self> {
        if self.value == Self::MIN.value {
            None
        } else {
            Some(Self::wrap(self.value.wrapping_neg()))
        }
    }

    /// Checked negation as an error-returning form.
    #[inline(always)]
    #[must_use = "this returns the result of the operation, without modifying the original"]
    pub fn try_neg(self) -> crate::Result<Self> {
        self.checked_neg()
            .ok_or_else(|| NumericError::Overflow(format!("-({self})")))
    }

    /// Returns `true` if `self` has a non-zero digit after the decimal
    /// point.
    pub fn has_fractional_part(&self) -> bool {
        self.fractional_part() != 0
    }

    /// The signed fractional part of the scaled value, in
    /// (-10^38, 10^38).
    fn fractional_part(&self) -> i128 {
        let magnitude = self.value.abs();
        let (quotient, low) = magnitude.div_mod_u64(POW_10_19);
        let (_, high) = quotient.div_mod_u64(POW_10_19);
        let fract = (high as u128 * POW_10_19 as u128 + low as u128) as i128;
        if self.value.is_negative() { -fract } else { fract }
    }
}

// ============================================================================
// Arithmetic Operations - Addition and Subtraction
// ============================================================================

impl BigNumeric {
    /// Checked addition on the 256-bit scaled integers.
    #[must_use = "this returns the result of the operation, without modifying the original"]
    pub fn checked_add(self, rhs: Self) -> Option<Self> {
        let mut sum = self.value;
        if sum.add_overflow(&rhs.value) {
            None
        } else {
            Some(Self::wrap(sum))
        }
    }

    /// Checked addition. Returns an error carrying both operands.
    #[inline(always)]
    #[must_use = "this returns the result of the operation, without modifying the original"]
    pub fn try_add(self, rhs: Self) -> crate::Result<Self> {
        self.checked_add(rhs)
            .ok_or_else(|| NumericError::Overflow(format!("{self} + {rhs}")))
    }

    /// Checked subtraction on the 256-bit scaled integers.
    #[must_use = "this returns the result of the operation, without modifying the original"]
    pub fn checked_sub(self, rhs: Self) -> Option<Self> {
        let mut difference = self.value;
        if difference.sub_overflow(&rhs.value) {
            None
        } else {
            Some(Self::wrap(difference))
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

/// Divides a 512-bit-truncated product by 10^38, rounding half away from
/// zero, narrowing to five limbs.
fn remove_scaling_factor(mut value: FixedUint<6>) -> Option<FixedUint<5>> {
    if value.add_overflow_u128(SCALE_U128 / 2) {
        return None;
    }
    let (quotient, _) = value.div_mod_u64(POW_10_19);
    let (quotient, _) = quotient.div_mod_u64(POW_10_19);
    Some(FixedUint::convert_from(&quotient))
}

impl BigNumeric {
    /// Checked multiplication: the full 512-bit product of magnitudes is
    /// rescaled by 10^38 with round-half-away-from-zero.
    #[must_use = "this returns the result of the operation, without modifying the original"]
    pub fn checked_mul(self, rhs: Self) -> Option<Self> {
        let negative = self.value.is_negative() != rhs.value.is_negative();
        let product: FixedUint<8> = extend_and_multiply(&self.value.abs(), &rhs.value.abs());
        if product.limbs()[6] != 0 || product.limbs()[7] != 0 {
            return None;
        }
        let rescaled = remove_scaling_factor(FixedUint::<6>::convert_from(&product))?;
        if rescaled.limbs()[4] != 0 {
            return None;
        }
        FixedInt::set_sign_and_abs(negative, FixedUint::<4>::convert_from(&rescaled))
            .map(Self::wrap)
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

impl BigNumeric {
    /// Checked division, rounding half away from zero. Returns `None` if
    /// `rhs` is zero or the quotient leaves the range.
    #[must_use = "this returns the result of the operation, without modifying the original"]
    pub fn checked_div(self, rhs: Self) -> Option<Self> {
        if rhs.value.is_zero() {
            return None;
        }
        let negative = self.value.is_negative() != rhs.value.is_negative();
        let mut scaled: FixedUint<6> = extend_and_multiply(
            &self.value.abs(),
            &FixedUint::<2>::from_u128(SCALE_U128),
        );
        let divisor = FixedUint::<6>::convert_from(&rhs.value.abs());
        scaled.div_and_round_away_from_zero(&divisor);
        if scaled.limbs()[4] != 0 || scaled.limbs()[5] != 0 {
            return None;
        }
        FixedInt::set_sign_and_abs(negative, FixedUint::<4>::convert_from(&scaled))
            .map(Self::wrap)
    }

    /// Checked division. Distinguishes division by zero from overflow in
    /// the returned error.
    #[must_use = "this returns the result of the operation, without modifying the original"]
    pub fn try_div(self, rhs: Self) -> crate::Result<Self> {
        if rhs.value.is_zero() {
            return Err(NumericError::DivisionByZero(format!("{self} / {rhs}")));
        }
        self.checked_div(rhs)
            .ok_or_else(|| NumericError::Overflow(format!("{self} / {rhs}")))
    }

    /// Division truncated toward zero to a whole number.
    pub fn integer_divide(self, rhs: Self) -> crate::Result<Self> {
        if rhs.value.is_zero() {
            return Err(NumericError::DivisionByZero(format!("{self} / {rhs}")));
        }
        let negative = self.value.is_negative() != rhs.value.is_negative();
        let (quotient, _) = self.value.abs().div_mod(&rhs.value.abs());
        let scaled: FixedUint<6> =
            extend_and_multiply(&quotient, &FixedUint::<2>::from_u128(SCALE_U128));
        if scaled.limbs()[4] == 0 && scaled.limbs()[5] == 0 {
            if let Some(value) =
                FixedInt::set_sign_and_abs(negative, FixedUint::<4>::convert_from(&scaled))
            {
                return Ok(Self::wrap(value));
            }
        }
        Err(NumericError::Overflow(format!("{self} / {rhs}")))
    }

    /// Checked remainder with the sign of the dividend. Returns `None` if
    /// `rhs` is zero.
    #[must_use = "this returns the result of the operation, without modifying the original"]
    pub fn checked_rem(self, rhs: Self) -> Option<Self> {
        if rhs.value.is_zero() {
            return None;
        }
        let (_, remainder) = self.value.abs().div_mod(&rhs.value.abs());
        FixedInt::set_sign_and_abs(self.value.is_negative(), remainder).map(Self::wrap)
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

/// 10^exp for exp in 0..=77, which spans one digit past the 39-digit
/// integer capacity.
fn pow10_fixed_uint4(exp: usize) -> FixedUint<4> {
    if exp <= 38 {
        FixedUint::from_u128(POWERS_OF_TEN_U128[exp])
    } else {
        extend_and_multiply::<2, 2, 4>(
            &FixedUint::from_u128(POWERS_OF_TEN_U128[38]),
            &FixedUint::from_u128(POWERS_OF_TEN_U128[exp - 38]),
        )
    }
}

impl BigNumeric {
    fn round_internal(self, digits: i64, round_away_from_zero: bool) -> Option<Self> {
        if digits >= Self::DECIMALS as i64 {
            return Some(self);
        }
        if digits < -(Self::MAX_INTEGER_DIGITS as i64) {
            // Rounding 40 or more integer digits away always yields zero;
            // rounding exactly 39 away may overflow instead.
            return Some(Self::ZERO);
        }
        let trunc_factor = pow10_fixed_uint4((Self::DECIMALS as i64 - digits) as usize);
        let negative = self.value.is_negative();
        let mut magnitude = self.value.abs();
        if round_away_from_zero {
            let mut half = trunc_factor;
            half.shr_assign(1);
            // 2^255 + 10^77/2 stays below 2^256.
            magnitude.add_overflow(&half);
        }
        let (_, remainder) = magnitude.div_mod(&trunc_factor);
        magnitude.sub_overflow(&remainder);
        FixedInt::set_sign_and_abs(negative, magnitude).map(Self::wrap)
    }

    /// Rounds to `digits` decimal places, half away from zero. Negative
    /// `digits` round off integer digits; anything below -39 saturates to
    /// zero even where true rounding would overflow.
    #[must_use = "this returns the result of the operation, without modifying the original"]
    pub fn round(self, digits: i64) -> crate::Result<Self> {
        self.round_internal(digits, true)
            .ok_or_else(|| NumericError::Overflow(format!("ROUND({self}, {digits})")))
    }

    /// Truncates toward zero at `digits` decimal places. Never overflows.
    #[must_use = "this returns the result of the operation, without modifying the original"]
    pub fn trunc(self, digits: i64) -> Self {
        self.round_internal(digits, false)
            .expect("truncation cannot overflow")
    }

    /// Returns the smallest whole value greater than or equal to `self`.
    pub fn ceiling(self) -> crate::Result<Self> {
        let fract = self.fractional_part();
        let adjustment = if fract > 0 {
            fract - SCALE_U128 as i128
        } else {
            fract
        };
        let mut value = self.value;
        if value.sub_overflow(&FixedInt::from_i128(adjustment)) {
            Err(NumericError::Overflow(format!("CEIL({self})")))
        } else {
            Ok(Self::wrap(value))
        }
    }

    /// Returns the largest whole value less than or equal to `self`.
    pub fn floor(self) -> crate::Result<Self> {
        let fract = self.fractional_part();
        let adjustment = if fract < 0 {
            fract + SCALE_U128 as i128
        } else {
            fract
        };
        let mut value = self.value;
        if value.sub_overflow(&FixedInt::from_i128(adjustment)) {
            Err(NumericError::Overflow(format!("FLOOR({self})")))
        } else {
            Ok(Self::wrap(value))
        }
    }
}

// ============================================================================
// Power
// ============================================================================

/// Divides by 10^76 with rounding, requiring the quotient to fit `M`
/// limbs.
fn remove_double_scale_big<const N: usize, const M: usize>(
    input: &mut FixedUint<N>,
) -> Option<FixedUint<M>> {
    let mut half = FixedUint::<6>::from_limbs(DOUBLE_SCALE_LIMBS);
    half.shr_assign(1);
    if input.add_overflow(&FixedUint::convert_from(&half)) {
        return None;
    }
    let mut quotient = *input;
    for _ in 0..4 {
        quotient = quotient.div_mod_u64(POW_10_19).0;
    }
    for i in M..N {
        if quotient.limbs()[i] != 0 {
            return None;
        }
    }
    Some(FixedUint::convert_from(&quotient))
}

/// Square-and-multiply on a double-scaled (x 10^76) base over a 384-bit
/// working value; products expand to 768 bits before rescaling. Returns
/// false when an intermediate exceeds the working width.
fn double_scaled_power_big(value: &mut FixedUint<6>, exp: &FixedUint<4>) -> bool {
    let mut result = FixedUint::<6>::from_limbs(DOUBLE_SCALE_LIMBS);
    let mut power = *value;
    let mut exp = *exp;
    loop {
        if exp.limbs()[0] & 1 != 0 {
            let mut product: FixedUint<12> = extend_and_multiply(&result, &power);
            match remove_double_scale_big::<12, 6>(&mut product) {
                Some(rescaled) => result = rescaled,
                None => return false,
            }
        }
        if exp.non_zero_length() <= 1 && exp.limbs()[0] <= 1 {
            *value = result;
            return true;
        }
        let mut squared: FixedUint<12> = extend_and_multiply(&power, &power);
        match remove_double_scale_big::<12, 6>(&mut squared) {
            Some(rescaled) => power = rescaled,
            None => return false,
        }
        exp.shr_assign(1);
    }
}

/// `dest *= pow(abs_value / 10^38, fract_exp / 10^38) * 10^38` on a
/// triple-scale-capable 512-bit accumulator.
fn multiply_by_fractional_power_big(
    abs_value: &FixedUint<4>,
    fract_exp: i128,
    dest: &mut FixedUint<8>,
) -> crate::Result<()> {
    let base = remove_scale_and_convert_to_double_big(&FixedInt::from_bits(*abs_value));
    let exponent = remove_scale_and_convert_to_double_big(&FixedInt::from_i128(fract_exp));
    let fract_term = BigNumeric::from_f64(base.powf(exponent))?;
    let product: FixedUint<12> = extend_and_multiply(dest, &fract_term.value.abs());
    for i in 8..12 {
        if product.limbs()[i] != 0 {
            return Err(NumericError::Overflow(String::new()));
        }
    }
    *dest = FixedUint::convert_from(&product);
    Ok(())
}

impl BigNumeric {
    /// Raises `self` to the power `exp`, which may be fractional and
    /// negative. `power(0, 0)` is 1; a negative base requires a whole
    /// exponent.
    pub fn power(self, exp: Self) -> crate::Result<Self> {
        self.power_internal(exp)
            .map_err(|e| e.annotate(&format!("POW({self}, {exp})")))
    }

    fn power_internal(self, exp: Self) -> crate::Result<Self> {
        if exp.value.is_zero() {
            return Ok(Self::ONE);
        }
        let exp_is_negative = exp.value.is_negative();
        if self.value.is_zero() {
            if exp_is_negative {
                return Err(NumericError::DivisionByZero(String::new()));
            }
            return Ok(Self::ZERO);
        }

        let abs_exp = exp.value.abs();
        let (quotient, low) = abs_exp.div_mod_u64(POW_10_19);
        let (integer_exp, high) = quotient.div_mod_u64(POW_10_19);
        let fract_magnitude = high as u128 * POW_10_19 as u128 + low as u128;
        let fract_exp = if exp_is_negative {
            -(fract_magnitude as i128)
        } else {
            fract_magnitude as i128
        };

        let mut result_is_negative = false;
        let abs_value = self.value.abs();
        if self.value.is_negative() {
            if fract_exp != 0 {
                return Err(NumericError::FailedPrecondition(
                    "negative value cannot be raised to a fractional power".to_string(),
                ));
            }
            result_is_negative = integer_exp.limbs()[0] & 1 != 0;
        }

        let overflow = || NumericError::Overflow(String::new());
        let one = FixedUint::<4>::from_u128(SCALE_U128);
        let mut double_scaled_value: FixedUint<6>;
        if !exp_is_negative {
            double_scaled_value =
                extend_and_multiply(&abs_value, &FixedUint::<2>::from_u128(SCALE_U128));
        } else if abs_value > one {
            // Negative exponent, |base| > 1: raise first, invert once.
            double_scaled_value =
                extend_and_multiply(&abs_value, &FixedUint::<2>::from_u128(SCALE_U128));
            if !double_scaled_power_big(&mut double_scaled_value, &integer_exp)
                || double_scaled_value > FixedUint::from_limbs(TWO_TRIPLE_SCALE_LIMBS)
            {
                // The reciprocal rounds to zero.
                return Ok(Self::ZERO);
            }
            if fract_exp == 0 {
                let mut numerator = FixedUint::<6>::from_limbs(TRIPLE_SCALE_LIMBS);
                numerator.div_and_round_away_from_zero(&double_scaled_value);
                if numerator.limbs()[4] != 0 || numerator.limbs()[5] != 0 {
                    return Err(overflow());
                }
                return Self::from_fixed_uint(&numerator, result_is_negative)
                    .ok_or_else(overflow);
            }
            let mut numerator =
                FixedUint::<8>::convert_from(&FixedUint::<6>::from_limbs(DOUBLE_SCALE_LIMBS));
            // fract_exp < 0 keeps the fractional factor at most one, so
            // the triple-scaled numerator stays within 10^114.
            multiply_by_fractional_power_big(&abs_value, fract_exp, &mut numerator)?;
            numerator.div_and_round_away_from_zero(&FixedUint::convert_from(
                &double_scaled_value,
            ));
            for i in 4..8 {
                if numerator.limbs()[i] != 0 {
                    return Err(overflow());
                }
            }
            return Self::from_fixed_uint(&numerator, result_is_negative).ok_or_else(overflow);
        } else {
            // Negative exponent, |base| <= 1: invert up front.
            double_scaled_value = FixedUint::from_limbs(TRIPLE_SCALE_LIMBS);
            double_scaled_value
                .div_and_round_away_from_zero(&FixedUint::<6>::convert_from(&abs_value));
        }

        if !double_scaled_power_big(&mut double_scaled_value, &integer_exp) {
            return Err(overflow());
        }

        if fract_exp == 0 {
            double_scaled_value.div_and_round_away_from_zero(&FixedUint::<6>::convert_from(
                &FixedUint::<2>::from_u128(SCALE_U128),
            ));
            if double_scaled_value.limbs()[4] != 0 || double_scaled_value.limbs()[5] != 0 {
                return Err(overflow());
            }
            return Self::from_fixed_uint(&double_scaled_value, result_is_negative)
                .ok_or_else(overflow);
        }

        let mut triple_scaled = FixedUint::<8>::convert_from(&double_scaled_value);
        multiply_by_fractional_power_big(&abs_value, fract_exp, &mut triple_scaled)?;
        let rescaled = remove_double_scale_big::<8, 4>(&mut triple_scaled).ok_or_else(overflow)?;
        Self::from_fixed_uint(&rescaled, result_is_negative).ok_or_else(overflow)
    }
}

// ============================================================================
// Float Conversions
// ============================================================================

/// `value * 10^38` rounded half away from zero, as a 256-bit integer, or
/// `None` if it cannot fit.
fn scale_and_round_away_from_zero_big(value: f64) -> Option<FixedInt<4>> {
    if value == 0.0 {
        return Some(FixedInt::ZERO);
    }
    let (mantissa, exponent) = decompose_double(value);
    debug_assert!(mantissa != 0);
    if exponent <= -256 {
        return Some(FixedInt::ZERO);
    }
    if exponent >= 255 {
        return None;
    }
    let negative = mantissa < 0;
    let mut magnitude: FixedUint<4> = extend_and_multiply(
        &FixedUint::<2>::from_u128(mantissa.unsigned_abs() as u128),
        &FixedUint::<2>::from_u128(SCALE_U128),
    );
    if exponent < 0 {
        magnitude.shr_assign((-1 - exponent) as u32);
        magnitude.add_overflow_u64(1);
        magnitude.shr_assign(1);
    } else if exponent > 0 {
        if magnitude.find_msb_set_nonzero() as i32 >= 255 - exponent {
            return None;
        }
        magnitude.shl_assign(exponent as u32);
    }
    // A 53-bit mantissa times the 127-bit scale never reaches bit 255
    // when the exponent is zero or negative, so the sign fits.
    FixedInt::set_sign_and_abs(negative, magnitude)
}

/// `value / 10^38` as a double with a single correct rounding.
///
/// 10^38 = 2^38 * 5^38. The three powers of five divide out as exact
/// 32-bit constant divisions whose remainders are sticky-ORed into the
/// low bit; the 2^38 and the compensating shift fold into one binary
/// factor that divides out of the double exactly.
fn remove_scale_and_convert_to_double_big(value: &FixedInt<4>) -> f64 {
    const POW_5_13: u64 = 1_220_703_125;
    const POW_5_12: u64 = 244_140_625;
    let negative = value.is_negative();
    let mut magnitude = value.abs();
    let binary_scaling_factor: f64;
    match magnitude.non_zero_length_u32() {
        0 => return 0.0,
        1 => {
            magnitude.shl_assign(144);
            binary_scaling_factor = f64::powi(2.0, 182);
        }
        2 => {
            magnitude.shl_assign(112);
            binary_scaling_factor = f64::powi(2.0, 150);
        }
        3 => {
            magnitude.shl_assign(80);
            binary_scaling_factor = f64::powi(2.0, 118);
        }
        4 => {
            magnitude.shl_assign(48);
            binary_scaling_factor = f64::powi(2.0, 86);
        }
        5 => {
            magnitude.shl_assign(16);
            binary_scaling_factor = f64::powi(2.0, 54);
        }
        _ => {
            binary_scaling_factor = f64::powi(2.0, 38);
        }
    }
    let (quotient, r1) = magnitude.div_mod_u64(POW_5_13);
    let (quotient, r2) = quotient.div_mod_u64(POW_5_13);
    let (quotient, r3) = quotient.div_mod_u64(POW_5_12);
    let mut limbs = *quotient.limbs();
    limbs[0] |= ((r1 | r2 | r3) != 0) as u64;
    let result = FixedUint::<4>::from_limbs(limbs).to_f64() / binary_scaling_factor;
    if negative { -result } else { result }
}

impl BigNumeric {
    /// Converts a finite double, rounding half away from zero on the 39th
    /// fractional digit.
    pub fn from_f64(value: f64) -> crate::Result<Self> {
        if !value.is_finite() {
            return Err(NumericError::FailedPrecondition(format!(
                "illegal conversion of non-finite floating point number to bignumeric: {value}"
            )));
        }
        scale_and_round_away_from_zero_big(value)
            .map(Self::wrap)
            .ok_or_else(|| NumericError::Overflow(format!("{value}")))
    }

    /// Converts to the nearest double with a single rounding step.
    pub fn to_f64(self) -> f64 {
        remove_scale_and_convert_to_double_big(&self.value)
    }
}

// ============================================================================
// String Parsing
// ============================================================================

impl BigNumeric {
    fn from_str_internal(input: &str, strict: bool) -> crate::Result<Self> {
        let fail = || NumericError::InvalidValue(input.to_string());
        let parts = split_e_notation(input.as_bytes()).ok_or_else(fail)?;
        let exp = parse_exponent(parts.exp_part, Self::DECIMALS as u32).ok_or_else(fail)?;
        let magnitude =
            parse_number::<4>(parts.int_part, parts.fract_part, exp, strict).ok_or_else(fail)?;
        FixedInt::set_sign_and_abs(parts.negative, magnitude)
            .map(Self::wrap)
            .ok_or_else(fail)
    }

    /// Parses a decimal string, erroring if any digit past the 38th
    /// fractional place is non-zero.
    pub fn from_str_exact(input: &str) -> crate::Result<Self> {
        Self::from_str_internal(input, true)
    }

    /// Parses a decimal string, rounding half away from zero on the first
    /// digit past the 38th fractional place.
    pub fn from_str_lossy(input: &str) -> crate::Result<Self> {
        Self::from_str_internal(input, false)
    }
}

impl FromStr for BigNumeric {
    type Err = NumericError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_str_exact(s)
    }
}

// ============================================================================
// Bytes Operations
// ============================================================================

impl BigNumeric {
    /// Appends the minimal little-endian two's-complement encoding of the
    /// scaled value. Zero encodes as a single 0x00 byte.
    pub fn serialize_and_append_to_bytes(&self, bytes: &mut Vec<u8>) {
        self.value.serialize_to_bytes(bytes);
    }

    /// The minimal little-endian two's-complement encoding.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(32);
        self.serialize_and_append_to_bytes(&mut bytes);
        bytes
    }

    /// Decodes 1 to 32 bytes produced by [`Self::to_bytes`], sign
    /// extending from the top bit of the last byte.
    pub fn from_bytes(bytes: &[u8]) -> crate::Result<Self> {
        FixedInt::<4>::deserialize_from_bytes(bytes)
            .map(Self::wrap)
            .ok_or_else(|| NumericError::InvalidValue("invalid bignumeric encoding".to_string()))
    }
}

// ============================================================================
// Display and Debug
// ============================================================================

impl BigNumeric {
    /// Appends the canonical decimal form: at most 38 fractional digits,
    /// trailing fractional zeros stripped, zero rendered as "0".
    pub fn append_to_string(&self, output: &mut String) {
        if self.value.is_zero() {
            output.push('0');
            return;
        }
        let old_size = output.len();
        self.value.append_to_string(output);
        let first_digit_index = old_size + usize::from(self.value.is_negative());
        add_decimal_point_and_adjust_zeros(first_digit_index, Self::DECIMALS as usize, output);
    }
}

impl fmt::Display for BigNumeric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut output = String::with_capacity(80);
        self.append_to_string(&mut output);
        f.write_str(&output)
    }
}

impl fmt::Debug for BigNumeric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if f.alternate() {
            f.debug_struct("BigNumeric").field("value", &self.value).finish()
        } else {
            write!(f, "BigNumeric({self})")
        }
    }
}

// ============================================================================
// Operator Overloading
// ============================================================================

impl Add for BigNumeric {
    type Output = Self;

    #[inline(always)]
    fn add(self, rhs: Self) -> Self::Output {
        self.checked_add(rhs).expect("attempt to add with overflow")
    }
}

impl Sub for BigNumeric {
    type Output = Self;

    #[inline(always)]
    fn sub(self, rhs: Self) -> Self::Output {
        self.checked_sub(rhs)
            .expect("attempt to subtract with overflow")
    }
}

impl Mul for BigNumeric {
    type Output = Self;

    #[inline(always)]
    fn mul(self, rhs: Self) -> Self::Output {
        self.checked_mul(rhs)
            .expect("attempt to multiply with overflow")
    }
}

impl Div for BigNumeric {
    type Output = Self;

    #[inline(always)]
    fn div(self, rhs: Self) -> Self::Output {
        self.checked_div(rhs)
            .expect("attempt to divide by zero or overflow")
    }
}

impl Rem for BigNumeric {
    type Output = Self;

    #[inline(always)]
    fn rem(self, rhs: Self) -> Self::Output {
        self.checked_rem(rhs).expect("attempt to take MOD by zero")
    }
}

impl Neg for BigNumeric {
    type Output = Self;

    #[inline(always)]
    fn neg(self) -> Self::Output {
        self.checked_neg().expect("attempt to negate with overflow")
    }
}

impl AddAssign for BigNumeric {
    #[inline(always)]
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

impl SubAssign for BigNumeric {
    #[inline(always)]
    fn sub_assign(&mut self, rhs: Self) {
        *self = *self - rhs;
    }
}

impl MulAssign for BigNumeric {
    #[inline(always)]
    fn mul_assign(&mut self, rhs: Self) {
        *self = *self * rhs;
    }
}

impl DivAssign for BigNumeric {
    #[inline(always)]
    fn div_assign(&mut self, rhs: Self) {
        *self = *self / rhs;
    }
}

// ============================================================================
// Iterator Trait Implementations
// ============================================================================

impl Sum for BigNumeric {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::ZERO, |acc, x| acc + x)
    }
}

impl<'a> Sum<&'a BigNumeric> for BigNumeric {
    fn sum<I: Iterator<Item = &'a Self>>(iter: I) -> Self {
        iter.fold(Self::ZERO, |acc, x| acc + *x)
    }
}

impl Product for BigNumeric {
    fn product<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::ONE, |acc, x| acc * x)
    }
}

impl<'a> Product<&'a BigNumeric> for BigNumeric {
    fn product<I: Iterator<Item = &'a Self>>(iter: I) -> Self {
        iter.fold(Self::ONE, |acc, x| acc * *x)
    }
}

// ============================================================================
// Serde Support
// ============================================================================

#[cfg(feature = "serde")]
impl Serialize for BigNumeric {
    fn serialize<S>(&self, serializer: S) -> core::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if serializer.is_human_readable() {
            serializer.collect_str(self)
        } else {
            serializer.serialize_bytes(&self.to_bytes())
        }
    }
}

#[cfg(feature = "serde")]
impl<'de> Deserialize<'de> for BigNumeric {
    fn deserialize<D>(deserializer: D) -> core::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        if deserializer.is_human_readable() {
            let s = String::deserialize(deserializer)?;
            Self::from_str(&s).map_err(de::Error::custom)
        } else {
            let bytes = Vec::<u8>::deserialize(deserializer)?;
            Self::from_bytes(&bytes).map_err(de::Error::custom)
        }
    }
}
