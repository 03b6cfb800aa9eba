//! Streaming aggregators: SUM/AVG, variance, covariance and correlation.
//!
//! Aggregators accumulate scaled values into wide integers that cannot
//! lose precision, merge with other aggregators of the same kind, and
//! serialize to compact byte blobs. They are single-writer: give each
//! worker its own aggregator and merge on one thread at the end.

use crate::fixed_int::{
    FixedInt, FixedUint, POWERS_OF_TEN_U64, POW_10_19, extend_and_multiply_signed,
};
use crate::{BigNumeric, Numeric, NumericError};

/// 10^18, the squared Numeric scaling factor.
const NUMERIC_SCALE_SQUARED: u64 = POWERS_OF_TEN_U64[18];

// ============================================================================
// Serialization Helpers
// ============================================================================

/// Appends a field with a one-byte length prefix (payloads are at most
/// 127 bytes). The last field of a blob is appended without a prefix.
fn append_with_length_prefix<const N: usize>(out: &mut Vec<u8>, value: &FixedInt<N>) {
    let start = out.len();
    out.push(0);
    value.serialize_to_bytes(out);
    let payload_length = out.len() - start - 1;
    debug_assert!(payload_length <= 127);
    out[start] = payload_length as u8;
}

/// Reads a length-prefixed field, leaving at least one byte for the
/// fields after it.
fn read_with_length_prefix<const N: usize>(bytes: &mut &[u8]) -> Option<FixedInt<N>> {
    let (&length, rest) = bytes.split_first()?;
    let length = length as usize;
    if length + 1 > rest.len() {
        return None;
    }
    let value = FixedInt::deserialize_from_bytes(&rest[..length])?;
    *bytes = &rest[length..];
    Some(value)
}

// ============================================================================
// Shared Accumulation Arithmetic
// ============================================================================

/// The exact widened product of two raw Numeric values.
fn numeric_product(x: Numeric, y: Numeric) -> FixedInt<5> {
    let x = FixedInt::<2>::from_i128(x.to_raw());
    let y = FixedInt::<2>::from_i128(y.to_raw());
    FixedInt::extend_from(&extend_and_multiply_signed::<2, 2, 4>(&x, &y))
}

/// The exact widened product of two raw BigNumeric values.
fn big_numeric_product(x: &BigNumeric, y: &BigNumeric) -> FixedInt<9> {
    FixedInt::extend_from(&extend_and_multiply_signed::<4, 4, 8>(x.raw(), y.raw()))
}

/// `count * sum_product - sum_x * sum_y`, the shared numerator of
/// covariance, variance (x = y) and correlation.
fn numeric_covariance_numerator(
    sum_x: &FixedInt<3>,
    sum_y: &FixedInt<3>,
    sum_product: &FixedInt<5>,
    count: u64,
) -> FixedInt<6> {
    let mut numerator = FixedInt::<6>::extend_from(sum_product);
    numerator.mul_u64(count);
    numerator.sub_assign(&extend_and_multiply_signed::<3, 3, 6>(sum_x, sum_y));
    numerator
}

fn numeric_covariance(
    sum_x: &FixedInt<3>,
    sum_y: &FixedInt<3>,
    sum_product: &FixedInt<5>,
    count: u64,
    count_offset: u64,
) -> f64 {
    let numerator = numeric_covariance_numerator(sum_x, sum_y, sum_product, count);
    let mut denominator = FixedUint::<3>::from_u64(count);
    denominator.mul_u64(count - count_offset);
    denominator.mul_u64(NUMERIC_SCALE_SQUARED);
    numerator.to_f64() / denominator.to_f64()
}

fn big_numeric_covariance_numerator(
    sum_x: &FixedInt<5>,
    sum_y: &FixedInt<5>,
    sum_product: &FixedInt<9>,
    count: u64,
) -> FixedInt<10> {
    let mut numerator = FixedInt::<10>::extend_from(sum_product);
    numerator.mul_u64(count);
    numerator.sub_assign(&extend_and_multiply_signed::<5, 5, 10>(sum_x, sum_y));
    numerator
}

fn big_numeric_covariance(
    sum_x: &FixedInt<5>,
    sum_y: &FixedInt<5>,
    sum_product: &FixedInt<9>,
    count: u64,
    count_offset: u64,
) -> f64 {
    let numerator = big_numeric_covariance_numerator(sum_x, sum_y, sum_product, count);
    // count * (count - offset) * 10^76
    let mut denominator = FixedUint::<6>::from_u64(count);
    denominator.mul_u64(count - count_offset);
    for _ in 0..4 {
        denominator.mul_u64(POW_10_19);
    }
    numerator.to_f64() / denominator.to_f64()
}

// ============================================================================
// Sum Aggregators
// ============================================================================

/// Exact SUM/AVG accumulator for [`Numeric`] values.
///
/// The 192-bit accumulator absorbs on the order of 2^63 extreme values
/// without overflowing; range is only enforced when reading the result.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NumericSumAggregator {
    sum: FixedInt<3>,
}

impl NumericSumAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, value: Numeric) {
        self.sum.add_assign(&FixedInt::from_i128(value.to_raw()));
    }

    /// Removes a previously added value.
    pub fn subtract(&mut self, value: Numeric) {
        self.sum.sub_assign(&FixedInt::from_i128(value.to_raw()));
    }

    pub fn merge(&mut self, other: &Self) {
        self.sum.add_assign(&other.sum);
    }

    /// The exact sum, or `Overflow` if it left the Numeric range.
    pub fn get_sum(&self) -> crate::Result<Numeric> {
        Numeric::from_fixed_int(&self.sum)
            .ok_or_else(|| NumericError::Overflow("SUM".to_string()))
    }

    /// The sum divided by `count`, rounding half away from zero.
    pub fn get_average(&self, count: u64) -> crate::Result<Numeric> {
        if count == 0 {
            return Err(NumericError::DivisionByZero("AVG".to_string()));
        }
        let average = self.sum.div_and_round_away_from_zero_u64(count);
        Numeric::from_fixed_int(&average)
            .ok_or_else(|| NumericError::Overflow("AVG".to_string()))
    }

    pub fn serialize_and_append_to_bytes(&self, out: &mut Vec<u8>) {
        self.sum.serialize_to_bytes(out);
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.serialize_and_append_to_bytes(&mut out);
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> crate::Result<Self> {
        FixedInt::deserialize_from_bytes(bytes)
            .map(|sum| Self { sum })
            .ok_or_else(|| {
                NumericError::InvalidValue("invalid sum aggregator encoding".to_string())
            })
    }
}

/// Exact SUM/AVG accumulator for [`BigNumeric`] values, 320 bits wide.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BigNumericSumAggregator {
    sum: FixedInt<5>,
}

impl BigNumericSumAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, value: BigNumeric) {
        self.sum.add_assign(&FixedInt::extend_from(value.raw()));
    }

    pub fn subtract(&mut self, value: BigNumeric) {
        self.sum.sub_assign(&FixedInt::extend_from(value.raw()));
    }

    pub fn merge(&mut self, other: &Self) {
        self.sum.add_assign(&other.sum);
    }

    pub fn get_sum(&self) -> crate::Result<BigNumeric> {
        BigNumeric::from_fixed_int(&self.sum)
            .ok_or_else(|| NumericError::Overflow("SUM".to_string()))
    }

    pub fn get_average(&self, count: u64) -> crate::Result<BigNumeric> {
        if count == 0 {
            return Err(NumericError::DivisionByZero("AVG".to_string()));
        }
        let average = self.sum.div_and_round_away_from_zero_u64(count);
        BigNumeric::from_fixed_int(&average)
            .ok_or_else(|| NumericError::Overflow("AVG".to_string()))
    }

    pub fn serialize_and_append_to_bytes(&self, out: &mut Vec<u8>) {
        self.sum.serialize_to_bytes(out);
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.serialize_and_append_to_bytes(&mut out);
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> crate::Result<Self> {
        FixedInt::deserialize_from_bytes(bytes)
            .map(|sum| Self { sum })
            .ok_or_else(|| {
                NumericError::InvalidValue("invalid sum aggregator encoding".to_string())
            })
    }
}

// ============================================================================
// Variance Aggregators
// ============================================================================

/// Streaming VAR_POP/VAR_SAMP/STDDEV accumulator for [`Numeric`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NumericVarianceAggregator {
    sum: FixedInt<3>,
    sum_square: FixedInt<5>,
}

impl NumericVarianceAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, value: Numeric) {
        self.sum.add_assign(&FixedInt::from_i128(value.to_raw()));
        self.sum_square.add_assign(&numeric_product(value, value));
    }

    pub fn subtract(&mut self, value: Numeric) {
        self.sum.sub_assign(&FixedInt::from_i128(value.to_raw()));
        self.sum_square.sub_assign(&numeric_product(value, value));
    }

    pub fn merge(&mut self, other: &Self) {
        self.sum.add_assign(&other.sum);
        self.sum_square.add_assign(&other.sum_square);
    }

    /// Population variance; `None` unless `count >= 1`.
    pub fn get_population_variance(&self, count: u64) -> Option<f64> {
        (count > 0).then(|| numeric_covariance(&self.sum, &self.sum, &self.sum_square, count, 0))
    }

    /// Sampling variance; `None` unless `count >= 2`.
    pub fn get_sampling_variance(&self, count: u64) -> Option<f64> {
        (count > 1).then(|| numeric_covariance(&self.sum, &self.sum, &self.sum_square, count, 1))
    }

    pub fn get_population_std_dev(&self, count: u64) -> Option<f64> {
        self.get_population_variance(count).map(f64::sqrt)
    }

    pub fn get_sampling_std_dev(&self, count: u64) -> Option<f64> {
        self.get_sampling_variance(count).map(f64::sqrt)
    }

    pub fn serialize_and_append_to_bytes(&self, out: &mut Vec<u8>) {
        append_with_length_prefix(out, &self.sum);
        self.sum_square.serialize_to_bytes(out);
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.serialize_and_append_to_bytes(&mut out);
        out
    }

    pub fn from_bytes(mut bytes: &[u8]) -> crate::Result<Self> {
        let fail =
            || NumericError::InvalidValue("invalid variance aggregator encoding".to_string());
        let sum = read_with_length_prefix(&mut bytes).ok_or_else(fail)?;
        let sum_square = FixedInt::deserialize_from_bytes(bytes).ok_or_else(fail)?;
        Ok(Self { sum, sum_square })
    }
}

/// Streaming VAR_POP/VAR_SAMP/STDDEV accumulator for [`BigNumeric`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BigNumericVarianceAggregator {
    sum: FixedInt<5>,
    sum_square: FixedInt<9>,
}

impl BigNumericVarianceAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, value: BigNumeric) {
        self.sum.add_assign(&FixedInt::extend_from(value.raw()));
        self.sum_square.add_assign(&big_numeric_product(&value, &value));
    }

    pub fn subtract(&mut self, value: BigNumeric) {
        self.sum.sub_assign(&FixedInt::extend_from(value.raw()));
        self.sum_square.sub_assign(&big_numeric_product(&value, &value));
    }

    pub fn merge(&mut self, other: &Self) {
        self.sum.add_assign(&other.sum);
        self.sum_square.add_assign(&other.sum_square);
    }

    pub fn get_population_variance(&self, count: u64) -> Option<f64> {
        (count > 0)
            .then(|| big_numeric_covariance(&self.sum, &self.sum, &self.sum_square, count, 0))
    }

    pub fn get_sampling_variance(&self, count: u64) -> Option<f64> {
        (count > 1)
            .then(|| big_numeric_covariance(&self.sum, &self.sum, &self.sum_square, count, 1))
    }

    pub fn get_population_std_dev(&self, count: u64) -> Option<f64> {
        self.get_population_variance(count).map(f64::sqrt)
    }

    pub fn get_sampling_std_dev(&self, count: u64) -> Option<f64> {
        self.get_sampling_variance(count).map(f64::sqrt)
    }

    pub fn serialize_and_append_to_bytes(&self, out: &mut Vec<u8>) {
        append_with_length_prefix(out, &self.sum);
        self.sum_square.serialize_to_bytes(out);
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.serialize_and_append_to_bytes(&mut out);
        out
    }

    pub fn from_bytes(mut bytes: &[u8]) -> crate::Result<Self> {
        let fail =
            || NumericError::InvalidValue("invalid variance aggregator encoding".to_string());
        let sum = read_with_length_prefix(&mut bytes).ok_or_else(fail)?;
        let sum_square = FixedInt::deserialize_from_bytes(bytes).ok_or_else(fail)?;
        Ok(Self { sum, sum_square })
    }
}

// ============================================================================
// Covariance Aggregators
// ============================================================================

/// Streaming COVAR_POP/COVAR_SAMP accumulator for [`Numeric`] pairs.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NumericCovarianceAggregator {
    sum_x: FixedInt<3>,
    sum_y: FixedInt<3>,
    sum_product: FixedInt<5>,
}

impl NumericCovarianceAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, x: Numeric, y: Numeric) {
        self.sum_x.add_assign(&FixedInt::from_i128(x.to_raw()));
        self.sum_y.add_assign(&FixedInt::from_i128(y.to_raw()));
        self.sum_product.add_assign(&numeric_product(x, y));
    }

    pub fn subtract(&mut self, x: Numeric, y: Numeric) {
        self.sum_x.sub_assign(&FixedInt::from_i128(x.to_raw()));
        self.sum_y.sub_assign(&FixedInt::from_i128(y.to_raw()));
        self.sum_product.sub_assign(&numeric_product(x, y));
    }

    pub fn merge(&mut self, other: &Self) {
        self.sum_x.add_assign(&other.sum_x);
        self.sum_y.add_assign(&other.sum_y);
        self.sum_product.add_assign(&other.sum_product);
    }

    /// Population covariance; `None` unless `count >= 1`.
    pub fn get_population_covariance(&self, count: u64) -> Option<f64> {
        (count > 0)
            .then(|| numeric_covariance(&self.sum_x, &self.sum_y, &self.sum_product, count, 0))
    }

    /// Sampling covariance; `None` unless `count >= 2`.
    pub fn get_sampling_covariance(&self, count: u64) -> Option<f64> {
        (count > 1)
            .then(|| numeric_covariance(&self.sum_x, &self.sum_y, &self.sum_product, count, 1))
    }

    pub fn serialize_and_append_to_bytes(&self, out: &mut Vec<u8>) {
        append_with_length_prefix(out, &self.sum_product);
        append_with_length_prefix(out, &self.sum_x);
        self.sum_y.serialize_to_bytes(out);
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.serialize_and_append_to_bytes(&mut out);
        out
    }

    pub fn from_bytes(mut bytes: &[u8]) -> crate::Result<Self> {
        let fail =
            || NumericError::InvalidValue("invalid covariance aggregator encoding".to_string());
        let sum_product = read_with_length_prefix(&mut bytes).ok_or_else(fail)?;
        let sum_x = read_with_length_prefix(&mut bytes).ok_or_else(fail)?;
        let sum_y = FixedInt::deserialize_from_bytes(bytes).ok_or_else(fail)?;
        Ok(Self {
            sum_x,
            sum_y,
            sum_product,
        })
    }
}

/// Streaming COVAR_POP/COVAR_SAMP accumulator for [`BigNumeric`] pairs.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BigNumericCovarianceAggregator {
    sum_x: FixedInt<5>,
    sum_y: FixedInt<5>,
    sum_product: FixedInt<9>,
}

impl BigNumericCovarianceAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, x: BigNumeric, y: BigNumeric) {
        self.sum_x.add_assign(&FixedInt::extend_from(x.raw()));
        self.sum_y.add_assign(&FixedInt::extend_from(y.raw()));
        self.sum_product.add_assign(&big_numeric_product(&x, &y));
    }

    pub fn subtract(&mut self, x: BigNumeric, y: BigNumeric) {
        self.sum_x.sub_assign(&FixedInt::extend_from(x.raw()));
        self.sum_y.sub_assign(&FixedInt::extend_from(y.raw()));
        self.sum_product.sub_assign(&big_numeric_product(&x, &y));
    }

    pub fn merge(&mut self, other: &Self) {
        self.sum_x.add_assign(&other.sum_x);
        self.sum_y.add_assign(&other.sum_y);
        self.sum_product.add_assign(&other.sum_product);
    }

    pub fn get_population_covariance(&self, count: u64) -> Option<f64> {
        (count > 0)
            .then(|| big_numeric_covariance(&self.sum_x, &self.sum_y, &self.sum_product, count, 0))
    }

    pub fn get_sampling_covariance(&self, count: u64) -> Option<f64> {
        (count > 1)
            .then(|| big_numeric_covariance(&self.sum_x, &self.sum_y, &self.sum_product, count, 1))
    }

    pub fn serialize_and_append_to_bytes(&self, out: &mut Vec<u8>) {
        append_with_length_prefix(out, &self.sum_product);
        append_with_length_prefix(out, &self.sum_x);
        self.sum_y.serialize_to_bytes(out);
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.serialize_and_append_to_bytes(&mut out);
        out
    }

    pub fn from_bytes(mut bytes: &[u8]) -> crate::Result<Self> {
        let fail =
            || NumericError::InvalidValue("invalid covariance aggregator encoding".to_string());
        let sum_product = read_with_length_prefix(&mut bytes).ok_or_else(fail)?;
        let sum_x = read_with_length_prefix(&mut bytes).ok_or_else(fail)?;
        let sum_y = FixedInt::deserialize_from_bytes(bytes).ok_or_else(fail)?;
        Ok(Self {
            sum_x,
            sum_y,
            sum_product,
        })
    }
}

// ============================================================================
// Correlation Aggregators
// ============================================================================

/// Streaming CORR accumulator for [`Numeric`] pairs.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NumericCorrelationAggregator {
    covariance: NumericCovarianceAggregator,
    sum_square_x: FixedInt<5>,
    sum_square_y: FixedInt<5>,
}

impl NumericCorrelationAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, x: Numeric, y: Numeric) {
        self.covariance.add(x, y);
        self.sum_square_x.add_assign(&numeric_product(x, x));
        self.sum_square_y.add_assign(&numeric_product(y, y));
    }

    pub fn subtract(&mut self, x: Numeric, y: Numeric) {
        self.covariance.subtract(x, y);
        self.sum_square_x.sub_assign(&numeric_product(x, x));
        self.sum_square_y.sub_assign(&numeric_product(y, y));
    }

    pub fn merge(&mut self, other: &Self) {
        self.covariance.merge(&other.covariance);
        self.sum_square_x.add_assign(&other.sum_square_x);
        self.sum_square_y.add_assign(&other.sum_square_y);
    }

    /// Pearson correlation; `None` unless `count >= 2`.
    pub fn get_correlation(&self, count: u64) -> Option<f64> {
        if count <= 1 {
            return None;
        }
        let cov = &self.covariance;
        let numerator =
            numeric_covariance_numerator(&cov.sum_x, &cov.sum_y, &cov.sum_product, count);
        let variance_numerator_x =
            numeric_covariance_numerator(&cov.sum_x, &cov.sum_x, &self.sum_square_x, count);
        let variance_numerator_y =
            numeric_covariance_numerator(&cov.sum_y, &cov.sum_y, &self.sum_square_y, count);
        let denominator_square = extend_and_multiply_signed::<6, 6, 12>(
            &variance_numerator_x,
            &variance_numerator_y,
        );
        Some(numerator.to_f64() / denominator_square.to_f64().sqrt())
    }

    pub fn serialize_and_append_to_bytes(&self, out: &mut Vec<u8>) {
        append_with_length_prefix(out, &self.covariance.sum_product);
        append_with_length_prefix(out, &self.covariance.sum_x);
        append_with_length_prefix(out, &self.covariance.sum_y);
        append_with_length_prefix(out, &self.sum_square_x);
        self.sum_square_y.serialize_to_bytes(out);
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.serialize_and_append_to_bytes(&mut out);
        out
    }

    pub fn from_bytes(mut bytes: &[u8]) -> crate::Result<Self> {
        let fail =
            || NumericError::InvalidValue("invalid correlation aggregator encoding".to_string());
        let sum_product = read_with_length_prefix(&mut bytes).ok_or_else(fail)?;
        let sum_x = read_with_length_prefix(&mut bytes).ok_or_else(fail)?;
        let sum_y = read_with_length_prefix(&mut bytes).ok_or_else(fail)?;
        let sum_square_x = read_with_length_prefix(&mut bytes).ok_or_else(fail)?;
        let sum_square_y = FixedInt::deserialize_from_bytes(bytes).ok_or_else(fail)?;
        Ok(Self {
            covariance: NumericCovarianceAggregator {
                sum_x,
                sum_y,
                sum_product,
            },
            sum_square_x,
            sum_square_y,
        })
    }
}

/// Streaming CORR accumulator for [`BigNumeric`] pairs.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BigNumericCorrelationAggregator {
    covariance: BigNumericCovarianceAggregator,
    sum_square_x: FixedInt<9>,
    sum_square_y: FixedInt<9>,
}

impl BigNumericCorrelationAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, x: BigNumeric, y: BigNumeric) {
        self.covariance.add(x, y);
        self.sum_square_x.add_assign(&big_numeric_product(&x, &x));
        self.sum_square_y.add_assign(&big_numeric_product(&y, &y));
    }

    pub fn subtract(&mut self, x: BigNumeric, y: BigNumeric) {
        self.covariance.subtract(x, y);
        self.sum_square_x.sub_assign(&big_numeric_product(&x, &x));
        self.sum_square_y.sub_assign(&big_numeric_product(&y, &y));
    }

    pub fn merge(&mut self, other: &Self) {
        self.covariance.merge(&other.covariance);
        self.sum_square_x.add_assign(&other.sum_square_x);
        self.sum_square_y.add_assign(&other.sum_square_y);
    }

    /// Pearson correlation; `None` unless `count >= 2`.
    pub fn get_correlation(&self, count: u64) -> Option<f64> {
        if count <= 1 {
            return None;
        }
        let cov = &self.covariance;
        let numerator =
            big_numeric_covariance_numerator(&cov.sum_x, &cov.sum_y, &cov.sum_product, count);
        let variance_numerator_x =
            big_numeric_covariance_numerator(&cov.sum_x, &cov.sum_x, &self.sum_square_x, count);
        let variance_numerator_y =
            big_numeric_covariance_numerator(&cov.sum_y, &cov.sum_y, &self.sum_square_y, count);
        let denominator_square = extend_and_multiply_signed::<10, 10, 20>(
            &variance_numerator_x,
            &variance_numerator_y,
        );
        Some(numerator.to_f64() / denominator_square.to_f64().sqrt())
    }

    pub fn serialize_and_append_to_bytes(&self, out: &mut Vec<u8>) {
        append_with_length_prefix(out, &self.covariance.sum_product);
        append_with_length_prefix(out, &self.covariance.sum_x);
        append_with_length_prefix(out, &self.covariance.sum_y);
        append_with_length_prefix(out, &self.sum_square_x);
        self.sum_square_y.serialize_to_bytes(out);
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.serialize_and_append_to_bytes(&mut out);
        out
    }

    pub fn from_bytes(mut bytes: &[u8]) -> crate::Result<Self> {
        let fail =
            || NumericError::InvalidValue("invalid correlation aggregator encoding".to_string());
        let sum_product = read_with_length_prefix(&mut bytes).ok_or_else(fail)?;
        let sum_x = read_with_length_prefix(&mut bytes).ok_or_else(fail)?;
        let sum_y = read_with_length_prefix(&mut bytes).ok_or_else(fail)?;
        let sum_square_x = read_with_length_prefix(&mut bytes).ok_or_else(fail)?;
        let sum_square_y = FixedInt::deserialize_from_bytes(bytes).ok_or_else(fail)?;
        Ok(Self {
            covariance: BigNumericCovarianceAggregator {
                sum_x,
                sum_y,
                sum_product,
            },
            sum_square_x,
            sum_square_y,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::str::FromStr;

    fn n(s: &str) -> Numeric {
        Numeric::from_str(s).unwrap()
    }

    fn b(s: &str) -> BigNumeric {
        BigNumeric::from_str(s).unwrap()
    }

    #[test]
    fn test_sum_and_average() {
        let mut agg = NumericSumAggregator::new();
        for value in ["1", "2", "3"] {
            agg.add(n(value));
        }
        assert_eq!(agg.get_sum().unwrap(), n("6"));
        assert_eq!(agg.get_average(3).unwrap(), n("2"));
        assert_eq!(agg.get_average(4).unwrap(), n("1.5"));
        assert!(matches!(
            agg.get_average(0),
            Err(NumericError::DivisionByZero(_))
        ));
    }

    #[test]
    fn test_sum_negative_and_subtract() {
        let mut agg = NumericSumAggregator::new();
        agg.add(n("5"));
        agg.add(n("-8.5"));
        assert_eq!(agg.get_sum().unwrap(), n("-3.5"));
        agg.subtract(n("-8.5"));
        assert_eq!(agg.get_sum().unwrap(), n("5"));
        // -3.5 / 2 rounds away from zero.
        agg.subtract(n("5"));
        agg.add(n("-0.000000003"));
        assert_eq!(agg.get_average(2).unwrap(), n("-0.000000002"));
    }

    #[test]
    fn test_sum_overflow_only_at_get() {
        let mut agg = NumericSumAggregator::new();
        agg.add(Numeric::MAX);
        agg.add(Numeric::MAX);
        assert!(matches!(agg.get_sum(), Err(NumericError::Overflow(_))));
        // The accumulator itself never truncates.
        assert_eq!(agg.get_average(2).unwrap(), Numeric::MAX);
        agg.subtract(Numeric::MAX);
        assert_eq!(agg.get_sum().unwrap(), Numeric::MAX);
    }

    #[test]
    fn test_sum_merge_matches_incremental() {
        let values: Vec<Numeric> = ["1.5", "-2", "3.25", "100", "-0.000000001"]
            .iter()
            .map(|s| n(s))
            .collect();
        let mut all = NumericSumAggregator::new();
        for &v in &values {
            all.add(v);
        }
        let mut left = NumericSumAggregator::new();
        let mut right = NumericSumAggregator::new();
        for &v in &values[..2] {
            left.add(v);
        }
        for &v in &values[2..] {
            right.add(v);
        }
        left.merge(&right);
        assert_eq!(left, all);
        assert_eq!(left.get_sum().unwrap(), all.get_sum().unwrap());
    }

    #[test]
    fn test_sum_serialization() {
        let mut agg = NumericSumAggregator::new();
        assert_eq!(agg.to_bytes(), [0x00]);
        agg.add(n("3"));
        assert_eq!(agg.to_bytes(), [0x00, 0x5e, 0xd0, 0xb2, 0x00]);
        let back = NumericSumAggregator::from_bytes(&agg.to_bytes()).unwrap();
        assert_eq!(back, agg);
        assert!(NumericSumAggregator::from_bytes(&[]).is_err());
        assert!(NumericSumAggregator::from_bytes(&[0u8; 25]).is_err());
    }

    #[test]
    fn test_big_sum_and_average() {
        let mut agg = BigNumericSumAggregator::new();
        agg.add(BigNumeric::MAX);
        agg.add(BigNumeric::MAX);
        assert!(agg.get_sum().is_err());
        assert_eq!(agg.get_average(2).unwrap(), BigNumeric::MAX);
        agg.subtract(BigNumeric::MAX);
        assert_eq!(agg.get_sum().unwrap(), BigNumeric::MAX);
        let back = BigNumericSumAggregator::from_bytes(&agg.to_bytes()).unwrap();
        assert_eq!(back, agg);
    }

    #[test]
    fn test_variance() {
        let mut agg = NumericVarianceAggregator::new();
        for value in ["1", "2", "3"] {
            agg.add(n(value));
        }
        let population = agg.get_population_variance(3).unwrap();
        assert!((population - 2.0 / 3.0).abs() < 1e-12);
        let sampling = agg.get_sampling_variance(3).unwrap();
        assert!((sampling - 1.0).abs() < 1e-12);
        assert!((agg.get_sampling_std_dev(3).unwrap() - 1.0).abs() < 1e-12);
        assert!(
            (agg.get_population_std_dev(3).unwrap() - (2.0f64 / 3.0).sqrt()).abs() < 1e-12
        );
        // Insufficient counts are absent, not errors.
        assert_eq!(agg.get_population_variance(0), None);
        assert_eq!(agg.get_sampling_variance(1), None);
    }

    #[test]
    fn test_variance_subtract_and_merge() {
        let mut reference = NumericVarianceAggregator::new();
        reference.add(n("1.5"));
        reference.add(n("-2.5"));

        let mut agg = NumericVarianceAggregator::new();
        agg.add(n("1.5"));
        agg.add(n("7"));
        agg.subtract(n("7"));
        agg.add(n("-2.5"));
        assert_eq!(agg, reference);

        let mut left = NumericVarianceAggregator::new();
        left.add(n("1.5"));
        let mut right = NumericVarianceAggregator::new();
        right.add(n("-2.5"));
        left.merge(&right);
        assert_eq!(left, reference);
    }

    #[test]
    fn test_variance_serialization() {
        let mut agg = NumericVarianceAggregator::new();
        agg.add(n("1"));
        agg.add(n("-3"));
        let bytes = agg.to_bytes();
        let back = NumericVarianceAggregator::from_bytes(&bytes).unwrap();
        assert_eq!(back, agg);
        assert!(NumericVarianceAggregator::from_bytes(&[]).is_err());
        // Truncated payload: prefix longer than what remains.
        assert!(NumericVarianceAggregator::from_bytes(&[5, 1]).is_err());
    }

    #[test]
    fn test_big_variance() {
        let mut agg = BigNumericVarianceAggregator::new();
        for value in ["1", "2", "3"] {
            agg.add(b(value));
        }
        assert!((agg.get_population_variance(3).unwrap() - 2.0 / 3.0).abs() < 1e-12);
        assert!((agg.get_sampling_variance(3).unwrap() - 1.0).abs() < 1e-12);
        assert_eq!(agg.get_sampling_variance(1), None);
        let back = BigNumericVarianceAggregator::from_bytes(&agg.to_bytes()).unwrap();
        assert_eq!(back, agg);
    }

    #[test]
    fn test_covariance() {
        let mut agg = NumericCovarianceAggregator::new();
        agg.add(n("1"), n("2"));
        agg.add(n("2"), n("4"));
        assert!((agg.get_population_covariance(2).unwrap() - 0.5).abs() < 1e-12);
        assert!((agg.get_sampling_covariance(2).unwrap() - 1.0).abs() < 1e-12);
        assert_eq!(agg.get_population_covariance(0), None);
        assert_eq!(agg.get_sampling_covariance(1), None);

        let back = NumericCovarianceAggregator::from_bytes(&agg.to_bytes()).unwrap();
        assert_eq!(back, agg);
    }

    #[test]
    fn test_covariance_merge_and_subtract() {
        let mut reference = NumericCovarianceAggregator::new();
        reference.add(n("1"), n("-1"));
        reference.add(n("2.5"), n("0.5"));

        let mut agg = NumericCovarianceAggregator::new();
        agg.add(n("1"), n("-1"));
        agg.add(n("9"), n("9"));
        agg.subtract(n("9"), n("9"));
        agg.add(n("2.5"), n("0.5"));
        assert_eq!(agg, reference);

        let mut left = NumericCovarianceAggregator::new();
        left.add(n("1"), n("-1"));
        let mut right = NumericCovarianceAggregator::new();
        right.add(n("2.5"), n("0.5"));
        left.merge(&right);
        assert_eq!(left, reference);
    }

    #[test]
    fn test_big_covariance() {
        let mut agg = BigNumericCovarianceAggregator::new();
        agg.add(b("1"), b("2"));
        agg.add(b("2"), b("4"));
        assert!((agg.get_population_covariance(2).unwrap() - 0.5).abs() < 1e-12);
        assert!((agg.get_sampling_covariance(2).unwrap() - 1.0).abs() < 1e-12);
        let back = BigNumericCovarianceAggregator::from_bytes(&agg.to_bytes()).unwrap();
        assert_eq!(back, agg);
    }

    #[test]
    fn test_correlation() {
        let mut agg = NumericCorrelationAggregator::new();
        agg.add(n("1"), n("2"));
        agg.add(n("2"), n("4"));
        agg.add(n("3"), n("6"));
        assert!((agg.get_correlation(3).unwrap() - 1.0).abs() < 1e-12);
        assert_eq!(agg.get_correlation(1), None);

        let mut inverse = NumericCorrelationAggregator::new();
        inverse.add(n("1"), n("-2"));
        inverse.add(n("2"), n("-4"));
        inverse.add(n("3"), n("-6"));
        assert!((inverse.get_correlation(3).unwrap() + 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_correlation_merge_and_serialization() {
        let mut all = NumericCorrelationAggregator::new();
        let pairs = [("1", "3"), ("2", "1"), ("4", "4"), ("-1", "0.5")];
        for (x, y) in pairs {
            all.add(n(x), n(y));
        }
        let mut left = NumericCorrelationAggregator::new();
        let mut right = NumericCorrelationAggregator::new();
        for (x, y) in &pairs[..2] {
            left.add(n(x), n(y));
        }
        for (x, y) in &pairs[2..] {
            right.add(n(x), n(y));
        }
        left.merge(&right);
        assert_eq!(left, all);

        let back = NumericCorrelationAggregator::from_bytes(&all.to_bytes()).unwrap();
        assert_eq!(back, all);
        assert!(NumericCorrelationAggregator::from_bytes(&[1, 0]).is_err());
    }

    #[test]
    fn test_big_correlation() {
        let mut agg = BigNumericCorrelationAggregator::new();
        agg.add(b("1"), b("2"));
        agg.add(b("2"), b("4"));
        agg.add(b("3"), b("6"));
        assert!((agg.get_correlation(3).unwrap() - 1.0).abs() < 1e-12);
        let back = BigNumericCorrelationAggregator::from_bytes(&agg.to_bytes()).unwrap();
        assert_eq!(back, agg);
    }

    #[test]
    fn test_correlation_bounds() {
        let mut agg = NumericCorrelationAggregator::new();
        agg.add(n("1"), n("7.3"));
        agg.add(n("-2"), n("0.001"));
        agg.add(n("5.5"), n("-3"));
        agg.add(n("0.25"), n("11"));
        let correlation = agg.get_correlation(4).unwrap();
        assert!((-1.0..=1.0).contains(&correlation));
    }
}
