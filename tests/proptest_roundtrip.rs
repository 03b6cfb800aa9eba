use proptest::prelude::*;
use sqlnum::{
    BigNumeric, BigNumericSumAggregator, Numeric, NumericCovarianceAggregator,
    NumericSumAggregator, NumericVarianceAggregator,
};

/// Any valid packed Numeric value.
fn numeric_strategy() -> impl Strategy<Value = Numeric> {
    let max = 10i128.pow(38) - 1;
    (-max..=max).prop_map(|raw| Numeric::from_raw(raw).unwrap())
}

/// Valid packed values small enough that sums and products of a few of
/// them stay in range.
fn small_numeric_strategy() -> impl Strategy<Value = Numeric> {
    let bound = 10i128.pow(18);
    (-bound..=bound).prop_map(|raw| Numeric::from_raw(raw).unwrap())
}

fn bignumeric_strategy() -> impl Strategy<Value = BigNumeric> {
    (any::<i128>(), any::<i64>()).prop_map(|(low, mix)| {
        // Spread values across widths by scaling an i128 seed.
        let value = BigNumeric::from_i128(low);
        let shift = BigNumeric::from_i64(mix % 1000 + 1);
        value.checked_div(shift).unwrap_or(value)
    })
}

// Property 1: parse(format(x)) == x
proptest! {
    #[test]
    fn prop_format_parse_round_trip(x in numeric_strategy()) {
        let text = x.to_string();
        let back = Numeric::from_str_exact(&text).unwrap();
        prop_assert_eq!(back, x, "failed for {}", text);
    }
}

proptest! {
    #[test]
    fn prop_big_format_parse_round_trip(x in bignumeric_strategy()) {
        let text = x.to_string();
        let back = BigNumeric::from_str_exact(&text).unwrap();
        prop_assert_eq!(back, x, "failed for {}", text);
    }
}

// Property 2: deserialize(serialize(x)) == x
proptest! {
    #[test]
    fn prop_byte_round_trip(x in numeric_strategy()) {
        let bytes = x.to_bytes();
        prop_assert!(bytes.len() <= 16);
        let back = Numeric::from_bytes(&bytes).unwrap();
        prop_assert_eq!(back, x);
    }
}

proptest! {
    #[test]
    fn prop_big_byte_round_trip(x in bignumeric_strategy()) {
        let bytes = x.to_bytes();
        prop_assert!(bytes.len() <= 32);
        let back = BigNumeric::from_bytes(&bytes).unwrap();
        prop_assert_eq!(back, x);
    }
}

// Property 3: arithmetic identities on non-overflowing operands
proptest! {
    #[test]
    fn prop_additive_identity_and_commutativity(
        x in small_numeric_strategy(),
        y in small_numeric_strategy(),
        z in small_numeric_strategy(),
    ) {
        prop_assert_eq!(x + Numeric::ZERO, x);
        prop_assert_eq!(x * Numeric::ONE, x);
        prop_assert_eq!(x + y, y + x);
        prop_assert_eq!((x + y) + z, x + (y + z));
        prop_assert_eq!(x * y, y * x);
    }
}

// Property 4: division inverse within half an ulp of the divisor
proptest! {
    #[test]
    fn prop_division_inverse(
        x in small_numeric_strategy(),
        y in small_numeric_strategy(),
    ) {
        prop_assume!(!y.is_zero());
        if let Some(q) = x.checked_div(y) {
            if let Some(product) = q.checked_mul(y) {
                // |q*y - x| <= |y| / 2 plus the rounding of the product
                // itself (half an ulp of the result scale).
                let difference = (product - x).abs();
                let tolerance = y.abs()
                    .checked_div(Numeric::from_i64(2))
                    .unwrap()
                    .checked_add(Numeric::from_raw(1).unwrap())
                    .unwrap();
                prop_assert!(
                    difference <= tolerance,
                    "x={} y={} q={} q*y={}",
                    x, y, q, product
                );
            }
        }
    }
}

// Property 5: x == integer_divide(x, y) * y + mod(x, y)
proptest! {
    #[test]
    fn prop_integer_divide_mod_identity(
        x in small_numeric_strategy(),
        y in small_numeric_strategy(),
    ) {
        prop_assume!(!y.is_zero());
        let quotient = x.integer_divide(y).unwrap();
        let remainder = x.try_rem(y).unwrap();
        if let Some(product) = quotient.checked_mul(y) {
            let reconstructed = product.checked_add(remainder).unwrap();
            prop_assert_eq!(reconstructed, x);
        }
        // The remainder magnitude is always below the divisor's.
        prop_assert!(remainder.abs() < y.abs());
    }
}

// Property 8: aggregation is order- and partition-insensitive
proptest! {
    #[test]
    fn prop_sum_aggregator_equivalence(
        values in prop::collection::vec(small_numeric_strategy(), 1..50),
        split in any::<prop::sample::Index>(),
    ) {
        let mut forward = NumericSumAggregator::new();
        for &v in &values {
            forward.add(v);
        }

        let mut reverse = NumericSumAggregator::new();
        for &v in values.iter().rev() {
            reverse.add(v);
        }

        let pivot = split.index(values.len());
        let mut left = NumericSumAggregator::new();
        let mut right = NumericSumAggregator::new();
        for &v in &values[..pivot] {
            left.add(v);
        }
        for &v in &values[pivot..] {
            right.add(v);
        }
        left.merge(&right);

        let expected = forward.get_sum().unwrap();
        prop_assert_eq!(reverse.get_sum().unwrap(), expected);
        prop_assert_eq!(left.get_sum().unwrap(), expected);
        let count = values.len() as u64;
        prop_assert_eq!(
            left.get_average(count).unwrap(),
            forward.get_average(count).unwrap()
        );
    }
}

proptest! {
    #[test]
    fn prop_big_sum_aggregator_equivalence(
        values in prop::collection::vec(bignumeric_strategy(), 1..30),
    ) {
        let mut forward = BigNumericSumAggregator::new();
        let mut reverse = BigNumericSumAggregator::new();
        for &v in &values {
            forward.add(v);
        }
        for &v in values.iter().rev() {
            reverse.add(v);
        }
        prop_assert_eq!(forward.get_sum().is_ok(), reverse.get_sum().is_ok());
        if let (Ok(a), Ok(b)) = (forward.get_sum(), reverse.get_sum()) {
            prop_assert_eq!(a, b);
        }
    }
}

// Property 8 for the statistical aggregators, plus property 9 bounds.
proptest! {
    #[test]
    fn prop_variance_nonnegative_and_merge_consistent(
        values in prop::collection::vec(small_numeric_strategy(), 2..40),
    ) {
        let count = values.len() as u64;
        let mut whole = NumericVarianceAggregator::new();
        for &v in &values {
            whole.add(v);
        }
        let pivot = values.len() / 2;
        let mut left = NumericVarianceAggregator::new();
        let mut right = NumericVarianceAggregator::new();
        for &v in &values[..pivot] {
            left.add(v);
        }
        for &v in &values[pivot..] {
            right.add(v);
        }
        left.merge(&right);
        prop_assert_eq!(&left, &whole);

        let population = whole.get_population_variance(count).unwrap();
        let sampling = whole.get_sampling_variance(count).unwrap();
        prop_assert!(population >= -1e-12);
        prop_assert!(sampling >= -1e-12);
    }
}

proptest! {
    #[test]
    fn prop_covariance_symmetry(
        pairs in prop::collection::vec(
            (small_numeric_strategy(), small_numeric_strategy()),
            2..40
        ),
    ) {
        let count = pairs.len() as u64;
        let mut xy = NumericCovarianceAggregator::new();
        let mut yx = NumericCovarianceAggregator::new();
        for &(x, y) in &pairs {
            xy.add(x, y);
            yx.add(y, x);
        }
        let forward = xy.get_population_covariance(count).unwrap();
        let swapped = yx.get_population_covariance(count).unwrap();
        prop_assert!((forward - swapped).abs() <= 1e-9 * forward.abs().max(1.0));
    }
}

// Property 10: double conversion is monotonic
proptest! {
    #[test]
    fn prop_to_f64_monotonic(a in numeric_strategy(), b in numeric_strategy()) {
        let (low, high) = if a <= b { (a, b) } else { (b, a) };
        prop_assert!(low.to_f64() <= high.to_f64());
    }
}

proptest! {
    #[test]
    fn prop_big_to_f64_monotonic(a in bignumeric_strategy(), b in bignumeric_strategy()) {
        let (low, high) = if a <= b { (a, b) } else { (b, a) };
        prop_assert!(low.to_f64() <= high.to_f64());
    }
}

// Serialized aggregator state survives a round trip.
proptest! {
    #[test]
    fn prop_aggregator_serialization_round_trip(
        values in prop::collection::vec(small_numeric_strategy(), 0..20),
    ) {
        let mut sum = NumericSumAggregator::new();
        let mut variance = NumericVarianceAggregator::new();
        for &v in &values {
            sum.add(v);
            variance.add(v);
        }
        prop_assert_eq!(
            NumericSumAggregator::from_bytes(&sum.to_bytes()).unwrap(),
            sum
        );
        prop_assert_eq!(
            NumericVarianceAggregator::from_bytes(&variance.to_bytes()).unwrap(),
            variance
        );
    }
}
