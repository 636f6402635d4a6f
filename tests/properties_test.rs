use num_bigint::BigUint;
use proptest::prelude::*;

use fibpool::fib::fibonacci;

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn recurrence_holds(n in 0i64..1500) {
        prop_assert_eq!(fibonacci(n) + fibonacci(n + 1), fibonacci(n + 2));
    }

    #[test]
    fn doubling_identity_holds(n in 1i64..800) {
        // F(2n) = F(n) * (2 * F(n + 1) - F(n))
        let f_n = fibonacci(n);
        let f_n1 = fibonacci(n + 1);
        let expected = &f_n * (BigUint::from(2u32) * f_n1 - &f_n);
        prop_assert_eq!(fibonacci(2 * n), expected);
    }

    #[test]
    fn negative_indices_yield_zero(n in i64::MIN..0) {
        prop_assert_eq!(fibonacci(n), BigUint::from(0u32));
    }

    #[test]
    fn repeated_calls_agree(n in 0i64..2000) {
        prop_assert_eq!(fibonacci(n), fibonacci(n));
    }
}
