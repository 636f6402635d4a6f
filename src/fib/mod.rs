use num_bigint::BigUint;

use crate::parallel::Task;

/// Returns F(n) with F(0) = 0 and F(1) = 1.
///
/// Iterative, two accumulators. A negative `n` never enters the loop and
/// yields 0.
pub fn fibonacci(n: i64) -> BigUint {
    let mut a = BigUint::from(0u32);
    let mut b = BigUint::from(1u32);

    for _ in 0..n {
        let next = &a + &b;
        a = std::mem::replace(&mut b, next);
    }

    a
}

/// Computes every task in the calling process, one after another.
///
/// Values are discarded; the return value is the number of tasks computed.
pub fn run_sequential(tasks: &[Task]) -> usize {
    let mut computed = 0;
    for task in tasks {
        std::hint::black_box(fibonacci(task.n));
        computed += 1;
    }
    computed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parallel::fan_out;

    #[test]
    fn test_small_indices() {
        assert_eq!(fibonacci(0), BigUint::from(0u32));
        assert_eq!(fibonacci(1), BigUint::from(1u32));
        assert_eq!(fibonacci(2), BigUint::from(1u32));
        assert_eq!(fibonacci(10), BigUint::from(55u32));
        assert_eq!(fibonacci(20), BigUint::from(6765u32));
    }

    #[test]
    fn test_past_u64_range() {
        let expected: BigUint = "354224848179261915075".parse().unwrap();
        assert_eq!(fibonacci(100), expected);
    }

    #[test]
    fn test_negative_index_returns_zero() {
        assert_eq!(fibonacci(-1), BigUint::from(0u32));
        assert_eq!(fibonacci(i64::MIN), BigUint::from(0u32));
    }

    #[test]
    fn test_repeated_calls_agree() {
        let first = fibonacci(500);
        for _ in 0..5 {
            assert_eq!(fibonacci(500), first);
        }
    }

    #[test]
    fn test_run_sequential_counts_every_task() {
        let tasks = fan_out(25, 6);
        assert_eq!(run_sequential(&tasks), 6);
        assert_eq!(run_sequential(&[]), 0);
    }
}
