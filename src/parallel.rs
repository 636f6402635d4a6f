use anyhow::{bail, Result};

/// One unit of work: the Fibonacci index to compute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Task {
    pub n: i64,
}

/// Degree of parallelism for a run.
///
/// Defaults to the number of logical processors on the host, read once.
pub fn parallelism(requested: Option<usize>) -> Result<usize> {
    match requested {
        Some(0) => bail!("Worker count must be at least 1"),
        Some(count) => Ok(count),
        None => Ok(num_cpus::get()),
    }
}

/// Builds `count` identical tasks for index `n`.
pub fn fan_out(n: i64, count: usize) -> Vec<Task> {
    vec![Task { n }; count]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parallelism_defaults_to_cpu_count() {
        assert_eq!(parallelism(None).unwrap(), num_cpus::get());
        assert!(parallelism(None).unwrap() >= 1);
    }

    #[test]
    fn test_parallelism_override() {
        assert_eq!(parallelism(Some(3)).unwrap(), 3);
        assert!(parallelism(Some(0)).is_err());
    }

    #[test]
    fn test_fan_out_duplicates_index() {
        let tasks = fan_out(42, 4);
        assert_eq!(tasks.len(), 4);
        assert!(tasks.iter().all(|task| task.n == 42));
        assert!(fan_out(42, 0).is_empty());
    }
}
