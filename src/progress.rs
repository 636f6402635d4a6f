use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};

/// Progress over task completions, drawn on stderr.
///
/// indicatif hides the bar by itself when stderr is not a terminal.
pub fn create_progress_bar(total_tasks: usize, enabled: bool) -> Result<ProgressBar> {
    if !enabled {
        return Ok(ProgressBar::hidden());
    }

    let pb = ProgressBar::new(total_tasks as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} tasks ({eta})")
            .context("invalid progress bar template")?
            .progress_chars("#>-"),
    );
    Ok(pb)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_bar_is_hidden() {
        let pb = create_progress_bar(8, false).unwrap();
        assert!(pb.is_hidden());
    }

    #[test]
    fn test_bar_length_matches_tasks() {
        let pb = create_progress_bar(8, true).unwrap();
        assert_eq!(pb.length(), Some(8));
    }
}
