//! Console output.
//!
//! Everything the user reads on the terminal goes through [`OutputFormatter`]:
//! colored status lines, the pass progress bar and the summary tables.
//! Diagnostics go through `tracing` instead.

use crate::file_category::CategoryTable;
use crate::organizer::{EntryReport, OrganizeOutcome, PlannedMove};
use colored::*;
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::BTreeMap;
use std::path::Path;

pub struct OutputFormatter;

impl OutputFormatter {
    /// Prints a success message in green with a checkmark.
    ///
    /// ```no_run
    /// use downsort::output::OutputFormatter;
    /// OutputFormatter::success("Downloads organized");
    /// ```
    pub fn success(message: &str) {
        println!("{} {}", "✓".green(), message);
    }

    /// Prints an error message to stderr in red.
    pub fn error(message: &str) {
        eprintln!("{} {}", "✗".red(), message);
    }

    pub fn warning(message: &str) {
        println!("{} {}", "⚠".yellow(), message);
    }

    pub fn info(message: &str) {
        println!("{}", message.cyan());
    }

    pub fn plain(message: &str) {
        println!("{}", message);
    }

    pub fn header(header: &str) {
        println!("\n{}", header.bold());
    }

    pub fn dry_run_notice(message: &str) {
        println!("{}", format!("[DRY RUN] {}", message).yellow());
    }

    /// Progress bar for a pass over `total` entries.
    pub fn create_progress_bar(total: u64) -> ProgressBar {
        let pb = ProgressBar::new(total);
        let style = ProgressStyle::default_bar()
            .template("{spinner:.cyan} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█▓░");
        pb.set_style(style);
        pb
    }

    /// One line for a single entry of a pass, relative to the watched directory.
    pub fn entry_line(report: &EntryReport<'_>, base: &Path) -> String {
        let short = |path: &Path| {
            path.strip_prefix(base)
                .unwrap_or(path)
                .display()
                .to_string()
        };
        match report {
            EntryReport::Moved {
                source,
                destination,
                category,
            } => format!(
                "{} {} → {}/{}",
                "✓".green(),
                short(source),
                category,
                destination
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_default()
            ),
            EntryReport::Protected { source } => {
                format!("{} {} (running program, left in place)", "•".cyan(), short(source))
            }
            EntryReport::Failed { source, error } => {
                format!("{} {}: {}", "✗".red(), short(source), error)
            }
        }
    }

    /// Prints the moves a dry run found.
    pub fn plan_listing(planned: &[PlannedMove], base: &Path) {
        if planned.is_empty() {
            Self::dry_run_notice("Nothing to organize");
            return;
        }
        Self::dry_run_notice(&format!("Would organize {} entries:", planned.len()));
        for entry in planned {
            let name = entry
                .source
                .strip_prefix(base)
                .unwrap_or(&entry.source)
                .display();
            let kind = if entry.is_dir { " (folder)" } else { "" };
            println!("  - {}{} → {}/", name, kind, entry.category.cyan());
        }
    }

    /// Prints success and failure counts plus the effectiveness percentage.
    pub fn pass_summary(outcome: &OrganizeOutcome) {
        Self::header("RESULT");
        println!("  {:<14} {}", "Organized:", outcome.succeeded.to_string().green());
        let failed = if outcome.failed > 0 {
            outcome.failed.to_string().red()
        } else {
            outcome.failed.to_string().normal()
        };
        println!("  {:<14} {}", "Failed:", failed);
        match outcome.effectiveness() {
            Some(percent) => println!("  {:<14} {:.1}%", "Effectiveness:", percent),
            None => println!("  {:<14} {}", "Effectiveness:", "nothing to do".dimmed()),
        }

        if !outcome.by_category.is_empty() {
            Self::summary_table(&outcome.by_category, outcome.succeeded);
        }
    }

    /// Prints moved entries per category.
    pub fn summary_table(category_counts: &BTreeMap<String, usize>, total: usize) {
        Self::header("SUMMARY");

        let width = category_counts
            .keys()
            .map(|name| name.len())
            .max()
            .unwrap_or(0)
            .max("Category".len());

        println!(
            "{:<width$} | {}",
            "Category".bold(),
            "Entries".bold(),
            width = width
        );
        println!("{}", "-".repeat(width + 12));

        for (category, count) in category_counts {
            println!(
                "{:<width$} | {} {}",
                category,
                count.to_string().green(),
                plural(*count),
                width = width
            );
        }

        println!("{}", "-".repeat(width + 12));
        println!(
            "{:<width$} | {} {}",
            "Total".bold(),
            total.to_string().green().bold(),
            plural(total),
            width = width
        );
    }

    /// Prints each category and the extensions it claims.
    pub fn category_listing(table: &CategoryTable) {
        Self::header("CATEGORIES");
        let width = table
            .category_names()
            .map(str::len)
            .max()
            .unwrap_or(0);
        for rule in table.rules() {
            println!(
                "  {:<width$}  {}",
                rule.name.bold(),
                rule.extensions.join(" "),
                width = width
            );
        }
        println!(
            "  {:<width$}  {}",
            table.fallback().bold(),
            "(everything else, and folders)".dimmed(),
            width = width
        );
    }
}

fn plural(count: usize) -> &'static str {
    if count == 1 { "entry" } else { "entries" }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file_organizer::OrganizeError;
    use std::path::PathBuf;

    #[test]
    fn test_entry_line_is_relative_to_base() {
        colored::control::set_override(false);
        let base = Path::new("/dl");
        let source = PathBuf::from("/dl/movie.mkv");
        let destination = PathBuf::from("/dl/videos/movie_1.mkv");

        let line = OutputFormatter::entry_line(
            &EntryReport::Moved {
                source: &source,
                destination: &destination,
                category: "videos",
            },
            base,
        );
        assert_eq!(line, "✓ movie.mkv → videos/movie_1.mkv");

        let error = OrganizeError::SourceMissing {
            path: source.clone(),
        };
        let line = OutputFormatter::entry_line(
            &EntryReport::Failed {
                source: &source,
                error: &error,
            },
            base,
        );
        assert!(line.starts_with("✗ movie.mkv: "));
        assert!(line.contains("no longer exists"));
    }
}
