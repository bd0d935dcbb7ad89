//! Table and JSON output formatting for CLI commands.

use serde::Serialize;
use tabled::settings::Style;
use tabled::{Table, Tabled};

/// Output format selection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable table
    #[default]
    Table,
    /// JSON output
    Json,
}

/// Render rows as a table.
pub fn render_table<T: Tabled>(rows: &[T]) -> String {
    Table::new(rows).with(Style::sharp()).to_string()
}

/// Print rows in the selected format. JSON output uses `json`, the full
/// records the rows were built from.
pub fn print_list<T: Tabled, J: Serialize>(rows: &[T], json: &[J], format: OutputFormat) {
    match format {
        OutputFormat::Table => {
            if rows.is_empty() {
                println!("No jobs found.");
            } else {
                println!("{}", render_table(rows));
            }
        }
        OutputFormat::Json => print_json(json, "[]"),
    }
}

/// Print a value as pretty JSON, or `fallback` if it cannot be encoded.
pub fn print_json<T: Serialize + ?Sized>(value: &T, fallback: &str) {
    let json = serde_json::to_string_pretty(value).unwrap_or_else(|_| fallback.to_string());
    println!("{}", json);
}

/// Print a success message
pub fn print_success(msg: &str) {
    println!("✓ {}", msg);
}

/// Print a warning message
pub fn print_warning(msg: &str) {
    println!("⚠ {}", msg);
}

/// Print an error message
pub fn print_error(msg: &str) {
    eprintln!("✗ {}", msg);
}

/// Print a key-value pair
pub fn print_kv(key: &str, value: &str) {
    println!("  {:<24} {}", format!("{}:", key), value);
}
