use std::path::Path;

use strata_db::MigrationStatus;

/// Print the startup banner with the schema summary.
pub fn print_banner(db_path: &Path, status: &MigrationStatus) {
    let version = env!("CARGO_PKG_VERSION");

    let latest = status
        .applied
        .iter()
        .map(|e| e.version.as_str())
        .max()
        .unwrap_or("none");

    let pending = if status.pending.is_empty() {
        "none".to_string()
    } else {
        format!("{}", status.pending.len())
    };

    let db_display = match std::env::var("HOME") {
        Ok(home) if !home.is_empty() => db_path.to_string_lossy().replace(&home, "~"),
        _ => db_path.to_string_lossy().to_string(),
    };

    // Layout
    let width = 70;
    let left_w = 24;
    let right_w = width - left_w - 3; // 3 for "│ " + "│"

    let title = format!("Strata v{version}");
    let title_dashes = width - 2 - title.len() - 5; // 2 for ╭╮, 5 for "─── " + " "
    let top = format!("╭─── {title} {}╮", "─".repeat(title_dashes));
    let bottom = format!("╰{}╯", "─".repeat(width - 2));

    let row = |l: &str, r: &str| format!("│ {:<left_w$}│  {:<right_w$}│", l, r);

    println!("{top}");
    println!("{}", row("", ""));
    println!("{}", row("  Schema ready", "Database"));
    println!("{}", row("", &truncate(&db_display, right_w - 2)));
    println!("{}", row("", &"─".repeat(right_w - 2)));
    println!(
        "{}",
        row("", &format!("Applied     {}", status.applied.len()))
    );
    println!("{}", row("", &format!("Latest      {latest}")));
    println!("{}", row("", &format!("Pending     {pending}")));
    println!("{}", row("", ""));
    println!("{bottom}");
}

fn truncate(s: &str, max: usize) -> String {
    let len = s.chars().count();
    if len <= max {
        return s.to_string();
    }
    let tail: String = s.chars().skip(len - (max - 1)).collect();
    format!("…{tail}")
}
