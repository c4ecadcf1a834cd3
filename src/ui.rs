use colored::{ColoredString, Colorize};

use declarative::{NodeStatus, Operation};

/// Print an info message
pub fn info(msg: &str) {
    println!("{} {}", "ℹ".blue(), msg);
}

/// Print a success message
pub fn success(msg: &str) {
    println!("{} {}", "✓".green(), msg);
}

/// Print a warning to stderr
pub fn warn(msg: &str) {
    eprintln!("{} {}", "⚠".yellow(), msg);
}

/// Print an error message
pub fn error(msg: &str) {
    eprintln!("{} {}", "✗".red(), msg);
}

/// Print a dim/muted message
pub fn dim(msg: &str) {
    println!("  {}", msg.dimmed());
}

/// Print a header/title
pub fn header(title: &str) {
    println!();
    println!("{}", title.bold());
    println!("{}", "─".repeat(title.chars().count()).dimmed());
}

/// Print a section header
pub fn section(title: &str) {
    println!();
    println!("{}", title.cyan().bold());
}

/// Print a key-value pair
pub fn kv(key: &str, value: &str) {
    println!("  {}: {}", key.dimmed(), value);
}

/// Plan symbol for an operation
pub fn operation_symbol(operation: Operation) -> ColoredString {
    match operation {
        Operation::Create => "+".green(),
        Operation::Update => "~".yellow(),
        Operation::Replace => "-/+".magenta(),
        Operation::Delete => "-".red(),
        Operation::NoOp => "○".dimmed(),
    }
}

/// Result symbol for a terminal status
pub fn status_symbol(status: NodeStatus) -> ColoredString {
    match status {
        NodeStatus::Applied => "✓".green(),
        NodeStatus::Failed => "✗".red(),
        NodeStatus::Skipped => "⊘".yellow(),
        NodeStatus::Pending | NodeStatus::Planned | NodeStatus::Applying => "…".dimmed(),
    }
}

/// "1 resource", "3 resources"
pub fn count(n: usize, noun: &str) -> String {
    if n == 1 {
        format!("{n} {noun}")
    } else {
        format!("{n} {noun}s")
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_count() {
        assert_eq!(count(0, "resource"), "0 resources");
        assert_eq!(count(1, "resource"), "1 resource");
        assert_eq!(count(12, "change"), "12 changes");
    }

    #[test]
    fn test_symbols_are_distinct() {
        let ops = [
            Operation::Create,
            Operation::Update,
            Operation::Replace,
            Operation::Delete,
            Operation::NoOp,
        ];
        let symbols: std::collections::HashSet<String> =
            ops.iter().map(|op| operation_symbol(*op).to_string()).collect();
        assert_eq!(symbols.len(), ops.len());
    }
}
