//! Change set and report rendering

use colored::Colorize;

use declarative::{ApplyReport, ChangeSet, NodeStatus, Operation, group_by_kind};

use crate::ui;

/// Display a change set grouped by resource kind
pub fn display_changeset(changeset: &ChangeSet) {
    if !changeset.has_changes() {
        println!();
        println!(
            "  {} No changes. {} up to date.",
            "✓".green(),
            ui::count(changeset.len(), "resource")
        );
        return;
    }

    println!();
    println!(
        "┌─ {} ─────────────────────────────────────────┐",
        "Execution Plan".bold()
    );
    println!("│");

    for (kind, entries) in group_by_kind(&changeset.entries) {
        println!("│ {}", kind.bold());
        for entry in entries {
            let waits = if entry.waits_on.is_empty() {
                String::new()
            } else {
                format!(" (after {})", entry.waits_on.join(", "))
                    .dimmed()
                    .to_string()
            };
            println!(
                "│   {} {} {}{}",
                ui::operation_symbol(entry.operation),
                entry.id,
                entry.operation.as_str().dimmed(),
                waits
            );
            for change in &entry.changes {
                let before = change.before.as_deref().unwrap_or("(none)");
                let after = change.after.as_deref().unwrap_or("(removed)");
                let forces = if change.forces_replace {
                    " # forces replacement".red().to_string()
                } else {
                    String::new()
                };
                match (&change.before, entry.operation) {
                    (None, _) | (_, Operation::Create) => {
                        println!("│       {} = {}{}", change.attribute, after, forces);
                    }
                    _ => println!(
                        "│       {}: {} → {}{}",
                        change.attribute,
                        before.dimmed(),
                        after,
                        forces
                    ),
                }
            }
        }
        println!("│");
    }

    println!("└────────────────────────────────────────────────────────────┘");

    let summary = changeset.summary();
    println!();
    println!(
        "  Plan: {} to create, {} to update, {} to replace, {} to delete, {} unchanged.",
        summary.creates.to_string().green(),
        summary.updates.to_string().yellow(),
        summary.replaces.to_string().magenta(),
        summary.deletes.to_string().red(),
        summary.unchanged
    );
}

/// Display failures and the final summary of an apply
pub fn display_report(report: &ApplyReport) {
    let problems: Vec<_> = report
        .nodes
        .iter()
        .filter(|n| matches!(n.status, NodeStatus::Failed | NodeStatus::Skipped))
        .collect();

    if report.confirmed && !problems.is_empty() {
        ui::section("Problems");
        for node in problems {
            let detail = match (&node.error, &node.reason) {
                (Some(error), _) => format!("[{}] {}", error.kind(), error),
                (None, Some(reason)) => reason.clone(),
                (None, None) => String::new(),
            };
            println!(
                "  {} {} {} {}",
                ui::status_symbol(node.status),
                node.id,
                node.operation.as_str().dimmed(),
                detail.dimmed()
            );
        }
    }

    let summary = &report.summary;
    println!();
    if !report.confirmed {
        println!("  {} Aborted", "✗".red());
        return;
    }
    if report.cancelled {
        println!("  {} Interrupted, state saved for completed resources", "⚠".yellow().bold());
    } else if summary.is_success() {
        println!("  {} Apply complete!", "✓".green().bold());
    } else {
        println!("  {} Apply finished with errors", "⚠".yellow().bold());
    }

    if summary.created > 0 {
        println!("    • {} created", ui::count(summary.created, "resource"));
    }
    if summary.updated > 0 {
        println!("    • {} updated", ui::count(summary.updated, "resource"));
    }
    if summary.replaced > 0 {
        println!("    • {} replaced", ui::count(summary.replaced, "resource"));
    }
    if summary.deleted > 0 {
        println!("    • {} deleted", ui::count(summary.deleted, "resource"));
    }
    if summary.skipped > 0 {
        println!("    • {} skipped", ui::count(summary.skipped, "resource"));
    }
    if summary.failed > 0 {
        println!(
            "    • {} {}",
            summary.failed,
            if summary.failed == 1 { "resource failed" } else { "resources failed" }.red()
        );
    }
}

/// Display resolved stack outputs
pub fn display_outputs(outputs: &[(String, String)]) {
    if outputs.is_empty() {
        return;
    }
    ui::section("Outputs");
    for (name, value) in outputs {
        ui::kv(name, value);
    }
}
