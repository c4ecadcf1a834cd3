//! `validate` - check the stack file without touching state

use anyhow::{Result, bail};

use crate::Context;
use crate::manifest::Stack;
use crate::ui;

pub fn run(ctx: &Context) -> Result<()> {
    let stack = Stack::load(&ctx.file)?;
    stack.engine.validate()?;
    let graph = stack.graph()?;

    if let Some(dangling) = graph.dangling().first() {
        bail!(
            "resource {} references undeclared resource {}",
            dangling.from,
            dangling.target
        );
    }

    if ctx.quiet {
        return Ok(());
    }

    ui::header(&format!("Stack {}", stack.name));
    ui::kv("file", &ctx.file.display().to_string());
    ui::kv("resources", &graph.len().to_string());
    ui::kv("dependencies", &graph.edges().len().to_string());
    ui::kv("outputs", &stack.outputs.len().to_string());

    if ctx.verbose > 0 {
        ui::section("Apply order");
        for (i, node) in graph.topological_order().iter().enumerate() {
            let deps = graph.dependencies_of(&node.id);
            if deps.is_empty() {
                println!("  {:>3}. {} ({})", i + 1, node.id, node.kind);
            } else {
                println!(
                    "  {:>3}. {} ({}) after {}",
                    i + 1,
                    node.id,
                    node.kind,
                    deps.join(", ")
                );
            }
        }
    }

    println!();
    ui::success("Stack is valid");
    Ok(())
}
