//! `state` - inspect recorded state

use anyhow::{Result, bail};
use colored::Colorize;

use declarative::{Attributes, KindSchema, StateStore};

use crate::Context;
use crate::cli::StateCommand;
use crate::commands::Session;
use crate::provider::display_output;
use crate::ui;

pub fn run(ctx: &Context, cmd: &StateCommand) -> Result<()> {
    let session = Session::open(ctx)?;
    match cmd {
        StateCommand::List => list(&session),
        StateCommand::Show { id } => show(&session, id),
    }
}

fn list(session: &Session) -> Result<()> {
    let ids = session.store.ids()?;
    if ids.is_empty() {
        println!("No resources recorded in {}", session.store.path().display());
        return Ok(());
    }

    ui::header(&format!("State of {}", session.stack.name));
    let mut undeclared = 0;
    for id in &ids {
        let Some(record) = session.store.read(id)? else {
            continue;
        };
        let declared = session.stack.declarations.iter().any(|d| &d.name == id);
        if !declared {
            undeclared += 1;
        }
        println!(
            "  {:<28} {:<28} {}{}",
            id,
            record.kind.dimmed(),
            record.physical_id().unwrap_or("-"),
            if declared { String::new() } else { " (not declared)".yellow().to_string() }
        );
    }
    println!();
    if undeclared > 0 {
        ui::warn(&format!(
            "{} not declared in the stack file, the next apply deletes them",
            ui::count(undeclared, "resource"),
        ));
    }
    ui::dim(&format!(
        "{}, serial {}, updated {}",
        ui::count(ids.len(), "resource"),
        session.store.serial(),
        session.store.last_updated().format("%Y-%m-%d %H:%M:%S UTC")
    ));
    Ok(())
}

fn show(session: &Session, id: &str) -> Result<()> {
    let Some(record) = session.store.read(id)? else {
        bail!("No resource named {id} in state");
    };
    let schema = session.stack.schema(&record.kind);

    ui::header(id);
    ui::kv("kind", &record.kind);
    ui::kv("physical id", record.physical_id().unwrap_or("-"));
    ui::kv("version", &record.version.to_string());
    if !record.dependencies.is_empty() {
        ui::kv("depends on", &record.dependencies.join(", "));
    }

    print_attributes("Inputs", &record.inputs, &schema);
    print_attributes("Outputs", &record.outputs, &schema);
    Ok(())
}

fn print_attributes(title: &str, attributes: &Attributes, schema: &KindSchema) {
    ui::section(title);
    for (key, value) in attributes {
        ui::kv(key, &display_output(Some(value), schema.is_sensitive(key)));
    }
}
