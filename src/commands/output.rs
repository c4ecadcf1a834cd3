//! `output` - print stack outputs from recorded state

use anyhow::{Result, bail};
use std::collections::BTreeMap;

use crate::Context;
use crate::cli::OutputArgs;
use crate::commands::Session;
use crate::engine;

pub fn run(ctx: &Context, args: &OutputArgs) -> Result<()> {
    let session = Session::open(ctx)?;
    let outputs = session.outputs()?;

    if let Some(name) = &args.name {
        let Some((_, value)) = outputs.iter().find(|(n, _)| n == name) else {
            bail!("No output named {name} in {}", ctx.file.display());
        };
        println!("{value}");
        return Ok(());
    }

    if args.json {
        let map: BTreeMap<_, _> = outputs.into_iter().collect();
        println!("{}", serde_json::to_string_pretty(&map)?);
        return Ok(());
    }

    if outputs.is_empty() {
        println!("No outputs declared in {}", ctx.file.display());
        return Ok(());
    }
    engine::display_outputs(&outputs);
    Ok(())
}
