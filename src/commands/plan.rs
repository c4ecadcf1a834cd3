//! `plan` - preview the change set

use anyhow::Result;

use declarative::Planner;

use crate::Context;
use crate::cli::PlanArgs;
use crate::commands::Session;
use crate::engine;
use crate::progress;

pub fn run(ctx: &Context, args: &PlanArgs) -> Result<()> {
    let session = Session::open(ctx)?;
    let graph = session.stack.graph()?;

    let spinner = progress::spinner("Planning...", ctx.quiet || args.json);
    let changeset = Planner::new(&session.registry)
        .with_options(session.stack.engine.plan_options(args.allow_replace))
        .plan(&graph, &session.store);
    spinner.finish_and_clear();
    let changeset = changeset?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&changeset)?);
        return Ok(());
    }

    engine::display_changeset(&changeset);
    Ok(())
}
