//! `apply` and `destroy` - converge recorded state

use anyhow::Result;
use std::process::ExitCode;

use declarative::{
    ApplyReport, AutoConfirm, ChangeSet, Executor, NoProgress, Planner, ResourceGraph,
};

use crate::Context;
use crate::cli::{ApplyArgs, DestroyArgs};
use crate::commands::Session;
use crate::engine::{self, ExecuteRequest};
use crate::ui;

/// Exit code when any resource failed or was skipped
const EXIT_INCOMPLETE: u8 = 2;

pub fn apply(ctx: &Context, args: &ApplyArgs) -> Result<ExitCode> {
    let session = Session::open(ctx)?;
    let graph = session.stack.graph()?;
    let changeset = Planner::new(&session.registry)
        .with_options(session.stack.engine.plan_options(args.allow_replace))
        .plan(&graph, &session.store)?;

    engine::display_changeset(&changeset);
    if !changeset.has_changes() {
        if changeset.has_stale_dependencies() && !args.dry_run {
            // No provider calls and nothing to confirm, only records change
            Executor::new(&session.registry).execute(
                &graph,
                &changeset,
                &session.store,
                &NoProgress,
                &mut AutoConfirm,
            )?;
            ui::dim("Recorded dependencies updated");
        }
        engine::display_outputs(&session.outputs()?);
        return Ok(ExitCode::SUCCESS);
    }
    if args.dry_run {
        println!();
        ui::info("Dry run - no changes made");
        return Ok(ExitCode::SUCCESS);
    }

    let report = run(ctx, &session, &graph, &changeset, args.yes, args.jobs, "apply")?;
    if report.confirmed && report.is_success() && !report.cancelled {
        engine::display_outputs(&session.outputs()?);
    }
    Ok(exit_code(&report))
}

pub fn destroy(ctx: &Context, args: &DestroyArgs) -> Result<ExitCode> {
    let session = Session::open(ctx)?;
    let changeset = Planner::new(&session.registry).plan_destroy(&session.store)?;

    if changeset.is_empty() {
        println!();
        ui::success("Nothing to destroy");
        return Ok(ExitCode::SUCCESS);
    }

    engine::display_changeset(&changeset);
    if args.dry_run {
        println!();
        ui::info("Dry run - no changes made");
        return Ok(ExitCode::SUCCESS);
    }

    let graph = ResourceGraph::default();
    let report = run(ctx, &session, &graph, &changeset, args.yes, args.jobs, "destroy")?;
    Ok(exit_code(&report))
}

fn run(
    ctx: &Context,
    session: &Session,
    graph: &ResourceGraph,
    changeset: &ChangeSet,
    yes: bool,
    jobs: Option<usize>,
    action: &str,
) -> Result<ApplyReport> {
    let report = engine::execute(ExecuteRequest {
        graph,
        changeset,
        store: &session.store,
        registry: &session.registry,
        options: session.stack.engine.execute_options(jobs),
        yes,
        quiet: ctx.quiet,
        action,
    })?;

    engine::display_report(&report);
    log::info!(
        "{} finished: {} changes, {} failed, {} skipped (state serial {})",
        action,
        report.summary.total_changes(),
        report.summary.failed,
        report.summary.skipped,
        session.store.serial()
    );
    Ok(report)
}

/// A declined confirmation is not a failure
fn exit_code(report: &ApplyReport) -> ExitCode {
    if !report.confirmed || (report.is_success() && !report.cancelled) {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(EXIT_INCOMPLETE)
    }
}
