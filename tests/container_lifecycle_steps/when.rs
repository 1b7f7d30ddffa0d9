//! When steps for container lifecycle BDD scenarios.

use super::world::{LifecycleWorld, run_async};
use eyre::WrapErr;
use rstest_bdd_macros::when;
use warren::fleet::services::DeletionOutcome;

#[when(r#"the node reports the container for "{username}" as "{status}""#)]
fn node_reports(
    world: &mut LifecycleWorld,
    username: String,
    status: String,
) -> Result<(), eyre::Report> {
    world.last_report = Some(world.report(&username, &status)?);
    Ok(())
}

#[when(r#"the container for "{username}" is deleted"#)]
fn container_deleted(world: &mut LifecycleWorld, username: String) -> Result<(), eyre::Report> {
    let container_id = world.container(&username)?;
    let outcome = run_async(world.lifecycle.delete_container(container_id))
        .wrap_err("delete container")?;
    if !matches!(outcome, DeletionOutcome::Pending(_)) {
        return Err(eyre::eyre!("expected deletion to wait for the node"));
    }
    Ok(())
}

#[when(r#"the container for "{username}" is started"#)]
fn container_started(world: &mut LifecycleWorld, username: String) -> Result<(), eyre::Report> {
    let container_id = world.container(&username)?;
    world.last_command = Some(run_async(world.lifecycle.start_container(container_id)));
    Ok(())
}
