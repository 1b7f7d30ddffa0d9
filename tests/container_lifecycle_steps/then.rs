//! Then steps for container lifecycle BDD scenarios.

use super::world::{LifecycleWorld, run_async};
use rstest_bdd_macros::then;
use warren::fleet::{
    domain::{ContainerStatus, ReconcileOutcome},
    services::{ContainerLifecycleServiceError, RequestContainer},
};

#[then(r#"the container for "{username}" is "{status}""#)]
fn container_status_is(
    world: &LifecycleWorld,
    username: String,
    status: String,
) -> Result<(), eyre::Report> {
    let expected = ContainerStatus::try_from(status.as_str())
        .map_err(|err| eyre::eyre!("invalid expected status in scenario: {err}"))?;
    let container = run_async(world.lifecycle.find_container(world.container(&username)?))
        .map_err(|err| eyre::eyre!("find_container failed: {err}"))?
        .ok_or_else(|| eyre::eyre!("container for '{username}' is gone"))?;
    if container.status() != expected {
        return Err(eyre::eyre!(
            "expected {}, found {}",
            expected.as_str(),
            container.status().as_str()
        ));
    }
    Ok(())
}

#[then("the last report was ignored")]
fn last_report_ignored(world: &LifecycleWorld) -> Result<(), eyre::Report> {
    let outcome = world
        .last_report
        .as_ref()
        .ok_or_else(|| eyre::eyre!("no report was sent"))?;
    if !matches!(outcome, ReconcileOutcome::Ignored { .. }) {
        return Err(eyre::eyre!("expected the report to be ignored, got {outcome:?}"));
    }
    Ok(())
}

#[then(r#""{username}" has no container"#)]
fn user_has_no_container(world: &LifecycleWorld, username: String) -> Result<(), eyre::Report> {
    let owner = world
        .users
        .get(&username)
        .copied()
        .ok_or_else(|| eyre::eyre!("unknown user '{username}'"))?;
    let found = run_async(world.lifecycle.find_container_by_owner(owner))
        .map_err(|err| eyre::eyre!("find_container_by_owner failed: {err}"))?;
    if let Some(container) = found {
        return Err(eyre::eyre!(
            "expected no container for '{username}', found one that is {}",
            container.status().as_str()
        ));
    }
    Ok(())
}

#[then(r#"a new container can be requested for "{username}""#)]
fn new_container_requested(world: &mut LifecycleWorld, username: String) -> Result<(), eyre::Report> {
    let owner = world.user(&username);
    let container = run_async(
        world
            .lifecycle
            .request_container(RequestContainer::new(owner, username.clone())),
    )
    .map_err(|err| eyre::eyre!("second request for '{username}' failed: {err}"))?;
    world.containers.insert(username, container.id());
    Ok(())
}

#[then("the last command was refused as unavailable")]
fn last_command_refused(world: &LifecycleWorld) -> Result<(), eyre::Report> {
    let result = world
        .last_command
        .as_ref()
        .ok_or_else(|| eyre::eyre!("no command was issued"))?;
    if !matches!(
        result,
        Err(ContainerLifecycleServiceError::ContainerUnavailable { .. })
    ) {
        return Err(eyre::eyre!("expected ContainerUnavailable, got {result:?}"));
    }
    Ok(())
}
