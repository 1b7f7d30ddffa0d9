//! Then steps for node liveness BDD scenarios.

use super::world::{LivenessWorld, run_async};
use rstest_bdd_macros::then;
use warren::fleet::services::{ContainerLifecycleServiceError, FleetRegistryServiceError};

fn node_online(world: &LivenessWorld, name: &str) -> Result<bool, eyre::Report> {
    let (node_id, _) = world.node(name)?;
    let node = run_async(world.registry.find_node(node_id))
        .map_err(|err| eyre::eyre!("find_node failed: {err}"))?
        .ok_or_else(|| eyre::eyre!("node '{name}' disappeared"))?;
    Ok(node.is_online())
}

#[then(r#"the container for "{username}" is placed on "{name}""#)]
fn container_placed_on(
    world: &LivenessWorld,
    username: String,
    name: String,
) -> Result<(), eyre::Report> {
    let (node_id, _) = world.node(&name)?;
    let container = match world.last_request.as_ref() {
        Some(Ok(container)) => container,
        Some(Err(err)) => return Err(eyre::eyre!("request for '{username}' failed: {err}")),
        None => return Err(eyre::eyre!("no container was requested")),
    };
    if container.node_id() != node_id {
        return Err(eyre::eyre!(
            "expected '{username}' on '{name}', found node {}",
            container.node_id()
        ));
    }
    Ok(())
}

#[then("placement fails because no node is available")]
fn placement_unavailable(world: &LivenessWorld) -> Result<(), eyre::Report> {
    let result = world
        .last_request
        .as_ref()
        .ok_or_else(|| eyre::eyre!("no container was requested"))?;
    if !matches!(
        result,
        Err(ContainerLifecycleServiceError::Registry(
            FleetRegistryServiceError::PlacementUnavailable(_)
        ))
    ) {
        return Err(eyre::eyre!("expected PlacementUnavailable, got {result:?}"));
    }
    Ok(())
}

#[then(r#"the node "{name}" is offline"#)]
fn node_is_offline(world: &LivenessWorld, name: String) -> Result<(), eyre::Report> {
    if node_online(world, &name)? {
        return Err(eyre::eyre!("expected node '{name}' to be offline"));
    }
    Ok(())
}

#[then(r#"the node "{name}" is online"#)]
fn node_is_online(world: &LivenessWorld, name: String) -> Result<(), eyre::Report> {
    if !node_online(world, &name)? {
        return Err(eyre::eyre!("expected node '{name}' to be online"));
    }
    Ok(())
}

#[then(r#"the sweep marked only "{name}" offline"#)]
fn sweep_marked_only(world: &LivenessWorld, name: String) -> Result<(), eyre::Report> {
    let (node_id, _) = world.node(&name)?;
    let flipped = world
        .last_sweep
        .as_ref()
        .ok_or_else(|| eyre::eyre!("the sweep has not run"))?;
    if flipped.as_slice() != [node_id] {
        return Err(eyre::eyre!("expected only '{name}' flipped, got {flipped:?}"));
    }
    Ok(())
}

#[then("the sweep marked no node offline")]
fn sweep_marked_none(world: &LivenessWorld) -> Result<(), eyre::Report> {
    let flipped = world
        .last_sweep
        .as_ref()
        .ok_or_else(|| eyre::eyre!("the sweep has not run"))?;
    if !flipped.is_empty() {
        return Err(eyre::eyre!("expected no node flipped, got {flipped:?}"));
    }
    Ok(())
}
