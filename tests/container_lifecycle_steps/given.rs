//! Given steps for container lifecycle BDD scenarios.

use super::world::{LifecycleWorld, run_async};
use eyre::WrapErr;
use rstest_bdd_macros::given;
use warren::fleet::{
    domain::{ReconcileOutcome, Resources},
    services::{ProvisionNodeRequest, RequestContainer},
};

#[given(r#"an online node "{name}""#)]
fn online_node(world: &mut LifecycleWorld, name: String) -> Result<(), eyre::Report> {
    let (_, token) = run_async(
        world
            .registry
            .provision_node(ProvisionNodeRequest::new(name, "10.1.0.5")),
    )
    .wrap_err("provision node")?;
    run_async(
        world
            .registry
            .register_node(&token, Resources::new(8192, 8, 100)),
    )
    .wrap_err("register node")?;
    world.node_token = Some(token);
    Ok(())
}

#[given(r#"a container requested for "{username}""#)]
fn container_requested(world: &mut LifecycleWorld, username: String) -> Result<(), eyre::Report> {
    let owner = world.user(&username);
    let container = run_async(
        world
            .lifecycle
            .request_container(RequestContainer::new(owner, username.clone())),
    )
    .wrap_err("request container")?;
    world.containers.insert(username, container.id());
    Ok(())
}

#[given(r#"the container for "{username}" is reported "{status}""#)]
fn container_reported(
    world: &mut LifecycleWorld,
    username: String,
    status: String,
) -> Result<(), eyre::Report> {
    let outcome = world.report(&username, &status)?;
    if !matches!(outcome, ReconcileOutcome::Applied { .. }) {
        return Err(eyre::eyre!("setup report was not applied: {outcome:?}"));
    }
    Ok(())
}
