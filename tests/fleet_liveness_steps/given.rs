//! Given steps for node liveness BDD scenarios.

use super::world::{LivenessWorld, run_async};
use eyre::WrapErr;
use rstest_bdd_macros::given;
use warren::fleet::{domain::Resources, services::ProvisionNodeRequest};

#[given(r#"a node "{name}" provisioned at "{address}""#)]
fn node_provisioned(
    world: &mut LivenessWorld,
    name: String,
    address: String,
) -> Result<(), eyre::Report> {
    let (node, token) = run_async(
        world
            .registry
            .provision_node(ProvisionNodeRequest::new(name.clone(), address)),
    )
    .wrap_err("provision node for liveness scenario")?;
    world.nodes.insert(name, (node.id(), token));
    Ok(())
}

#[given(r#"the node "{name}" has registered"#)]
fn node_registered(world: &mut LivenessWorld, name: String) -> Result<(), eyre::Report> {
    let (_, token) = world.node(&name)?;
    run_async(
        world
            .registry
            .register_node(&token, Resources::new(8192, 8, 100)),
    )
    .wrap_err("register node")?;
    Ok(())
}

#[given(r#"the node "{name}" has gone offline"#)]
fn node_gone_offline(world: &mut LivenessWorld, name: String) -> Result<(), eyre::Report> {
    let (node_id, _) = world.node(&name)?;
    world.clock.advance_secs(91);
    let flipped = run_async(world.registry.liveness_sweep()).wrap_err("liveness sweep")?;
    if !flipped.contains(&node_id) {
        return Err(eyre::eyre!("expected node '{name}' to go offline"));
    }
    Ok(())
}
