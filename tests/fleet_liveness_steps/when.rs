//! When steps for node liveness BDD scenarios.

use super::world::{LivenessWorld, run_async};
use eyre::WrapErr;
use mockable::Clock;
use rstest_bdd_macros::when;
use warren::fleet::{domain::HeartbeatReport, services::RequestContainer};

#[when(r#"a container is requested for "{username}""#)]
fn container_requested(world: &mut LivenessWorld, username: String) {
    let owner = world.user(&username);
    let result = run_async(
        world
            .lifecycle
            .request_container(RequestContainer::new(owner, username)),
    );
    world.last_request = Some(result);
}

#[when("{seconds:i64} seconds pass")]
fn seconds_pass(world: &mut LivenessWorld, seconds: i64) {
    world.clock.advance_secs(seconds);
}

#[when("the liveness sweep runs")]
fn sweep_runs(world: &mut LivenessWorld) -> Result<(), eyre::Report> {
    let flipped = run_async(world.registry.liveness_sweep()).wrap_err("liveness sweep")?;
    world.last_sweep = Some(flipped);
    Ok(())
}

#[when(r#"the node "{name}" sends a heartbeat"#)]
fn node_heartbeats(world: &mut LivenessWorld, name: String) -> Result<(), eyre::Report> {
    let (_, token) = world.node(&name)?;
    let report = HeartbeatReport {
        reported_at: world.clock.utc(),
        containers: Vec::new(),
    };
    let outcome =
        run_async(world.registry.heartbeat(&token, report)).wrap_err("send heartbeat")?;
    if outcome.stale {
        return Err(eyre::eyre!("heartbeat from '{name}' was treated as stale"));
    }
    Ok(())
}
