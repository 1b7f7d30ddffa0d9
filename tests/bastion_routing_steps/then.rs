//! Then steps for bastion routing BDD scenarios.

use super::world::BastionWorld;
use rstest_bdd_macros::then;
use warren::bastion::{domain::BastionError, ports::BackendTarget, services::SessionPlan};

#[then(r#"the session shows a banner greeting "{username}""#)]
fn banner_greets(world: &BastionWorld, username: String) -> Result<(), eyre::Report> {
    match world.outcome()? {
        Ok(SessionPlan::Banner(text)) if text.contains(&username) => Ok(()),
        Ok(SessionPlan::Banner(text)) => Err(eyre::eyre!("banner does not greet '{username}': {text}")),
        other => Err(eyre::eyre!("expected a banner, got {other:?}")),
    }
}

#[then("the session is relayed")]
fn session_relayed(world: &BastionWorld) -> Result<(), eyre::Report> {
    match world.outcome()? {
        Ok(SessionPlan::Relay(_)) => Ok(()),
        other => Err(eyre::eyre!("expected a relay, got {other:?}")),
    }
}

#[then("authentication fails")]
fn authentication_fails(world: &BastionWorld) -> Result<(), eyre::Report> {
    match world.outcome()? {
        Err(BastionError::AuthenticationError { .. }) => Ok(()),
        other => Err(eyre::eyre!("expected AuthenticationError, got {other:?}")),
    }
}

#[then("the connection fails as node unreachable")]
fn node_unreachable(world: &BastionWorld) -> Result<(), eyre::Report> {
    match world.outcome()? {
        Err(BastionError::NodeUnreachable { .. }) => Ok(()),
        other => Err(eyre::eyre!("expected NodeUnreachable, got {other:?}")),
    }
}

#[then("no backend was dialled")]
fn no_dial(world: &BastionWorld) -> Result<(), eyre::Report> {
    let dials = world.connector.dials();
    if !dials.is_empty() {
        return Err(eyre::eyre!("expected no dials, got {dials:?}"));
    }
    Ok(())
}

#[then(r#""{host}" port {port:u16} was dialled as "{username}""#)]
fn dialled_as(
    world: &BastionWorld,
    host: String,
    port: u16,
    username: String,
) -> Result<(), eyre::Report> {
    let expected = BackendTarget {
        host,
        port,
        username,
    };
    let dials = world.connector.dials();
    if dials != [expected.clone()] {
        return Err(eyre::eyre!("expected one dial to {expected:?}, got {dials:?}"));
    }
    Ok(())
}
