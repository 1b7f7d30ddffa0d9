//! Given steps for bastion routing BDD scenarios.

use super::world::{BastionWorld, STORED_KEY, run_async};
use eyre::WrapErr;
use rstest_bdd_macros::given;
use warren::bastion::{
    adapters::memory::DialBehaviour,
    domain::{AuthorizedKey, DirectoryUser, PasswordHash},
};
use warren::fleet::{
    domain::{Container, Node, NodeAddress, NodeName, Resources, UserId},
    ports::FleetRepository,
};

const TEST_BCRYPT_COST: u32 = 4;

#[given(r#"a directory user "{username}" with a public key"#)]
fn user_with_key(world: &mut BastionWorld, username: String) -> Result<(), eyre::Report> {
    let key = AuthorizedKey::parse(STORED_KEY).wrap_err("parse stored key")?;
    let id = UserId::new();
    world
        .directory
        .upsert(DirectoryUser::new(id, username.clone()).with_public_key(key))
        .wrap_err("store directory user")?;
    world.users.insert(username, id);
    Ok(())
}

#[given(r#"a directory user "{username}" with password "{password}""#)]
fn user_with_password(
    world: &mut BastionWorld,
    username: String,
    password: String,
) -> Result<(), eyre::Report> {
    let hash = bcrypt::hash(password, TEST_BCRYPT_COST).wrap_err("hash password")?;
    let id = UserId::new();
    world
        .directory
        .upsert(DirectoryUser::new(id, username.clone()).with_password_hash(PasswordHash::new(hash)))
        .wrap_err("store directory user")?;
    world.users.insert(username, id);
    Ok(())
}

#[given(r#""{username}" has a container on a node at "{address}""#)]
fn user_has_container(
    world: &mut BastionWorld,
    username: String,
    address: String,
) -> Result<(), eyre::Report> {
    let owner = world
        .users
        .get(&username)
        .copied()
        .ok_or_else(|| eyre::eyre!("unknown directory user '{username}'"))?;
    let (node, _) = Node::provision(
        NodeName::new("node-a").wrap_err("node name")?,
        NodeAddress::parse(&address).wrap_err("node address")?,
        Resources::new(8192, 8, 100),
        &world.clock,
    );
    let container = Container::place(owner, &username, node.id(), Resources::DEFAULT, &world.clock);
    let fleet = &world.fleet;
    run_async(async {
        fleet.insert_node(&node).await?;
        fleet.insert_container(&container).await
    })
    .wrap_err("store node and container")?;
    world.hosting_node = Some(node.id());
    Ok(())
}

#[given("the hosting node has been deleted")]
fn hosting_node_deleted(world: &mut BastionWorld) -> Result<(), eyre::Report> {
    let node_id = world
        .hosting_node
        .ok_or_else(|| eyre::eyre!("no hosting node in scenario world"))?;
    run_async(world.fleet.delete_node(node_id)).wrap_err("delete node")?;
    Ok(())
}

#[given("the backend never answers")]
fn backend_hangs(world: &mut BastionWorld) {
    world.connector.set_behaviour(DialBehaviour::Hang);
}
