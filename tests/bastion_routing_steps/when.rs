//! When steps for bastion routing BDD scenarios.

use super::world::{BastionWorld, OTHER_KEY, STORED_KEY};
use eyre::WrapErr;
use rstest_bdd_macros::when;
use warren::bastion::domain::{AuthorizedKey, OfferedCredential};

fn offered_key(line: &str) -> Result<OfferedCredential, eyre::Report> {
    let key = AuthorizedKey::parse(line).wrap_err("parse offered key")?;
    Ok(OfferedCredential::PublicKey(key.wire_bytes().to_vec()))
}

#[when(r#""{username}" connects with the stored key"#)]
fn connects_with_stored_key(world: &mut BastionWorld, username: String) -> Result<(), eyre::Report> {
    world.connect(&username, offered_key(STORED_KEY)?);
    Ok(())
}

#[when(r#""{username}" connects with a different key"#)]
fn connects_with_other_key(world: &mut BastionWorld, username: String) -> Result<(), eyre::Report> {
    world.connect(&username, offered_key(OTHER_KEY)?);
    Ok(())
}

#[when(r#""{username}" connects with password "{password}""#)]
fn connects_with_password(world: &mut BastionWorld, username: String, password: String) {
    world.connect(&username, OfferedCredential::Password(password));
}
