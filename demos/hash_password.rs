//! Prints an argon2 hash for seeding a `users` row.
//!
//! cargo run --example hash_password -- '<password>'

use std::env;

fn main() -> anyhow::Result<()> {
    let password = env::args()
        .nth(1)
        .ok_or_else(|| anyhow::anyhow!("Usage: cargo run --example hash_password <password>"))?;
    println!("{}", leadline::auth::password::hash_password(&password)?);
    Ok(())
}
