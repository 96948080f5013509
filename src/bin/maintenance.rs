use std::env;

use anyhow::{Context, Result};
use chrono::Utc;
use tracing_subscriber::EnvFilter;

use leadline::{auth::lockout, auth::session, config::AppConfig, db, intake};

const USAGE: &str = "Usage: maintenance purge-expired | unlock-user <email>";

fn main() -> Result<()> {
    dotenv::dotenv().ok();
    init_tracing();

    let mut args = env::args().skip(1);
    match args.next().as_deref() {
        Some("purge-expired") => purge_expired()?,
        Some("unlock-user") => {
            let email = args.next().context(USAGE)?;
            unlock_user(&email)?;
        }
        Some(cmd) => {
            eprintln!("Unknown command: {cmd}\n{USAGE}");
            std::process::exit(1);
        }
        None => {
            eprintln!("{USAGE}");
            std::process::exit(1);
        }
    }

    Ok(())
}

fn connect() -> Result<db::PgPool> {
    let config = AppConfig::from_env()?;
    tracing::info!(
        component = "maintenance",
        database_url = %config.redacted_database_url(),
        "loaded configuration"
    );
    let url = config
        .database_url
        .as_deref()
        .context("DATABASE_URL must be set for maintenance commands")?;
    Ok(db::init_pool_with_size(url, 1))
}

fn purge_expired() -> Result<()> {
    let pool = connect()?;
    let mut conn = pool.get().context("failed to get database connection")?;
    let now = Utc::now();

    let sessions = session::purge_expired_sessions(&mut conn, now.naive_utc())
        .context("failed to purge expired sessions")?;
    let tokens =
        intake::purge_expired(&mut conn, now).context("failed to purge expired intake tokens")?;

    println!("Removed {sessions} expired sessions and {tokens} expired intake tokens.");
    Ok(())
}

fn unlock_user(email: &str) -> Result<()> {
    let pool = connect()?;
    let mut conn = pool.get().context("failed to get database connection")?;

    let updated = lockout::unlock_user(&mut conn, email, Utc::now())
        .context("failed to clear lockout")?;
    if updated == 0 {
        eprintln!("No user with that email.");
        std::process::exit(1);
    }
    println!("Lockout cleared.");
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}
