use std::env;

use anyhow::{bail, Context, Result};
use diesel::prelude::*;
use uuid::Uuid;

use doccontrol::{
    auth::password::hash_password,
    config::AppConfig,
    db,
    models::{NewTenant, NewUser, Tenant, User},
    schema::{tenants, users},
    workflow::Role,
};

const USAGE: &str = "Usage:\n  maintenance create-tenant <name>\n  maintenance create-user <tenant-id> <username> <password> <admin|member>";

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    doccontrol::init_tracing();

    let args: Vec<String> = env::args().skip(1).collect();
    match args.iter().map(String::as_str).collect::<Vec<_>>().as_slice() {
        ["create-tenant", name] => create_tenant(name)?,
        ["create-user", tenant_id, username, password, role] => {
            create_user(tenant_id, username, password, role)?
        }
        [cmd, ..] => {
            eprintln!("Unknown command or arguments: {cmd}\n{USAGE}");
            std::process::exit(1);
        }
        [] => {
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
    let pool = db::init_pool_with_size(&config.database_url, 1)?;
    db::run_migrations(&pool)?;
    Ok(pool)
}

fn create_tenant(name: &str) -> Result<()> {
    let name = name.trim();
    if name.is_empty() {
        bail!("tenant name must not be empty");
    }

    let pool = connect()?;
    let mut conn = pool.get().context("failed to get database connection")?;
    let tenant: Tenant = diesel::insert_into(tenants::table)
        .values(&NewTenant {
            id: Uuid::new_v4(),
            name: name.to_string(),
        })
        .get_result(&mut conn)
        .context("failed to create tenant")?;

    println!("Created tenant {} ({})", tenant.name, tenant.id);
    Ok(())
}

fn create_user(tenant_id: &str, username: &str, password: &str, role: &str) -> Result<()> {
    let tenant_id = Uuid::parse_str(tenant_id).context("tenant id must be a UUID")?;
    let username = username.trim();
    if username.is_empty() {
        bail!("username must not be empty");
    }
    if password.len() < 8 {
        bail!("password must be at least 8 characters");
    }
    let role = match role.trim().to_ascii_lowercase().as_str() {
        "admin" => Role::Admin,
        "member" => Role::Member,
        other => bail!("unknown role '{other}', expected admin or member"),
    };

    let pool = connect()?;
    let mut conn = pool.get().context("failed to get database connection")?;
    let tenant: Tenant = tenants::table
        .find(tenant_id)
        .first(&mut conn)
        .optional()?
        .with_context(|| format!("tenant {tenant_id} does not exist"))?;

    let user: User = diesel::insert_into(users::table)
        .values(&NewUser {
            id: Uuid::new_v4(),
            tenant_id: tenant.id,
            username: username.to_string(),
            password_hash: hash_password(password)?,
            role: role.as_str().to_string(),
        })
        .get_result(&mut conn)
        .context("failed to create user")?;

    println!(
        "Created {} {} ({}) in tenant {}",
        user.role, user.username, user.id, tenant.name
    );
    Ok(())
}
