use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser};
use slipcheck_api::{
    auth::{AuthConfig, AuthService},
    config, db,
    services::users::{NewAdmin, UserService},
};

/// Creates an administrator account in the configured database.
#[derive(Parser)]
#[command(name = "create-admin", version, about)]
struct Cli {
    #[arg(long, env = "ADMIN_EMAIL")]
    email: String,
    #[arg(long, env = "ADMIN_PASSWORD", hide_env_values = true)]
    password: String,
    #[arg(long, default_value = "Admin")]
    first_name: String,
    #[arg(long, default_value = "User")]
    last_name: String,
    #[arg(
        long,
        action = ArgAction::SetTrue,
        help = "Promote (and reset the password of) an existing account with this email"
    )]
    promote: bool,
    #[arg(
        long,
        action = ArgAction::SetTrue,
        help = "Run pending migrations before creating the account"
    )]
    migrate: bool,
    #[arg(
        long,
        action = ArgAction::SetTrue,
        help = "Render the created account as pretty JSON"
    )]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = config::load_config().context("failed to load application config")?;
    config::init_tracing(config.log_level(), config.log_json);

    let db_pool = db::establish_connection_from_app_config(&config)
        .await
        .context("failed to connect to database")?;
    if cli.migrate || config.auto_migrate {
        db::run_migrations(&db_pool)
            .await
            .context("failed to run migrations")?;
    }
    let db = Arc::new(db_pool);

    let auth_service = Arc::new(AuthService::new(AuthConfig::from(&config), db.clone()));
    let users = UserService::new(db, auth_service);

    let admin = users
        .create_admin(NewAdmin {
            email: cli.email,
            password: cli.password,
            first_name: cli.first_name,
            last_name: cli.last_name,
            promote_existing: cli.promote,
        })
        .await
        .context("failed to create admin account")?;

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&admin)?);
    } else {
        println!(
            "Admin account ready: {} ({} {}) id={}",
            admin.email, admin.first_name, admin.last_name, admin.id
        );
    }

    Ok(())
}
