//! TimescaleDB access and role credential commands

use clap::{Args, Subcommand};
use tracing::{debug, info, warn};

use tobs_broker::config::{DEFAULT_DATABASE, DEFAULT_DB_PORT};
use tobs_broker::secrets::fetch_credential_string;
use tobs_broker::{ConnectionDescriptor, ConnectionTarget, ResolveOptions, SecretStore};
use tobs_common::{Error as CoreError, DB_URI_KEY, SUPERUSER_CREDENTIAL_KEY};

use super::{validate_password, wait_for_interrupt, CommandContext};
use crate::Result;

#[derive(Subcommand, Debug)]
pub enum TimescaledbCommand {
    /// Print a connection URI, holding a tunnel open until Ctrl-C if one is needed
    Connect(ConnectArgs),

    /// Print the password of a database role
    GetPassword(UserArgs),

    /// Change the password of a database role
    ChangePassword(ChangePasswordArgs),
}

#[derive(Args, Debug, Clone)]
pub struct UserArgs {
    /// Credential key of the role (the superuser key selects `postgres`)
    #[arg(short = 'U', long = "user", default_value = SUPERUSER_CREDENTIAL_KEY)]
    pub user: String,
}

#[derive(Args, Debug)]
pub struct ConnectArgs {
    #[command(flatten)]
    pub user: UserArgs,

    /// Database to connect to
    #[arg(short = 'd', long = "dbname", default_value = DEFAULT_DATABASE)]
    pub database: String,

    /// Port TimescaleDB listens on inside the pod
    #[arg(long, default_value_t = DEFAULT_DB_PORT)]
    pub remote_port: u16,

    /// Only log resolution progress at debug level
    #[arg(short, long)]
    pub quiet: bool,
}

#[derive(Args, Debug)]
pub struct ChangePasswordArgs {
    /// New password
    pub password: String,

    #[command(flatten)]
    pub user: UserArgs,
}

pub async fn run(ctx: &CommandContext, cmd: TimescaledbCommand) -> Result<()> {
    match cmd {
        TimescaledbCommand::Connect(args) => connect(ctx, args).await,
        TimescaledbCommand::GetPassword(args) => get_password(ctx, args).await,
        TimescaledbCommand::ChangePassword(args) => change_password(ctx, args).await,
    }
}

async fn connect(ctx: &CommandContext, args: ConnectArgs) -> Result<()> {
    let target = ctx
        .target(&args.user.user)
        .with_database(args.database)
        .with_remote_port(args.remote_port);
    let options = if args.quiet {
        ResolveOptions::quiet()
    } else {
        ResolveOptions::default()
    };

    let broker = ctx.broker().await?;
    let resolution = broker.resolver().resolve(&target, &options).await?;
    println!("{}", resolution.uri());

    if resolution.tunnel().is_some() {
        info!("Tunnel open, press Ctrl-C to close it");
        let waited = wait_for_interrupt().await;
        resolution.release().await;
        return waited;
    }
    Ok(())
}

async fn get_password(ctx: &CommandContext, args: UserArgs) -> Result<()> {
    let broker = ctx.broker().await?;
    let target = ctx.target(&args.user);
    let password = fetch_credential_string(
        broker.secrets().as_ref(),
        &target.credentials_secret(),
        target.credential_key(),
    )
    .await?;
    println!("{}", password);
    Ok(())
}

async fn change_password(ctx: &CommandContext, args: ChangePasswordArgs) -> Result<()> {
    validate_password(&args.password)?;

    let broker = ctx.broker().await?;
    let target = ctx.target(&args.user.user);
    broker
        .database_rotation(&ctx.release)
        .rotate(
            &target.credentials_secret(),
            target.credential_key(),
            args.password.as_bytes(),
        )
        .await?;
    info!(role = %target.role(), "Database password changed");

    match refresh_published_uri(broker.secrets().as_ref(), &target, &args.password).await {
        Ok(true) => info!("Published connection URI updated"),
        Ok(false) => {}
        Err(e) => {
            warn!(
                secret = %target.uri_secret(),
                "Password changed but the published connection URI still carries the old one"
            );
            return Err(e.into());
        }
    }
    Ok(())
}

/// Rewrite the published URI with `password` when it authenticates as the
/// target's role.
///
/// Returns `false` when there is no published URI or it belongs to another role.
pub async fn refresh_published_uri(
    secrets: &dyn SecretStore,
    target: &ConnectionTarget,
    password: &str,
) -> tobs_common::Result<bool> {
    let resource = target.uri_secret();
    let Some(mut record) = secrets.get(&resource.namespace, &resource.name).await? else {
        return Ok(false);
    };
    let Some(raw) = record.get(DB_URI_KEY) else {
        return Ok(false);
    };

    let uri = std::str::from_utf8(raw).map_err(|_| {
        CoreError::invalid_credential(&resource, DB_URI_KEY, "value is not valid UTF-8")
    })?;
    if uri.trim().is_empty() {
        return Ok(false);
    }

    let descriptor = ConnectionDescriptor::parse(uri)?;
    if descriptor.user != target.role() {
        debug!(user = %descriptor.user, "Published URI authenticates as another role");
        return Ok(false);
    }

    record.insert(DB_URI_KEY, descriptor.with_password(password).to_uri());
    secrets.put(&resource.namespace, &record).await?;
    Ok(true)
}
