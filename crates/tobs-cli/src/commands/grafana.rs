//! Grafana admin credential commands

use clap::{Args, Subcommand};
use tracing::info;

use tobs_broker::secrets::fetch_credential_string;
use tobs_common::{grafana_secret_name, ResourceRef, GRAFANA_ADMIN_PASSWORD_KEY};

use super::{validate_password, CommandContext};
use crate::Result;

#[derive(Subcommand, Debug)]
pub enum GrafanaCommand {
    /// Print the Grafana admin password
    GetPassword,

    /// Change the Grafana admin password
    ChangePassword(ChangePasswordArgs),
}

#[derive(Args, Debug)]
pub struct ChangePasswordArgs {
    /// New admin password
    pub password: String,
}

/// Secret holding the Grafana admin password of the context's release
pub fn admin_secret(ctx: &CommandContext) -> ResourceRef {
    ResourceRef::new(&ctx.namespace, grafana_secret_name(&ctx.release))
}

pub async fn run(ctx: &CommandContext, cmd: GrafanaCommand) -> Result<()> {
    match cmd {
        GrafanaCommand::GetPassword => get_password(ctx).await,
        GrafanaCommand::ChangePassword(args) => change_password(ctx, args).await,
    }
}

async fn get_password(ctx: &CommandContext) -> Result<()> {
    let broker = ctx.broker().await?;
    let password = fetch_credential_string(
        broker.secrets().as_ref(),
        &admin_secret(ctx),
        GRAFANA_ADMIN_PASSWORD_KEY,
    )
    .await?;
    println!("{}", password);
    Ok(())
}

async fn change_password(ctx: &CommandContext, args: ChangePasswordArgs) -> Result<()> {
    validate_password(&args.password)?;

    let broker = ctx.broker().await?;
    broker
        .grafana_rotation(&ctx.release)
        .rotate(
            &admin_secret(ctx),
            GRAFANA_ADMIN_PASSWORD_KEY,
            args.password.as_bytes(),
        )
        .await?;

    info!(release = %ctx.release, "Grafana admin password changed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admin_secret_is_per_release() {
        let ctx = CommandContext {
            release: "obs".to_string(),
            namespace: "monitoring".to_string(),
            kubeconfig: None,
        };
        assert_eq!(admin_secret(&ctx).to_string(), "monitoring/obs-grafana");
    }
}
