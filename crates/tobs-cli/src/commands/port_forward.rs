//! Port-forward command - expose the release's services on loopback ports
//!
//! Usage: tobs port-forward [-t 5432] [-g 8080] [-p 9090] [-c 9201] [-l 8081]
//!
//! Each component is reached through a tunnel to its first running pod. All
//! tunnels stay open until Ctrl-C.

use std::collections::BTreeMap;

use clap::Args;
use tracing::{info, warn};

use tobs_broker::{TunnelHandle, TunnelTarget};
use tobs_common::labels;

use super::{wait_for_interrupt, CommandContext};
use crate::config::PortForwardConfig;
use crate::Result;

const TIMESCALEDB_PORT: u16 = 5432;
const GRAFANA_PORT: u16 = 3000;
const PROMETHEUS_PORT: u16 = 9090;
const PROMSCALE_PORT: u16 = 9201;
const PROMLENS_PORT: u16 = 8080;

const DEFAULT_GRAFANA_LOCAL_PORT: u16 = 8080;
const DEFAULT_PROMLENS_LOCAL_PORT: u16 = 8081;

/// Port-forward TimescaleDB, Grafana, Prometheus, Promscale and PromLens
#[derive(Args, Debug, Default)]
pub struct PortForwardArgs {
    /// Local port for TimescaleDB (0 picks a free port)
    #[arg(short = 't', long = "timescaledb")]
    pub timescaledb: Option<u16>,

    /// Local port for Grafana (0 picks a free port)
    #[arg(short = 'g', long = "grafana")]
    pub grafana: Option<u16>,

    /// Local port for Prometheus (0 picks a free port)
    #[arg(short = 'p', long = "prometheus")]
    pub prometheus: Option<u16>,

    /// Local port for the Promscale connector (0 picks a free port)
    #[arg(short = 'c', long = "promscale", visible_alias = "connector")]
    pub promscale: Option<u16>,

    /// Local port for PromLens (0 picks a free port)
    #[arg(short = 'l', long = "promlens")]
    pub promlens: Option<u16>,
}

/// One component to forward
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Forward {
    pub component: &'static str,
    pub labels: BTreeMap<String, String>,
    pub remote_port: u16,
    pub local_port: u16,
}

/// Forwards for `release`; flags win over the config file, which wins over
/// the built-in local ports.
pub fn plan(release: &str, args: &PortForwardArgs, config: &PortForwardConfig) -> Vec<Forward> {
    let pick = |flag: Option<u16>, file: Option<u16>, default: u16| flag.or(file).unwrap_or(default);

    vec![
        Forward {
            component: "timescaledb",
            labels: labels::timescaledb_master_labels(release),
            remote_port: TIMESCALEDB_PORT,
            local_port: pick(args.timescaledb, config.timescaledb, TIMESCALEDB_PORT),
        },
        Forward {
            component: "grafana",
            labels: labels::grafana_labels(release),
            remote_port: GRAFANA_PORT,
            local_port: pick(args.grafana, config.grafana, DEFAULT_GRAFANA_LOCAL_PORT),
        },
        Forward {
            component: "prometheus",
            labels: labels::prometheus_labels(release),
            remote_port: PROMETHEUS_PORT,
            local_port: pick(args.prometheus, config.prometheus, PROMETHEUS_PORT),
        },
        Forward {
            component: "promscale",
            labels: labels::promscale_labels(release),
            remote_port: PROMSCALE_PORT,
            local_port: pick(args.promscale, config.promscale, PROMSCALE_PORT),
        },
        Forward {
            component: "promlens",
            labels: labels::promlens_labels(release),
            remote_port: PROMLENS_PORT,
            local_port: pick(args.promlens, config.promlens, DEFAULT_PROMLENS_LOCAL_PORT),
        },
    ]
}

pub async fn run(
    ctx: &CommandContext,
    config: &PortForwardConfig,
    args: PortForwardArgs,
) -> Result<()> {
    let broker = ctx.broker().await?;
    let tunnels = broker.tunnels();

    let mut handles: Vec<TunnelHandle> = Vec::new();
    for forward in plan(&ctx.release, &args, config) {
        let target = TunnelTarget::Selector(forward.labels.clone());
        let opened = tunnels
            .open(&ctx.namespace, &target, forward.remote_port, forward.local_port)
            .await;

        match opened {
            Ok(handle) => {
                info!(
                    component = forward.component,
                    pod = %handle.instance(),
                    "[PortForward] {} available at {}",
                    forward.component,
                    handle.local_addr()
                );
                handles.push(handle);
            }
            Err(e) => {
                warn!(
                    component = forward.component,
                    "[PortForward] setup failed, closing open tunnels"
                );
                close_all(&mut handles).await;
                return Err(e.into());
            }
        }
    }

    info!("[PortForward] Press Ctrl-C to stop");
    let waited = wait_for_interrupt().await;
    close_all(&mut handles).await;
    waited
}

async fn close_all(handles: &mut [TunnelHandle]) {
    for handle in handles.iter_mut() {
        handle.close().await;
    }
}
