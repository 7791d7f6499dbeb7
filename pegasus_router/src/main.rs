//! Pegasus-KV endhost load-balancer executable.

use std::sync::Arc;

use clap::Parser;

use pegasus_kv::{
    logger_init, pf_error, pf_info, pf_warn, EndhostLb, KvCodec,
    PegasusError, RackTopology, Transport, UdpTransport, ME,
};

use tokio::runtime::Builder;

/// Command line arguments definition.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct CliArgs {
    /// Path to the cluster topology config file.
    #[arg(short = 'f', long)]
    config_file: String,

    /// KV wire codec to use: 'pegasus', 'static', or 'netcache'.
    #[arg(long, default_value_t = String::from("pegasus"))]
    codec: String,

    /// Number of transport worker threads.
    #[arg(long, default_value_t = 2)]
    threads: usize,

    /// Optional router config TOML string, e.g. 'load_constant = 1.5'.
    #[arg(short, long)]
    config: Option<String>,
}

impl CliArgs {
    /// Sanitize command line arguments.
    fn sanitize(&self) -> Result<KvCodec, PegasusError> {
        if self.threads == 0 {
            Err(PegasusError(format!(
                "invalid number of threads {}",
                self.threads
            )))
        } else {
            KvCodec::from_name(&self.codec)
        }
    }
}

// Load-balancer executable main entrance.
fn router_main() -> Result<(), PegasusError> {
    let args = CliArgs::parse();
    let codec = args.sanitize()?;
    ME.get_or_init(|| "lb".into());

    let runtime = Builder::new_multi_thread()
        .enable_all()
        .worker_threads(args.threads + 1)
        .thread_name("tokio-worker-lb")
        .build()?;

    runtime.block_on(async move {
        let topology =
            Arc::new(RackTopology::from_file(&args.config_file).await?);
        let bind_addr = topology.lb_addr()?.socket_addr();

        let transport = Arc::new(
            UdpTransport::new_and_setup(
                topology.clone(),
                bind_addr,
                0,
                args.threads,
            )
            .await?,
        );
        let lb = Arc::new(EndhostLb::new_and_setup(
            topology,
            codec,
            transport.clone() as Arc<dyn Transport>,
            args.config.as_deref(),
        )?);

        transport.run_app_threads(lb);
        pf_info!("load balancer up on {}", bind_addr);

        tokio::signal::ctrl_c().await?;
        pf_warn!("load balancer caught termination signal");
        Ok::<(), PegasusError>(())
    })
}

fn main() {
    logger_init();
    if let Err(e) = router_main() {
        pf_error!("router_main exited: {}", e);
        std::process::exit(1);
    }
}

#[cfg(test)]
mod router_args_tests {
    use super::*;

    #[test]
    fn sanitize_valid() {
        let args = CliArgs {
            config_file: "pegasus.conf".into(),
            codec: "netcache".into(),
            threads: 4,
            config: Some("load_constant = 2.0".into()),
        };
        assert!(args.sanitize().is_ok());
    }

    #[test]
    fn sanitize_invalid_threads() {
        let args = CliArgs {
            config_file: "pegasus.conf".into(),
            codec: "pegasus".into(),
            threads: 0,
            config: None,
        };
        assert!(args.sanitize().is_err());
    }
}
