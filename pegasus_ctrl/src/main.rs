//! Pegasus-KV controller executable.

use std::sync::Arc;

use clap::Parser;

use pegasus_kv::{
    logger_init, pf_error, pf_info, pf_warn, Controller, PegasusError,
    RackTopology, Transport, UdpTransport, ME,
};

use tokio::runtime::Builder;

/// Command line arguments definition.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct CliArgs {
    /// Path to the cluster topology config file.
    #[arg(short = 'f', long)]
    config_file: String,

    /// Rack whose controller entry I bind to.
    #[arg(short, long, default_value_t = 0)]
    rack: u8,

    /// Skip the initial cluster reset handshake.
    #[arg(long, default_value_t = false)]
    no_reset: bool,

    /// Number of transport worker threads.
    #[arg(long, default_value_t = 2)]
    threads: usize,

    /// Optional controller config TOML string, e.g. 'num_rkeys = 16'.
    #[arg(short, long)]
    config: Option<String>,
}

impl CliArgs {
    /// Sanitize command line arguments.
    fn sanitize(&self) -> Result<(), PegasusError> {
        if self.threads == 0 {
            Err(PegasusError(format!(
                "invalid number of threads {}",
                self.threads
            )))
        } else {
            Ok(())
        }
    }
}

// Controller executable main entrance.
fn ctrl_main() -> Result<(), PegasusError> {
    let args = CliArgs::parse();
    args.sanitize()?;
    ME.get_or_init(|| "ctrl".into());

    let runtime = Builder::new_multi_thread()
        .enable_all()
        .worker_threads(args.threads + 1)
        .thread_name("tokio-worker-ctrl")
        .build()?;

    runtime.block_on(async move {
        let topology =
            Arc::new(RackTopology::from_file(&args.config_file).await?);
        let bind_addr = topology.controller_addr(args.rack)?.socket_addr();

        let transport = Arc::new(
            UdpTransport::new_and_setup(
                topology.clone(),
                bind_addr,
                args.rack,
                args.threads,
            )
            .await?,
        );
        let ctrl = Arc::new(Controller::new_and_setup(
            topology,
            transport.clone() as Arc<dyn Transport>,
            args.config.as_deref(),
        )?);

        transport.run_app_threads(ctrl.clone());
        if !args.no_reset {
            ctrl.reset_cluster().await?;
        }
        ctrl.spawn_aggregator();
        pf_info!("controller up on {}", bind_addr);

        tokio::signal::ctrl_c().await?;
        pf_warn!("controller caught termination signal");
        Ok::<(), PegasusError>(())
    })
}

fn main() {
    logger_init();
    if let Err(e) = ctrl_main() {
        pf_error!("ctrl_main exited: {}", e);
        std::process::exit(1);
    }
}
