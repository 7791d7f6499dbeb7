//! Pegasus-KV server node executable.

use std::sync::Arc;

use clap::Parser;

use pegasus_kv::{
    logger_init, pf_error, pf_info, pf_warn, KvCodec, KvServer, PegasusError,
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

    /// Rack ID of myself.
    #[arg(short, long)]
    rack: u8,

    /// Node ID of myself within the rack.
    #[arg(short, long)]
    node: u8,

    /// KV wire codec to use: 'pegasus', 'static', or 'netcache'.
    #[arg(long, default_value_t = String::from("pegasus"))]
    codec: String,

    /// Number of transport worker threads.
    #[arg(long, default_value_t = 2)]
    threads: usize,

    /// Optional server config TOML string,
    /// e.g. 'report_load = false\nproc_latency_us = 50'.
    #[arg(short, long)]
    config: Option<String>,
}

impl CliArgs {
    /// Sanitize command line arguments, return `Ok(codec)` on success or
    /// `Err(PegasusError)` on any error.
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

// Server node executable main entrance.
fn server_main() -> Result<(), PegasusError> {
    let args = CliArgs::parse();
    let codec = args.sanitize()?;
    ME.get_or_init(|| format!("s{}-{}", args.rack, args.node));

    let runtime = Builder::new_multi_thread()
        .enable_all()
        .worker_threads(args.threads + 1) // +1 for the hot-key reporter
        .thread_name(format!("tokio-worker-s{}-{}", args.rack, args.node))
        .build()?;

    runtime.block_on(async move {
        let topology =
            Arc::new(RackTopology::from_file(&args.config_file).await?);
        let bind_addr =
            topology.node_addr(args.rack, args.node)?.socket_addr();

        let transport = Arc::new(
            UdpTransport::new_and_setup(
                topology.clone(),
                bind_addr,
                args.rack,
                args.threads,
            )
            .await?,
        );
        let server = Arc::new(KvServer::new_and_setup(
            args.rack,
            args.node,
            topology,
            codec,
            transport.clone() as Arc<dyn Transport>,
            args.threads,
            args.config.as_deref(),
        )?);

        transport.run_app_threads(server.clone());
        server.spawn_hotkey_reporter();
        pf_info!("server ({}, {}) up on {}", args.rack, args.node, bind_addr);

        tokio::signal::ctrl_c().await?;
        pf_warn!("server caught termination signal");
        Ok::<(), PegasusError>(())
    })
}

fn main() {
    logger_init();
    if let Err(e) = server_main() {
        pf_error!("server_main exited: {}", e);
        std::process::exit(1);
    }
}

#[cfg(test)]
mod server_args_tests {
    use super::*;

    #[test]
    fn sanitize_valid() {
        let args = CliArgs {
            config_file: "pegasus.conf".into(),
            rack: 0,
            node: 1,
            codec: "static".into(),
            threads: 2,
            config: None,
        };
        assert!(args.sanitize().is_ok());
    }

    #[test]
    fn sanitize_invalid_codec() {
        let args = CliArgs {
            config_file: "pegasus.conf".into(),
            rack: 0,
            node: 0,
            codec: "json".into(),
            threads: 2,
            config: None,
        };
        assert!(args.sanitize().is_err());
    }

    #[test]
    fn sanitize_invalid_threads() {
        let args = CliArgs {
            config_file: "pegasus.conf".into(),
            rack: 0,
            node: 0,
            codec: "pegasus".into(),
            threads: 0,
            config: None,
        };
        assert!(args.sanitize().is_err());
    }
}
