//! Pegasus-KV interactive CLI client executable.
//!
//! Reads one command per line:
//!
//! ```text
//! get <key>
//! put <key> <value> [ver]
//! del <key> [ver]
//! ```

use std::sync::Arc;

use clap::Parser;

use pegasus_kv::{
    logger_init, pf_error, KvClient, KvCodec, KvReply, PegasusError,
    RackTopology, Ver, ME,
};

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::runtime::Builder;
use tokio::time::{timeout, Duration};

/// Command line arguments definition.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct CliArgs {
    /// Path to the cluster topology config file.
    #[arg(short = 'f', long)]
    config_file: String,

    /// Client ID of myself (indexes the config's client entries).
    #[arg(short = 'i', long, default_value_t = 0)]
    client_id: u32,

    /// KV wire codec to use: 'pegasus', 'static', or 'netcache'.
    #[arg(long, default_value_t = String::from("pegasus"))]
    codec: String,

    /// Reply wait timeout in millisecs before a command is given up.
    #[arg(long, default_value_t = 3000)]
    timeout_ms: u64,

    /// Optional client config TOML string, e.g. 'use_endhost_lb = true'.
    #[arg(short, long)]
    config: Option<String>,
}

impl CliArgs {
    /// Sanitize command line arguments.
    fn sanitize(&self) -> Result<KvCodec, PegasusError> {
        if self.timeout_ms == 0 {
            Err(PegasusError(format!(
                "invalid timeout_ms {}",
                self.timeout_ms
            )))
        } else {
            KvCodec::from_name(&self.codec)
        }
    }
}

fn print_reply(reply: &KvReply) {
    println!(
        "reply op {:?} result {:?} ver {} load {} value {:?}",
        reply.op_type,
        reply.result,
        reply.ver,
        reply.load,
        String::from_utf8_lossy(&reply.value),
    );
}

/// Parses and runs one REPL line. Returns false on a malformed command.
async fn run_command(
    client: &mut KvClient,
    wait: Duration,
    line: &str,
) -> Result<bool, PegasusError> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    let reply = match tokens.as_slice() {
        ["get", key] => timeout(wait, client.get(key.as_bytes())).await??,
        ["put", key, value] => {
            timeout(wait, client.put(key.as_bytes(), value.as_bytes(), 0))
                .await??
        }
        ["put", key, value, ver] => {
            let ver: Ver = ver.parse()?;
            timeout(wait, client.put(key.as_bytes(), value.as_bytes(), ver))
                .await??
        }
        ["del", key] => timeout(wait, client.del(key.as_bytes(), 0)).await??,
        ["del", key, ver] => {
            let ver: Ver = ver.parse()?;
            timeout(wait, client.del(key.as_bytes(), ver)).await??
        }
        [] => return Ok(true),
        _ => return Ok(false),
    };
    print_reply(&reply);
    Ok(true)
}

// Client executable main entrance.
fn client_main() -> Result<(), PegasusError> {
    let args = CliArgs::parse();
    let codec = args.sanitize()?;
    ME.get_or_init(|| format!("c{}", args.client_id));

    let runtime = Builder::new_multi_thread()
        .enable_all()
        .worker_threads(2)
        .thread_name(format!("tokio-worker-c{}", args.client_id))
        .build()?;

    runtime.block_on(async move {
        let topology =
            Arc::new(RackTopology::from_file(&args.config_file).await?);
        let mut client = KvClient::new_and_setup(
            args.client_id,
            topology,
            codec,
            args.config.as_deref(),
        )
        .await?;
        let wait = Duration::from_millis(args.timeout_ms);

        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Some(line) = lines.next_line().await? {
            match run_command(&mut client, wait, &line).await {
                Ok(true) => {}
                Ok(false) => {
                    println!("usage: get <key> | put <key> <value> [ver] | del <key> [ver]");
                }
                Err(e) => println!("error: {}", e),
            }
        }
        Ok::<(), PegasusError>(())
    })
}

fn main() {
    logger_init();
    if let Err(e) = client_main() {
        pf_error!("client_main exited: {}", e);
        std::process::exit(1);
    }
}
