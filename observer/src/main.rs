use anyhow::Context;
use bridge::Bridge;
use clap::Parser;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::net::SocketAddr;
use std::path::PathBuf;
use tokio::runtime::Builder as TokioBuilder;
use tokio::signal;
use workflow::config::ObserverConfig;
use workflow::runner::Runner;

mod bridge;
mod generator;
mod workflow;

#[derive(Parser)]
#[command(author, version, about = "Multi-receiver burst observer over synthetic SDRs")]
struct Args {
    /// Load an observer config from YAML
    #[arg(long)]
    config: Option<PathBuf>,
    /// Process this many seconds of signal per device as fast as possible, then report
    #[arg(long)]
    offline: Option<f64>,
    /// Number of synthetic receivers when no config file is given
    #[arg(long, default_value_t = 1)]
    devices: usize,
    #[arg(long, default_value = "data")]
    data_dir: PathBuf,
    /// Keep raw I/Q of strong bursts
    #[arg(long, default_value_t = false)]
    capture: bool,
    /// Serve the HTTP bridge until Ctrl+C
    #[arg(long, default_value_t = false)]
    serve: bool,
    #[arg(long)]
    bind: Option<SocketAddr>,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    let mut config = if let Some(path) = args.config {
        ObserverConfig::load(path)?
    } else {
        ObserverConfig::from_args(args.devices, args.data_dir, args.capture)
    };
    if let Some(bind) = args.bind {
        config.bind = bind;
    }

    if let Some(seconds) = args.offline {
        let runner = Runner::new(config.clone(), false)?;
        let summary = runner.run_offline(seconds)?;
        runner.shutdown();
        println!("Offline run over {:.1} s ->\n{}", seconds, summary);

        let report_path = config.report_path();
        if let Some(parent) = report_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&report_path)
            .with_context(|| format!("opening report {}", report_path.display()))?;
        writeln!(file, "{}", summary)?;
    }

    if args.serve {
        let runner = Runner::new(config.clone(), true)?;
        if config.autostart {
            let started = runner.start_all()?;
            log::info!("autostarted devices {:?}", started);
        }
        let bridge = Bridge::new(runner.supervisor().clone());
        let runtime = TokioBuilder::new_multi_thread()
            .enable_all()
            .build()
            .context("creating runtime for the HTTP bridge")?;
        runtime.block_on(bridge.serve(config.bind, async {
            if let Err(err) = signal::ctrl_c().await {
                log::error!("awaiting Ctrl+C failed: {}", err);
            }
        }))?;
        runner.shutdown();
        println!("{}", runner.summary());
    }

    Ok(())
}
