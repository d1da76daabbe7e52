use std::io::IsTerminal;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use argh::FromArgs;
use exitcode::ExitCode;
use gatebench::cache::MemoryCache;
use gatebench::{Config, TextReporter, bench, trace};
use tracing::{error, info, warn};
use tripwire::Tripwire;

fn default_worker_threads() -> usize {
    match std::env::var("GATEBENCH_WORKER_THREADS") {
        Ok(value) => value
            .parse::<usize>()
            .expect("invalid env value for GATEBENCH_WORKER_THREADS"),
        Err(_) => std::thread::available_parallelism()
            .expect("get available working threads")
            .get(),
    }
}

#[derive(FromArgs)]
#[argh(
    description = "Gatebench drives a cache client, whose concurrency is bounded by fair gates, with synthetic traffic",
    help_triggers("-h", "--help")
)]
pub struct RootCommand {
    #[argh(switch, short = 'v', description = "show version")]
    version: bool,

    #[argh(
        option,
        short = 'l',
        default = "\"info\".to_string()",
        description = "log level"
    )]
    log_level: String,

    #[argh(
        option,
        short = 'c',
        long = "config",
        description = "read benchmark configuration from a YAML file"
    )]
    config: Option<PathBuf>,

    #[argh(
        option,
        short = 't',
        default = "default_worker_threads()",
        description = "specify how many threads the Tokio runtime will use"
    )]
    threads: usize,

    #[argh(option, description = "number of concurrent clients")]
    clients: Option<usize>,

    #[argh(option, description = "number of requests every client sends")]
    requests: Option<usize>,

    #[argh(option, description = "number of keys read by every get_multi")]
    keys_per_request: Option<usize>,

    #[argh(option, description = "minimum size of written values, in bytes")]
    min_data_size: Option<usize>,

    #[argh(option, description = "maximum size of written values, in bytes, exclusive")]
    max_data_size: Option<usize>,

    #[argh(switch, description = "print gate and cache metrics after the run")]
    metrics: bool,
}

impl RootCommand {
    #![allow(clippy::print_stdout)]
    fn show_version(&self) {
        println!("Gatebench {}", env!("CARGO_PKG_VERSION"));
    }

    /// Loads the config file if any, then applies flags on top of it.
    fn load_config(&self) -> Result<Config, ExitCode> {
        let mut config = match &self.config {
            Some(path) => Config::load(path).map_err(|err| {
                error!(message = "Load config failed", ?path, %err);
                exitcode::CONFIG
            })?,
            None => Config::default(),
        };

        let overrides = [
            (&mut config.clients, self.clients),
            (&mut config.requests, self.requests),
            (&mut config.keys_per_request, self.keys_per_request),
            (&mut config.min_data_size, self.min_data_size),
            (&mut config.max_data_size, self.max_data_size),
        ];
        for (field, value) in overrides {
            if let Some(value) = value {
                *field = value;
            }
        }

        config.validate().map_err(|err| {
            error!(message = "Invalid config", %err);
            exitcode::CONFIG
        })?;

        Ok(config)
    }

    pub fn run(&self) -> Result<(), ExitCode> {
        if self.version {
            self.show_version();
            return Ok(());
        }

        let log_level = std::env::var("GATEBENCH_LOG").unwrap_or(self.log_level.clone());
        let color = std::io::stderr().is_terminal();
        trace::init(color, &log_level);

        let config = self.load_config()?;
        let limits = config.cache_limits();

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .thread_name("gatebench-worker")
            .worker_threads(self.threads)
            .enable_time()
            .enable_io()
            .build()
            .map_err(|err| {
                error!(message = "Build runtime failed", %err);
                exitcode::OSERR
            })?;

        let registry = metrics::global_registry();
        let report = runtime.block_on(async {
            info!(
                message = "Start gatebench",
                threads = self.threads,
                ?limits,
            );

            let (trigger, shutdown) = Tripwire::new("benchmark");
            let cache = Arc::new(MemoryCache::new(limits, &registry));
            let benchmark = bench::run(&config, cache, shutdown);
            tokio::pin!(benchmark);

            tokio::select! {
                report = &mut benchmark => report,
                result = tokio::signal::ctrl_c() => {
                    match result {
                        Ok(()) => {
                            warn!(message = "Interrupt received, stopping clients");
                            trigger.cancel();
                        }
                        Err(err) => {
                            error!(message = "Listen for interrupt failed", %err);
                        }
                    }

                    benchmark.await
                }
            }
        });

        println!("{report}");
        if self.metrics {
            let mut reporter = TextReporter::default();
            registry.report(&mut reporter);
            println!();
            print!("{}", reporter.into_string());
        }

        runtime.shutdown_timeout(Duration::from_secs(5));

        Ok(())
    }
}
