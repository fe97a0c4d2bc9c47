use units::{
    cli::{Command, Opts},
    config::{RunConfig, TmainConfig},
    errors::UnitsError,
    executor::{self, pool::GRACE_PERIOD},
};

use structopt::StructOpt;
use tokio::runtime;

fn run() -> Result<i32, UnitsError> {
    let opts = Opts::from_args();

    // Children inherit the pinned environment.
    executor::pin_environment();

    let runtime = runtime::Builder::new_multi_thread()
        .enable_all()
        .worker_threads(num_cpus::get())
        .build()?;

    let res = runtime.block_on(async {
        match opts.command {
            Command::Run(run) => {
                executor::run_units(RunConfig::new(run)?, executor::interrupt_token()).await
            }
            Command::Tmain(tmain) => {
                executor::run_tmain(TmainConfig::new(tmain)?, executor::interrupt_token()).await
            }
        }
    });
    // Do not wait on workers that ignored cancellation.
    runtime.shutdown_timeout(GRACE_PERIOD);
    res
}

fn main() {
    // Reports go to stdout, diagnostics to stderr.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .try_init();

    std::process::exit(match run() {
        Err(err) => {
            println!("error: {}", err);
            1
        }
        Ok(code) => code,
    })
}
