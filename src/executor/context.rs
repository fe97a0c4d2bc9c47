use super::{
    pool::{CancelToken, Completion, Pool},
    results::{Aggregator, ReportOpts},
    subject::Subject,
    test::{Harness, Settings, Test},
    tmain::{self, TmainHarness, TmainTest},
    tools,
};
use crate::{
    config::{RunConfig, TmainConfig},
    errors::UnitsError,
    picker::{self, units::Picker},
    printer,
};
use colored::Colorize;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// A token tripped by Ctrl-C. Must be called from within the runtime.
pub fn interrupt_token() -> CancelToken {
    let (tx, token) = CancelToken::new();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                warn!("interrupt received");
                let _ = tx.send(true);
            }
            Err(err) => warn!("cannot listen for interrupts: {}", err),
        }
    });
    token
}

async fn interrupted(mut token: CancelToken) {
    token.cancelled().await
}

/// Run a units tree category by category and print the summary. Returns
/// the process exit code, or [`UnitsError::Interrupted`] once `interrupt`
/// trips.
pub async fn run_units(
    config: RunConfig,
    interrupt: CancelToken,
) -> Result<i32, UnitsError> {
    if config.valgrind {
        tools::check_availability("valgrind")?;
    }
    tools::check_availability("diff")?;
    if !config.colorized {
        colored::control::set_override(false);
    }

    let subject = Subject::new(config.ctags.clone(), config.pretense.clone());
    let features = subject.features().await?;
    let categories = Picker::new(
        &config.units_dir,
        &config.build_dir,
        config.categories.clone(),
    )
    .categories()?;

    let harness = Arc::new(Harness {
        settings: Settings {
            deadline: config.deadline,
            valgrind: config.valgrind,
            languages: config.languages.clone(),
            canonical_root: config.canonical_root.clone(),
        },
        subject,
        features,
    });
    let aggregator = Aggregator::default();
    let pool = Pool::new(config.threads);

    for category in categories {
        if interrupt.is_cancelled() {
            return Err(UnitsError::Interrupted);
        }
        println!("\nCategory: {}", category.name);
        println!("{}", printer::line('-'));

        let jobs: Vec<_> = category
            .cases
            .into_iter()
            .filter(|case| {
                let accepted = config.units.accepts(&case.category, &case.name);
                if !accepted {
                    debug!(case = %case.id(), "filtered out");
                }
                accepted
            })
            .map(|case| {
                let test = Test::new(case, Arc::clone(&harness));
                move |token: CancelToken| test.execute_test(token)
            })
            .collect();
        info!(category = %category.name, cases = jobs.len(), "running");

        let completion = pool
            .run(jobs, interrupted(interrupt.clone()), |res| match res {
                Ok(test) => {
                    println!("{}", test.report_str(config.colorized));
                    aggregator.record(test);
                }
                Err(err) => {
                    error!("{}", err);
                    aggregator.error(err);
                }
            })
            .await;
        if completion == Completion::Interrupted {
            return Err(UnitsError::Interrupted);
        }
    }

    let summary = aggregator.summary();
    print!(
        "{}",
        summary.render(&ReportOpts {
            timeout: config.deadline.map(|d| d.as_secs()),
            valgrind: config.valgrind,
            show_diff: config.show_diff,
        })
    );
    Ok(if summary.passed() { 0 } else { 1 })
}

/// Run a tmain tree and print the failures. Returns the process exit code.
pub async fn run_tmain(
    config: TmainConfig,
    interrupt: CancelToken,
) -> Result<i32, UnitsError> {
    tools::check_availability("diff")?;
    if !config.colorized {
        colored::control::set_override(false);
    }

    let cases = picker::tmain::discover(&config.tmain_dir, &config.build_dir, &config.units)?;
    let harness = Arc::new(TmainHarness {
        ctags: config.ctags.clone(),
        readtags: config.readtags.clone(),
        colorized: config.colorized,
        deadline: config.deadline,
    });
    let jobs: Vec<_> = cases
        .into_iter()
        .map(|case| {
            let test = TmainTest::new(case, Arc::clone(&harness));
            move |token: CancelToken| test.execute_test(token)
        })
        .collect();

    let mut results = Vec::new();
    let mut errors = 0;
    let completion = Pool::new(config.threads)
        .run(jobs, interrupted(interrupt), |res| match res {
            Ok(result) => {
                print!("{}", result.report);
                results.push(result);
            }
            Err(err) => {
                error!("{}", err);
                println!("{}", err.to_string().red());
                errors += 1;
            }
        })
        .await;
    if completion == Completion::Interrupted {
        return Err(UnitsError::Interrupted);
    }

    print!(
        "{}",
        tmain::render_summary(&results, &config.build_dir, config.show_diff)
    );
    let failed = errors > 0 || results.iter().any(|r| !r.failures.is_empty());
    Ok(if failed { 1 } else { 0 })
}
