use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use crossbeam_channel::bounded;
use signal_hook::consts::{SIGINT, SIGTERM};

use crate::args::Args;
use crate::error::{FatalError, JobError};
use crate::executor::{ExecOptions, Executor, Outcome};
use crate::planner::{plan, Job};
use crate::scanner;
use crate::summary::RunSummary;
use crate::tool::{check_installed, ToolRunner, FFMPEG, FFPROBE};

/// Run the whole pipeline: discover, plan, execute, tally.
///
/// Fatal errors (bad root, missing tools) surface before any job runs.
/// Per-job failures are folded into the summary; the caller decides the
/// exit code from `RunSummary::any_failed`.
pub fn run(args: &Args, runner: &dyn ToolRunner) -> Result<RunSummary, FatalError> {
    check_installed(runner, FFMPEG)?;
    if args.crop_4x3 {
        check_installed(runner, FFPROBE)?;
    }

    let extensions = args.formats.extensions();
    let single_file = args.input.is_file();
    let sources = if single_file {
        scanner::single(&args.input, &extensions)?
    } else {
        println!("Scanning {}", args.input.display());
        scanner::scan(&args.input, &extensions)?
    };

    std::fs::create_dir_all(&args.output).map_err(|e| FatalError::Access {
        path: args.output.clone(),
        source: e,
    })?;

    let jobs = plan(sources, &args.formats, &args.output, args.overwrite);
    println!("Found {} file(s) to process", jobs.len());

    let cancel = Arc::new(AtomicBool::new(false));
    for signal in [SIGINT, SIGTERM] {
        let _ = signal_hook::flag::register(signal, Arc::clone(&cancel));
    }

    let executor = Executor::new(
        runner,
        ExecOptions {
            crop_4x3: args.crop_4x3,
            use_cropdetect: args.use_cropdetect,
            scan_seconds: args.scan_seconds,
            require_resolution: args.require_resolution,
            crf: args.crf,
            preset: args.preset.clone(),
            dry_run: args.dry_run,
        },
    );

    let driver = Driver {
        executor,
        workers: args.worker_count(),
        // A probe or tool failure on an explicitly named single file aborts
        // the run; in batch mode that takes --fail-fast.
        fail_fast: args.fail_fast || single_file,
        cancel,
    };

    let summary = driver.run(jobs);
    summary.print();
    Ok(summary)
}

/// Owns job scheduling and the summary. Strictly sequential with one
/// worker; otherwise a fixed pool fed over bounded channels.
pub struct Driver<'a> {
    pub executor: Executor<'a>,
    pub workers: usize,
    pub fail_fast: bool,
    pub cancel: Arc<AtomicBool>,
}

impl<'a> Driver<'a> {
    pub fn run(&self, jobs: Vec<Job>) -> RunSummary {
        if self.workers <= 1 {
            self.run_sequential(jobs)
        } else {
            self.run_parallel(jobs)
        }
    }

    fn run_sequential(&self, jobs: Vec<Job>) -> RunSummary {
        let mut summary = RunSummary::default();

        for job in jobs {
            if self.cancel.load(Ordering::Relaxed) {
                eprintln!("Interrupted; not starting further jobs");
                break;
            }
            let result = self.executor.execute(&job);
            let failed = result.is_err();
            report_outcome(&job, result, &mut summary);
            if failed && self.fail_fast {
                break;
            }
        }

        summary
    }

    fn run_parallel(&self, jobs: Vec<Job>) -> RunSummary {
        let workers = self.workers.min(jobs.len()).max(1);
        println!("Starting {} worker threads", workers);

        let (work_tx, work_rx) = bounded::<Job>(workers * 2);
        let (result_tx, result_rx) = bounded::<(Job, Result<Outcome, JobError>)>(workers * 2);

        thread::scope(|s| {
            for _ in 0..workers {
                let work_rx = work_rx.clone();
                let result_tx = result_tx.clone();
                let executor = &self.executor;
                s.spawn(move || {
                    for job in work_rx {
                        let result = executor.execute(&job);
                        if result_tx.send((job, result)).is_err() {
                            break;
                        }
                    }
                });
            }
            drop(work_rx);
            drop(result_tx);

            let cancel = Arc::clone(&self.cancel);
            s.spawn(move || {
                for job in jobs {
                    if cancel.load(Ordering::Relaxed) {
                        eprintln!("Interrupted; not submitting further jobs");
                        break;
                    }
                    if work_tx.send(job).is_err() {
                        break;
                    }
                }
            });

            // Single owner of the counters; workers only send results back.
            let mut summary = RunSummary::default();
            for (job, result) in result_rx {
                let failed = result.is_err();
                report_outcome(&job, result, &mut summary);
                if failed && self.fail_fast {
                    self.cancel.store(true, Ordering::Relaxed);
                }
            }
            summary
        })
    }
}

fn report_outcome(job: &Job, result: Result<Outcome, JobError>, summary: &mut RunSummary) {
    match result {
        Ok(Outcome::Converted) => {
            summary.record(Outcome::Converted);
            println!("✓ Converted: {}", job.source.path.display());
        }
        Ok(Outcome::Copied) => {
            summary.record(Outcome::Copied);
            println!("✓ Copied: {}", job.source.path.display());
        }
        Ok(Outcome::Skipped) => {
            summary.record(Outcome::Skipped);
            println!("- Skipped (already exists): {}", job.source.path.display());
        }
        Err(e) => {
            summary.record_failure();
            eprintln!("✗ Failed: {}: {}", job.source.path.display(), e);
        }
    }
}
