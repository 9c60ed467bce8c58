use anyhow::{anyhow, Context, Result};
use clap::Parser;
use dispute_filer::agent::CommandAgentFactory;
use dispute_filer::case::{load_case, DisputeCase};
use dispute_filer::config::{load_settings, resolve_data_dir, write_settings, Settings};
use dispute_filer::executor::ExecutorContext;
use dispute_filer::orchestrator::{Orchestrator, RunAborted, RunOptions};
use dispute_filer::status::DisputeStatus;
use dispute_filer::store::{CaseStore, FileCaseStore};
use serde::Serialize;
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

mod cli;
mod output;

use cli::{
    CaseArgs, Command, InitConfigArgs, ResolveArgs, RootArgs, RunArgs, StatusArgs, TargetArgs,
    UnlockArgs,
};

/// Exit code for a run that finished with at least one failed or unattempted step.
const EXIT_INCOMPLETE: u8 = 2;

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = RootArgs::parse();
    init_logging(args.verbose);

    match args.command {
        Command::InitConfig(ref cmd) => {
            run_init_config(&args, cmd)?;
            Ok(ExitCode::SUCCESS)
        }
        ref command => {
            let settings = load_settings(args.config.as_deref(), args.data_dir.as_deref())?;
            let app = App::new(settings)?;
            app.dispatch(command).await
        }
    }
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn run_init_config(args: &RootArgs, cmd: &InitConfigArgs) -> Result<()> {
    let path = match &args.config {
        Some(path) => path.clone(),
        None => resolve_data_dir(args.data_dir.as_deref())?.join("config.json"),
    };
    if path.exists() && !cmd.force {
        return Err(anyhow!(
            "{} already exists (use --force to overwrite)",
            path.display()
        ));
    }
    write_settings(&path, &Settings::default())?;
    println!("wrote {}", path.display());
    Ok(())
}

struct App {
    ctx: ExecutorContext,
    store: Arc<FileCaseStore>,
}

impl App {
    fn new(settings: Settings) -> Result<Self> {
        let agents = CommandAgentFactory::new(&settings.agent_command, settings.task_timeout())?;
        let store =
            Arc::new(FileCaseStore::new(settings.data_dir()).with_lease_ttl(settings.lease_ttl()));
        let cancel = CancellationToken::new();
        spawn_interrupt_handler(cancel.clone());
        let ctx = ExecutorContext::new(store.clone(), Arc::new(agents), Arc::new(settings))
            .with_cancellation(cancel);
        Ok(Self { ctx, store })
    }

    async fn dispatch(&self, command: &Command) -> Result<ExitCode> {
        match command {
            Command::Run(cmd) => self.run(cmd).await,
            Command::Report(cmd) => self.report(cmd).await,
            Command::Complaint(cmd) => self.complaint(cmd).await,
            Command::Bureau(cmd) => self.bureau(cmd).await,
            Command::Status(cmd) => self.status(cmd).await,
            Command::Resolve(cmd) => self.resolve(cmd).await,
            Command::Unlock(cmd) => self.unlock(cmd).await,
            Command::InitConfig(_) => Err(anyhow!("init-config runs before settings load")),
        }
    }

    async fn run(&self, cmd: &RunArgs) -> Result<ExitCode> {
        let case = read_case(&cmd.case)?;
        let mut options = if cmd.resume {
            let timeline = self.store.load_timeline(&case.case_id).await?;
            RunOptions::resume(&timeline, &case)
        } else {
            RunOptions::default()
        };
        options.skip_report |= cmd.skip_report;
        options.skip_complaints |= cmd.skip_complaints;
        options.skip_bureaus |= cmd.skip_bureaus;
        if !cmd.bureaus.is_empty() {
            options.bureaus = Some(cmd.bureaus.iter().copied().collect());
        }
        tracing::debug!(?options, "run options");
        let orchestrator = Orchestrator::for_case(self.ctx.clone(), &case);
        finish(orchestrator.run_full_dispute(&case, &options).await, cmd.json)
    }

    async fn report(&self, cmd: &CaseArgs) -> Result<ExitCode> {
        let case = read_case(&cmd.case)?;
        let orchestrator = Orchestrator::for_case(self.ctx.clone(), &case);
        finish(orchestrator.run_report_only(&case).await, cmd.json)
    }

    async fn complaint(&self, cmd: &TargetArgs) -> Result<ExitCode> {
        let case = read_case(&cmd.case)?;
        let orchestrator = Orchestrator::for_case(self.ctx.clone(), &case);
        let outcome = orchestrator.run_complaint_only(&case, cmd.bureau).await;
        finish(outcome, cmd.json)
    }

    async fn bureau(&self, cmd: &TargetArgs) -> Result<ExitCode> {
        let case = read_case(&cmd.case)?;
        let orchestrator = Orchestrator::for_case(self.ctx.clone(), &case);
        let outcome = orchestrator.run_bureau_only(&case, cmd.bureau).await;
        finish(outcome, cmd.json)
    }

    async fn status(&self, cmd: &StatusArgs) -> Result<ExitCode> {
        let timeline = self.store.load_timeline(&cmd.case_id).await?;
        let runs = self.store.list_run_records(&cmd.case_id).await?;
        let record = output::CaseRecord {
            case_id: &cmd.case_id,
            timeline: &timeline,
            runs: &runs,
        };
        if cmd.json {
            print_json(&record)?;
        } else {
            print!("{}", output::render_case_record(&record));
        }
        Ok(ExitCode::SUCCESS)
    }

    async fn resolve(&self, cmd: &ResolveArgs) -> Result<ExitCode> {
        let orchestrator = Orchestrator::account(self.ctx.clone());
        orchestrator
            .mark_bureau_resolved(&cmd.case_id, cmd.bureau)
            .await?;
        println!("{} dispute for case {} marked resolved", cmd.bureau, cmd.case_id);
        Ok(ExitCode::SUCCESS)
    }

    async fn unlock(&self, cmd: &UnlockArgs) -> Result<ExitCode> {
        match self.store.break_lease(&cmd.case_id).await? {
            Some(holder) => {
                tracing::warn!(case_id = %cmd.case_id, %holder, "case lease removed by operator");
                println!("removed lease on case {} held by {holder}", cmd.case_id);
            }
            None => println!("case {} has no lease", cmd.case_id),
        }
        Ok(ExitCode::SUCCESS)
    }
}

fn read_case(path: &Path) -> Result<DisputeCase> {
    load_case(path).with_context(|| format!("load case {}", path.display()))
}

/// Print the run outcome; aborted runs still print what was collected.
fn finish(outcome: Result<DisputeStatus, RunAborted>, json: bool) -> Result<ExitCode> {
    match outcome {
        Ok(status) => {
            print_status(&status, json)?;
            if status.is_complete() {
                Ok(ExitCode::SUCCESS)
            } else {
                Ok(ExitCode::from(EXIT_INCOMPLETE))
            }
        }
        Err(aborted) => {
            print_status(&aborted.status, json)?;
            Err(aborted.into())
        }
    }
}

fn print_status(status: &DisputeStatus, json: bool) -> Result<()> {
    let summary = status.summary();
    if json {
        print_json(&summary)
    } else {
        print!("{}", output::render_summary(&summary));
        Ok(())
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let text = serde_json::to_string_pretty(value).context("serialize output")?;
    println!("{text}");
    Ok(())
}

fn spawn_interrupt_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received; cancelling after the current agent task");
            cancel.cancel();
        }
    });
}
