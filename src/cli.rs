//! CLI argument parsing for the dispute filing workflow.
use clap::{Parser, Subcommand};
use dispute_filer::case::BureauId;
use std::path::PathBuf;

/// Root CLI entrypoint.
#[derive(Parser, Debug)]
#[command(
    name = "dfile",
    version,
    about = "File identity-theft disputes with the FTC, CFPB and credit bureaus",
    after_help = "Examples:\n  dfile init-config\n  dfile run --case case.json\n  dfile run --case case.json --resume --json\n  dfile complaint --case case.json --bureau experian\n  dfile status --case-id case-42\n  dfile resolve --case-id case-42 --bureau experian\n  dfile unlock --case-id case-42",
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct RootArgs {
    /// Settings file (defaults to <data-dir>/config.json)
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Directory holding case timelines, run records and evidence
    #[arg(long, global = true, value_name = "DIR")]
    pub data_dir: Option<PathBuf>,

    /// Log at debug level (RUST_LOG overrides)
    #[arg(long, short, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the report, complaint and bureau stages for a case
    Run(RunArgs),
    /// File only the identity-theft report
    Report(CaseArgs),
    /// File the regulator complaint about one bureau
    Complaint(TargetArgs),
    /// File a dispute on one bureau's portal
    Bureau(TargetArgs),
    /// Show the recorded timeline and run records for a case
    Status(StatusArgs),
    /// Record that a bureau resolved its dispute
    Resolve(ResolveArgs),
    /// Remove a case lease left behind by a crashed run
    Unlock(UnlockArgs),
    /// Write a default settings file
    InitConfig(InitConfigArgs),
}

/// Full dispute run.
#[derive(Parser, Debug)]
#[command(about = "Run the report, complaint and bureau stages for a case")]
pub struct RunArgs {
    /// Case JSON file
    #[arg(long, value_name = "FILE")]
    pub case: PathBuf,

    /// Do not file the identity-theft report; reuse the recorded reference
    #[arg(long)]
    pub skip_report: bool,

    /// Do not file regulator complaints
    #[arg(long)]
    pub skip_complaints: bool,

    /// Do not file bureau portal disputes
    #[arg(long)]
    pub skip_bureaus: bool,

    /// Restrict filings to these bureaus (repeatable)
    #[arg(long = "bureau", value_name = "BUREAU")]
    pub bureaus: Vec<BureauId>,

    /// Skip filings the case timeline already shows as done
    #[arg(long)]
    pub resume: bool,

    /// Emit machine-readable JSON output
    #[arg(long)]
    pub json: bool,
}

#[derive(Parser, Debug)]
#[command(about = "File only the identity-theft report")]
pub struct CaseArgs {
    /// Case JSON file
    #[arg(long, value_name = "FILE")]
    pub case: PathBuf,

    /// Emit machine-readable JSON output
    #[arg(long)]
    pub json: bool,
}

#[derive(Parser, Debug)]
pub struct TargetArgs {
    /// Case JSON file
    #[arg(long, value_name = "FILE")]
    pub case: PathBuf,

    /// Bureau to file against (equifax, experian, transunion)
    #[arg(long, value_name = "BUREAU")]
    pub bureau: BureauId,

    /// Emit machine-readable JSON output
    #[arg(long)]
    pub json: bool,
}

#[derive(Parser, Debug)]
#[command(about = "Show the recorded timeline and run records for a case")]
pub struct StatusArgs {
    /// Case id as written in the case file
    #[arg(long, value_name = "ID")]
    pub case_id: String,

    /// Emit machine-readable JSON output
    #[arg(long)]
    pub json: bool,
}

#[derive(Parser, Debug)]
#[command(about = "Record that a bureau resolved its dispute")]
pub struct ResolveArgs {
    /// Case id as written in the case file
    #[arg(long, value_name = "ID")]
    pub case_id: String,

    /// Bureau whose dispute was resolved
    #[arg(long, value_name = "BUREAU")]
    pub bureau: BureauId,
}

#[derive(Parser, Debug)]
#[command(about = "Remove a case lease left behind by a crashed run")]
pub struct UnlockArgs {
    /// Case id as written in the case file
    #[arg(long, value_name = "ID")]
    pub case_id: String,
}

#[derive(Parser, Debug)]
#[command(about = "Write a default settings file")]
pub struct InitConfigArgs {
    /// Overwrite an existing settings file
    #[arg(long)]
    pub force: bool,
}
