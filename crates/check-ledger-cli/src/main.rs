use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use check_ledger_api::{CheckLedgerApi, LedgerConfig, API_CONTRACT_VERSION};
use check_ledger_core::{
    format_canonical_date, parse_canonical_date, CheckDraft, CheckId, CheckKind, DateValue,
};
use clap::{Args, Parser, Subcommand};
use serde_json::{json, Value};
use time::format_description::well_known::Rfc3339;
use time::{Date, OffsetDateTime};
use tracing_subscriber::EnvFilter;

const CLI_CONTRACT_VERSION: &str = "cli.v1";

#[derive(Debug, Parser)]
#[command(name = "ckl")]
#[command(about = "Check Ledger CLI")]
struct Cli {
    /// Ledger data directory. Defaults to $CHECK_LEDGER_DATA_DIR or the platform data dir.
    #[arg(long)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Migrate legacy data, load, and verify, as the application does on launch.
    Startup,
    List,
    Migrate,
    Verify,
    Add(AddArgs),
    Update(UpdateArgs),
    Delete(DeleteArgs),
    Export(ExportArgs),
    Import(ImportArgs),
    Summary(SummaryArgs),
    Reminders(RemindersArgs),
    NextCheckNumber,
    Db {
        #[command(subcommand)]
        command: DbCommand,
    },
}

#[derive(Debug, Subcommand)]
enum DbCommand {
    SchemaVersion,
    IntegrityCheck,
    Backup(DbBackupArgs),
}

#[derive(Debug, Args)]
struct AddArgs {
    #[arg(long = "type", value_parser = parse_kind)]
    kind: CheckKind,
    #[arg(long)]
    amount: f64,
    #[arg(long)]
    due_date: String,
    #[arg(long)]
    receive_date: Option<String>,
    #[arg(long)]
    counterparty: String,
    #[arg(long)]
    bank: String,
    /// Generated when omitted.
    #[arg(long)]
    check_number: Option<String>,
}

#[derive(Debug, Args)]
struct UpdateArgs {
    #[arg(long)]
    id: String,
    #[arg(long = "type", value_parser = parse_kind)]
    kind: Option<CheckKind>,
    #[arg(long)]
    amount: Option<f64>,
    #[arg(long)]
    due_date: Option<String>,
    #[arg(long)]
    receive_date: Option<String>,
    #[arg(long, default_value_t = false, conflicts_with = "receive_date")]
    clear_receive_date: bool,
    #[arg(long)]
    counterparty: Option<String>,
    #[arg(long)]
    bank: Option<String>,
    #[arg(long)]
    check_number: Option<String>,
}

#[derive(Debug, Args)]
struct DeleteArgs {
    #[arg(long)]
    id: String,
}

#[derive(Debug, Args)]
struct ExportArgs {
    /// Output directory. Defaults to `<data-dir>/exports`.
    #[arg(long)]
    out: Option<PathBuf>,
}

#[derive(Debug, Args)]
struct ImportArgs {
    #[arg(long = "in")]
    input: PathBuf,
}

#[derive(Debug, Args)]
struct SummaryArgs {
    /// Reference day as YYYY-MM-DD. Defaults to today (UTC).
    #[arg(long, value_parser = parse_date)]
    today: Option<Date>,
}

#[derive(Debug, Args)]
struct RemindersArgs {
    /// Reference instant as RFC3339. Defaults to now.
    #[arg(long, value_parser = parse_rfc3339)]
    now: Option<OffsetDateTime>,
}

#[derive(Debug, Args)]
struct DbBackupArgs {
    #[arg(long)]
    out: PathBuf,
}

fn parse_kind(raw: &str) -> Result<CheckKind, String> {
    CheckKind::parse(raw)
        .or_else(|| match raw.to_ascii_lowercase().as_str() {
            "given" => Some(CheckKind::Given),
            "taken" => Some(CheckKind::Taken),
            _ => None,
        })
        .ok_or_else(|| format!("unsupported check type `{raw}`; expected Given or Taken"))
}

fn parse_date(raw: &str) -> Result<Date, String> {
    parse_canonical_date(raw).ok_or_else(|| format!("`{raw}` is not a YYYY-MM-DD date"))
}

fn parse_rfc3339(raw: &str) -> Result<OffsetDateTime, String> {
    OffsetDateTime::parse(raw, &Rfc3339).map_err(|err| format!("invalid RFC3339 timestamp: {err}"))
}

fn with_contract_version(value: Value) -> Value {
    match value {
        Value::Object(mut object) => {
            object.insert(
                "contract_version".to_string(),
                Value::String(CLI_CONTRACT_VERSION.to_string()),
            );
            object.insert(
                "api_contract_version".to_string(),
                Value::String(API_CONTRACT_VERSION.to_string()),
            );
            Value::Object(object)
        }
        other => json!({
            "contract_version": CLI_CONTRACT_VERSION,
            "api_contract_version": API_CONTRACT_VERSION,
            "payload": other
        }),
    }
}

fn emit_json(value: Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(&with_contract_version(value))?);
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if let Err(err) = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init()
    {
        eprintln!("failed to initialize logging: {err}");
    }
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let config = LedgerConfig::resolve(cli.data_dir);
    tracing::debug!(data_dir = %config.data_dir().display(), "resolved ledger config");
    let mut api = CheckLedgerApi::new(config);

    match cli.command {
        Command::Startup => run_startup(&mut api),
        Command::List => run_list(&mut api),
        Command::Migrate => emit_json(serde_json::to_value(api.migrate())?),
        Command::Verify => emit_json(json!({ "verified": api.verify_and_cleanup() })),
        Command::Add(args) => run_add(args, &mut api),
        Command::Update(args) => run_update(args, &mut api),
        Command::Delete(args) => run_delete(&args, &mut api),
        Command::Export(args) => run_export(&args, &mut api),
        Command::Import(args) => run_import(&args, &mut api),
        Command::Summary(args) => run_summary(&args, &mut api),
        Command::Reminders(args) => run_reminders(&args, &mut api),
        Command::NextCheckNumber => {
            emit_json(json!({ "check_number": api.next_check_number() }))
        }
        Command::Db { command } => run_db(command, &mut api),
    }
}

fn run_startup(api: &mut CheckLedgerApi) -> Result<()> {
    let startup = api.startup();
    emit_json(json!({
        "report": startup.report,
        "checks": startup.checks,
    }))
}

fn run_list(api: &mut CheckLedgerApi) -> Result<()> {
    let loaded = api.load_all();
    emit_json(json!({
        "source": loaded.source,
        "count": loaded.checks.len(),
        "checks": loaded.checks,
    }))
}

fn run_add(args: AddArgs, api: &mut CheckLedgerApi) -> Result<()> {
    let check_number = match args.check_number {
        Some(number) => number,
        None => api.next_check_number(),
    };
    let draft = CheckDraft {
        kind: args.kind,
        amount: args.amount,
        due_date: DateValue::Text(args.due_date),
        receive_date: args.receive_date.map(DateValue::Text),
        counterparty: args.counterparty,
        bank: args.bank,
        check_number,
    };

    let mutation = api.add_check(draft)?;
    emit_json(serde_json::to_value(mutation)?)
}

fn run_update(args: UpdateArgs, api: &mut CheckLedgerApi) -> Result<()> {
    let id = CheckId(args.id);
    let mut check = api
        .load_all()
        .checks
        .into_iter()
        .find(|check| check.id == id)
        .ok_or_else(|| anyhow!("check not found: {id}"))?;

    if let Some(kind) = args.kind {
        check.kind = kind.into();
    }
    if let Some(amount) = args.amount {
        check.amount = amount.into();
    }
    if let Some(due_date) = args.due_date {
        check.due_date = DateValue::Text(due_date);
    }
    if let Some(receive_date) = args.receive_date {
        check.receive_date = Some(DateValue::Text(receive_date));
    }
    if args.clear_receive_date {
        check.receive_date = None;
    }
    if let Some(counterparty) = args.counterparty {
        check.counterparty = counterparty;
    }
    if let Some(bank) = args.bank {
        check.bank = bank;
    }
    if let Some(check_number) = args.check_number {
        check.check_number = check_number;
    }

    let mutation = api.update_check(check)?;
    emit_json(serde_json::to_value(mutation)?)
}

fn run_delete(args: &DeleteArgs, api: &mut CheckLedgerApi) -> Result<()> {
    let mutation = api.remove_check(&CheckId(args.id.clone()))?;
    emit_json(serde_json::to_value(mutation)?)
}

fn run_export(args: &ExportArgs, api: &mut CheckLedgerApi) -> Result<()> {
    let exported = api.export_current(args.out.as_deref())?;
    emit_json(serde_json::to_value(exported)?)
}

fn run_import(args: &ImportArgs, api: &mut CheckLedgerApi) -> Result<()> {
    let save = api.import_snapshot(&args.input)?;
    emit_json(json!({
        "input": args.input,
        "save": save,
        "persisted": save.is_persisted(),
    }))
}

fn run_summary(args: &SummaryArgs, api: &mut CheckLedgerApi) -> Result<()> {
    let today = args.today.unwrap_or_else(|| OffsetDateTime::now_utc().date());
    let summary = api.summary(today);
    let mut value = serde_json::to_value(summary)?;
    if let Value::Object(object) = &mut value {
        object.insert("today".to_string(), Value::String(format_canonical_date(today)));
    }
    emit_json(value)
}

fn run_reminders(args: &RemindersArgs, api: &mut CheckLedgerApi) -> Result<()> {
    let now = args.now.unwrap_or_else(OffsetDateTime::now_utc);
    let reminders = api.reminders(now);
    emit_json(json!({
        "now": now.format(&Rfc3339).context("failed to format reference instant")?,
        "count": reminders.len(),
        "reminders": reminders,
    }))
}

fn run_db(command: DbCommand, api: &mut CheckLedgerApi) -> Result<()> {
    match command {
        DbCommand::SchemaVersion => {
            let status = api.schema_status()?;
            emit_json(json!({
                "current_version": status.current_version,
                "target_version": status.target_version,
                "pending_versions": status.pending_versions,
                "up_to_date": status.pending_versions.is_empty(),
            }))
        }
        DbCommand::IntegrityCheck => emit_json(serde_json::to_value(api.integrity_check()?)?),
        DbCommand::Backup(args) => {
            let check_count = api.backup_database(&args.out)?;
            emit_json(json!({ "status": "ok", "out": args.out, "check_count": check_count }))
        }
    }
}
