use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use catalog::config::{ConfigError, EffectiveConfig, default_config_yaml, load_effective_config};
use catalog::hierarchy::{Catalog, DeletePolicy, IntegrityReport};
use catalog::model::{Category, CategoryId, PageRequest};
use catalog::CatalogError;
use chrono::{SecondsFormat, Utc};
use clap::{Args, Parser, Subcommand};
use serde_json::{Value, json};
use tracing_subscriber::EnvFilter;

const LOG_ENV: &str = "CATALOG_LOG";
const DATABASE_FILE: &str = "catalog.sqlite";

#[derive(Debug)]
struct CliError {
    code: &'static str,
    message: String,
}

impl CliError {
    fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    fn io(code: &'static str, err: io::Error) -> Self {
        Self::new(code, err.to_string())
    }
}

impl From<CatalogError> for CliError {
    fn from(value: CatalogError) -> Self {
        Self::new(value.code(), value.to_string())
    }
}

impl From<ConfigError> for CliError {
    fn from(value: ConfigError) -> Self {
        Self::new("config_error", value.to_string())
    }
}

impl From<serde_json::Error> for CliError {
    fn from(value: serde_json::Error) -> Self {
        Self::new("json_error", value.to_string())
    }
}

#[derive(Parser, Debug)]
#[command(name = "catalog")]
#[command(about = "A category tree backed by a closure table")]
struct Cli {
    /// Use ~/.catalog instead of ./.catalog
    #[arg(long, global = true)]
    global: bool,
    /// Explicit database file; skips the init check
    #[arg(long, global = true)]
    db: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    Init,
    Create(CreateArgs),
    Update(UpdateArgs),
    Get(IdArgs),
    List,
    Roots,
    Children(ChildrenArgs),
    Descendants(IdArgs),
    Ancestors(IdArgs),
    Delete(DeleteArgs),
    Check,
    Rebuild,
}

#[derive(Args, Debug)]
struct CreateArgs {
    #[arg(long)]
    name: String,
    #[arg(long)]
    description: Option<String>,
    #[arg(long)]
    parent: Option<CategoryId>,
}

#[derive(Args, Debug)]
struct UpdateArgs {
    id: CategoryId,
    #[arg(long)]
    name: String,
    #[arg(long)]
    description: Option<String>,
}

#[derive(Args, Debug)]
struct IdArgs {
    id: CategoryId,
}

#[derive(Args, Debug)]
struct ChildrenArgs {
    id: CategoryId,
    #[arg(long, default_value_t = 0)]
    page: u32,
    #[arg(long)]
    size: Option<u32>,
}

#[derive(Args, Debug)]
struct DeleteArgs {
    id: CategoryId,
    /// Remove the whole subtree regardless of the configured policy
    #[arg(long)]
    cascade: bool,
}

#[derive(Debug, Clone)]
struct CatalogPaths {
    root: PathBuf,
    database: PathBuf,
    repo_config: PathBuf,
    user_config: PathBuf,
    mode: StorageMode,
    explicit_db: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StorageMode {
    RepoLocal,
    Global,
}

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::debug!(code = err.code, "command failed");
            let payload = json!({
                "error": {
                    "code": err.code,
                    "message": err.message,
                    "timestamp": Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
                }
            });
            eprintln!("{payload}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<(), CliError> {
    let cli = Cli::parse();
    let cwd = std::env::current_dir().map_err(|err| CliError::io("cwd_error", err))?;
    let paths = catalog_paths(&cwd, cli.global, cli.db)?;
    let config = load_effective_config(&cwd, Some(&paths.repo_config), Some(&paths.user_config))?;
    init_tracing(config.log.as_deref());

    let catalog = || open_catalog(&paths, &config);
    match cli.command {
        Command::Init => cmd_init(&paths, &config),
        Command::Create(args) => {
            let name = require_name(&args.name)?;
            let created =
                catalog()?.create_category(name, args.description.as_deref(), args.parent)?;
            print_json(&serde_json::to_value(created)?)
        }
        Command::Update(args) => {
            let name = require_name(&args.name)?;
            let updated =
                catalog()?.update_category(args.id, name, args.description.as_deref())?;
            print_json(&serde_json::to_value(updated)?)
        }
        Command::Get(args) => print_json(&serde_json::to_value(catalog()?.get_category(args.id)?)?),
        Command::List => print_categories(catalog()?.get_categories()?),
        Command::Roots => print_categories(catalog()?.get_root_categories()?),
        Command::Children(args) => {
            let request = PageRequest::new(args.page, args.size.unwrap_or(config.page_size))?;
            let page = catalog()?.get_children(args.id, request)?;
            print_json(&serde_json::to_value(page)?)
        }
        Command::Descendants(args) => print_categories(catalog()?.get_descendants(args.id)?),
        Command::Ancestors(args) => print_categories(catalog()?.get_ancestors(args.id)?),
        Command::Delete(args) => cmd_delete(catalog()?, args),
        Command::Check => {
            let report = catalog()?.verify_integrity()?;
            print_report(if report.is_consistent() { "ok" } else { "drift" }, &report)
        }
        Command::Rebuild => {
            let report = catalog()?.rebuild_closure()?;
            print_report("rebuilt", &report)
        }
    }
}

fn open_catalog(paths: &CatalogPaths, config: &EffectiveConfig) -> Result<Catalog, CliError> {
    require_initialized_paths(paths)?;
    Ok(Catalog::open(
        &path_string(&paths.database),
        &config.catalog_options(),
    )?)
}

fn cmd_init(paths: &CatalogPaths, config: &EffectiveConfig) -> Result<(), CliError> {
    if let Some(parent) = paths.database.parent() {
        fs::create_dir_all(parent).map_err(|err| CliError::io("mkdir_error", err))?;
    }
    let _ = Catalog::open(&path_string(&paths.database), &config.catalog_options())?;
    write_default_config(paths)?;

    print_json(&json!({
        "status": "ok",
        "catalog_dir": paths.root,
        "database": paths.database,
        "mode": match paths.mode {
            StorageMode::RepoLocal => "repo",
            StorageMode::Global => "global",
        },
    }))
}

fn cmd_delete(catalog: Catalog, args: DeleteArgs) -> Result<(), CliError> {
    let catalog = if args.cascade {
        catalog.with_delete_policy(DeletePolicy::Cascade)
    } else {
        catalog
    };
    let removed = catalog.delete_category(args.id)?;
    print_json(&json!({
        "status": "ok",
        "policy": catalog.delete_policy().as_str(),
        "removed": removed,
    }))
}

fn print_categories(categories: Vec<Category>) -> Result<(), CliError> {
    print_json(&json!({
        "count": categories.len(),
        "categories": categories,
    }))
}

fn print_report(status: &str, report: &IntegrityReport) -> Result<(), CliError> {
    print_json(&json!({
        "status": status,
        "report": report,
    }))
}

fn require_name(name: &str) -> Result<&str, CliError> {
    if name.trim().is_empty() {
        return Err(CliError::new(
            "validation_error",
            "category name must not be blank",
        ));
    }
    Ok(name)
}

fn init_tracing(config_directive: Option<&str>) {
    let filter = EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_new(config_directive.unwrap_or("warn")))
        .unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();
}

fn catalog_paths(cwd: &Path, global: bool, db: Option<PathBuf>) -> Result<CatalogPaths, CliError> {
    let home = home_dir()?;
    let (root, mode) = if global {
        (home.join(".catalog"), StorageMode::Global)
    } else {
        (cwd.join(".catalog"), StorageMode::RepoLocal)
    };

    let explicit_db = db.is_some();
    Ok(CatalogPaths {
        database: db.unwrap_or_else(|| root.join(DATABASE_FILE)),
        repo_config: cwd.join(".catalog").join("config.yml"),
        user_config: home.join(".catalog").join("config.yml"),
        root,
        mode,
        explicit_db,
    })
}

fn require_initialized_paths(paths: &CatalogPaths) -> Result<(), CliError> {
    if !paths.explicit_db && !paths.database.exists() {
        return Err(CliError::new(
            "not_initialized",
            "catalog is not initialized; run `catalog init`",
        ));
    }
    Ok(())
}

fn write_default_config(paths: &CatalogPaths) -> Result<(), CliError> {
    let config_path = match paths.mode {
        StorageMode::RepoLocal => &paths.repo_config,
        StorageMode::Global => &paths.user_config,
    };
    if config_path.exists() {
        return Ok(());
    }
    if let Some(parent) = config_path.parent() {
        fs::create_dir_all(parent).map_err(|err| CliError::io("mkdir_error", err))?;
    }
    fs::write(config_path, default_config_yaml()).map_err(|err| CliError::io("write_error", err))
}

fn home_dir() -> Result<PathBuf, CliError> {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .ok_or_else(|| CliError::new("home_error", "HOME environment variable is not set"))
}

fn path_string(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

fn print_json(value: &Value) -> Result<(), CliError> {
    let rendered = serde_json::to_string(value)?;
    println!("{rendered}");
    Ok(())
}
