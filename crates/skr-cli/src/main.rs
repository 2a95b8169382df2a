use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use skr_engine::EngineError;
use skr_mapper::MemoryStoreFactory;
use skr_schemas::Direction;
use skr_sim::SimCloud;

mod commands;

use commands::catalog::{coerce_rpc_args, module_lines};
use commands::Session;

#[derive(Parser)]
#[command(name = "skr")]
#[command(about = "Skyrow cloud-state reconciler", long_about = None)]
struct Cli {
    #[command(subcommand)]
    cmd: Commands,
}

/// Flags shared by every command that works on one scope.
#[derive(Args)]
struct ScopeOpts {
    /// Layered config paths in merge order (repeatable)
    #[arg(long = "config")]
    config_paths: Vec<String>,

    /// Account id (overrides scope.account)
    #[arg(long)]
    account: Option<String>,

    /// Region (overrides scope.region)
    #[arg(long)]
    region: Option<String>,

    /// Simulated provider state file
    #[arg(long = "sim-state", default_value = ".skr/sim.json")]
    sim_state: PathBuf,
}

#[derive(Subcommand)]
enum Commands {
    /// Database commands
    Db {
        #[command(subcommand)]
        cmd: DbCmd,

        /// Layered config paths (for database.url_env)
        #[arg(long = "config")]
        config_paths: Vec<String>,
    },

    /// Compute layered config hash + print canonical JSON
    ConfigHash {
        /// Paths in merge order (base -> env -> overrides)
        #[arg(required = true)]
        paths: Vec<String>,
    },

    /// List available modules in dependency order
    Modules {
        /// Also show which modules are installed in the scope
        #[arg(long, default_value_t = false)]
        installed: bool,

        #[command(flatten)]
        scope: ScopeOpts,
    },

    /// Install modules (and their dependencies) and import existing cloud state
    Install {
        #[arg(required = true)]
        modules: Vec<String>,

        #[command(flatten)]
        scope: ScopeOpts,
    },

    /// Uninstall modules and purge their records
    Uninstall {
        #[arg(required = true)]
        modules: Vec<String>,

        #[command(flatten)]
        scope: ScopeOpts,
    },

    /// Push desired state (Record Store) to the cloud
    Apply {
        /// Print the plan without changing anything
        #[arg(long, default_value_t = false)]
        dry_run: bool,

        #[command(flatten)]
        scope: ScopeOpts,
    },

    /// Pull cloud state into the Record Store
    Sync {
        /// Print the plan without changing anything
        #[arg(long, default_value_t = false)]
        dry_run: bool,

        #[command(flatten)]
        scope: ScopeOpts,
    },

    /// Invoke a module RPC, then mirror the module's cloud state
    Rpc {
        module: String,
        name: String,
        /// Positional arguments, coerced to the RPC's parameter types
        args: Vec<String>,

        #[command(flatten)]
        scope: ScopeOpts,
    },

    /// Show recent reconcile runs for the scope
    Runs {
        #[arg(long, default_value_t = 10)]
        limit: i64,

        #[command(flatten)]
        scope: ScopeOpts,
    },
}

#[derive(Subcommand)]
enum DbCmd {
    Status,
    /// Apply SQL migrations
    Migrate,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Silent if the file does not exist; production injects env vars directly.
    let _ = dotenvy::from_filename(".env.local");

    init_tracing();

    let cli = Cli::parse();

    match cli.cmd {
        Commands::Db { cmd, config_paths } => {
            let loaded = commands::load_config(&config_paths)?;
            let pool = commands::connect(&loaded.config_json).await?;
            match cmd {
                DbCmd::Status => {
                    let s = skr_db::status(&pool).await?;
                    println!("db_ok={} has_records_table={}", s.ok, s.has_records_table);
                }
                DbCmd::Migrate => {
                    skr_db::migrate(&pool).await?;
                    println!("migrations_applied=true");
                }
            }
        }

        Commands::ConfigHash { paths } => {
            let path_refs: Vec<&str> = paths.iter().map(|s| s.as_str()).collect();
            let loaded = skr_config::load_layered_yaml(&path_refs)?;
            println!("config_hash={}", loaded.config_hash);
            println!("{}", loaded.canonical_json);
        }

        Commands::Modules { installed, scope } => {
            if installed {
                let s = open(&scope).await?;
                let set = s.engine.installed(&s.scope).await?;
                for line in module_lines(s.engine.registry(), Some(&set)) {
                    println!("{line}");
                }
            } else {
                // The catalog is static; no database or provider state needed.
                let registry = skr_sim::registry(&SimCloud::new(), &MemoryStoreFactory::new())?;
                for line in module_lines(&registry, None) {
                    println!("{line}");
                }
            }
        }

        Commands::Install { modules, scope } => {
            let s = open(&scope).await?;
            let names: Vec<&str> = modules.iter().map(|m| m.as_str()).collect();
            let out = s.engine.install(&names, &s.scope).await;
            let run = match &out {
                Ok(r) => r.import.as_ref().map(Ok),
                Err(e) => Some(Err(e)),
            };
            let concluded = s.conclude(run).await;
            print_outcome(out).and(concluded)?;
        }

        Commands::Uninstall { modules, scope } => {
            let s = open(&scope).await?;
            let names: Vec<&str> = modules.iter().map(|m| m.as_str()).collect();
            let out = s.engine.uninstall(&names, &s.scope).await;
            let concluded = s.conclude(None).await;
            print_outcome(out).and(concluded)?;
        }

        Commands::Apply { dry_run, scope } => run(scope, Direction::Apply, dry_run).await?,

        Commands::Sync { dry_run, scope } => run(scope, Direction::Sync, dry_run).await?,

        Commands::Rpc {
            module,
            name,
            args,
            scope,
        } => {
            let s = open(&scope).await?;
            let values = coerce_rpc_args(s.engine.registry(), &module, &name, &args)?;
            let out = s.engine.invoke_rpc(&s.scope, &module, &name, values).await;
            let run = match &out {
                Ok(o) => Ok(&o.mirror),
                Err(e) => Err(e),
            };
            let concluded = s.conclude(Some(run)).await;
            print_outcome(out).and(concluded)?;
        }

        Commands::Runs { limit, scope } => {
            let s = open(&scope).await?;
            for r in skr_db::recent_runs(s.pool(), &s.scope, limit).await? {
                println!(
                    "run_id={} direction={} status={} passes={} started_at_utc={} error={}",
                    r.run_id,
                    r.direction,
                    r.status,
                    r.passes,
                    r.started_at_utc.to_rfc3339(),
                    r.error.as_deref().unwrap_or("-"),
                );
            }
        }
    }

    Ok(())
}

async fn open(opts: &ScopeOpts) -> Result<Session> {
    Session::open(
        &opts.config_paths,
        opts.account.as_deref(),
        opts.region.as_deref(),
        &opts.sim_state,
    )
    .await
}

async fn run(opts: ScopeOpts, direction: Direction, dry_run: bool) -> Result<()> {
    let s = open(&opts).await?;
    if dry_run {
        let plan = s.engine.plan(&s.scope, direction).await?;
        println!("{}", serde_json::to_string_pretty(&plan)?);
        return Ok(());
    }
    let out = match direction {
        Direction::Apply => s.engine.apply(&s.scope).await,
        Direction::Sync => s.engine.sync(&s.scope).await,
    };
    let concluded = s.conclude(Some(out.as_ref())).await;
    print_outcome(out).and(concluded)
}

/// Print the outcome as JSON and surface the engine error, if any.
fn print_outcome<T: Serialize>(out: Result<T, EngineError>) -> Result<()> {
    match out {
        Ok(v) => {
            println!("{}", serde_json::to_string_pretty(&v)?);
            Ok(())
        }
        Err(e) => {
            if let Some(report) = e.report() {
                println!("{}", serde_json::to_string_pretty(report)?);
            }
            Err(e.into())
        }
    }
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();
}
