//! cms-upgrade CLI - run CMS install and upgrade plugins.

use clap::{Parser, Subcommand};
use cms_upgrade::checksum::sha256_file;
use cms_upgrade::drivers;
use cms_upgrade::{
    Config, Dispatcher, PluginDocument, PluginRegistry, ResponseKind, RunReport, SnapshotBuilder,
    SortKey, UpgradeError,
};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{info, Level};
use tracing_subscriber::fmt::format::FmtSpan;

#[derive(Parser)]
#[command(name = "cms-upgrade")]
#[command(about = "Run CMS install and upgrade plugins")]
#[command(version)]
struct Cli {
    /// Path to YAML configuration file
    #[arg(short, long, default_value = "upgrade.yaml")]
    config: PathBuf,

    /// Plugin document, overriding upgrade.plugins from the configuration
    #[arg(long)]
    plugins: Option<PathBuf>,

    /// Output JSON result to stdout
    #[arg(long)]
    output_json: bool,

    /// Log format: text or json
    #[arg(long, default_value = "text")]
    log_format: String,

    /// Log verbosity: debug, info, warn, error
    #[arg(long, default_value = "warn")]
    verbosity: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run plugin modules
    Run {
        /// Only run this module (repeatable; default: all modules)
        #[arg(long = "module")]
        modules: Vec<String>,

        /// Compute and log changes without writing them
        #[arg(long)]
        dry_run: bool,
    },

    /// List modules and plugins of the plugin document
    List,

    /// List registered plugin identifiers
    Plugins,

    /// Print a table snapshot as JSON
    Snapshot {
        /// Table name, optionally schema-qualified
        table: String,

        /// Sort column, append " DESC" for descending (repeatable)
        #[arg(long = "order-by")]
        order_by: Vec<String>,
    },

    /// Print SHA-256 digests of files
    Checksum {
        /// Files to hash
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{}", e.format_detailed());
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run() -> Result<ExitCode, UpgradeError> {
    let cli = Cli::parse();

    setup_logging(&cli.verbosity, &cli.log_format)
        .map_err(|e| UpgradeError::Config(e.to_string()))?;

    let registry = PluginRegistry::with_builtins();

    match &cli.command {
        Commands::Plugins => {
            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&registry.names())?);
            } else {
                for name in registry.names() {
                    println!("{}", name);
                }
            }
            return Ok(ExitCode::SUCCESS);
        }
        Commands::Checksum { files } => {
            for file in files {
                let digest = sha256_file(file)?;
                println!("{}  {}", digest, file.display());
            }
            return Ok(ExitCode::SUCCESS);
        }
        _ => {}
    }

    let mut config = Config::load(&cli.config)?;
    if let Some(plugins) = &cli.plugins {
        config.upgrade.plugins = plugins.clone();
    }
    info!("Loaded configuration from {:?}", cli.config);

    match cli.command {
        Commands::Plugins | Commands::Checksum { .. } => unreachable!(), // Handled above
        Commands::List => {
            let document = config.load_plugins()?;
            list_document(&document, &registry, cli.output_json)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Run { modules, dry_run } => {
            if dry_run {
                config.upgrade.dry_run = true;
            }
            let only = if modules.is_empty() {
                config.upgrade.modules.clone()
            } else {
                modules
            };

            let document = config.load_plugins()?;
            let dispatcher = Dispatcher::from_config(&config, registry).await?;
            let report = dispatcher.run(&document, &only).await;
            dispatcher.close().await;
            let report = report?;

            if cli.output_json {
                println!("{}", report.to_json()?);
            } else {
                print_summary(&report);
            }

            if report.has_exception() {
                Ok(ExitCode::from(1))
            } else {
                Ok(ExitCode::SUCCESS)
            }
        }
        Commands::Snapshot { table, order_by } => {
            let repo = config.repository.as_ref().ok_or_else(|| {
                UpgradeError::Config("snapshot needs a repository in the configuration".into())
            })?;
            let order_by = order_by
                .iter()
                .map(|k| SortKey::parse_list(k))
                .collect::<Result<Vec<_>, _>>()?
                .into_iter()
                .flatten()
                .collect();

            let store = drivers::connect(repo).await?;
            let snapshot = SnapshotBuilder::new(store.as_ref())
                .order_by(order_by)
                .capture(&table)
                .await;
            store.close().await;

            match snapshot? {
                Some(snapshot) => {
                    println!("{}", serde_json::to_string_pretty(&snapshot.to_json())?);
                    Ok(ExitCode::SUCCESS)
                }
                None => Err(UpgradeError::Config(format!(
                    "table '{}' does not exist in the repository",
                    table
                ))),
            }
        }
    }
}

fn list_document(
    document: &PluginDocument,
    registry: &PluginRegistry,
    json: bool,
) -> Result<(), UpgradeError> {
    if json {
        println!("{}", serde_json::to_string_pretty(document)?);
        return Ok(());
    }

    for module in &document.modules {
        println!("{} ({} plugins)", module.name, module.plugins.len());
        for plugin in &module.plugins {
            let marker = if registry.has(&plugin.class) {
                ""
            } else {
                "  [unknown plugin]"
            };
            println!("  {} -> {}{}", plugin.name, plugin.class, marker);
        }
    }
    Ok(())
}

fn print_summary(report: &RunReport) {
    let status_msg = if report.has_exception() {
        "Upgrade finished with errors"
    } else if report.dry_run {
        "Dry run completed!"
    } else {
        "Upgrade completed!"
    };
    println!("\n{}", status_msg);
    println!("  Run ID: {}", report.run_id);
    println!("  Duration: {:.2}s", report.duration_seconds);
    println!("  Modules: {}", report.modules.len());

    for module in &report.modules {
        println!(
            "  [{}] {} plugins, worst: {}",
            module.module,
            module.plugins.len(),
            module
                .worst()
                .map(|k| k.to_string())
                .unwrap_or_else(|| "-".to_string())
        );
    }

    let failures = report.module_failures();
    let issues = report.issues();
    if !issues.is_empty() || !failures.is_empty() {
        println!("\nIssues:");
        for (module, failure) in failures {
            println!("  EXCEPTION {}: {}", module, failure);
        }
        for (module, plugin) in issues {
            if let Some(response) = &plugin.response {
                let tag = match response.kind {
                    ResponseKind::Exception => "EXCEPTION",
                    ResponseKind::Warning => "WARNING",
                    ResponseKind::Success => "SUCCESS",
                };
                println!("  {} {}/{}: {}", tag, module, plugin.plugin, response.message);
            }
        }
    }
}

fn setup_logging(verbosity: &str, format: &str) -> Result<(), String> {
    let level = match verbosity.to_lowercase().as_str() {
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    // Logs go to stderr so --output-json stays parseable.
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_span_events(FmtSpan::CLOSE)
        .with_target(false)
        .with_writer(std::io::stderr);

    if format == "json" {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    Ok(())
}
