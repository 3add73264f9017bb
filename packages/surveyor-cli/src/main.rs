//! Surveyor CLI - discover SSH-reachable network devices and write an
//! automation inventory
//!
//! This binary can:
//! - Sweep an address range and write a vendor-grouped inventory
//! - Show how individual addresses would be classified
//! - Display, validate and re-encode existing inventory files

mod output;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use surveyor_core::{
    codec, config, Classifier, Discovery, DiscoveryProgress, Encoding, OctetRangeClassifier,
    ProgressCallback, SurveyConfig, SurveyError,
};

#[derive(Parser, Debug)]
#[command(name = "surveyor")]
#[command(author = "Surveyor Maintainers")]
#[command(version)]
#[command(about = "Discover SSH-reachable network devices and build an automation inventory")]
#[command(long_about = "
Surveyor sweeps an address range for live hosts, keeps the ones that accept
connections on the management port (SSH by default), classifies them by
vendor and device class, and writes a hierarchical inventory.

Quick start:
  1. Discover devices:    surveyor discover 192.168.1.0/24
  2. Inspect the result:  surveyor show discovered_inventory.yml
  3. Check invariants:    surveyor validate discovered_inventory.yml

Credentials are written as ${vault:...} placeholders, never as literals.
")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output format
    #[arg(short, long, global = true, default_value = "text")]
    pub format: OutputFormat,

    /// Config file (defaults to $SURVEYOR_CONFIG or the per-user config)
    #[arg(short, long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,
}

#[derive(Clone, Copy, Debug, PartialEq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output
    Text,
    /// JSON output for scripting
    Json,
}

/// Inventory file encoding
#[derive(Clone, Copy, Debug, PartialEq, ValueEnum)]
pub enum EncodingArg {
    /// Nested YAML mapping
    #[value(alias = "yml")]
    Yaml,
    /// Nested JSON mapping
    Json,
    /// Flat INI sections
    Ini,
}

impl From<EncodingArg> for Encoding {
    fn from(arg: EncodingArg) -> Self {
        match arg {
            EncodingArg::Yaml => Encoding::Yaml,
            EncodingArg::Json => Encoding::Json,
            EncodingArg::Ini => Encoding::Ini,
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Discover devices in a CIDR range and write the inventory
    #[command(alias = "scan")]
    Discover(DiscoverArgs),

    /// Show how addresses would be classified
    Classify {
        /// Addresses to classify
        #[arg(required = true)]
        addresses: Vec<String>,
    },

    /// Print the group tree of an inventory file
    Show {
        file: PathBuf,

        /// Inventory encoding (default: inferred from the file extension)
        #[arg(short, long)]
        encoding: Option<EncodingArg>,
    },

    /// Check an inventory file and print statistics
    Validate {
        file: PathBuf,

        /// Inventory encoding (default: inferred from the file extension)
        #[arg(short, long)]
        encoding: Option<EncodingArg>,
    },

    /// Re-encode an inventory file
    Convert {
        input: PathBuf,
        output: PathBuf,

        /// Input encoding (default: inferred from the input extension)
        #[arg(long)]
        from: Option<EncodingArg>,

        /// Output encoding (default: inferred from the output extension)
        #[arg(long)]
        to: Option<EncodingArg>,
    },

    /// Show configuration paths and settings
    Config,
}

/// Arguments for `surveyor discover`; flags override the config file
#[derive(Args, Debug)]
pub struct DiscoverArgs {
    /// Range to sweep, e.g. 192.168.1.0/24
    pub range: String,

    /// Inventory file to write
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Inventory encoding (default: inferred from the output path)
    #[arg(short, long)]
    pub encoding: Option<EncodingArg>,

    /// Maximum ping probes in flight
    #[arg(short, long)]
    pub workers: Option<usize>,

    /// Maximum TCP connects in flight (default: half of --workers)
    #[arg(long)]
    pub service_workers: Option<usize>,

    /// Management port that must accept connections
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Ping reply timeout in milliseconds
    #[arg(long, value_name = "MS")]
    pub ping_timeout_ms: Option<u64>,

    /// TCP connect timeout in milliseconds
    #[arg(long, value_name = "MS")]
    pub connect_timeout_ms: Option<u64>,
}

impl DiscoverArgs {
    /// Apply command-line overrides on top of the loaded configuration
    fn apply(&self, config: &mut SurveyConfig) {
        if let Some(workers) = self.workers {
            config.reachability.workers = workers;
        }
        if let Some(service_workers) = self.service_workers {
            config.service.workers = Some(service_workers);
        }
        if let Some(port) = self.port {
            config.service.port = port;
        }
        if let Some(ms) = self.ping_timeout_ms {
            config.reachability.timeout_ms = ms;
        }
        if let Some(ms) = self.connect_timeout_ms {
            config.service.timeout_ms = ms;
        }
        if let Some(path) = &self.output {
            config.output.path = path.clone();
            config.output.encoding = None;
        }
        if let Some(encoding) = self.encoding {
            config.output.encoding = Some(encoding.into());
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Logs go to stderr so stdout stays parseable
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("surveyor={},surveyor_core={}", log_level, log_level).into()
            }),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let result = match &cli.command {
        Commands::Discover(args) => cmd_discover(&cli, args).await,
        Commands::Classify { addresses } => cmd_classify(&cli, addresses),
        Commands::Show { file, encoding } => cmd_show(&cli, file, *encoding),
        Commands::Validate { file, encoding } => cmd_validate(&cli, file, *encoding),
        Commands::Convert {
            input,
            output,
            from,
            to,
        } => cmd_convert(&cli, input, output, *from, *to),
        Commands::Config => cmd_config(&cli),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            let code = exit_code(&e);
            match cli.format {
                OutputFormat::Text => eprintln!("Error: {:#}", e),
                OutputFormat::Json => {
                    println!("{}", serde_json::json!({
                        "status": "error",
                        "code": e.downcast_ref::<SurveyError>().map_or("ERROR", |s| s.code()),
                        "message": format!("{:#}", e),
                    }));
                }
            }
            ExitCode::from(code)
        }
    }
}

/// Map a failure to the process exit status
fn exit_code(error: &anyhow::Error) -> u8 {
    match error.downcast_ref::<SurveyError>() {
        Some(SurveyError::InvalidRange { .. }) | Some(SurveyError::Config { .. }) => 2,
        Some(SurveyError::SerializationIo { .. }) => 3,
        Some(e) if e.is_inventory_error() => 4,
        _ => 1,
    }
}

fn load_config(cli: &Cli) -> Result<SurveyConfig> {
    Ok(SurveyConfig::load(cli.config.as_deref())?)
}

async fn cmd_discover(cli: &Cli, args: &DiscoverArgs) -> Result<()> {
    let mut config = load_config(cli)?;
    args.apply(&mut config);
    config.validate(Path::new("command line"))?;
    tracing::debug!("Configuration loaded from {}", config.source);

    let output_path = config.output.path.clone();
    let output_encoding = config.output.effective_encoding();

    match cli.format {
        OutputFormat::Text => println!(
            "Discovering devices in {} (port {}, {} ping / {} connect workers)...",
            args.range,
            config.service.port,
            config.reachability.workers,
            config.service_workers()
        ),
        OutputFormat::Json => {}
    }

    // Create progress callback for text mode
    let progress_callback: Option<ProgressCallback> = match cli.format {
        OutputFormat::Text => Some(Box::new(|progress: DiscoveryProgress| {
            if let Some(pct) = progress.percent {
                println!("  [{:>3}%] {}", pct, progress.message);
            } else {
                println!("  {}", progress.message);
            }
        })),
        OutputFormat::Json => None,
    };

    let discovery = Discovery::new(config);
    let report = tokio::select! {
        report = discovery.run_with_progress(&args.range, progress_callback) => report?,
        _ = tokio::signal::ctrl_c() => anyhow::bail!("Discovery interrupted"),
    };

    codec::write_inventory(&output_path, &report.tree, output_encoding)?;

    match cli.format {
        OutputFormat::Text => output::print_report(&report, &output_path, output_encoding),
        OutputFormat::Json => {
            println!("{}", output::report_json(&report, &output_path, output_encoding));
        }
    }

    Ok(())
}

fn cmd_classify(cli: &Cli, addresses: &[String]) -> Result<()> {
    let config = load_config(cli)?;
    let classifier = OctetRangeClassifier::new(&config.inventory.secret_store);

    let mut rows = Vec::new();
    for raw in addresses {
        let address: IpAddr = raw.trim().parse().map_err(|_| SurveyError::InvalidRange {
            input: raw.clone(),
            reason: "not an IP address".to_string(),
        })?;
        rows.push((address, classifier.classify(address)));
    }

    match cli.format {
        OutputFormat::Text => {
            for (address, classification) in &rows {
                println!("{}", output::classification_line(*address, classification));
            }
        }
        OutputFormat::Json => {
            let items: Vec<_> = rows
                .iter()
                .map(|(address, c)| output::classification_json(*address, c))
                .collect();
            println!("{}", serde_json::Value::Array(items));
        }
    }

    Ok(())
}

fn cmd_show(cli: &Cli, file: &Path, encoding: Option<EncodingArg>) -> Result<()> {
    let tree = codec::read_inventory(file, encoding.map(Into::into))?;

    match cli.format {
        OutputFormat::Text => {
            for line in output::tree_lines(&tree) {
                println!("{}", line);
            }
        }
        OutputFormat::Json => {
            let rendered = codec::render(&tree, Encoding::Json)?;
            let document: serde_json::Value =
                serde_json::from_str(&rendered).context("Failed to re-read rendered inventory")?;
            println!("{}", document);
        }
    }

    Ok(())
}

fn cmd_validate(cli: &Cli, file: &Path, encoding: Option<EncodingArg>) -> Result<()> {
    let tree = codec::read_inventory(file, encoding.map(Into::into))?;
    let stats = tree.stats();

    match cli.format {
        OutputFormat::Text => {
            println!("{}: valid", file.display());
            println!();
            output::print_stats(&stats);
        }
        OutputFormat::Json => {
            println!("{}", serde_json::json!({
                "status": "valid",
                "file": file.display().to_string(),
                "stats": stats,
            }));
        }
    }

    Ok(())
}

fn cmd_convert(
    cli: &Cli,
    input: &Path,
    output: &Path,
    from: Option<EncodingArg>,
    to: Option<EncodingArg>,
) -> Result<()> {
    let tree = codec::read_inventory(input, from.map(Into::into))?;
    let target = to
        .map(Encoding::from)
        .or_else(|| Encoding::from_path(output))
        .unwrap_or_default();
    codec::write_inventory(output, &tree, target)?;

    match cli.format {
        OutputFormat::Text => println!(
            "Converted {} -> {} ({}, {} hosts)",
            input.display(),
            output.display(),
            target,
            tree.host_count()
        ),
        OutputFormat::Json => {
            println!("{}", serde_json::json!({
                "status": "converted",
                "input": input.display().to_string(),
                "output": output.display().to_string(),
                "encoding": target.as_str(),
                "hosts": tree.host_count(),
            }));
        }
    }

    Ok(())
}

fn cmd_config(cli: &Cli) -> Result<()> {
    let survey_config = load_config(cli)?;
    let config_path = config::config_file_path_string();

    match cli.format {
        OutputFormat::Text => {
            println!("Configuration");
            println!("=============");
            println!();
            println!("Config file:      {}", config_path);
            println!("Loaded from:      {}", survey_config.source);
            println!("Max hosts:        {}", survey_config.max_hosts);
            println!(
                "Reachability:     {} workers, {} ms timeout",
                survey_config.reachability.workers, survey_config.reachability.timeout_ms
            );
            println!(
                "Service:          port {}, {} workers, {} ms timeout",
                survey_config.service.port,
                survey_config.service_workers(),
                survey_config.service.timeout_ms
            );
            println!("Secret store:     {}", survey_config.inventory.secret_store);
            println!(
                "Output:           {} ({})",
                survey_config.output.path.display(),
                survey_config.output.effective_encoding()
            );
            println!();
            println!("Environment variables:");
            println!("  {} - Override config file path", config::ENV_CONFIG_PATH);
            println!("  RUST_LOG - Override log filter");
            println!();
            println!("Example config.toml:");
            println!();
            println!("{}", config::generate_example_config());
        }
        OutputFormat::Json => {
            println!("{}", serde_json::json!({
                "config_file": config_path,
                "source": survey_config.source.to_string(),
                "effective": survey_config,
                "service_workers": survey_config.service_workers(),
            }));
        }
    }

    Ok(())
}
