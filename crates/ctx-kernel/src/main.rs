//! Command line entry point: simulate, capture and inspect snapshots

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context as _, Result};
use bytes::Bytes;
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use ctx_kernel::harness::{demo_registry, SimulatorConfig, StampHandler};
use ctx_kernel::logging::init_tracing;
use ctx_kernel::prelude::*;
use ctx_kernel::snapshot::MessageRecord;

fn cli() -> Command {
    Command::new("ctx-kernel")
        .version(ctx_kernel::VERSION)
        .about("Context snapshot and restore toolkit")
        .arg(
            Arg::new("config")
                .long("config")
                .global(true)
                .value_parser(value_parser!(PathBuf))
                .help("Engine configuration file (TOML)"),
        )
        .subcommand_required(true)
        .subcommand(
            Command::new("simulate")
                .about("Save and restore random exchanges between two engines")
                .arg(
                    Arg::new("exchanges")
                        .long("exchanges")
                        .default_value("1000")
                        .value_parser(value_parser!(u64))
                        .help("Number of exchanges to simulate"),
                )
                .arg(
                    Arg::new("seed")
                        .long("seed")
                        .default_value("42")
                        .value_parser(value_parser!(u64))
                        .help("Random seed for reproducibility"),
                )
                .arg(
                    Arg::new("replay-rate")
                        .long("replay-rate")
                        .default_value("0.1")
                        .value_parser(value_parser!(f64))
                        .help("Share of records restored twice"),
                )
                .arg(
                    Arg::new("corruption-rate")
                        .long("corruption-rate")
                        .default_value("0.05")
                        .value_parser(value_parser!(f64))
                        .help("Share of records corrupted before restore"),
                )
                .arg(
                    Arg::new("stop-on-violation")
                        .long("stop-on-violation")
                        .action(ArgAction::SetTrue)
                        .help("Stop simulation on first violation"),
                ),
        )
        .subcommand(
            Command::new("capture")
                .about("Write the snapshot of one demo message to a file")
                .arg(
                    Arg::new("out")
                        .required(true)
                        .value_parser(value_parser!(PathBuf))
                        .help("Destination file"),
                ),
        )
        .subcommand(
            Command::new("inspect")
                .about("Decode a message snapshot and print its outline")
                .arg(
                    Arg::new("file")
                        .required(true)
                        .value_parser(value_parser!(PathBuf))
                        .help("Snapshot file"),
                )
                .arg(
                    Arg::new("json")
                        .long("json")
                        .action(ArgAction::SetTrue)
                        .help("Output as JSON"),
                ),
        )
}

fn load_config(matches: &ArgMatches) -> Result<EngineConfig> {
    match matches.get_one::<PathBuf>("config") {
        Some(path) => EngineConfig::from_path(path).with_context(|| format!("loading {}", path.display())),
        None => Ok(EngineConfig::default()),
    }
}

fn simulate(args: &ArgMatches, engine: EngineConfig) -> Result<bool> {
    let config = SimulatorConfig {
        seed: args.get_one::<u64>("seed").copied().unwrap_or(42),
        exchanges: args.get_one::<u64>("exchanges").copied().unwrap_or(1000),
        replay_rate: args.get_one::<f64>("replay-rate").copied().unwrap_or(0.1),
        corruption_rate: args.get_one::<f64>("corruption-rate").copied().unwrap_or(0.05),
        stop_on_first_violation: args.get_flag("stop-on-violation"),
        engine,
    };

    println!("Running context snapshot simulator...");
    println!("Exchanges: {}", config.exchanges);
    println!("Seed: {}", config.seed);
    println!();

    let report = ctx_kernel::harness::run_simulator(config)?;
    println!("{}", report.generate_text());
    Ok(report.passed())
}

fn capture(args: &ArgMatches, engine: EngineConfig) -> Result<()> {
    let out = args
        .get_one::<PathBuf>("out")
        .context("missing destination")?;
    let root = ConfigurationContext::new(Arc::new(demo_registry()?)).with_config(engine);
    let account = root.registry().service("Account").cloned();
    let chain = root.registry().flow(Flow::In).phases().to_vec();

    let message = root.create_message_context(Flow::In);
    root.with_message_mut(message, |body| {
        body.service = account;
        body.options = Options::default().with_action("urn:demo:bank/transfer");
        body.execution_chain = chain;
        StampHandler::new("cli").stamp(&mut body.self_managed, "captured");
    })?;
    let service = root.fill_service_and_group_context(message)?;
    let operation = root.create_operation_context(service, "transfer")?;
    root.add_message_context(operation, message)?;
    root.set_property(message, "source", serde_json::json!("cli"))?;

    let bytes = write_message(&root, message)?;
    std::fs::write(out, &bytes).with_context(|| format!("writing {}", out.display()))?;
    println!("Wrote {} bytes to {}", bytes.len(), out.display());
    Ok(())
}

fn inspect(args: &ArgMatches) -> Result<()> {
    let path = args.get_one::<PathBuf>("file").context("missing snapshot file")?;
    let data = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    let restored = Restored::<MessageRecord>::read(Bytes::from(data))?;
    let summary = restored.record().summary();

    if args.get_flag("json") {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    println!("Message snapshot: {}", path.display());
    println!("  Log id: {}", summary.log_id);
    println!("  Message id: {}", summary.message_id.as_deref().unwrap_or("-"));
    println!("  Flow: {:?}", summary.flow);
    println!("  Service: {}", summary.service.as_deref().unwrap_or("-"));
    println!("  Operation: {}", summary.operation.as_deref().unwrap_or("-"));
    println!("  Operation key: {}", summary.operation_key.as_deref().unwrap_or("-"));
    println!("  Chain length: {}", summary.chain_length);
    println!("  Executed phases: {}", summary.executed_phases);
    println!("  Handler data: {}", summary.self_managed.join(", "));
    println!("  Properties: {}", summary.properties.join(", "));
    println!("  Embedded messages: {}", summary.embedded_labels.join(", "));
    println!("  Isolated messages: {}", summary.isolated_labels.join(", "));
    Ok(())
}

fn main() -> Result<()> {
    let matches = cli().get_matches();
    let config = load_config(&matches)?;
    init_tracing(&config).map_err(|err| anyhow::anyhow!(err))?;

    match matches.subcommand() {
        Some(("simulate", args)) => {
            let passed = simulate(args, config)?;
            std::process::exit(if passed { 0 } else { 1 });
        }
        Some(("capture", args)) => capture(args, config),
        Some(("inspect", args)) => inspect(args),
        _ => {
            cli().print_help()?;
            Ok(())
        }
    }
}
