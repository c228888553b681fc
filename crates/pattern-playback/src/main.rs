//! Terminal playback of agent pattern runs
//!
//! Lists the built-in patterns or plays one run, printing node transitions
//! and messages as they happen. In step mode each Enter press crosses one
//! edge.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use pattern_engine::{
    catalog, ChannelEventSink, EngineConfig, ExecutionMode, MockWorkSimulator, PatternGraph,
    Result, RunController, RunOutcome, SimulationEvent, SpeedFactor,
};
use tokio::io::{AsyncBufReadExt, BufReader};

#[derive(Parser, Debug)]
#[command(
    name = "pattern-playback",
    version,
    about = "Play back simulated runs of agent design patterns"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List the built-in patterns
    List,
    /// Play one run of a pattern
    Run(RunArgs),
}

#[derive(clap::Args, Debug)]
struct RunArgs {
    /// Built-in pattern id (see `list`)
    #[arg(required_unless_present = "pattern_file")]
    pattern: Option<String>,

    /// Load the pattern from a JSON file instead
    #[arg(long, conflicts_with = "pattern")]
    pattern_file: Option<PathBuf>,

    /// The user request fed to the input node
    #[arg(short, long, default_value = "Explain how rainbows form")]
    input: String,

    /// Playback speed: 0.5, 1 or 2
    #[arg(short, long)]
    speed: Option<f64>,

    /// Wait for Enter before crossing each edge
    #[arg(long)]
    step: bool,

    /// Force a node to fail (repeatable)
    #[arg(long = "fail", value_name = "NODE")]
    fail: Vec<String>,

    /// Seed for reproducible latency and routing
    #[arg(long)]
    seed: Option<u64>,

    /// Engine configuration file (JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let cli = Cli::parse();
    let result = match cli.command {
        Command::List => {
            list();
            Ok(true)
        }
        Command::Run(args) => run(args).await,
    };

    match result {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            log::error!("{}", e);
            std::process::exit(2);
        }
    }
}

fn list() {
    for pattern in catalog::builtin_patterns() {
        println!("{:<22} {}", pattern.id, pattern.name);
        println!("{:<22} {}", "", pattern.description);
    }
}

fn load_pattern(args: &RunArgs) -> Result<PatternGraph> {
    match (&args.pattern_file, &args.pattern) {
        (Some(path), _) => {
            let json = std::fs::read_to_string(path)?;
            PatternGraph::from_json_str(&json)
        }
        (None, Some(id)) => catalog::find(id),
        (None, None) => Err(pattern_engine::EngineError::UnknownPattern(String::new())),
    }
}

/// Play one run; returns whether it completed
async fn run(args: RunArgs) -> Result<bool> {
    let mut config = match &args.config {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default(),
    };
    if let Some(speed) = args.speed {
        config.speed = SpeedFactor::try_from(speed)?;
    }
    if args.step {
        config.mode = ExecutionMode::Step;
    }

    let pattern = load_pattern(&args)?;
    let mut simulator = match args.seed {
        Some(seed) => MockWorkSimulator::with_seed(config.simulation.clone(), seed),
        None => MockWorkSimulator::new(config.simulation.clone()),
    };
    for node_id in &args.fail {
        if pattern.find_node(node_id).is_none() {
            log::warn!("--fail {}: the pattern has no such node", node_id);
        }
        simulator = simulator.force_failure(node_id.clone());
    }

    let mut stepping = config.mode == ExecutionMode::Step;
    let (sink, mut events) = ChannelEventSink::new();
    let controller = RunController::builder(pattern)
        .config(config)
        .simulator(simulator)
        .event_sink(Arc::new(sink))
        .build();

    let pattern = controller.pattern();
    println!("{} - {}", pattern.name, pattern.description);
    controller.start(args.input)?;

    let label = |node_id: &str| {
        pattern
            .find_node(node_id)
            .map(|n| n.label.clone())
            .unwrap_or_else(|| node_id.to_string())
    };

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else { break };
                match &event {
                    SimulationEvent::NodeStarted { node_id, iteration, .. } => {
                        println!("[{:>3}] {} ...", iteration, label(node_id));
                    }
                    SimulationEvent::NodeCompleted { node_id, result, .. } => {
                        println!("      {} -> {}", label(node_id), result);
                    }
                    SimulationEvent::NodeFailed { node_id, error, .. } => {
                        println!("      {} FAILED: {}", label(node_id), error);
                    }
                    SimulationEvent::Rerouted { to_node, .. } => {
                        println!("      rerouting to {}", label(to_node));
                    }
                    SimulationEvent::MessageEmitted { edge_id, kind, .. } => {
                        log::debug!("{} message on {}", kind.label(), edge_id);
                    }
                    SimulationEvent::AwaitingStep { edge_id, .. } => {
                        let edge = pattern.find_edge(edge_id);
                        let target = edge.map(|e| label(&e.target)).unwrap_or_default();
                        println!("      press Enter to continue to {}", target);
                    }
                    SimulationEvent::RunCompleted { iterations, .. }
                    | SimulationEvent::RunFailed { iterations, .. } => {
                        println!("Run finished after {} activations", iterations);
                    }
                    _ => {}
                }
                if event.is_terminal() {
                    break;
                }
            }
            line = stdin.next_line(), if stepping => match line {
                Ok(Some(_)) => {
                    if !controller.advance_step() {
                        println!("      (nothing to advance yet)");
                    }
                }
                Ok(None) | Err(_) => {
                    log::warn!("Standard input closed; stopping the run");
                    stepping = false;
                    controller.reset();
                }
            },
        }
    }

    match controller.snapshot().outcome {
        RunOutcome::Completed { output } => {
            println!("\nFinal output: {}", output);
            Ok(true)
        }
        RunOutcome::Failed { error } => {
            println!("\nRun failed: {}", error);
            Ok(false)
        }
        RunOutcome::Idle | RunOutcome::Running => Ok(false),
    }
}
