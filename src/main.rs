use chess_rl::config::TrainingConfig;
use chess_rl::controller::{self, TrainingController};
use chess_rl::error::Result;
use chess_rl::logging::setup_logging;
use chess_rl::opponents::OpponentSpec;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "chess-rl", version, about = "Chess self-play RL training platform")]
struct Cli {
    /// Path to a JSON configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log level when RUST_LOG is unset
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Write logs to rotating files in this directory instead of the terminal
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the training loop from scratch
    Train {
        /// Master seed override
        #[arg(long)]
        seed: Option<u64>,

        /// Iteration cap override
        #[arg(long)]
        iterations: Option<u64>,

        /// Checkpoint directory override
        #[arg(long)]
        checkpoint_dir: Option<PathBuf>,

        /// Force single-worker deterministic self-play
        #[arg(long, default_value_t = false)]
        deterministic: bool,
    },
    /// Evaluate a checkpoint against a fixed opponent
    Eval {
        /// Checkpoint blob path
        checkpoint: PathBuf,

        /// Opponent: random, heuristic, minimax:D
        #[arg(long, default_value = "heuristic")]
        opponent: String,

        /// Number of games
        #[arg(long, default_value_t = 40)]
        games: usize,
    },
    /// Resume training from a checkpoint
    Resume {
        /// Checkpoint blob path
        checkpoint: PathBuf,
    },
    /// Head-to-head comparison between two checkpoints
    Compare {
        /// First checkpoint blob path (plays as the agent)
        ckpt_a: PathBuf,

        /// Second checkpoint blob path (plays as the opponent)
        ckpt_b: PathBuf,

        /// Number of games
        #[arg(long, default_value_t = 40)]
        games: usize,
    },
}

fn load_config(path: Option<&PathBuf>) -> Result<TrainingConfig> {
    match path {
        Some(path) => TrainingConfig::from_file(path),
        None => Ok(TrainingConfig::default()),
    }
}

fn run(cli: Cli) -> Result<()> {
    let config_path = cli.config;
    match cli.command {
        Command::Train {
            seed,
            iterations,
            checkpoint_dir,
            deterministic,
        } => {
            let mut config = load_config(config_path.as_ref())?;
            if let Some(seed) = seed {
                config.seed = Some(seed);
            }
            if let Some(iterations) = iterations {
                config.iterations = iterations;
            }
            if let Some(dir) = checkpoint_dir {
                config.checkpoint.dir = dir;
            }
            if deterministic {
                config.deterministic_mode = true;
            }

            let mut controller = TrainingController::new(config)?;
            let summary = controller.run()?;
            log::info!(
                "[Main] run finished: {} iterations, stop reason {:?}",
                summary.iterations_completed,
                summary.stop_reason
            );
            if let Some(best) = summary.best {
                log::info!(
                    "[Main] best checkpoint {} (performance {:.3})",
                    best.id,
                    best.performance
                );
            }
            Ok(())
        }
        Command::Eval {
            checkpoint,
            opponent,
            games,
        } => {
            let config = load_config(config_path.as_ref())?;
            let spec: OpponentSpec = opponent.parse()?;
            let report = controller::evaluate_checkpoint(&config, &checkpoint, &spec, games)?;
            println!("{}", report.summary());
            Ok(())
        }
        Command::Resume { checkpoint } => {
            let config = load_config(config_path.as_ref())?;
            let mut controller = TrainingController::resume(config, &checkpoint)?;
            let summary = controller.run()?;
            log::info!(
                "[Main] resumed run finished: {} iterations, stop reason {:?}",
                summary.iterations_completed,
                summary.stop_reason
            );
            Ok(())
        }
        Command::Compare {
            ckpt_a,
            ckpt_b,
            games,
        } => {
            let config = load_config(config_path.as_ref())?;
            let compare = controller::compare_checkpoints(&config, &ckpt_a, &ckpt_b, games)?;
            println!("{}", compare.report_a.summary());
            println!("Cohen's h (A vs B win rates): {:.4}", compare.cohen_h);
            Ok(())
        }
    }
}

fn main() {
    let cli = Cli::parse();

    if let Err(error) = setup_logging(&cli.log_level, cli.log_dir.as_deref()) {
        eprintln!("failed to initialize logging: {}", error);
        std::process::exit(1);
    }

    if let Err(error) = run(cli) {
        log::error!("{}", error);
        eprintln!("error: {}", error);
        std::process::exit(error.exit_code());
    }
}
