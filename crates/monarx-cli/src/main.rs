use anyhow::{Context, Result};
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use colored::*;
use monarx_core::render::{
    format_process_name, progress_bar, MetricLevel, MetricLine, ProcessRow, PROCESS_NAME_WIDTH,
};
use monarx_core::{
    rank, render_compact, render_detailed, AlertEngine, DetailedView, MemoryPressure,
    MetricSource, ProcessController, RenderInput, Sample, SystemSampler, VERSION,
};
use monarx_daemon::config::DEFAULT_CONFIG_PATH;
use monarx_daemon::{Config, EngineSettings};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Grace period before `kill --force` escalates to SIGKILL
const FORCE_GRACE: Duration = Duration::from_secs(2);

#[derive(Parser)]
#[command(name = "monarx")]
#[command(author = "Monarx Team")]
#[command(version = VERSION)]
#[command(about = "System pressure monitor - CLI", long_about = None)]
struct Cli {
    /// Daemon configuration to take limits and pressure policy from
    #[arg(short, long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show CPU, memory and swap status with pressure classification
    Status {
        /// Print the detailed view as JSON
        #[arg(long)]
        json: bool,

        /// Print a plain-text report instead
        #[arg(long, conflicts_with = "json")]
        report: bool,
    },

    /// Show top processes by CPU and memory
    Top {
        /// Number of processes per list (defaults to the configured top_n)
        #[arg(short)]
        n: Option<usize>,
    },

    /// Terminate a process (SIGTERM)
    Kill {
        /// Process id
        pid: u32,

        /// Escalate to SIGKILL if the process survives SIGTERM
        #[arg(long)]
        force: bool,
    },

    /// Generate shell completions
    Completions {
        /// Target shell
        shell: Shell,
    },

    /// Show version information
    Version,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Status { json, report }) => show_status(&cli.config, json, report)?,
        Some(Commands::Top { n }) => show_top(&cli.config, n)?,
        Some(Commands::Kill { pid, force }) => kill(pid, force),
        Some(Commands::Completions { shell }) => {
            let mut cmd = Cli::command();
            clap_complete::generate(shell, &mut cmd, "monarx", &mut std::io::stdout());
        }
        Some(Commands::Version) => {
            println!("Monarx v{}", VERSION);
            println!("System pressure monitor");
        }
        None => {
            // Default: show status
            show_status(&cli.config, false, false)?;
        }
    }

    Ok(())
}

/// Limits and pressure policy the daemon would run with
fn load_settings(path: &Path) -> Result<EngineSettings> {
    let config = Config::load(path)
        .with_context(|| format!("Failed to load configuration {:?}", path))?;
    Ok(EngineSettings::from(&config))
}

/// Sample the system once and render it against `settings`
fn take_view(path: &Path, top_n: Option<usize>) -> Result<(String, DetailedView)> {
    let settings = load_settings(path)?;

    // The sampler waits out the CPU warm-up gap itself
    let sample = SystemSampler::new()
        .sample()
        .context("Failed to sample system")?;

    Ok(render_view(
        &sample,
        &settings,
        top_n.unwrap_or(settings.top_n),
    ))
}

fn render_view(sample: &Sample, settings: &EngineSettings, top_n: usize) -> (String, DetailedView) {
    let policy = &settings.policy;
    let pressure = policy.classify(&sample.memory, sample.swap_percent);
    let ranking = rank(&sample.processes, top_n);

    // Single-shot: firing simply means above the limit
    let mut alerts = AlertEngine::new(settings.limits, Duration::from_secs(0));
    alerts.evaluate_sample(sample);

    let input = RenderInput {
        sample,
        pressure,
        lag_risk: policy.lag_risk(pressure, sample.cpu_percent),
        ranking: &ranking,
        alerts: alerts.states(),
        limits: alerts.limits(),
        policy,
    };

    (render_compact(&input), render_detailed(&input))
}

fn show_status(config: &Path, json: bool, report: bool) -> Result<()> {
    let (compact, view) = take_view(config, None)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&view)?);
        return Ok(());
    }
    if report {
        println!("{}", view.report());
        return Ok(());
    }

    println!("{}", "=== Monarx Status ===".green().bold());
    println!("{}", compact.bold());
    println!();

    let title = view.health_title();
    let title = match view.pressure {
        MemoryPressure::Normal => title.green(),
        MemoryPressure::Warning => title.yellow(),
        MemoryPressure::Stressed => title.red(),
    };
    println!("{}", title.bold());
    println!();

    print_metric("CPU ", &view.cpu, None);
    println!("  GPU · {}", view.gpu);
    print_metric(
        "RAM ",
        &view.ram,
        Some(view.total_memory_bytes as f64 / GB),
    );
    for row in &view.breakdown {
        let line = format!(
            "  {:<11} {:.2} GB",
            row.category.label(),
            row.bytes as f64 / GB
        );
        if row.flagged {
            println!("{}  {}", line, "(HIGH)".red().bold());
        } else {
            println!("{}", line);
        }
    }
    print_metric("SWAP", &view.swap, None);

    println!();
    println!(
        "Thresholds: CPU {:.0}% | MEM {:.0}% | SWAP {:.0}%",
        view.thresholds.cpu, view.thresholds.memory, view.thresholds.swap
    );
    println!();
    print_rows("🔥 Top CPU:", &view.top_cpu);
    print_rows("🧠 Top Memory:", &view.top_mem);

    Ok(())
}

fn show_top(config: &Path, n: Option<usize>) -> Result<()> {
    let (_, view) = take_view(config, n)?;

    println!("{}", "=== Monarx Top Processes ===".green().bold());
    print_rows("🔥 Top CPU:", &view.top_cpu);
    print_rows("🧠 Top Memory:", &view.top_mem);
    Ok(())
}

fn kill(pid: u32, force: bool) {
    let outcome = if force {
        ProcessController::terminate_and_wait(pid, FORCE_GRACE)
    } else {
        ProcessController::terminate(pid)
    };

    match outcome {
        Ok(()) => println!("{}", format!("✅ Process {} terminated", pid).green()),
        Err(e) if e.is_benign() => {
            println!("{}", format!("✅ Process {} already gone", pid).green())
        }
        Err(e) => {
            println!("{}", format!("❌ {}", e).red());
            std::process::exit(1);
        }
    }
}

const GB: f64 = 1024.0 * 1024.0 * 1024.0;

fn print_metric(label: &str, line: &MetricLine, total_gb: Option<f64>) {
    let bar = progress_bar(line.percent);
    let value = format!("{:.1}% ({})", line.percent, line.level);
    let value = match line.level {
        MetricLevel::Ok => value.green(),
        MetricLevel::Warn => value.yellow(),
        MetricLevel::High => value.red().bold(),
    };
    let alert = if line.firing { " ⚠️" } else { "" };

    match total_gb {
        Some(total) => println!("{}  {}  {}{}  {:.1} GB", label, bar, value, alert, total),
        None => println!("{}  {}  {}{}", label, bar, value, alert),
    }
}

fn print_rows(title: &str, rows: &[ProcessRow]) {
    println!("{}", title.cyan());
    if rows.is_empty() {
        println!("  (none)");
    }
    for row in rows {
        let gpu = if row.gpu {
            " [GPU]".magenta().to_string()
        } else {
            String::new()
        };
        println!(
            "  {:>7}  {}{}: {:.1}%",
            row.pid,
            format_process_name(&row.name, PROCESS_NAME_WIDTH),
            gpu,
            row.percent
        );
    }
    println!();
}
