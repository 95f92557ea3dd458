//! Grid command center entry point: CLI wiring for headless runs, the HTTP
//! server and the dashboard.

use std::path::Path;
use std::process;
use std::sync::Arc;
use std::time::Duration;

use grid_command_center::config::ScenarioConfig;
use grid_command_center::io::export::export_csv;
use grid_command_center::logging;
use grid_command_center::service::GridService;
use grid_command_center::sim::clock::Clock;
use grid_command_center::sim::engine::Engine;

/// Headless run length when `--duration-secs` is not given.
const DEFAULT_DURATION_SECS: u64 = 60;

/// Parsed CLI arguments.
struct CliArgs {
    scenario_path: Option<String>,
    preset: Option<String>,
    seed_override: Option<u64>,
    duration_secs: u64,
    auto_confirm: bool,
    telemetry_out: Option<String>,
    #[cfg(feature = "api")]
    serve: bool,
    #[cfg(feature = "api")]
    port: u16,
    #[cfg(feature = "tui")]
    tui: bool,
}

fn print_help() {
    eprintln!("grid-command-center: feeder monitoring with DER dispatch");
    eprintln!();
    eprintln!("Usage: grid-command-center [OPTIONS]");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  --scenario <path>        Load scenario from TOML config file");
    eprintln!("  --preset <name>          Use a built-in preset (london, stressed)");
    eprintln!("  --seed <u64>             Override random seed");
    eprintln!("  --duration-secs <u64>    Headless run length in virtual seconds (default: 60)");
    eprintln!("  --auto-confirm           Confirm auto-activation requests without an operator");
    eprintln!("  --telemetry-out <path>   Export per-tick feeder telemetry to CSV");
    #[cfg(feature = "api")]
    {
        eprintln!("  --serve                  Run the periodic tasks and serve the REST API");
        eprintln!("  --port <u16>             API server port (default: 5000)");
    }
    #[cfg(feature = "tui")]
    eprintln!("  --tui                    Launch the live dashboard");
    eprintln!("  --help                   Show this help message");
    eprintln!();
    eprintln!("If no --scenario or --preset is given, the london preset is used.");
    eprintln!(
        "Log level comes from {} (falling back to RUST_LOG).",
        logging::LOG_ENV
    );
}

fn require_value<'a>(args: &'a [String], i: usize, flag: &str, what: &str) -> &'a str {
    match args.get(i) {
        Some(v) => v,
        None => {
            eprintln!("error: {flag} requires {what}");
            process::exit(1);
        }
    }
}

fn parse_args() -> CliArgs {
    let args: Vec<String> = std::env::args().collect();
    let mut cli = CliArgs {
        scenario_path: None,
        preset: None,
        seed_override: None,
        duration_secs: DEFAULT_DURATION_SECS,
        auto_confirm: false,
        telemetry_out: None,
        #[cfg(feature = "api")]
        serve: false,
        #[cfg(feature = "api")]
        port: 5000,
        #[cfg(feature = "tui")]
        tui: false,
    };

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--help" | "-h" => {
                print_help();
                process::exit(0);
            }
            "--scenario" => {
                i += 1;
                cli.scenario_path =
                    Some(require_value(&args, i, "--scenario", "a path argument").to_string());
            }
            "--preset" => {
                i += 1;
                cli.preset =
                    Some(require_value(&args, i, "--preset", "a name argument").to_string());
            }
            "--seed" => {
                i += 1;
                let v = require_value(&args, i, "--seed", "a u64 argument");
                if let Ok(s) = v.parse::<u64>() {
                    cli.seed_override = Some(s);
                } else {
                    eprintln!("error: --seed value \"{v}\" is not a valid u64");
                    process::exit(1);
                }
            }
            "--duration-secs" => {
                i += 1;
                let v = require_value(&args, i, "--duration-secs", "a u64 argument");
                if let Ok(d) = v.parse::<u64>() {
                    cli.duration_secs = d;
                } else {
                    eprintln!("error: --duration-secs value \"{v}\" is not a valid u64");
                    process::exit(1);
                }
            }
            "--auto-confirm" => {
                cli.auto_confirm = true;
            }
            "--telemetry-out" => {
                i += 1;
                cli.telemetry_out = Some(
                    require_value(&args, i, "--telemetry-out", "a path argument").to_string(),
                );
            }
            #[cfg(feature = "api")]
            "--serve" => {
                cli.serve = true;
            }
            #[cfg(feature = "api")]
            "--port" => {
                i += 1;
                let v = require_value(&args, i, "--port", "a u16 argument");
                if let Ok(p) = v.parse::<u16>() {
                    cli.port = p;
                } else {
                    eprintln!("error: --port value \"{v}\" is not a valid u16");
                    process::exit(1);
                }
            }
            #[cfg(feature = "tui")]
            "--tui" => {
                cli.tui = true;
            }
            other => {
                eprintln!("error: unknown argument \"{other}\"");
                print_help();
                process::exit(1);
            }
        }
        i += 1;
    }

    cli
}

/// Resolves the scenario: `--scenario` first, then `--preset`, then london.
fn load_scenario(cli: &CliArgs) -> (ScenarioConfig, String) {
    let loaded = if let Some(ref path) = cli.scenario_path {
        ScenarioConfig::from_toml_file(Path::new(path)).map(|cfg| (cfg, path.clone()))
    } else {
        let name = cli.preset.as_deref().unwrap_or("london");
        ScenarioConfig::from_preset(name).map(|cfg| (cfg, name.to_string()))
    };

    let (mut scenario, name) = loaded.unwrap_or_else(|e| {
        eprintln!("{e}");
        process::exit(1);
    });

    if let Some(seed) = cli.seed_override {
        scenario.simulation.seed = seed;
    }

    let errors = scenario.validate();
    if !errors.is_empty() {
        for e in &errors {
            eprintln!("{e}");
        }
        process::exit(1);
    }

    (scenario, name)
}

fn build_service(scenario: &ScenarioConfig) -> Arc<GridService> {
    match GridService::from_config(scenario) {
        Ok(service) => Arc::new(service),
        Err(e) => {
            eprintln!("error: {e}");
            process::exit(1);
        }
    }
}

fn tokio_runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Runtime::new().unwrap_or_else(|e| {
        eprintln!("error: failed to create tokio runtime: {e}");
        process::exit(1);
    })
}

/// Virtual-time run: prints event lines and the summary, optionally exports CSV.
fn run_headless(cli: &CliArgs, scenario: &ScenarioConfig) {
    let service = build_service(scenario);
    let clock = Clock::new(
        scenario.load_tick(),
        scenario.monitor_interval(),
        Duration::from_secs(cli.duration_secs),
    );
    let engine = Engine::new(service).with_auto_confirm(cli.auto_confirm);
    let output = tokio_runtime().block_on(engine.run(clock));

    for event in &output.events {
        println!("{event}");
    }
    println!("\n{}", output.summary);

    if let Some(ref path) = cli.telemetry_out {
        if let Err(e) = export_csv(&output.rows, Path::new(path)) {
            eprintln!("error: failed to write CSV: {e}");
            process::exit(1);
        }
        eprintln!("Telemetry written to {path}");
    }
}

/// Runs both periodic tasks and the API until Ctrl-C.
#[cfg(feature = "api")]
fn run_server(cli: &CliArgs, scenario: &ScenarioConfig) {
    use std::net::SocketAddr;

    use grid_command_center::api::{self, AppState};
    use grid_command_center::runtime::{self, Timers};

    let service = build_service(scenario);
    let addr = SocketAddr::from(([0, 0, 0, 0], cli.port));

    let result = tokio_runtime().block_on(async {
        let tasks = runtime::spawn(service.clone(), Timers::from_config(scenario));
        let shutdown = async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown requested");
        };
        let served = api::serve(AppState::new(service), addr, shutdown).await;
        tasks.shutdown().await;
        served
    });

    if let Err(e) = result {
        eprintln!("error: server failed on {addr}: {e}");
        process::exit(1);
    }
}

fn main() {
    let cli = parse_args();
    let (scenario, name) = load_scenario(&cli);

    #[cfg(feature = "tui")]
    if cli.tui {
        if let Err(e) = grid_command_center::tui::run(scenario, &name) {
            eprintln!("error: TUI crashed: {e}");
            process::exit(1);
        }
        return;
    }

    logging::init_tracing();
    tracing::info!(scenario = %name, seed = scenario.simulation.seed, "scenario loaded");

    #[cfg(feature = "api")]
    if cli.serve {
        run_server(&cli, &scenario);
        return;
    }

    run_headless(&cli, &scenario);
}
