// stress-cli/src/main.rs
// sysstress - exercise kernel interfaces under load

use anyhow::{Context, Result};
use clap::{value_parser, Arg, ArgAction, Command};
use stress_core::{stressors, Controller, RunReport};
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

mod config;

pub(crate) fn build_cli() -> Command {
    Command::new("sysstress")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Stress kernel interfaces and report bogo-op throughput")
        .arg(
            Arg::new("stressor")
                .short('s')
                .long("stressor")
                .value_name("NAME[:INSTANCES]")
                .help("Stressor to run, repeatable")
                .action(ArgAction::Append),
        )
        .arg(
            Arg::new("timeout")
                .short('t')
                .long("timeout")
                .value_name("SECS")
                .help("Stop after SECS seconds, 0 for no timeout")
                .value_parser(value_parser!(u64)),
        )
        .arg(
            Arg::new("ops")
                .long("ops")
                .value_name("N")
                .help("Stop each instance after N bogo operations")
                .value_parser(value_parser!(u64)),
        )
        .arg(
            Arg::new("mode")
                .long("mode")
                .value_name("process|thread")
                .help("Run instances as forked processes or threads"),
        )
        .arg(
            Arg::new("seed")
                .long("seed")
                .value_name("W,Z")
                .help("Seed the random generator explicitly"),
        )
        .arg(
            Arg::new("no-rand-seed")
                .long("no-rand-seed")
                .help("Use the fixed default seed for repeatable runs")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("verify")
                .long("verify")
                .help("Check results of stressor operations")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("apply-suggestions")
                .long("apply-suggestions")
                .help("Adopt the settings suggested by configuration checks")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file path"),
        )
        .arg(
            Arg::new("json")
                .long("json")
                .value_name("FILE")
                .help("Write the run report as JSON"),
        )
        .arg(
            Arg::new("list")
                .long("list")
                .help("List available stressors and exit")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("Debug logging")
                .action(ArgAction::SetTrue),
        )
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn list_stressors() {
    for stressor in stressors::registry() {
        println!("{:<10} {:<12} {}", stressor.name(), stressor.class(), stressor.help());
    }
}

/// Run the controller off the async runtime; Ctrl-C requests a stop and
/// the run still finishes with a report
async fn run_until_done(controller: Controller) -> Result<RunReport> {
    let stop = controller.stop_handle();
    let task = tokio::task::spawn_blocking(move || controller.run());
    tokio::pin!(task);

    tokio::select! {
        finished = &mut task => {
            return Ok(finished.context("controller task failed")??);
        }
        interrupted = signal::ctrl_c() => {
            if let Err(e) = interrupted {
                warn!("cannot listen for Ctrl-C: {}", e);
            } else {
                info!("interrupted, stopping stressors");
            }
            stop.stop();
        }
    }

    Ok(task.await.context("controller task failed")??)
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let matches = build_cli().get_matches();
    init_tracing(matches.get_flag("verbose"));

    if matches.get_flag("list") {
        list_stressors();
        return Ok(());
    }

    let mut config = config::resolve(&matches)?;
    if matches.get_flag("apply-suggestions") {
        config = config::apply_suggestions(config);
    }
    let json_report = config.json_report.clone();
    let controller = Controller::new(config).context("invalid configuration")?;

    let report = run_until_done(controller).await?;
    report.log_summary();

    if let Some(path) = json_report {
        if let Err(e) = report.write_json(&path) {
            error!("{}", e);
        }
    }

    let code = report.exit_status().code();
    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use stress_core::{ExitStatus, InstanceMode, RunConfig, StressorSpec};

    #[test]
    fn test_cli_definition() {
        build_cli().debug_assert();
    }

    #[tokio::test]
    async fn test_run_until_done_bounded() {
        let config = RunConfig {
            stressors: vec![StressorSpec {
                name: "cpu".to_string(),
                instances: 1,
                ops: 5,
            }],
            mode: InstanceMode::Thread,
            timeout_secs: Some(30),
            ..RunConfig::default()
        };
        let controller = Controller::new(config).unwrap();
        let report = run_until_done(controller).await.unwrap();
        assert_eq!(report.exit_status(), ExitStatus::Success);
        assert_eq!(report.stressors[0].bogo_ops, 5);
    }
}
