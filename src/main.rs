use anyhow::{Context, Result};
use shipline::cli::commands::{PlanCommand, RunCommand, ValidateCommand};
use shipline::cli::output::*;
use shipline::cli::{Cli, Command};
use shipline::execution::{self, Coordinator, Deployment, ExecutionEvent};
use shipline::{AwsCli, DeployConfig, SshSessionFactory};
use std::sync::{Arc, Mutex};
use tracing::error;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::from_args();

    // Initialize logging; RUST_LOG wins over --verbose
    let log_level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set logging subscriber")?;

    match &cli.command {
        Command::Run(cmd) => run_pipeline(cmd).await?,
        Command::Validate(cmd) => validate_manifest(cmd)?,
        Command::Plan(cmd) => show_plan(cmd)?,
    }

    Ok(())
}

async fn run_pipeline(cmd: &RunCommand) -> Result<()> {
    let mut config = DeployConfig::from_file(&cmd.file).context("Failed to load deployment manifest")?;
    cmd.apply_overrides(&mut config);
    config.validate().context("Invalid command-line override")?;

    println!(
        "{} Loaded manifest: {} ({})",
        INFO,
        style(&config.name).bold(),
        style(&config.region).dim()
    );

    let aws = Arc::new(AwsCli::new(config.region.clone()));
    let sessions = Arc::new(SshSessionFactory::new(
        config.ssh.connect_timeout_secs,
        config.ssh.command_timeout_secs,
        config.polling.clone(),
    ));

    let mut deployment = Deployment::new(config.name.clone());
    let coordinator = Coordinator::new(config, aws.clone(), aws, sessions);

    // One spinner per running stage, replaced by the stage's status line
    let active = Arc::new(Mutex::new(None::<indicatif::ProgressBar>));
    coordinator
        .add_event_handler(move |event| {
            let Ok(mut active) = active.lock() else {
                return;
            };
            match &event {
                ExecutionEvent::StageStarted { stage } => {
                    *active = Some(create_spinner(format!("{}...", stage)));
                }
                ExecutionEvent::StagePassed { .. } | ExecutionEvent::StageFailed { .. } => {
                    if let Some(bar) = active.take() {
                        bar.finish_and_clear();
                    }
                    println!("{}", format_execution_event(&event));
                }
                _ => match active.as_ref() {
                    Some(bar) => bar.println(format_execution_event(&event)),
                    None => println!("{}", format_execution_event(&event)),
                },
            }
        })
        .await;

    println!();
    let result = coordinator.execute(&mut deployment).await;

    match result {
        Ok(()) => {
            println!(
                "\n{} {} deployed {}",
                CHECK,
                style(&deployment.name).bold(),
                style("successfully").green()
            );
            if let Some(url) = deployment.service_url() {
                println!("  {}", style(url).cyan().underlined());
            }
            Ok(())
        }
        Err(e) => {
            println!(
                "\n{} {} {}",
                CROSS,
                style(&deployment.name).bold(),
                style("failed").red()
            );
            for failure in &deployment.state.host_failures {
                println!(
                    "  {} {} during {}: {}",
                    WARN,
                    style(&failure.host).yellow(),
                    failure.stage,
                    failure.error
                );
            }
            error!("{}", e);
            std::process::exit(1);
        }
    }
}

fn validate_manifest(cmd: &ValidateCommand) -> Result<()> {
    println!("{} Validating manifest...", INFO);

    match DeployConfig::from_file(&cmd.file) {
        Ok(config) => {
            println!("{} Deployment manifest is valid!", CHECK);
            println!("  Name: {}", style(&config.name).bold());
            println!("  Region: {}", style(&config.region).cyan());
            println!("  Instances: {}", style(config.instances.len()).cyan());
            println!("  Firewalls: {}", style(config.firewalls.len()).cyan());

            if cmd.json {
                let json = serde_json::to_string_pretty(&config)?;
                println!("\n{}", json);
            }
            Ok(())
        }
        Err(e) => {
            println!("{} Validation failed:", CROSS);
            println!("  {}", style(format!("{:#}", e)).red());
            std::process::exit(1);
        }
    }
}

fn show_plan(cmd: &PlanCommand) -> Result<()> {
    let config = DeployConfig::from_file(&cmd.file).context("Failed to load deployment manifest")?;
    let plan = execution::plan(&config);

    if cmd.json {
        println!("{}", serde_json::to_string_pretty(&plan)?);
    } else {
        println!("{} Plan for {}\n", INFO, style(&config.name).bold());
        print!("{}", format_plan(&plan));
    }
    Ok(())
}
