//! Build command - run the build coordinator once

use crate::build::{application_name, BuildCoordinator, BuildOutcome};
use crate::cli::args::BuildArgs;
use crate::cli::commands::application_dir;
use crate::config::Config;
use crate::error::HarborResult;
use crate::host::verify_application;
use console::style;
use tracing::debug;

/// Execute the build command
pub async fn execute(args: BuildArgs, config: &Config) -> HarborResult<()> {
    let dir = application_dir(args.dir.as_ref()).await?;
    verify_application(&dir).await?;

    let mut build = config.build.clone();
    if let Some(command) = args.command {
        build.command = command;
    }
    if let Some(lock_dir) = args.lock_dir {
        build.lock_dir = Some(lock_dir);
    }

    let coordinator = BuildCoordinator::new(&dir, &build)?;
    debug!("Using build lock {}", coordinator.lock().path().display());

    let name = application_name(&dir);
    match coordinator.coordinate().await? {
        BuildOutcome::Built { duration } => println!(
            "{} built {} in {:.2}s",
            style("✓").green(),
            style(&name).cyan(),
            duration.as_secs_f64()
        ),
        BuildOutcome::AlreadyFresh => println!(
            "{} {} is already built",
            style("✓").green(),
            style(&name).cyan()
        ),
    }

    Ok(())
}
