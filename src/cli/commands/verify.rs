//! Verify command - check an application directory

use crate::cli::args::VerifyArgs;
use crate::cli::commands::application_dir;
use crate::error::HarborResult;
use crate::host::verify_application;
use console::style;

/// Execute the verify command
pub async fn execute(args: VerifyArgs) -> HarborResult<()> {
    let dir = application_dir(args.dir.as_ref()).await?;
    verify_application(&dir).await?;

    println!(
        "{} {} is an application directory",
        style("✓").green(),
        dir.display()
    );
    Ok(())
}
