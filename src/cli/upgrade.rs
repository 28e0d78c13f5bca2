//! `harvest upgrade`: check for and install a newer release.

use crate::upgrade::{
    GitHubReleaseSource, ReleaseSource, UpgradeContext, UpgradeInfo, UpgradeOrchestrator,
    UpgradeOutcome,
};
use anyhow::Result;
use clap::Args;
use colored::Colorize;
use std::io::{BufRead, Write};

/// Arguments for `harvest upgrade`.
///
/// Without flags, the latest release is compared with the running version
/// and, after confirmation, data is backed up and the new binary installed.
///
/// ```bash
/// harvest upgrade --check   # report only
/// harvest upgrade           # prompt, then upgrade
/// harvest upgrade --yes     # upgrade without prompting
/// ```
#[derive(Args, Debug, Default)]
pub struct UpgradeArgs {
    /// Only check whether a newer version is available
    #[arg(long)]
    pub check: bool,

    /// Do not ask for confirmation
    #[arg(short, long, conflicts_with = "check")]
    pub yes: bool,
}

impl UpgradeArgs {
    /// Run against the configured GitHub repository.
    pub async fn execute(self, ctx: &UpgradeContext) -> Result<()> {
        let source = GitHubReleaseSource::new(ctx)?;
        self.execute_with_source(ctx, &source).await
    }

    /// Run against an arbitrary release source.
    pub async fn execute_with_source<S: ReleaseSource>(
        self,
        ctx: &UpgradeContext,
        source: &S,
    ) -> Result<()> {
        let orchestrator = UpgradeOrchestrator::new(ctx, source);

        println!("{}", "Checking for updates...".cyan());

        if self.check {
            let info = orchestrator.get_upgrade_info().await?;
            print_check_result(&info);
            return Ok(());
        }

        let skip_prompt = self.yes;
        let outcome = orchestrator
            .perform_upgrade(|info| {
                println!("{}", info.format_version_info());
                warn_about(info);
                skip_prompt || prompt_confirmation(&format!("Upgrade to {}?", info.latest_version))
            })
            .await?;

        print_outcome(&outcome);
        Ok(())
    }
}

fn print_check_result(info: &UpgradeInfo) {
    if info.has_update {
        println!("{}", info.format_version_info());
        warn_about(info);
        println!("Run `harvest upgrade` to install it");
    } else {
        println!("{}", format!("Harvest {} is up to date", info.current_version).green());
    }
}

fn warn_about(info: &UpgradeInfo) {
    if info.is_downgrade {
        println!(
            "{}",
            format!(
                "Warning: the latest release ({}) is older than the running version ({})",
                info.latest_version, info.current_version
            )
            .yellow()
        );
    }
    if !info.is_native_install {
        println!(
            "{}",
            "Note: no native harvest binary was found on PATH; the upgrade installs to the configured install path"
                .yellow()
        );
    }
}

fn print_outcome(outcome: &UpgradeOutcome) {
    match outcome {
        UpgradeOutcome::UpToDate {
            version,
        } => println!("{}", format!("Harvest {version} is up to date").green()),
        UpgradeOutcome::Cancelled => println!("Upgrade cancelled"),
        UpgradeOutcome::ManualInstallRequired {
            artifact,
            install_path,
        } => {
            println!("{}", "Data backed up and release downloaded.".green());
            println!("Downloaded: {}", artifact.path.display());
            println!("To finish, extract the archive and copy the binary to {}", install_path.display());
        }
        UpgradeOutcome::Upgraded {
            from,
            to,
            binary,
            rollback_available,
        } => {
            println!("{}", format!("Upgraded Harvest from {from} to {to}").green().bold());
            println!("Installed at {}", binary.display());
            if *rollback_available {
                println!("Run `harvest rollback --perform` to return to {from}");
            }
        }
    }
}

/// Ask a yes/no question on stdin. Anything but `y`/`yes` means no.
pub(crate) fn prompt_confirmation(question: &str) -> bool {
    print!("{question} [y/N] ");
    if std::io::stdout().flush().is_err() {
        return false;
    }

    let mut answer = String::new();
    match std::io::stdin().lock().read_line(&mut answer) {
        Ok(_) => is_affirmative(&answer),
        Err(_) => false,
    }
}

fn is_affirmative(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}
