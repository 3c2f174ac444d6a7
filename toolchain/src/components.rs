//! Installed-toolchain and component checks.

use crate::config::ToolchainConfig;
use crate::error::ProvisionError;
use crate::runner::CommandRunner;

/// Components the server needs, in installation order.
pub const REQUIRED_COMPONENTS: [&str; 3] = ["rust-analysis", "rust-src", "rls"];

/// `^<name>.*\((default|installed)\)$`
fn is_installed_line(line: &str, name: &str) -> bool {
    let line = line.trim_end_matches('\r');
    line.starts_with(name) && (line.ends_with("(installed)") || line.ends_with("(default)"))
}

/// Required names with no installed line in a `component list` listing,
/// in required order.
#[must_use]
pub fn missing_from_listing(listing: &str, required: &[String]) -> Vec<String> {
    required
        .iter()
        .filter(|name| !listing.lines().any(|line| is_installed_line(line, name)))
        .cloned()
        .collect()
}

/// Names of `required` components not installed for `config.channel`.
///
/// A manager failure is [`ProvisionError::ComponentQueryFailed`], never an
/// empty or full list.
pub async fn missing_components(
    runner: &dyn CommandRunner,
    config: &ToolchainConfig,
    required: &[String],
) -> Result<Vec<String>, ProvisionError> {
    let inv = config
        .manager
        .invocation(["component", "list", "--toolchain", config.channel.as_str()]);
    let output = runner
        .run(&inv)
        .await
        .map_err(|source| ProvisionError::ComponentQueryFailed {
            channel: config.channel.clone(),
            source,
        })?;
    Ok(missing_from_listing(&output.stdout, required))
}

pub async fn has_components(
    runner: &dyn CommandRunner,
    config: &ToolchainConfig,
    required: &[String],
) -> Result<bool, ProvisionError> {
    Ok(missing_components(runner, config, required)
        .await?
        .is_empty())
}

/// Whether `config.channel` shows up in `toolchain list`.
pub async fn has_toolchain(
    runner: &dyn CommandRunner,
    config: &ToolchainConfig,
) -> Result<bool, ProvisionError> {
    let inv = config.manager.invocation(["toolchain", "list"]);
    let output = runner
        .run(&inv)
        .await
        .map_err(|source| ProvisionError::ManagerUnavailable {
            manager: config.manager.path().to_string(),
            source,
        })?;
    Ok(output.stdout.contains(config.channel.as_str()))
}

/// [`REQUIRED_COMPONENTS`] as owned strings.
#[must_use]
pub fn required_components() -> Vec<String> {
    REQUIRED_COMPONENTS.iter().map(|s| (*s).to_string()).collect()
}
