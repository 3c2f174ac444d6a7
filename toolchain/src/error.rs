use crate::runner::RunError;

/// Failures of the provisioning chain.
///
/// Only `ToolchainQueryFailed` and `SysrootUnavailable` are recoverable; the
/// caller substitutes a fallback channel or continues without sysroot-derived
/// environment. Everything else aborts startup.
#[derive(Debug, thiserror::Error)]
pub enum ProvisionError {
    #[error("could not determine the active toolchain: {reason}")]
    ToolchainQueryFailed { reason: String },
    #[error("toolchain manager `{manager}` is not available: {source}")]
    ManagerUnavailable {
        manager: String,
        #[source]
        source: RunError,
    },
    #[error("could not list components of the {channel} toolchain: {source}")]
    ComponentQueryFailed {
        channel: String,
        #[source]
        source: RunError,
    },
    #[error("{channel} toolchain not installed")]
    MissingToolchain { channel: String },
    #[error("components missing from {channel}: {}", .missing.join(", "))]
    MissingComponents {
        channel: String,
        missing: Vec<String>,
    },
    #[error("installation of {target} was declined")]
    UserDeclinedInstall { target: String },
    #[error("install {target} failed: {source}")]
    InstallFailed {
        target: String,
        #[source]
        source: RunError,
    },
    #[error("{} not present in {channel} after installation", .missing.join(","))]
    InstallVerificationFailed {
        channel: String,
        missing: Vec<String>,
    },
    #[error("could not get sysroot from `rustc`: {reason}")]
    SysrootUnavailable { reason: String },
}

impl ProvisionError {
    /// Whether the provisioning chain can continue after this error.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::ToolchainQueryFailed { .. } | Self::SysrootUnavailable { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_query_and_sysroot_failures_are_recoverable() {
        assert!(
            ProvisionError::ToolchainQueryFailed {
                reason: "x".to_string()
            }
            .is_recoverable()
        );
        assert!(
            ProvisionError::SysrootUnavailable {
                reason: "x".to_string()
            }
            .is_recoverable()
        );
        assert!(
            !ProvisionError::UserDeclinedInstall {
                target: "rls".to_string()
            }
            .is_recoverable()
        );
        assert!(
            !ProvisionError::ComponentQueryFailed {
                channel: "nightly".to_string(),
                source: RunError::NotFound {
                    program: "rustup".to_string()
                },
            }
            .is_recoverable()
        );
    }

    #[test]
    fn verification_failure_names_components() {
        let err = ProvisionError::InstallVerificationFailed {
            channel: "nightly".to_string(),
            missing: vec!["rust-src".to_string(), "rls".to_string()],
        };
        assert_eq!(
            err.to_string(),
            "rust-src,rls not present in nightly after installation"
        );
    }
}
