use miette::Diagnostic;
use tether_core::TetherError;
use thiserror::Error;

pub(crate) type CliResult<T, E = CliError> = Result<T, E>;

/// Demo failures, split by the phase they interrupt so the report says
/// what was happening rather than just what broke.
#[derive(Debug, Error, Diagnostic)]
pub(crate) enum CliError {
    #[error("lifecycle step failed: {0}")]
    #[diagnostic(help(
        "initialize and uninitialize must alternate strictly; this is a usage bug in the demo"
    ))]
    Lifecycle(#[source] TetherError),

    #[error("connecting to {host}:{port} failed: {source}")]
    #[diagnostic(help("verify the host resolves and something is listening on the port"))]
    Connect {
        host: String,
        port: u16,
        #[source]
        source: TetherError,
    },

    #[error("message exchange failed: {0}")]
    #[diagnostic(help(
        "the peer may have hung up; rerun with RUST_LOG=tether_core=trace for the transport trail"
    ))]
    Exchange(#[source] TetherError),
}
