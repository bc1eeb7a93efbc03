use thiserror::Error;

/// Error kinds surfaced by the public API.
///
/// Precondition and reserve-phase failures abort an operation before any
/// kernel mutation happens. Realize-phase failures are returned only after
/// every ready-gate the caller touched has been closed, so that parallel
/// waiters never deadlock on a reservation that failed to materialize.
#[derive(Debug, Error)]
pub enum Error {
    #[error("concentrator is not initialized")]
    Uninitialized,

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("no management address found among physical links")]
    NoManagementAddress,

    #[error("no compute address found among physical links")]
    NoComputeAddress,

    #[error("ambiguous auto-config: more than one qualifying physical link and no CIDR configured")]
    AmbiguousAutoConfig,

    #[error("dangling tunnel: gre link {alias} has no matching bridge")]
    DanglingTunnel { alias: String },

    #[error("link name generator exhausted after {attempts} attempts")]
    NameExhausted { attempts: usize },

    #[error("device not ready: timed out waiting for {alias} after {timeout:?}")]
    DeviceNotReady { alias: String, timeout: std::time::Duration },

    #[error("internal error: {0}")]
    InternalError(String),

    #[error("kernel operation failed: {0}")]
    Kernel(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
