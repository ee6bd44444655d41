use thiserror::Error;

/// Fatal session-level failures. Everything the user can recover from
/// (conflicts, declined trust, wrong password) travels as an outcome code
/// instead.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("channel error: {0}")]
    ChannelError(String),

    #[error("sftp subsystem error: {0}")]
    SubsystemError(String),

    #[error("remote command failed: {0}")]
    ExecFailed(String),

    #[error("session is not connected")]
    Disconnected,

    #[error("session is not authenticated")]
    NotAuthenticated,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
