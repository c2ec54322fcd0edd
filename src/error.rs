/*
 * Defines the closed error taxonomy for the client.
 * Every failure surfaced by the transport, the reply decoder or the client
 * facade maps onto one of these variants; nothing outside this set ever
 * reaches the caller. `ErrorCode` mirrors the set with an additional `Ok`
 * value and backs the per-client last-error register.
 */

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
    /// A buffer for the request or reply could not be allocated.
    OutOfMemory,
    /// No running index service could be reached.
    ServiceUnavailable,
    /// The private reply channel for a blocking query could not be created.
    ChannelCreationFailed,
    /// The persistent reply channel for async queries is invalid or closed.
    ChannelRegistrationFailed,
    /// A worker thread required by the transport could not be started.
    ThreadCreationFailed,
    /// The reply buffer is malformed (declared counts or offsets do not fit).
    CorruptReply,
    /// A per-item accessor was called with an index outside the visible range.
    InvalidIndex,
    /// An operation was invoked in the wrong state (disposed client, async
    /// query without a registered reply channel, accessor before a query).
    InvalidCall,
    /// The accessed field was never populated by the service, or a duplicate
    /// correlation was posted on a channel still waiting on it.
    InvalidRequest,
}

impl std::fmt::Display for ClientError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClientError::OutOfMemory => write!(f, "Out of memory"),
            ClientError::ServiceUnavailable => write!(f, "Search service is not available"),
            ClientError::ChannelCreationFailed => write!(f, "Reply channel creation failed"),
            ClientError::ChannelRegistrationFailed => {
                write!(f, "Reply channel registration failed")
            }
            ClientError::ThreadCreationFailed => write!(f, "Worker thread creation failed"),
            ClientError::CorruptReply => write!(f, "Reply buffer is corrupt"),
            ClientError::InvalidIndex => write!(f, "Result index out of range"),
            ClientError::InvalidCall => write!(f, "Operation invalid in the current state"),
            ClientError::InvalidRequest => write!(f, "Requested data was not populated"),
        }
    }
}

impl std::error::Error for ClientError {}

pub type Result<T> = std::result::Result<T, ClientError>;

/*
 * The value held by a client's last-error register. The register is an
 * instance field on `EverythingClient` (never process-global state), so
 * independent clients cannot interfere with each other's diagnostics.
 */
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ErrorCode {
    #[default]
    Ok,
    OutOfMemory,
    ServiceUnavailable,
    ChannelCreationFailed,
    ChannelRegistrationFailed,
    ThreadCreationFailed,
    CorruptReply,
    InvalidIndex,
    InvalidCall,
    InvalidRequest,
}

impl From<&ClientError> for ErrorCode {
    fn from(err: &ClientError) -> Self {
        match err {
            ClientError::OutOfMemory => ErrorCode::OutOfMemory,
            ClientError::ServiceUnavailable => ErrorCode::ServiceUnavailable,
            ClientError::ChannelCreationFailed => ErrorCode::ChannelCreationFailed,
            ClientError::ChannelRegistrationFailed => ErrorCode::ChannelRegistrationFailed,
            ClientError::ThreadCreationFailed => ErrorCode::ThreadCreationFailed,
            ClientError::CorruptReply => ErrorCode::CorruptReply,
            ClientError::InvalidIndex => ErrorCode::InvalidIndex,
            ClientError::InvalidCall => ErrorCode::InvalidCall,
            ClientError::InvalidRequest => ErrorCode::InvalidRequest,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_mirrors_every_variant() {
        let all = [
            ClientError::OutOfMemory,
            ClientError::ServiceUnavailable,
            ClientError::ChannelCreationFailed,
            ClientError::ChannelRegistrationFailed,
            ClientError::ThreadCreationFailed,
            ClientError::CorruptReply,
            ClientError::InvalidIndex,
            ClientError::InvalidCall,
            ClientError::InvalidRequest,
        ];
        for err in &all {
            let code = ErrorCode::from(err);
            assert_ne!(
                code,
                ErrorCode::Ok,
                "Error {err:?} must not map to ErrorCode::Ok"
            );
        }
    }

    #[test]
    fn test_default_error_code_is_ok() {
        assert_eq!(ErrorCode::default(), ErrorCode::Ok);
    }
}
