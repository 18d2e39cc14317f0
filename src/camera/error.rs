use thiserror::Error;

/// Camera subsystem errors.
#[derive(Debug, Clone, Error)]
pub enum CameraError {
    #[error("device open failed: {0}")]
    DeviceOpen(String),

    #[error("buffer allocation failed: {0}")]
    Allocation(String),

    #[error("buffer registration failed: {0}")]
    Registration(String),

    #[error("invalid buffer state: {0}")]
    InvalidState(String),

    #[error("capture start failed: {0}")]
    CaptureStart(String),

    #[error("session not ready: {0}")]
    NotReady(String),

    #[error("driver call failed: {0}")]
    Driver(String),

    #[error("settings error: {0}")]
    Settings(String),
}

/// Coarse error category handed to UI collaborators in place of a bare
/// success flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    DeviceOpen,
    Allocation,
    Registration,
    InvalidState,
    CaptureStart,
    NotReady,
    Driver,
    Settings,
}

impl CameraError {
    /// Category of this error, without the message.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::DeviceOpen(_) => ErrorKind::DeviceOpen,
            Self::Allocation(_) => ErrorKind::Allocation,
            Self::Registration(_) => ErrorKind::Registration,
            Self::InvalidState(_) => ErrorKind::InvalidState,
            Self::CaptureStart(_) => ErrorKind::CaptureStart,
            Self::NotReady(_) => ErrorKind::NotReady,
            Self::Driver(_) => ErrorKind::Driver,
            Self::Settings(_) => ErrorKind::Settings,
        }
    }
}

/// Convenience Result alias.
pub type Result<T> = std::result::Result<T, CameraError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_context() {
        let err = CameraError::DeviceOpen("device 3 is claimed".to_string());
        assert_eq!(err.to_string(), "device open failed: device 3 is claimed");
    }

    #[test]
    fn kind_matches_variant() {
        assert_eq!(
            CameraError::InvalidState("x".to_string()).kind(),
            ErrorKind::InvalidState
        );
        assert_eq!(
            CameraError::Allocation("x".to_string()).kind(),
            ErrorKind::Allocation
        );
    }

    #[test]
    fn error_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<CameraError>();
    }
}
