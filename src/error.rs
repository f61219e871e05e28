use thiserror::Error;

/// How the viewer reacts to a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// A platform feature is missing; switch paths silently.
    CapabilityAbsent,
    /// The user refused access; show a waiting state and allow retry.
    PermissionDenied,
    /// A single frame failed; drop it and try again on the next tick.
    Transient,
    /// Setup could not complete; the viewer stops for good.
    Unrecoverable,
}

/// Library error type for viewer operations.
#[derive(Debug, Error)]
pub enum ViewerError {
    /// Immersive session, hit-testing or a sensor is not available on this device.
    #[error("capability unavailable: {0}")]
    CapabilityUnavailable(&'static str),

    /// Camera or orientation access was refused.
    #[error("permission denied: {0}")]
    PermissionDenied(&'static str),

    /// One frame could not be decoded or drawn.
    #[error("frame skipped: {0}")]
    TransientFrame(String),

    /// The character image or camera stream could not be initialised.
    #[error("setup failed: {0}")]
    Setup(String),

    /// Underlying IO error.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Image decode/encode error.
    #[error(transparent)]
    Image(#[from] image::ImageError),

    /// YAML/serde configuration error.
    #[error(transparent)]
    Config(#[from] serde_yaml::Error),

    /// Gallery index or sensor replay parse error.
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl ViewerError {
    pub fn class(&self) -> FailureClass {
        match self {
            ViewerError::CapabilityUnavailable(_) => FailureClass::CapabilityAbsent,
            ViewerError::PermissionDenied(_) => FailureClass::PermissionDenied,
            ViewerError::TransientFrame(_) => FailureClass::Transient,
            ViewerError::Setup(_)
            | ViewerError::Io(_)
            | ViewerError::Image(_)
            | ViewerError::Config(_)
            | ViewerError::Json(_) => FailureClass::Unrecoverable,
        }
    }
}

pub type ViewerResult<T> = std::result::Result<T, ViewerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_taxonomy() {
        assert_eq!(
            ViewerError::CapabilityUnavailable("immersive-ar").class(),
            FailureClass::CapabilityAbsent
        );
        assert_eq!(
            ViewerError::PermissionDenied("camera").class(),
            FailureClass::PermissionDenied
        );
        assert_eq!(
            ViewerError::TransientFrame("resize".into()).class(),
            FailureClass::Transient
        );
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        assert_eq!(ViewerError::from(io).class(), FailureClass::Unrecoverable);
    }
}
