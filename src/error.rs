pub type AnimathResult<T> = Result<T, AnimathError>;

#[derive(thiserror::Error, Debug)]
pub enum AnimathError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("generation error: {0}")]
    Generation(String),

    #[error("api error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("render error: {0}")]
    Render(String),

    #[error("preview error: {0}")]
    Preview(String),

    #[error("serialization error: {0}")]
    Serde(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl AnimathError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn generation(msg: impl Into<String>) -> Self {
        Self::Generation(msg.into())
    }

    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            message: message.into(),
        }
    }

    pub fn render(msg: impl Into<String>) -> Self {
        Self::Render(msg.into())
    }

    pub fn preview(msg: impl Into<String>) -> Self {
        Self::Preview(msg.into())
    }

    pub fn serde(msg: impl Into<String>) -> Self {
        Self::Serde(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_prefixes_are_stable() {
        assert!(
            AnimathError::validation("x")
                .to_string()
                .contains("validation error:")
        );
        assert!(
            AnimathError::generation("x")
                .to_string()
                .contains("generation error:")
        );
        assert!(AnimathError::render("x").to_string().contains("render error:"));
        assert!(
            AnimathError::preview("x")
                .to_string()
                .contains("preview error:")
        );
        assert!(
            AnimathError::serde("x")
                .to_string()
                .contains("serialization error:")
        );
    }

    #[test]
    fn api_error_carries_status() {
        let err = AnimathError::api(429, "quota exhausted");
        assert_eq!(err.to_string(), "api error (429): quota exhausted");
    }

    #[test]
    fn other_preserves_source() {
        let base = std::io::Error::other("boom");
        let err = AnimathError::Other(anyhow::Error::new(base));
        assert!(err.to_string().contains("boom"));
    }
}
