use failure::Fail;

#[derive(Debug, Fail)]
pub enum DetectError {
    #[fail(display = "Empty file")]
    EmptyImage,
    #[fail(display = "Invalid image")]
    InvalidImage(#[fail(cause)] image::ImageError),
    /// Anything that went wrong past input validation. The detail is for
    /// the server log only.
    #[fail(display = "Internal server error")]
    Internal(failure::Error),
}

impl DetectError {
    /// Input problems are the caller's fault; everything else is ours.
    pub fn is_input_error(&self) -> bool {
        match self {
            DetectError::EmptyImage | DetectError::InvalidImage(_) => true,
            DetectError::Internal(_) => false,
        }
    }
}

#[derive(Debug, Fail)]
pub enum ConfigError {
    #[fail(display = "Invalid value {:?} for {}", value, var)]
    Invalid { var: &'static str, value: String },
}
