use std::fmt;

#[derive(Debug)]
pub enum BinderyError {
    EmptyInputSet,
    UnreadableImage(String),
    Pdf(String),
    Metadata(String),
    Io(std::io::Error),
}

impl fmt::Display for BinderyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BinderyError::EmptyInputSet => write!(f, "no input files provided"),
            BinderyError::UnreadableImage(message) => {
                write!(f, "image error: {}", message)
            }
            BinderyError::Pdf(message) => write!(f, "pdf error: {}", message),
            BinderyError::Metadata(message) => write!(f, "metadata error: {}", message),
            BinderyError::Io(err) => write!(f, "io error: {}", err),
        }
    }
}

impl std::error::Error for BinderyError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            BinderyError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for BinderyError {
    fn from(value: std::io::Error) -> Self {
        BinderyError::Io(value)
    }
}
