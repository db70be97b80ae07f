use std::{error::Error, fmt::Display};

#[derive(Debug)]
pub enum GuiError {
    IOError(std::io::Error),
    JoinError,
}

impl Display for GuiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GuiError::IOError(error) => write!(f, "terminal error: {error}"),
            GuiError::JoinError => write!(f, "monitored task panicked"),
        }
    }
}

impl Error for GuiError {}

impl From<std::io::Error> for GuiError {
    fn from(value: std::io::Error) -> Self {
        Self::IOError(value)
    }
}
