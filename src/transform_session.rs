//! Interactive edit of the live transform of a running publisher.
//!
//! The session shows the live transform, asks which part to change and the
//! three new values, writes them axis by axis, shows the transform again and
//! saves it to the configuration file only if the operator asks for it.

use crate::driver_config::{update_transform_config_file, ConfigError};
use crate::transform::{Transform, TransformPart, TransformStore, StoreError};

use log::info;
use std::{
    fmt,
    io::{self, BufRead, Write},
    path::PathBuf,
};

/// Malformed operator input.
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationError {
    /// Expected 0 (translation) or 1 (rotation).
    BadChoice(String),

    /// Expected exactly three values.
    WrongCount(usize),

    /// A value could not be read as a number.
    NotANumber(String),
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::BadChoice(input) => {
                write!(f, "value should be 0 or 1, got '{input}'")
            }
            ValidationError::WrongCount(count) => write!(f, "3 values expected, got {count}"),
            ValidationError::NotANumber(input) => {
                write!(f, "at least one value could not be cast to float: '{input}'")
            }
        }
    }
}

impl std::error::Error for ValidationError {}

#[derive(Debug)]
pub enum SessionError {
    Validation(ValidationError),
    Store(StoreError),
    Config(ConfigError),
    Io(io::Error),
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::Validation(error) => write!(f, "invalid input: {error}"),
            SessionError::Store(error) => write!(f, "live transform: {error}"),
            SessionError::Config(error) => write!(f, "configuration file: {error}"),
            SessionError::Io(error) => write!(f, "io error: {error}"),
        }
    }
}

impl std::error::Error for SessionError {}

impl From<ValidationError> for SessionError {
    fn from(value: ValidationError) -> Self {
        Self::Validation(value)
    }
}

impl From<StoreError> for SessionError {
    fn from(value: StoreError) -> Self {
        Self::Store(value)
    }
}

impl From<ConfigError> for SessionError {
    fn from(value: ConfigError) -> Self {
        Self::Config(value)
    }
}

impl From<io::Error> for SessionError {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

/// What a completed session did.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionOutcome {
    /// The live transform after the edit.
    pub transform: Transform,
    pub saved: bool,
}

/// Parses the answer to the translation or rotation question.
pub fn parse_part(input: &str) -> Result<TransformPart, ValidationError> {
    match input.trim() {
        "0" => Ok(TransformPart::Translation),
        "1" => Ok(TransformPart::Rotation),
        other => Err(ValidationError::BadChoice(other.to_string())),
    }
}

/// Parses three whitespace separated numbers.
pub fn parse_values(input: &str) -> Result<[f64; 3], ValidationError> {
    let words: Vec<&str> = input.split_whitespace().collect();
    if words.len() != 3 {
        return Err(ValidationError::WrongCount(words.len()));
    }
    let mut values = [0.0; 3];
    for (value, word) in values.iter_mut().zip(words) {
        *value = word
            .parse()
            .map_err(|_| ValidationError::NotANumber(word.to_string()))?;
    }
    Ok(values)
}

/// A dialog between an operator (`input` and `output`) and a live store.
pub struct TransformSession<'a, S, R, W> {
    store: &'a S,
    config_file: PathBuf,
    input: R,
    output: W,
}

impl<'a, S, R, W> TransformSession<'a, S, R, W>
where
    S: TransformStore,
    R: BufRead,
    W: Write,
{
    pub fn new(store: &'a S, config_file: impl Into<PathBuf>, input: R, output: W) -> Self {
        TransformSession {
            store,
            config_file: config_file.into(),
            input,
            output,
        }
    }

    fn ask(&mut self, prompt: &str) -> Result<String, SessionError> {
        write!(self.output, "\t{prompt}")?;
        self.output.flush()?;
        let mut answer = String::new();
        self.input.read_line(&mut answer)?;
        Ok(answer.trim_end_matches(['\r', '\n']).to_string())
    }

    fn show(&mut self, transform: &Transform) -> Result<(), SessionError> {
        writeln!(self.output)?;
        writeln!(self.output, "\ttransform:")?;
        for line in transform.to_string().lines() {
            writeln!(self.output, "\t\t{line}")?;
        }
        writeln!(self.output)?;
        Ok(())
    }

    /// Runs the dialog once. Invalid input aborts before anything is written.
    pub fn run(&mut self) -> Result<SessionOutcome, SessionError> {
        let transform = self.store.read()?;
        self.show(&transform)?;

        let part = parse_part(&self.ask("enter 0 to change translation, 1 to change rotation: ")?)?;
        let values = parse_values(&self.ask("new values (three values separated by spaces): ")?)?;

        for (axis, value) in values.into_iter().enumerate() {
            self.store.write_component(part, axis, value)?;
        }
        info!("live {part} set to {values:?}");

        let transform = self.store.read()?;
        self.show(&transform)?;

        let saved = self.ask("type 1 if you wish to save this transform: ")?.trim() == "1";
        if saved {
            update_transform_config_file(&self.config_file, &transform)?;
            writeln!(self.output)?;
            writeln!(
                self.output,
                "transform saved in {}",
                self.config_file.display()
            )?;
        }
        writeln!(self.output)?;

        Ok(SessionOutcome { transform, saved })
    }
}
