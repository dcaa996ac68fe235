use std::fmt::{Debug, Write};
use std::{borrow::Cow, panic::Location};

use serde::{ser::SerializeStruct, Deserialize, Serialize};
use strum_macros::IntoStaticStr;

use crate::{config::ConfigError, graph::GraphError, status::AggregateApplyError};

/// The live system could not be inspected.
#[derive(Debug, Eq, thiserror::Error, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub enum ProbeError {
    #[error("Failed to list block devices")]
    ListBlockDevices,
    #[error("Failed to list RAID arrays")]
    ListRaidArrays,
    #[error("Failed to list LVM objects")]
    ListLvm,
    #[error("Failed to list ZFS pools and datasets")]
    ListZfs,
    #[error("Failed to list mounted filesystems")]
    ListMounts,
    #[error("Failed to list dm-crypt mappings")]
    ListCryptMappings,
    #[error("Disk with serial '{serial}' was not found")]
    DiskNotFound { serial: String },
}

/// The environment the engine runs in is not usable.
#[derive(Debug, Eq, thiserror::Error, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub enum EnvironmentError {
    #[error("Failed to load apply options from '{path}'")]
    LoadOptions { path: String },
    #[error("Failed to read storage configuration from '{path}'")]
    ReadConfig { path: String },
    #[error("Failed to register signal handlers")]
    RegisterSignalHandlers,
    #[error("Failed to write '{path}'")]
    WriteFile { path: String },
}

#[derive(Debug, Eq, thiserror::Error, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub enum InternalError {
    #[error("Internal error: {0}")]
    Internal(&'static str),
    #[error("Entry '{0}' was resolved more than once")]
    DuplicateResolution(String),
    #[error("Failed to serialize apply report")]
    SerializeReport,
}

/// Each variant of `ErrorKind` corresponds to a different category of error.
#[derive(Debug, Eq, thiserror::Error, IntoStaticStr, PartialEq)]
#[strum(serialize_all = "kebab-case")]
pub enum ErrorKind {
    /// The storage configuration document is invalid. Nothing was touched.
    #[error(transparent)]
    InvalidConfig(#[from] ConfigError),

    /// The dependency graph could not be built. Nothing was touched.
    #[error(transparent)]
    Graph(#[from] GraphError),

    /// The live system could not be inspected.
    #[error(transparent)]
    Probe(#[from] ProbeError),

    /// Some entries were not satisfied.
    #[error(transparent)]
    Apply(#[from] AggregateApplyError),

    /// The environment is not usable.
    #[error(transparent)]
    Environment(#[from] EnvironmentError),

    /// A bug was encountered.
    #[error(transparent)]
    Internal(#[from] InternalError),
}

#[derive(Debug)]
struct EngineErrorInner {
    kind: ErrorKind,
    location: &'static Location<'static>,
    source: Option<anyhow::Error>,
    context: Vec<(Cow<'static, str>, &'static Location<'static>)>,
}

pub struct EngineError(Box<EngineErrorInner>);
impl EngineError {
    #[track_caller]
    pub fn new(kind: impl Into<ErrorKind>) -> Self {
        EngineError(Box::new(EngineErrorInner {
            kind: kind.into(),
            location: Location::caller(),
            source: None,
            context: Vec::new(),
        }))
    }

    pub fn unstructured(self, context: impl Into<Cow<'static, str>>) -> anyhow::Error {
        match self.0.source {
            Some(source) => source.context(self.0.kind).context(context.into()),
            None => anyhow::Error::from(self.0.kind).context(context.into()),
        }
    }

    /// Returns a reference to the inner ErrorKind.
    pub fn kind(&self) -> &ErrorKind {
        &self.0.kind
    }

    /// Consumes the error and returns the inner ErrorKind.
    pub fn into_kind(self) -> ErrorKind {
        self.0.kind
    }
}

pub trait ReportError<T, K> {
    /// Convert this error into a structured EngineError.
    fn structured(self, kind: K) -> Result<T, EngineError>;
}

impl<T, K> ReportError<T, K> for Option<T>
where
    K: Into<ErrorKind>,
{
    #[track_caller]
    fn structured(self, kind: K) -> Result<T, EngineError> {
        match self {
            Some(t) => Ok(t),
            None => Err(EngineError(Box::new(EngineErrorInner {
                kind: kind.into(),
                location: Location::caller(),
                source: None,
                context: Vec::new(),
            }))),
        }
    }
}

impl<T, E, K> ReportError<T, K> for Result<T, E>
where
    E: Into<anyhow::Error>,
    K: Into<ErrorKind>,
{
    #[track_caller]
    fn structured(self, kind: K) -> Result<T, EngineError> {
        match self {
            Ok(o) => Ok(o),
            Err(e) => Err(EngineError(Box::new(EngineErrorInner {
                kind: kind.into(),
                location: Location::caller(),
                source: Some(e.into()),
                context: Vec::new(),
            }))),
        }
    }
}

pub trait EngineResultExt<T> {
    /// Attach a context message to the error.
    fn message(self, context: impl Into<Cow<'static, str>>) -> Result<T, EngineError>;

    /// Convert the error into an unstructured error.
    fn unstructured(self, context: impl Into<Cow<'static, str>>) -> Result<T, anyhow::Error>;
}
impl<T> EngineResultExt<T> for Result<T, EngineError> {
    #[track_caller]
    fn message(mut self, context: impl Into<Cow<'static, str>>) -> Result<T, EngineError> {
        if let Err(ref mut e) = self {
            e.0.context.push((context.into(), Location::caller()));
        }
        self
    }

    fn unstructured(self, context: impl Into<Cow<'static, str>>) -> Result<T, anyhow::Error> {
        self.map_err(|e| e.unstructured(context))
    }
}

impl Serialize for EngineError {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("engine-error", 5)?;
        state.serialize_field("message", &self.0.kind.to_string())?;
        match self.0.kind {
            ErrorKind::InvalidConfig(ref e) => state.serialize_field("error", e)?,
            ErrorKind::Graph(ref e) => state.serialize_field("error", e)?,
            ErrorKind::Probe(ref e) => state.serialize_field("error", e)?,
            ErrorKind::Apply(ref e) => state.serialize_field("error", e)?,
            ErrorKind::Environment(ref e) => state.serialize_field("error", e)?,
            ErrorKind::Internal(ref e) => state.serialize_field("error", e)?,
        }
        state.serialize_field("category", <&str>::from(&self.0.kind))?;
        state.serialize_field(
            "location",
            &format!("{}:{}", self.0.location.file(), self.0.location.line()),
        )?;
        match self.0.source {
            Some(ref e) => state.serialize_field("cause", &Some(format!("{:?}", e)))?,
            None => state.serialize_field("cause", &None::<String>)?,
        }
        state.end()
    }
}

impl Debug for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} at {}:{}",
            self.0.kind,
            self.0.location.file(),
            self.0.location.line()
        )?;

        if !self.0.context.is_empty() {
            writeln!(f, "\n\nContext:")?;
            for (i, (context, location)) in self.0.context.iter().enumerate() {
                for (j, line) in context.split('\n').enumerate() {
                    if j == 0 {
                        write!(f, "{: >5}: ", i)?;
                    } else {
                        f.write_str("\n       ")?;
                    }
                    f.write_str(line)?;
                }
                writeln!(f, " at {}:{}", location.file(), location.line())?;
            }
        }

        if let Some(ref source) = self.0.source {
            writeln!(f, "\n\nCaused by:")?;
            let mut index = 0;
            let mut source: Option<&dyn std::error::Error> = Some(source.as_ref());
            while let Some(e) = source {
                for (i, line) in e.to_string().split('\n').enumerate() {
                    if i == 0 {
                        write!(f, "{: >5}: ", index)?;
                    } else {
                        f.write_str("\n       ")?;
                    }
                    f.write_str(line)?;
                }
                f.write_char('\n')?;
                source = e.source();
                index += 1;
            }
        }
        Ok(())
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.kind)
    }
}

#[cfg(test)]
mod tests {
    use anyhow::Context;
    use serde_yaml::Value;

    use super::*;

    #[test]
    fn test_error_serialize() {
        let e = EngineError(Box::new(EngineErrorInner {
            kind: ErrorKind::Environment(EnvironmentError::RegisterSignalHandlers),
            location: Location::caller(),
            source: Some(
                std::fs::read("/non-existant-file")
                    .context("failed to read file")
                    .unwrap_err(),
            ),
            context: Vec::new(),
        }));
        match serde_yaml::to_value(e).unwrap() {
            Value::Mapping(m) => {
                assert_eq!(m.len(), 5);
                assert_eq!(m["error"], Value::String("register-signal-handlers".into()));
                assert_eq!(m["category"], Value::String("environment".into()));
                assert!(matches!(m["cause"], Value::String(_)));
                assert_eq!(
                    m["message"],
                    Value::String("Failed to register signal handlers".into())
                );
                match m["location"] {
                    Value::String(ref s) => assert!(s.contains("error.rs:")),
                    _ => panic!("location isn't string"),
                }
            }
            _ => panic!("value isn't mapping"),
        }
    }

    #[test]
    fn test_error_debug() {
        let error = Err::<(), _>(anyhow::anyhow!("z"))
            .context("x\ny")
            .structured(InternalError::Internal("w"))
            .unwrap_err();
        assert_eq!(
            format!("{:?}", error),
            format!(
                "Internal error: w at {}:{}\n\nCaused by:\n    0: x\n       y\n    1: z\n",
                error.0.location.file(),
                error.0.location.line(),
            ),
        );
    }

    #[test]
    fn test_error_message_context() {
        let error = Err::<(), EngineError>(EngineError::new(ConfigError::Empty))
            .message("While loading the configuration")
            .unwrap_err();
        let debug = format!("{:?}", error);
        assert!(debug.starts_with("Storage configuration does not declare any entries at "));
        assert!(debug.contains("Context:\n    0: While loading the configuration at "));
        assert_eq!(<&str>::from(error.kind()), "invalid-config");

        let unstructured = error.unstructured("Apply failed");
        assert_eq!(unstructured.to_string(), "Apply failed");
    }
}
