use std::fmt::{Debug, Display, Formatter};

/// A target id was requested that is not present in the registry.
///
/// This is the only error that aborts a deobfuscation run; everything
/// else is local to a call site or a probe and is logged instead.
#[derive(Debug, Clone)]
pub struct UnknownTargetError {
    /// The id that failed to resolve.
    pub id: String,
}

impl Display for UnknownTargetError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "unknown target: {}", self.id)
    }
}

impl std::error::Error for UnknownTargetError {}

/// The sandbox could not evaluate a fragment.
#[derive(Debug, Clone)]
pub enum EvalError {
    /// The engine raised while evaluating the fragment.
    Evaluation(String),

    /// The fragment evaluated, but the value could not be converted
    /// into an [EvalOutcome](crate::sandbox::EvalOutcome).
    Conversion(String),
}

impl Display for EvalError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Evaluation(e) => write!(f, "EvalError: {}", e),
            Self::Conversion(e) => write!(f, "EvalError: conversion: {}", e),
        }
    }
}

impl std::error::Error for EvalError {}

/// The input source could not be parsed.
#[derive(Debug)]
pub struct ParseError(pub anyhow::Error);

impl Display for ParseError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "ParseError: {}", self.0)
    }
}

impl std::error::Error for ParseError {}

/// A target's detection hook failed.
///
/// Detection failures never abort a run; the registry swallows them and
/// omits the target from the candidate list.
#[derive(Debug, Clone)]
pub struct DetectionError(pub String);

impl Display for DetectionError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "DetectionError: {}", self.0)
    }
}

impl std::error::Error for DetectionError {}

/// A probe expected one tree shape and found another.
///
/// Local to the candidate node, which is skipped; surfaced only through
/// debug logging.
#[derive(Debug, Clone)]
pub struct PatternMismatch {
    /// The shape the probe was looking for.
    pub expected: &'static str,

    /// A short description of what was found instead.
    pub found: String,
}

impl PatternMismatch {
    pub fn new(expected: &'static str, found: impl Into<String>) -> Self {
        Self {
            expected,
            found: found.into(),
        }
    }
}

impl Display for PatternMismatch {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "expected {}, found {}", self.expected, self.found)
    }
}

impl std::error::Error for PatternMismatch {}

/// A deobfuscation error.
#[derive(Debug)]
pub enum DeobfuscateError {
    /// The caller named a target that is not registered.
    UnknownTarget(UnknownTargetError),

    /// The input source failed to parse.
    Parse(ParseError),
}

impl Display for DeobfuscateError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownTarget(e) => Display::fmt(e, f),
            Self::Parse(e) => Display::fmt(e, f),
        }
    }
}

impl std::error::Error for DeobfuscateError {}

impl From<UnknownTargetError> for DeobfuscateError {
    fn from(err: UnknownTargetError) -> Self {
        Self::UnknownTarget(err)
    }
}

impl From<ParseError> for DeobfuscateError {
    fn from(err: ParseError) -> Self {
        Self::Parse(err)
    }
}
