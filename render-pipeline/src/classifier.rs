//! Maps engine error codes to the message shown to the user and whether
//! submitting the same prompt again is worth it.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ErrorKind {
    #[serde(rename = "TIMEOUT_ERROR")]
    Timeout,
    #[serde(rename = "MEMORY_ERROR")]
    Memory,
    #[serde(rename = "LATEX_ERROR")]
    Latex,
    #[serde(rename = "API_ERROR")]
    Api,
    #[serde(rename = "CODE_ERROR")]
    Code,
    #[serde(rename = "DEPENDENCY_ERROR")]
    Dependency,
    #[serde(rename = "GENERATION_ERROR")]
    Generation,
    #[serde(rename = "RENDER_ERROR")]
    Render,
    #[serde(rename = "NETWORK_ERROR")]
    Network,
    #[serde(rename = "SUBMIT_ERROR")]
    Submit,
    #[serde(rename = "UNKNOWN_ERROR")]
    Unknown,
}

impl ErrorKind {
    pub const ALL: [ErrorKind; 11] = [
        ErrorKind::Timeout,
        ErrorKind::Memory,
        ErrorKind::Latex,
        ErrorKind::Api,
        ErrorKind::Code,
        ErrorKind::Dependency,
        ErrorKind::Generation,
        ErrorKind::Render,
        ErrorKind::Network,
        ErrorKind::Submit,
        ErrorKind::Unknown,
    ];

    pub fn code(self) -> &'static str {
        match self {
            ErrorKind::Timeout => "TIMEOUT_ERROR",
            ErrorKind::Memory => "MEMORY_ERROR",
            ErrorKind::Latex => "LATEX_ERROR",
            ErrorKind::Api => "API_ERROR",
            ErrorKind::Code => "CODE_ERROR",
            ErrorKind::Dependency => "DEPENDENCY_ERROR",
            ErrorKind::Generation => "GENERATION_ERROR",
            ErrorKind::Render => "RENDER_ERROR",
            ErrorKind::Network => "NETWORK_ERROR",
            ErrorKind::Submit => "SUBMIT_ERROR",
            ErrorKind::Unknown => "UNKNOWN_ERROR",
        }
    }

    /// Unrecognised codes fall back to [`ErrorKind::Unknown`].
    pub fn from_code(code: &str) -> Self {
        let code = code.trim();
        Self::ALL
            .into_iter()
            .find(|kind| kind.code().eq_ignore_ascii_case(code))
            .unwrap_or(ErrorKind::Unknown)
    }

    pub fn message(self) -> &'static str {
        match self {
            ErrorKind::Timeout => "Video rendering took too long. The animation might be too complex. Try simplifying your request.",
            ErrorKind::Memory => "Video rendering failed due to insufficient memory. Try creating a shorter or simpler animation.",
            ErrorKind::Latex => "LaTeX rendering failed. There might be an issue with mathematical expressions in your animation.",
            ErrorKind::Api => "AI service is temporarily unavailable. Please try again in a moment.",
            ErrorKind::Code => "Generated code has errors. Please try rephrasing your request.",
            ErrorKind::Dependency => "Missing required dependencies for rendering. Please contact support.",
            ErrorKind::Generation => "Failed to generate animation code. Please try a different prompt.",
            ErrorKind::Render => "Video rendering failed. The animation might be too complex or contain unsupported features.",
            ErrorKind::Network => "Lost connection to the rendering service. Still waiting for your animation.",
            ErrorKind::Submit => "The rendering service could not start your animation. Please try again.",
            ErrorKind::Unknown => "An unexpected error occurred. Please try again or contact support.",
        }
    }

    pub fn retryable(self) -> bool {
        matches!(
            self,
            ErrorKind::Timeout
                | ErrorKind::Api
                | ErrorKind::Network
                | ErrorKind::Submit
                | ErrorKind::Unknown
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Classification {
    #[serde(rename = "error_type")]
    pub kind: ErrorKind,
    pub message: &'static str,
    pub retryable: bool,
}

impl Classification {
    pub fn of(kind: ErrorKind) -> Self {
        Self {
            kind,
            message: kind.message(),
            retryable: kind.retryable(),
        }
    }

    pub fn submit_failure() -> Self {
        Self::of(ErrorKind::Submit)
    }

    pub fn timeout() -> Self {
        Self::of(ErrorKind::Timeout)
    }
}

pub fn classify(error_type: &str) -> Classification {
    Classification::of(ErrorKind::from_code(error_type))
}

/// Guess the kind from a free-text engine message. Rules are checked in order
/// and the first match wins.
pub fn categorize_message(raw: &str) -> ErrorKind {
    const RULES: &[(ErrorKind, &[&str])] = &[
        (ErrorKind::Timeout, &["timeout", "timed out"]),
        (ErrorKind::Memory, &["memory", "out of memory"]),
        (ErrorKind::Latex, &["latex", "tex", "dvisvgm"]),
        (ErrorKind::Api, &["api", "rate limit", "quota"]),
        (ErrorKind::Code, &["invalid code", "syntax", "indentation"]),
        (ErrorKind::Dependency, &["file not found", "no such file"]),
        (ErrorKind::Generation, &["failed to generate", "no code"]),
        (ErrorKind::Render, &["render failed", "rendering error"]),
    ];

    let lowered = raw.to_lowercase();
    RULES
        .iter()
        .find(|(_, needles)| needles.iter().any(|needle| lowered.contains(needle)))
        .map_or(ErrorKind::Unknown, |(kind, _)| *kind)
}

/// Classify a failed status report. An explicit code wins over the message.
pub fn classify_failure(error_type: Option<&str>, error: Option<&str>) -> Classification {
    match (
        error_type.map(str::trim).filter(|code| !code.is_empty()),
        error,
    ) {
        (Some(code), _) => classify(code),
        (None, Some(message)) => Classification::of(categorize_message(message)),
        (None, None) => Classification::of(ErrorKind::Unknown),
    }
}
