use std::fmt;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {var}: {value:?} ({reason})")]
    InvalidEnvVar {
        var: &'static str,
        value: String,
        reason: InvalidReason,
    },
}

#[derive(Debug)]
pub enum InvalidReason {
    NotAnInteger,
    MustBePositive,
    MustBeNonNegative,
    UnknownPolicy,
    NotABool,
}

impl fmt::Display for InvalidReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            InvalidReason::NotAnInteger => "not an integer",
            InvalidReason::MustBePositive => "must be positive",
            InvalidReason::MustBeNonNegative => "must not be negative",
            InvalidReason::UnknownPolicy => "unrecognised policy name",
            InvalidReason::NotABool => "not a boolean (true/false/1/0)",
        };
        f.write_str(s)
    }
}
