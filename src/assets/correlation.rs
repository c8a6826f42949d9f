use std::fmt;
use uuid::Uuid;

/// Request correlation id carried through every log line of one lifecycle operation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CorrelationId(String);

impl CorrelationId {
    pub fn new() -> Self { Self(Uuid::new_v4().to_string()) }

    /// Keep an upstream id when one is supplied; otherwise generate a fresh one.
    pub fn from_opt_str(s: Option<&str>) -> Self {
        match s.map(str::trim) {
            Some(v) if !v.is_empty() => match Uuid::parse_str(v) {
                Ok(u) => Self(u.to_string()),
                Err(_) => Self(v.to_string()),
            },
            _ => Self::new(),
        }
    }

    pub fn as_str(&self) -> &str { &self.0 }
}

impl Default for CorrelationId {
    fn default() -> Self { Self::new() }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&self.0) }
}
