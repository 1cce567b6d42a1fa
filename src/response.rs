use crate::extract::OutputKind;
use serde::{Deserialize, Serialize};

/// Success body shared by every buffered endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayOutput {
    /// Generated text, or an image URL / data URI
    pub output: String,
    pub kind: OutputKind,
}

impl RelayOutput {
    pub fn new(kind: OutputKind, output: String) -> Self {
        Self { output, kind }
    }
}
