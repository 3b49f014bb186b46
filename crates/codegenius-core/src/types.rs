use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use uuid::Uuid;

use crate::config::GenerationParams;

/// Correlation id tying a generation request back to its origin.
pub type RequestId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Architecture {
    Monolith,
    Microservices,
    Library,
}

impl fmt::Display for Architecture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Architecture::Monolith => write!(f, "monolith"),
            Architecture::Microservices => write!(f, "microservices"),
            Architecture::Library => write!(f, "library"),
        }
    }
}

impl std::str::FromStr for Architecture {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "monolith" => Ok(Architecture::Monolith),
            "microservices" => Ok(Architecture::Microservices),
            "library" => Ok(Architecture::Library),
            other => Err(format!(
                "unknown architecture '{}', expected monolith, microservices or library",
                other
            )),
        }
    }
}

/// Immutable description of the project to synthesize.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectSpec {
    pub description: String,
    pub tech_stack: Vec<String>,
    pub features: Vec<String>,
    pub architecture: Architecture,
}

/// One planned file in a synthesized project. Created by the planner and
/// never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileNode {
    /// Relative path, unique within the project.
    pub path: String,
    /// What the generated content must contain.
    pub responsibility: String,
    /// Names this file is expected to expose.
    pub declared_exports: BTreeSet<String>,
    /// Paths of other FileNodes this file builds on.
    pub depends_on: BTreeSet<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SymbolKind {
    Function,
    Class,
    Route,
    Table,
    ConfigKey,
}

impl fmt::Display for SymbolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SymbolKind::Function => write!(f, "function"),
            SymbolKind::Class => write!(f, "class"),
            SymbolKind::Route => write!(f, "route"),
            SymbolKind::Table => write!(f, "table"),
            SymbolKind::ConfigKey => write!(f, "config-key"),
        }
    }
}

/// An exported name contributed by an accepted file. Lives for one synthesis
/// session in the symbol registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Symbol {
    pub name: String,
    pub kind: SymbolKind,
    /// Path of the file that defines this symbol.
    pub owner: String,
    /// Short summary quoted verbatim into downstream prompts.
    pub signature: String,
}

/// Where a generation request came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestOrigin {
    /// Generation of one planned file, identified by its path.
    File(String),
    /// Standalone single-snippet request.
    Snippet,
}

impl fmt::Display for RequestOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestOrigin::File(path) => write!(f, "file:{}", path),
            RequestOrigin::Snippet => write!(f, "snippet"),
        }
    }
}

/// One generation attempt submitted to the inference scheduler.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub id: RequestId,
    pub prompt: String,
    pub max_tokens: usize,
    pub temperature: f32,
    pub top_p: f32,
    pub origin: RequestOrigin,
    pub created_at: DateTime<Utc>,
}

impl GenerationRequest {
    pub fn new(prompt: impl Into<String>, params: &GenerationParams, origin: RequestOrigin) -> Self {
        Self {
            id: Uuid::new_v4(),
            prompt: prompt.into(),
            max_tokens: params.max_tokens,
            temperature: params.temperature,
            top_p: params.top_p,
            origin,
            created_at: Utc::now(),
        }
    }

    /// Request for the standalone snippet entry point.
    pub fn snippet(prompt: impl Into<String>, params: &GenerationParams) -> Self {
        Self::new(prompt, params, RequestOrigin::Snippet)
    }
}

/// Successful output of one generation request.
#[derive(Debug, Clone)]
pub struct Generated {
    pub text: String,
    pub completion_tokens: usize,
}

/// Terminal outcome of one generation request.
pub type GenerationResult = crate::error::Result<Generated>;

/// Non-fatal findings attached to a finished synthesis session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum SessionWarning {
    /// A dependency edge was dropped to break a cycle.
    CycleBroken { from: String, to: String },
    /// A file references a name that no planned file registered.
    UnresolvedSymbol { file: String, symbol: String },
}

impl fmt::Display for SessionWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionWarning::CycleBroken { from, to } => {
                write!(f, "dropped dependency edge {} -> {}", from, to)
            }
            SessionWarning::UnresolvedSymbol { file, symbol } => {
                write!(f, "{} references unresolved symbol '{}'", file, symbol)
            }
        }
    }
}

/// Complete output of one synthesis session. Only ever produced when every
/// planned file was generated and accepted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectArtifact {
    pub files: BTreeMap<String, String>,
    pub warnings: Vec<SessionWarning>,
    /// Retries consumed per file path (0 = accepted on first attempt).
    pub retry_counts: BTreeMap<String, u32>,
}

impl ProjectArtifact {
    pub fn file_count(&self) -> usize {
        self.files.len()
    }
}
