use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{error, info, warn};

use codegenius_core::error::Result;
use codegenius_core::{
    FileNode, GeniusConfig, GeniusError, ProjectArtifact, ProjectSpec, SessionWarning, Symbol,
};
use codegenius_scheduler::InferenceScheduler;

use crate::generator::FileGenerator;
use crate::graph;
use crate::planner;
use crate::registry::{infer_kind, SymbolRegistry};

/// Lifecycle of one synthesis session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Planning,
    Generating,
    Linking,
    Done,
    Failed,
}

/// Top-level coordinator. Walks the planned file graph in topological order,
/// generating and validating one file at a time and registering its exports
/// before moving on to dependents, so every prompt references concrete,
/// already-generated symbols.
pub struct SynthesisEngine {
    scheduler: Arc<InferenceScheduler>,
    config: GeniusConfig,
}

impl SynthesisEngine {
    /// Configuration is validated once here rather than on each call.
    pub fn new(scheduler: Arc<InferenceScheduler>, config: GeniusConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { scheduler, config })
    }

    /// Run one session end to end. Returns a complete artifact or the first
    /// failure; partially generated projects are never returned.
    pub async fn synthesize(&self, spec: &ProjectSpec) -> Result<ProjectArtifact> {
        let deadline = self.config.synthesis.session_timeout();
        match tokio::time::timeout(deadline, self.run_session(spec)).await {
            Ok(result) => result,
            Err(_) => {
                // dropping the session future abandons any queued retries
                error!(state = ?SessionState::Failed, ?deadline, "session deadline elapsed");
                Err(GeniusError::RequestTimeout(deadline))
            }
        }
    }

    async fn run_session(&self, spec: &ProjectSpec) -> Result<ProjectArtifact> {
        info!(state = ?SessionState::Planning, architecture = %spec.architecture, "session started");
        let nodes = planner::plan(spec)?;

        info!(state = ?SessionState::Generating, files = nodes.len(), "manifest planned");
        let topo = graph::topological_order(&nodes);
        let mut warnings: Vec<SessionWarning> = topo
            .broken_edges
            .iter()
            .map(|(from, to)| SessionWarning::CycleBroken {
                from: from.clone(),
                to: to.clone(),
            })
            .collect();

        let by_path: HashMap<&str, &FileNode> =
            nodes.iter().map(|n| (n.path.as_str(), n)).collect();
        let generator = FileGenerator::new(
            Arc::clone(&self.scheduler),
            self.config.generation.clone(),
            self.config.synthesis.clone(),
        );

        let mut registry = SymbolRegistry::new();
        let mut files: BTreeMap<String, String> = BTreeMap::new();
        let mut retry_counts: BTreeMap<String, u32> = BTreeMap::new();

        for path in &topo.order {
            let node = by_path[path.as_str()];
            let accepted = match generator.generate_file(spec, node, &registry).await {
                Ok(accepted) => accepted,
                Err(err) => {
                    // discard everything generated so far; no partial project
                    error!(state = ?SessionState::Failed, path = %path, error = %err, "session failed");
                    return Err(err);
                }
            };
            retry_counts.insert(path.clone(), accepted.attempts - 1);

            let kind = infer_kind(&node.responsibility);
            for name in &node.declared_exports {
                registry.register(Symbol {
                    name: name.clone(),
                    kind,
                    owner: path.clone(),
                    signature: extract_signature(&accepted.content, name, path),
                });
            }
            files.insert(path.clone(), accepted.content);
        }

        info!(state = ?SessionState::Linking, symbols = registry.len(), "all files generated");
        warnings.extend(link_check(&files, &nodes, &registry));
        for warning in &warnings {
            warn!(%warning, "session warning");
        }

        info!(state = ?SessionState::Done, files = files.len(), "session complete");
        Ok(ProjectArtifact {
            files,
            warnings,
            retry_counts,
        })
    }
}

/// Signature summary for a freshly registered symbol: the first content line
/// mentioning it, trimmed for prompt use.
fn extract_signature(content: &str, name: &str, path: &str) -> String {
    content
        .lines()
        .find(|line| line.contains(name))
        .map(|line| {
            let line = line.trim();
            if line.chars().count() > 96 {
                line.chars().take(96).collect()
            } else {
                line.to_string()
            }
        })
        .unwrap_or_else(|| format!("defined in {}", path))
}

/// Final pass over accepted content: names pulled in through import-like
/// lines must exist in the registry. Unresolved names are warnings, not
/// failures; they may refer to external libraries outside the engine's remit.
fn link_check(
    files: &BTreeMap<String, String>,
    nodes: &[FileNode],
    registry: &SymbolRegistry,
) -> Vec<SessionWarning> {
    const IMPORT_MARKERS: [&str; 4] = ["import ", "from ", "use ", "require"];
    const KEYWORDS: [&str; 10] = [
        "import", "from", "use", "require", "include", "as", "def", "fn", "pub", "return",
    ];

    // module-level names (path stems) resolve to planned files, not symbols
    let stems: BTreeSet<String> = nodes
        .iter()
        .flat_map(|n| {
            n.path
                .split(['/', '.'])
                .filter(|part| !part.is_empty())
                .map(String::from)
                .collect::<Vec<_>>()
        })
        .collect();

    let mut warnings = Vec::new();
    let mut seen: BTreeSet<(String, String)> = BTreeSet::new();

    for (path, content) in files {
        let own_exports: &BTreeSet<String> = nodes
            .iter()
            .find(|n| &n.path == path)
            .map(|n| &n.declared_exports)
            .expect("accepted file must come from the manifest");

        for line in content.lines() {
            let trimmed = line.trim_start();
            if !IMPORT_MARKERS.iter().any(|m| trimmed.starts_with(m)) {
                continue;
            }
            for ident in identifiers(trimmed) {
                if KEYWORDS.contains(&ident.as_str())
                    || stems.contains(&ident)
                    || own_exports.contains(&ident)
                    || registry.contains_name(&ident)
                {
                    continue;
                }
                if seen.insert((path.clone(), ident.clone())) {
                    warnings.push(SessionWarning::UnresolvedSymbol {
                        file: path.clone(),
                        symbol: ident,
                    });
                }
            }
        }
    }
    warnings
}

/// Identifier-shaped tokens of one line.
fn identifiers(line: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = String::new();
    for ch in line.chars() {
        if ch.is_ascii_alphanumeric() || ch == '_' {
            current.push(ch);
        } else if !current.is_empty() {
            if !current.chars().next().is_some_and(|c| c.is_ascii_digit()) {
                out.push(std::mem::take(&mut current));
            } else {
                current.clear();
            }
        }
    }
    if !current.is_empty() && !current.chars().next().is_some_and(|c| c.is_ascii_digit()) {
        out.push(current);
    }
    out
}
