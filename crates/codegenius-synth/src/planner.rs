//! Deterministic file manifest derivation. `plan` is a pure function of the
//! project spec: the same spec always yields the same paths, exports and
//! dependency edges.

use std::collections::BTreeSet;

use codegenius_core::error::Result;
use codegenius_core::{Architecture, FileNode, GeniusError, ProjectSpec};

pub fn plan(spec: &ProjectSpec) -> Result<Vec<FileNode>> {
    if spec.tech_stack.is_empty() {
        return Err(GeniusError::Planning(
            "tech_stack must not be empty; it selects the manifest rule set".into(),
        ));
    }
    if spec.features.is_empty() {
        return Err(GeniusError::Planning(
            "features must not be empty; there is nothing to plan".into(),
        ));
    }
    let ext = file_extension(&spec.tech_stack);
    let nodes = match spec.architecture {
        Architecture::Monolith => plan_monolith(spec, ext),
        Architecture::Microservices => plan_microservices(spec, ext),
        Architecture::Library => plan_library(spec, ext),
    };
    Ok(nodes)
}

/// Fixed layered skeleton: config, models, data access, routes, entry point,
/// tests.
fn plan_monolith(spec: &ProjectSpec, ext: &str) -> Vec<FileNode> {
    let config = format!("app/config.{}", ext);
    let models = format!("app/models.{}", ext);
    let repository = format!("app/repository.{}", ext);
    let routes = format!("app/routes.{}", ext);
    let main = format!("app/main.{}", ext);

    let feature_list = spec.features.join(", ");
    let mut nodes = vec![
        FileNode {
            path: config.clone(),
            responsibility: format!(
                "Application settings and configuration keys for {}.",
                spec.description
            ),
            declared_exports: set(["settings"]),
            depends_on: BTreeSet::new(),
        },
        FileNode {
            path: models.clone(),
            responsibility: format!(
                "Data models and table schemas backing these capabilities: {}.",
                feature_list
            ),
            declared_exports: spec.features.iter().map(|f| pascal(f)).collect(),
            depends_on: set_of([&config]),
        },
        FileNode {
            path: repository.clone(),
            responsibility: format!(
                "Data access layer with lookup and storage operations for: {}.",
                feature_list
            ),
            declared_exports: spec
                .features
                .iter()
                .map(|f| format!("find_{}", slug(f)))
                .collect(),
            depends_on: set_of([&models, &config]),
        },
        FileNode {
            path: routes.clone(),
            responsibility: format!(
                "HTTP route handlers exposing endpoints for: {}.",
                feature_list
            ),
            declared_exports: spec
                .features
                .iter()
                .map(|f| format!("route_{}", slug(f)))
                .collect(),
            depends_on: set_of([&repository, &models]),
        },
        FileNode {
            path: main.clone(),
            responsibility: format!(
                "Entry point for {}; starts the application and wires its layers together.",
                spec.description
            ),
            declared_exports: set(["main"]),
            depends_on: set_of([&routes, &config]),
        },
        FileNode {
            path: format!("tests/test_models.{}", ext),
            responsibility: format!("Automated checks exercising the data layer of {}.", spec.description),
            declared_exports: spec
                .features
                .iter()
                .map(|f| format!("test_{}", slug(f)))
                .collect(),
            depends_on: set_of([&models]),
        },
        FileNode {
            path: format!("tests/test_routes.{}", ext),
            responsibility: format!(
                "Automated checks exercising the request handling of {}.",
                spec.description
            ),
            declared_exports: spec
                .features
                .iter()
                .map(|f| format!("test_route_{}", slug(f)))
                .collect(),
            depends_on: set_of([&routes]),
        },
    ];
    nodes.push(docs_node(spec, &main));
    nodes.sort_by(|a, b| a.path.cmp(&b.path));
    nodes
}

/// One service per feature, shared models and configuration, a gateway
/// routing to every service, one test file per service.
fn plan_microservices(spec: &ProjectSpec, ext: &str) -> Vec<FileNode> {
    let config = format!("shared/config.{}", ext);
    let models = format!("shared/models.{}", ext);

    let mut nodes = vec![
        FileNode {
            path: config.clone(),
            responsibility: format!(
                "Shared settings and configuration keys for all services of {}.",
                spec.description
            ),
            declared_exports: set(["settings"]),
            depends_on: BTreeSet::new(),
        },
        FileNode {
            path: models.clone(),
            responsibility: format!(
                "Shared data models and table schemas used across the services of {}.",
                spec.description
            ),
            declared_exports: spec.features.iter().map(|f| pascal(f)).collect(),
            depends_on: set_of([&config]),
        },
    ];

    let mut service_paths = Vec::new();
    for feature in &spec.features {
        let name = slug(feature);
        let service = format!("services/{}/service.{}", name, ext);
        nodes.push(FileNode {
            path: service.clone(),
            responsibility: format!(
                "Service implementing the '{}' capability of {}.",
                feature, spec.description
            ),
            declared_exports: set_owned([format!("{}Service", pascal(feature)), format!("handle_{}", name)]),
            depends_on: set_of([&models, &config]),
        });
        nodes.push(FileNode {
            path: format!("services/{}/test_service.{}", name, ext),
            responsibility: format!("Automated checks exercising the '{}' capability.", feature),
            declared_exports: set_owned([format!("test_{}", name)]),
            depends_on: set_of([&service]),
        });
        service_paths.push(service);
    }

    let gateway = format!("gateway/main.{}", ext);
    nodes.push(FileNode {
        path: gateway.clone(),
        responsibility: format!(
            "API gateway for {}; dispatches incoming requests to every service.",
            spec.description
        ),
        declared_exports: set(["main"]),
        depends_on: service_paths
            .iter()
            .cloned()
            .chain(std::iter::once(config))
            .collect(),
    });
    nodes.push(docs_node(spec, &gateway));
    nodes.sort_by(|a, b| a.path.cmp(&b.path));
    nodes
}

/// One module per feature plus a root re-export and per-module tests.
fn plan_library(spec: &ProjectSpec, ext: &str) -> Vec<FileNode> {
    let config = format!("src/config.{}", ext);
    let mut nodes = vec![FileNode {
        path: config.clone(),
        responsibility: format!(
            "Library settings and configuration keys for {}.",
            spec.description
        ),
        declared_exports: set(["settings"]),
        depends_on: BTreeSet::new(),
    }];

    let mut module_paths = Vec::new();
    for feature in &spec.features {
        let name = slug(feature);
        let module = format!("src/{}.{}", name, ext);
        nodes.push(FileNode {
            path: module.clone(),
            responsibility: format!(
                "Public building block providing '{}' for {}.",
                feature, spec.description
            ),
            declared_exports: set_owned([name.clone(), pascal(feature)]),
            depends_on: set_of([&config]),
        });
        nodes.push(FileNode {
            path: format!("tests/test_{}.{}", name, ext),
            responsibility: format!("Automated checks exercising '{}'.", feature),
            declared_exports: set_owned([format!("test_{}", name)]),
            depends_on: set_of([&module]),
        });
        module_paths.push(module);
    }

    let root = format!("src/lib.{}", ext);
    nodes.push(FileNode {
        path: root.clone(),
        responsibility: format!(
            "Library root for {}; initializes and re-exposes the public building blocks.",
            spec.description
        ),
        declared_exports: set(["init"]),
        depends_on: module_paths.into_iter().collect(),
    });
    nodes.push(docs_node(spec, &root));
    nodes.sort_by(|a, b| a.path.cmp(&b.path));
    nodes
}

/// Project documentation, written once everything it describes exists.
fn docs_node(spec: &ProjectSpec, entry_point: &str) -> FileNode {
    FileNode {
        path: "README.md".to_string(),
        responsibility: format!(
            "Project documentation for {}: what it does, how to set it up and how to run it. Features: {}.",
            spec.description,
            spec.features.join(", ")
        ),
        declared_exports: BTreeSet::new(),
        depends_on: std::iter::once(entry_point.to_string()).collect(),
    }
}

/// File extension chosen from the first recognized technology.
fn file_extension(tech_stack: &[String]) -> &'static str {
    for tech in tech_stack {
        let tech = tech.to_lowercase();
        let ext = if tech.contains("python") {
            "py"
        } else if tech.contains("rust") {
            "rs"
        } else if tech.contains("typescript") {
            "ts"
        } else if tech.contains("javascript") || tech.contains("node") {
            "js"
        } else if tech == "go" || tech.contains("golang") {
            "go"
        } else if tech.contains("ruby") {
            "rb"
        } else if tech.contains("java") {
            "java"
        } else {
            continue;
        };
        return ext;
    }
    "py"
}

/// Lowercase identifier: "CRUD posts" -> "crud_posts".
pub fn slug(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut last_sep = true;
    for ch in text.chars() {
        if ch.is_ascii_alphanumeric() {
            out.push(ch.to_ascii_lowercase());
            last_sep = false;
        } else if !last_sep {
            out.push('_');
            last_sep = true;
        }
    }
    while out.ends_with('_') {
        out.pop();
    }
    if out.is_empty() {
        out.push('x');
    }
    out
}

/// PascalCase type name: "CRUD posts" -> "CrudPosts".
pub fn pascal(text: &str) -> String {
    slug(text)
        .split('_')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect()
}

fn set<const N: usize>(names: [&str; N]) -> BTreeSet<String> {
    names.into_iter().map(String::from).collect()
}

fn set_owned<const N: usize>(names: [String; N]) -> BTreeSet<String> {
    names.into_iter().collect()
}

fn set_of<const N: usize>(paths: [&String; N]) -> BTreeSet<String> {
    paths.into_iter().cloned().collect()
}
