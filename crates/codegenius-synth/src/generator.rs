use std::sync::Arc;
use tracing::{debug, warn};

use codegenius_core::error::Result;
use codegenius_core::{
    FileNode, GenerationParams, GenerationRequest, GeniusError, ProjectSpec, RequestOrigin,
    SynthesisConfig,
};
use codegenius_scheduler::InferenceScheduler;

use crate::registry::SymbolRegistry;
use crate::validate;

/// Content that passed the validation gate, with the attempts it took.
pub struct AcceptedFile {
    pub content: String,
    pub attempts: u32,
}

/// Generates one planned file at a time: builds the prompt, submits it to the
/// inference scheduler and runs the validation gate, retrying with the
/// failure reasons appended so the model can self-correct.
pub struct FileGenerator {
    scheduler: Arc<InferenceScheduler>,
    params: GenerationParams,
    synthesis: SynthesisConfig,
}

impl FileGenerator {
    pub fn new(
        scheduler: Arc<InferenceScheduler>,
        params: GenerationParams,
        synthesis: SynthesisConfig,
    ) -> Self {
        Self {
            scheduler,
            params,
            synthesis,
        }
    }

    /// Produce accepted content for one file node. Does not touch the
    /// registry; the engine registers exports only after acceptance.
    pub async fn generate_file(
        &self,
        spec: &ProjectSpec,
        node: &FileNode,
        registry: &SymbolRegistry,
    ) -> Result<AcceptedFile> {
        let max_attempts = self.synthesis.retry_limit + 1;
        let mut feedback: Vec<String> = Vec::new();

        for attempt in 1..=max_attempts {
            let prompt = self.build_prompt(spec, node, registry, &feedback);
            let request =
                GenerationRequest::new(prompt, &self.params, RequestOrigin::File(node.path.clone()));
            debug!(path = %node.path, attempt, id = %request.id, "submitting file generation");

            let generated = self.scheduler.submit(request).await?;
            let content = validate::strip_code_fences(&generated.text);
            match validate::validate(&content, node) {
                Ok(()) => {
                    debug!(path = %node.path, attempt, "content accepted");
                    return Ok(AcceptedFile { content, attempts: attempt });
                }
                Err(reasons) => {
                    warn!(
                        path = %node.path,
                        attempt,
                        reasons = reasons.join("; "),
                        "validation gate rejected content"
                    );
                    feedback = reasons;
                }
            }
        }

        Err(GeniusError::GenerationFailed {
            target: node.path.clone(),
            reason: format!(
                "validation failed after {} attempts: {}",
                max_attempts,
                feedback.join("; ")
            ),
        })
    }

    fn build_prompt(
        &self,
        spec: &ProjectSpec,
        node: &FileNode,
        registry: &SymbolRegistry,
        feedback: &[String],
    ) -> String {
        let mut prompt = String::new();
        prompt.push_str("You are generating one file of a larger project.\n\n");
        prompt.push_str(&format!("Project: {}\n", spec.description));
        prompt.push_str(&format!("Tech stack: {}\n", spec.tech_stack.join(", ")));
        prompt.push_str(&format!("Architecture: {}\n\n", spec.architecture));
        prompt.push_str(&format!("File: {}\n", node.path));
        prompt.push_str(&format!("Responsibility: {}\n", node.responsibility));

        if !node.declared_exports.is_empty() {
            let exports: Vec<&str> = node.declared_exports.iter().map(String::as_str).collect();
            prompt.push_str(&format!("It must define: {}\n", exports.join(", ")));
        }

        let excerpt = registry.excerpt(&node.depends_on, self.synthesis.prompt_token_budget);
        if !excerpt.is_empty() {
            prompt.push_str("\nAlready generated symbols you may reference:\n");
            prompt.push_str(&excerpt);
            prompt.push('\n');
        }

        if !feedback.is_empty() {
            prompt.push_str("\nThe previous attempt was rejected for these reasons:\n");
            for reason in feedback {
                prompt.push_str(&format!("- {}\n", reason));
            }
            prompt.push_str("Correct these issues in the new version.\n");
        }

        prompt.push_str("\nReturn only the file content, no explanations.\n");
        prompt
    }
}
