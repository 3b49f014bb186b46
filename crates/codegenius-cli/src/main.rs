use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use tokio_stream::StreamExt;
use tracing_subscriber::EnvFilter;

use codegenius_core::{
    Architecture, GenerationRequest, GeniusConfig, ModelEndpoint, ProjectSpec,
};
use codegenius_model::OllamaEndpoint;
use codegenius_scheduler::InferenceScheduler;
use codegenius_synth::SynthesisEngine;

#[derive(Parser)]
#[command(name = "codegenius")]
#[command(about = "CodeGenius - project synthesis with a local code model", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to a TOML configuration file
    #[arg(short, long, global = true, env = "CODEGENIUS_CONFIG")]
    config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a single code snippet from a prompt
    Generate {
        /// Instruction describing the code to generate
        prompt: String,

        /// Print tokens as the model produces them
        #[arg(long)]
        stream: bool,

        /// Write the result to this file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Override the configured output length cap
        #[arg(long)]
        max_tokens: Option<usize>,

        /// Override the configured sampling temperature
        #[arg(long)]
        temperature: Option<f32>,
    },

    /// Synthesize a complete multi-file project
    Project {
        /// What the project should do
        #[arg(short, long)]
        description: String,

        /// Technologies to build with (comma-separated)
        #[arg(short, long, value_delimiter = ',')]
        tech: Vec<String>,

        /// Features the project must provide (comma-separated)
        #[arg(short, long, value_delimiter = ',')]
        features: Vec<String>,

        /// Project architecture: monolith, microservices or library
        #[arg(short, long, default_value = "monolith")]
        arch: String,

        /// Directory to write the generated project into
        #[arg(short, long, default_value = "./generated")]
        output_dir: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = match &cli.config {
        Some(path) => GeniusConfig::from_file(path)
            .with_context(|| format!("failed to load configuration from {}", path.display()))?,
        None => GeniusConfig::default(),
    };

    let endpoint = OllamaEndpoint::from_config(&config.model)
        .context("failed to initialize the model endpoint")?;
    if !endpoint.is_available().await {
        eprintln!(
            "{} model server at {} is not reachable",
            "Warning:".yellow().bold(),
            config.model.base_url
        );
    }
    let scheduler = InferenceScheduler::new(Arc::new(endpoint), config.scheduler.clone());

    let result = match cli.command {
        Commands::Generate {
            ref prompt,
            stream,
            ref output,
            max_tokens,
            temperature,
        } => {
            run_generate(
                &scheduler,
                &config,
                prompt,
                stream,
                output.as_deref(),
                max_tokens,
                temperature,
            )
            .await
        }
        Commands::Project {
            ref description,
            ref tech,
            ref features,
            ref arch,
            ref output_dir,
        } => run_project(scheduler, config, description, tech, features, arch, output_dir).await,
    };

    if let Err(e) = result {
        eprintln!("{} {:#}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
    Ok(())
}

async fn run_generate(
    scheduler: &InferenceScheduler,
    config: &GeniusConfig,
    prompt: &str,
    stream: bool,
    output: Option<&Path>,
    max_tokens: Option<usize>,
    temperature: Option<f32>,
) -> Result<()> {
    let mut params = config.generation.clone();
    if let Some(max_tokens) = max_tokens {
        params.max_tokens = max_tokens;
    }
    if let Some(temperature) = temperature {
        params.temperature = temperature;
    }

    let request = GenerationRequest::snippet(prompt, &params);

    let text = if stream {
        let mut chunks = scheduler
            .submit_streaming(request)
            .await
            .context("generation failed")?;
        let mut collected = String::new();
        let mut stdout = std::io::stdout().lock();
        while let Some(chunk) = chunks.next().await {
            let chunk = chunk.context("stream interrupted")?;
            if output.is_none() {
                write!(stdout, "{}", chunk)?;
                stdout.flush()?;
            }
            collected.push_str(&chunk);
        }
        if output.is_none() {
            writeln!(stdout)?;
        }
        collected
    } else {
        scheduler
            .submit(request)
            .await
            .context("generation failed")?
            .text
    };

    match output {
        Some(path) => {
            std::fs::write(path, &text)
                .with_context(|| format!("failed to write {}", path.display()))?;
            println!("{} wrote {}", "Done:".green().bold(), path.display());
        }
        None if !stream => println!("{}", text),
        None => {}
    }
    Ok(())
}

async fn run_project(
    scheduler: Arc<InferenceScheduler>,
    config: GeniusConfig,
    description: &str,
    tech: &[String],
    features: &[String],
    arch: &str,
    output_dir: &Path,
) -> Result<()> {
    let architecture = Architecture::from_str(arch).map_err(anyhow::Error::msg)?;
    let spec = ProjectSpec {
        description: description.to_string(),
        tech_stack: tech.to_vec(),
        features: features.to_vec(),
        architecture,
    };

    println!(
        "{} synthesizing a {} project: {}",
        "CodeGenius".cyan().bold(),
        architecture,
        description
    );

    let engine = SynthesisEngine::new(scheduler, config)?;
    let artifact = engine
        .synthesize(&spec)
        .await
        .context("project synthesis failed")?;

    for (path, content) in &artifact.files {
        let target = output_dir.join(path);
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        std::fs::write(&target, content)
            .with_context(|| format!("failed to write {}", target.display()))?;
        let retries = artifact.retry_counts.get(path).copied().unwrap_or(0);
        if retries > 0 {
            println!("  {} {} ({} retries)", "+".green(), path, retries);
        } else {
            println!("  {} {}", "+".green(), path);
        }
    }

    for warning in &artifact.warnings {
        println!("  {} {}", "!".yellow().bold(), warning);
    }

    println!(
        "{} {} files written to {}",
        "Done:".green().bold(),
        artifact.file_count(),
        output_dir.display()
    );
    Ok(())
}
