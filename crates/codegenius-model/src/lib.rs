pub mod ollama;

pub use ollama::OllamaEndpoint;
