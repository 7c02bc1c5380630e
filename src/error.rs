use thiserror::Error;

#[derive(Debug, Error)]
pub enum DigestError {
    #[error("config file invalid or unreadable: {0}")]
    InvalidConfig(String),
    #[error("invalid chunk budget: max_tokens must be >= 1 (got {0})")]
    InvalidChunkBudget(usize),
    #[error("invalid tokens-per-word calibration: must be a positive finite number (got {0})")]
    InvalidTokensPerWord(f64),
    #[error("exporter binary unavailable: {0}")]
    MissingExporterBinary(String),
    #[error("exporter failed for {target} (exit {code}): {output}")]
    ExporterFailed {
        target: String,
        code: i32,
        output: String,
    },
    #[error("ollama did not respond within {0}s; try a longer timeout or a smaller model")]
    LlmTimeout(u64),
    #[error("could not connect to ollama at {0}; is `ollama serve` running?")]
    LlmUnreachable(String),
    #[error("ollama api error ({status}): {body}")]
    LlmApi { status: u16, body: String },
    #[error("prompt template is empty: {0}")]
    EmptyPrompt(String),
}
