//! Ollama completion client and the prompt-driven analyses built on it.
//!
//! All analyses take text that the chunker already rendered. For large
//! histories, chunk first and call the analysis once per block.

use crate::digest::config::OllamaConfig;
use crate::error::DigestError;
use anyhow::{Context, Result};
use reqwest::blocking::Client;
use serde_json::Value;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

const AVAILABILITY_TIMEOUT_SECS: u64 = 5;

pub trait Completion {
    fn generate(&self, prompt: &str) -> Result<String>;
    fn is_available(&self) -> bool;
    fn label(&self) -> String;
}

pub struct OllamaClient {
    host: String,
    model: String,
    timeout_secs: u64,
    client: Client,
}

impl OllamaClient {
    pub fn new(cfg: &OllamaConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .build()
            .context("failed to build http client")?;
        Ok(Self {
            host: cfg.host.trim().trim_end_matches('/').to_string(),
            model: cfg.model.trim().to_string(),
            timeout_secs: cfg.timeout_secs,
            client,
        })
    }

    fn map_send_error(&self, err: reqwest::Error) -> DigestError {
        if err.is_timeout() {
            DigestError::LlmTimeout(self.timeout_secs)
        } else {
            DigestError::LlmUnreachable(self.host.clone())
        }
    }
}

/// Ollama tags models as `mistral:latest`; compare on the part before `:`.
fn model_base(name: &str) -> &str {
    name.split(':').next().unwrap_or(name)
}

fn tags_contain_model(tags: &Value, model: &str) -> bool {
    let wanted = model_base(model);
    tags.get("models")
        .and_then(Value::as_array)
        .is_some_and(|models| {
            models
                .iter()
                .filter_map(|m| m.get("name").and_then(Value::as_str))
                .any(|name| model_base(name) == wanted)
        })
}

impl Completion for OllamaClient {
    fn generate(&self, prompt: &str) -> Result<String> {
        let url = format!("{}/api/generate", self.host);
        let payload = serde_json::json!({
            "model": self.model,
            "prompt": prompt,
            "stream": false
        });

        let response = self
            .client
            .post(&url)
            .json(&payload)
            .send()
            .map_err(|err| self.map_send_error(err))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(DigestError::LlmApi {
                status: status.as_u16(),
                body,
            }
            .into());
        }

        let json: Value = response
            .json()
            .context("ollama returned a non-json body")?;
        let text = json
            .get("response")
            .and_then(Value::as_str)
            .context("ollama response missing `response` field")?;
        Ok(text.to_string())
    }

    fn is_available(&self) -> bool {
        let url = format!("{}/api/tags", self.host);
        let Ok(response) = self
            .client
            .get(&url)
            .timeout(Duration::from_secs(AVAILABILITY_TIMEOUT_SECS))
            .send()
        else {
            return false;
        };
        if !response.status().is_success() {
            return false;
        }
        let Ok(tags) = response.json::<Value>() else {
            return false;
        };
        tags_contain_model(&tags, &self.model)
    }

    fn label(&self) -> String {
        format!("ollama:{}", self.model)
    }
}

/// Substitute `{key}` markers literally. Braces inside the values (code
/// snippets, structs) are never interpreted.
pub fn fill_template(template: &str, values: &[(&str, &str)]) -> String {
    let mut out = template.to_string();
    for (key, value) in values {
        out = out.replace(&format!("{{{key}}}"), value);
    }
    out
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum PromptKind {
    UserStory,
    ChannelSummaryFaq,
    FactCheck,
    WeeklyDigest,
}

impl PromptKind {
    pub fn file_name(self) -> &'static str {
        match self {
            PromptKind::UserStory => "user_story.txt",
            PromptKind::ChannelSummaryFaq => "channel_summary_faq.txt",
            PromptKind::FactCheck => "factcheck.txt",
            PromptKind::WeeklyDigest => "weekly_digest.txt",
        }
    }

    fn builtin(self) -> &'static str {
        match self {
            PromptKind::UserStory => include_str!("../../prompts/user_story.txt"),
            PromptKind::ChannelSummaryFaq => include_str!("../../prompts/channel_summary_faq.txt"),
            PromptKind::FactCheck => include_str!("../../prompts/factcheck.txt"),
            PromptKind::WeeklyDigest => include_str!("../../prompts/weekly_digest.txt"),
        }
    }
}

/// Prompt templates: a file in `dir` overrides the built-in text. Loaded
/// templates are cached for the life of the library.
pub struct PromptLibrary {
    dir: Option<PathBuf>,
    cache: RefCell<BTreeMap<PromptKind, String>>,
}

impl PromptLibrary {
    pub fn new(dir: Option<PathBuf>) -> Self {
        Self {
            dir,
            cache: RefCell::new(BTreeMap::new()),
        }
    }

    pub fn load(&self, kind: PromptKind) -> Result<String> {
        if let Some(cached) = self.cache.borrow().get(&kind) {
            return Ok(cached.clone());
        }

        let from_disk = self
            .dir
            .as_ref()
            .map(|dir| dir.join(kind.file_name()))
            .filter(|path| path.is_file());
        let text = match from_disk {
            Some(path) => fs::read_to_string(&path)
                .with_context(|| format!("failed to read {}", path.display()))?,
            None => kind.builtin().to_string(),
        };
        if text.trim().is_empty() {
            return Err(DigestError::EmptyPrompt(kind.file_name().to_string()).into());
        }
        self.cache.borrow_mut().insert(kind, text.clone());
        Ok(text)
    }
}

pub struct Processor<C: Completion> {
    client: C,
    prompts: PromptLibrary,
}

impl<C: Completion> Processor<C> {
    pub fn new(client: C, prompts: PromptLibrary) -> Self {
        Self { client, prompts }
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn is_ready(&self) -> bool {
        self.client.is_available()
    }

    fn run(&self, kind: PromptKind, values: &[(&str, &str)]) -> Result<String> {
        let template = self.prompts.load(kind)?;
        let prompt = fill_template(&template, values);
        let response = self
            .client
            .generate(&prompt)
            .with_context(|| format!("{} failed", kind.file_name()))?;
        Ok(response.trim().to_string())
    }

    /// Narrative of one user's journey; best with 30-90 days of their
    /// messages.
    pub fn user_story(&self, messages_text: &str, username: &str) -> Result<String> {
        self.run(
            PromptKind::UserStory,
            &[("username", username), ("messages", messages_text)],
        )
    }

    pub fn channel_summary_faq(&self, messages_text: &str, channel: &str) -> Result<String> {
        let channel = channel.trim_start_matches('#');
        self.run(
            PromptKind::ChannelSummaryFaq,
            &[("channel", channel), ("messages", messages_text)],
        )
    }

    pub fn factcheck(&self, messages_text: &str, topic: &str) -> Result<String> {
        self.run(
            PromptKind::FactCheck,
            &[("topic", topic), ("messages", messages_text)],
        )
    }

    /// `server_data` is inserted verbatim; callers pass pretty-printed JSON.
    pub fn weekly_digest(&self, server_data: &str) -> Result<String> {
        self.run(PromptKind::WeeklyDigest, &[("server_data", server_data)])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    struct RecordingCompletion {
        prompts: RefCell<Vec<String>>,
        reply: String,
    }

    impl RecordingCompletion {
        fn replying(reply: &str) -> Self {
            Self {
                prompts: RefCell::new(Vec::new()),
                reply: reply.to_string(),
            }
        }
    }

    impl Completion for RecordingCompletion {
        fn generate(&self, prompt: &str) -> Result<String> {
            self.prompts.borrow_mut().push(prompt.to_string());
            Ok(self.reply.clone())
        }

        fn is_available(&self) -> bool {
            true
        }

        fn label(&self) -> String {
            "recording".to_string()
        }
    }

    #[test]
    fn fill_template_leaves_data_braces_alone() {
        let out = fill_template(
            "User {username} wrote:\n{messages}",
            &[("username", "alice"), ("messages", "struct s { int x; }; {username}")],
        );
        assert_eq!(out, "User alice wrote:\nstruct s { int x; }; {username}");
    }

    #[test]
    fn tags_match_on_model_base_name() {
        let tags = json!({"models": [{"name": "mistral:latest"}, {"name": "llama3:8b"}]});
        assert!(tags_contain_model(&tags, "mistral"));
        assert!(tags_contain_model(&tags, "llama3:70b"));
        assert!(!tags_contain_model(&tags, "phi3"));
        assert!(!tags_contain_model(&json!({}), "mistral"));
    }

    #[test]
    fn processor_fills_builtin_template_and_trims_reply() {
        let processor = Processor::new(
            RecordingCompletion::replying("  Q: what?\nA: that.\n\n"),
            PromptLibrary::new(None),
        );
        let out = processor
            .channel_summary_faq("alice: how?", "#help")
            .expect("faq");
        assert_eq!(out, "Q: what?\nA: that.");

        let sent = processor.client().prompts.borrow();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].contains("#help channel"));
        assert!(sent[0].contains("alice: how?"));
        assert!(!sent[0].contains("{messages}"));
    }

    #[test]
    fn prompt_files_override_builtins() {
        let tmp = tempdir().expect("tempdir");
        fs::write(tmp.path().join("factcheck.txt"), "Check {topic}: {messages}").expect("write");
        let processor = Processor::new(
            RecordingCompletion::replying("ok"),
            PromptLibrary::new(Some(tmp.path().to_path_buf())),
        );
        processor.factcheck("bob: free twice", "memory").expect("factcheck");
        processor.weekly_digest("{\"total_messages\": 3}").expect("digest");

        let sent = processor.client().prompts.borrow();
        assert_eq!(sent[0], "Check memory: bob: free twice");
        assert!(sent[1].contains("\"total_messages\": 3"));
    }

    #[test]
    fn blank_override_is_rejected() {
        let tmp = tempdir().expect("tempdir");
        fs::write(tmp.path().join("user_story.txt"), "  \n").expect("write");
        let library = PromptLibrary::new(Some(tmp.path().to_path_buf()));
        let err = library.load(PromptKind::UserStory).expect_err("blank");
        assert!(err.to_string().contains("prompt template is empty"));
    }

    #[test]
    fn unreachable_host_maps_to_connect_error() {
        let client = OllamaClient::new(&OllamaConfig {
            host: "http://127.0.0.1:9/".to_string(),
            model: "mistral".to_string(),
            timeout_secs: 2,
        })
        .expect("client");
        assert!(!client.is_available());
        let err = client.generate("hi").expect_err("no server");
        let digest_err = err.downcast_ref::<DigestError>().expect("typed error");
        assert!(matches!(
            digest_err,
            DigestError::LlmUnreachable(_) | DigestError::LlmTimeout(_)
        ));
        assert_eq!(client.label(), "ollama:mistral");
    }
}
