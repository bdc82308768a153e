//! Gemini-backed providers: embeddings, sector classification, and
//! reflection over the `generativelanguage.googleapis.com` REST API.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::memory::reflect::Reflection;
use crate::memory::types::{Entity, Memory, Sector};
use crate::providers::{Embedder, ReflectionProvider, RemoteSectorClassifier, TaskHint};

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

const EMBED_MODEL: &str = "gemini-embedding-001";
const GENERATE_MODEL: &str = "gemini-2.5-flash-lite";

const EMBED_TIMEOUT: Duration = Duration::from_secs(15);
const CLASSIFY_TIMEOUT: Duration = Duration::from_secs(5);
const REFLECT_TIMEOUT: Duration = Duration::from_secs(30);

// ── Embedder ─────────────────────────────────────────────────────────────────

/// Vector embeddings via `gemini-embedding-001`.
pub struct GeminiEmbedder {
    api_key: String,
    dimension: usize,
    base_url: String,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct EmbedRequest<'a> {
    content: EmbedContent<'a>,
    #[serde(rename = "taskType")]
    task_type: &'a str,
    #[serde(rename = "outputDimensionality")]
    output_dimensionality: usize,
}

#[derive(Serialize)]
struct EmbedContent<'a> {
    parts: Vec<EmbedPart<'a>>,
}

#[derive(Serialize)]
struct EmbedPart<'a> {
    text: &'a str,
}

#[derive(Deserialize)]
struct EmbedResponse {
    embedding: EmbedValues,
}

#[derive(Deserialize)]
struct EmbedValues {
    values: Vec<f64>,
}

impl GeminiEmbedder {
    pub fn new(api_key: &str, dimension: usize) -> Self {
        Self {
            api_key: api_key.to_string(),
            dimension,
            base_url: DEFAULT_BASE_URL.to_string(),
            client: reqwest::Client::builder()
                .timeout(EMBED_TIMEOUT)
                .build()
                .unwrap_or_default(),
        }
    }

    /// Point at a different API root (tests, proxies).
    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }
}

#[async_trait]
impl Embedder for GeminiEmbedder {
    async fn embed(&self, text: &str, task: TaskHint) -> Result<Vec<f32>> {
        if self.api_key.is_empty() {
            bail!("no API key");
        }

        let url = format!(
            "{}/models/{}:embedContent?key={}",
            self.base_url, EMBED_MODEL, self.api_key
        );
        let body = EmbedRequest {
            content: EmbedContent {
                parts: vec![EmbedPart { text }],
            },
            task_type: task.as_str(),
            output_dimensionality: self.dimension,
        };

        let resp = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .context("gemini embed request")?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            bail!("gemini embed {status}: {}", truncate_body(&body));
        }

        let parsed: EmbedResponse = resp.json().await.context("gemini embed decode")?;
        if parsed.embedding.values.is_empty() {
            bail!("empty embedding returned");
        }
        if parsed.embedding.values.len() != self.dimension {
            bail!(
                "embedding dimension mismatch: got {}, want {}",
                parsed.embedding.values.len(),
                self.dimension
            );
        }

        Ok(parsed.embedding.values.into_iter().map(|v| v as f32).collect())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

// ── Sector classifier ────────────────────────────────────────────────────────

/// LLM sector verdicts via `gemini-2.5-flash-lite`, used for low-confidence
/// fallback and async reclassification.
pub struct GeminiSectorClassifier {
    api_key: String,
    base_url: String,
    client: reqwest::Client,
}

impl GeminiSectorClassifier {
    pub fn new(api_key: &str) -> Self {
        Self {
            api_key: api_key.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            client: reqwest::Client::builder()
                .timeout(CLASSIFY_TIMEOUT)
                .build()
                .unwrap_or_default(),
        }
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }
}

#[async_trait]
impl RemoteSectorClassifier for GeminiSectorClassifier {
    async fn classify_sector(&self, content: &str) -> Result<Sector> {
        if self.api_key.is_empty() {
            bail!("no API key");
        }

        let prompt = format!(
            "Classify this memory into exactly one cognitive sector. \
             Reply with ONLY the sector name, nothing else.\n\n\
             Sectors:\n\
             - episodic: specific events, experiences, things that happened at a particular time\n\
             - semantic: facts, knowledge, preferences, stable truths about someone\n\
             - procedural: skills, techniques, how-to knowledge, learned methods\n\
             - emotional: feelings, sentiments, emotional reactions, moods\n\
             - reflective: patterns, meta-observations, insights connecting multiple experiences\n\n\
             Memory: \"{content}\""
        );

        let text = generate_text(
            &self.client,
            &self.base_url,
            &self.api_key,
            &prompt,
            10,
            0.0,
            false,
        )
        .await?;
        Ok(parse_sector(&text))
    }
}

/// Map free-form model output onto a sector by substring, defaulting to
/// `semantic` when nothing matches.
fn parse_sector(text: &str) -> Sector {
    let text = text.trim().to_lowercase();
    if text.contains("episodic") {
        Sector::Episodic
    } else if text.contains("semantic") {
        Sector::Semantic
    } else if text.contains("procedural") {
        Sector::Procedural
    } else if text.contains("emotional") {
        Sector::Emotional
    } else if text.contains("reflective") {
        Sector::Reflective
    } else {
        Sector::Semantic
    }
}

// ── Reflector ────────────────────────────────────────────────────────────────

/// Reflective synthesis via `gemini-2.5-flash-lite` with a JSON response.
pub struct GeminiReflector {
    api_key: String,
    base_url: String,
    client: reqwest::Client,
}

impl GeminiReflector {
    pub fn new(api_key: &str) -> Self {
        Self {
            api_key: api_key.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            client: reqwest::Client::builder()
                .timeout(REFLECT_TIMEOUT)
                .build()
                .unwrap_or_default(),
        }
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }
}

#[async_trait]
impl ReflectionProvider for GeminiReflector {
    async fn reflect(
        &self,
        memories: &[Memory],
        character_context: &str,
    ) -> Result<Vec<Reflection>> {
        if self.api_key.is_empty() {
            bail!("no API key for reflection");
        }

        let prompt = build_reflection_prompt(memories, character_context);
        let text = generate_text(
            &self.client,
            &self.base_url,
            &self.api_key,
            &prompt,
            1024,
            0.7,
            true,
        )
        .await?;
        parse_reflections(&text)
    }
}

fn build_reflection_prompt(memories: &[Memory], character_context: &str) -> String {
    let mut prompt = String::from(
        "You are analyzing memories stored by an AI character to find patterns \
         and form observations.\n\n",
    );

    if !character_context.is_empty() {
        prompt.push_str("Character context: ");
        prompt.push_str(character_context);
        prompt.push_str("\n\n");
    }

    prompt.push_str("Here are recent memories (newest first):\n\n");
    for (i, m) in memories.iter().enumerate() {
        prompt.push_str(&format!(
            "{}. [{}] ({}) {:?}\n",
            i + 1,
            m.created_at.format("%Y-%m-%d"),
            m.sector,
            m.summary,
        ));
    }

    prompt.push_str(
        "\nBased on these memories, identify 1-3 meaningful patterns, connections, or \
         observations the character would naturally notice. Each observation should be \
         something that would make the character feel more real — like noticing someone \
         always mentions music when they're feeling down.\n\n\
         Respond with a JSON array:\n\
         [{\"content\": \"observation text\", \"salience\": 0.7, \
         \"entities\": [{\"text\": \"entity\", \"type\": \"topic\"}]}]\n\n\
         Only include genuinely insightful observations. If there are no clear patterns, \
         return [].\n",
    );

    prompt
}

/// Parse the model's JSON array, tolerating a surrounding markdown code
/// fence. Candidates with empty content are dropped; nameless entities too.
fn parse_reflections(text: &str) -> Result<Vec<Reflection>> {
    let json = strip_code_fence(text);

    #[derive(Deserialize)]
    struct RawEntity {
        #[serde(default)]
        text: String,
        #[serde(default, rename = "type")]
        entity_type: String,
    }

    #[derive(Deserialize)]
    struct RawReflection {
        #[serde(default)]
        content: String,
        #[serde(default)]
        salience: f64,
        #[serde(default)]
        entities: Vec<RawEntity>,
    }

    let raw: Vec<RawReflection> =
        serde_json::from_str(&json).context("parse reflections")?;

    Ok(raw
        .into_iter()
        .filter(|r| !r.content.is_empty())
        .map(|r| Reflection {
            content: r.content,
            salience: r.salience,
            entities: r
                .entities
                .into_iter()
                .filter(|e| !e.text.is_empty())
                .map(|e| Entity {
                    text: e.text,
                    entity_type: e.entity_type,
                })
                .collect(),
        })
        .collect())
}

/// Strip a leading/trailing markdown code fence, keeping only the fenced
/// body. Text without a fence passes through untouched.
fn strip_code_fence(text: &str) -> String {
    let text = text.trim();
    if !text.starts_with("```") {
        return text.to_string();
    }

    let mut in_block = false;
    let mut body: Vec<&str> = Vec::new();
    for line in text.lines() {
        if line.starts_with("```") {
            in_block = !in_block;
            continue;
        }
        if in_block {
            body.push(line);
        }
    }
    body.join("\n")
}

// ── Shared generateContent plumbing ──────────────────────────────────────────

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<GenerateCandidate>,
}

#[derive(Deserialize)]
struct GenerateCandidate {
    content: GenerateContent,
}

#[derive(Deserialize)]
struct GenerateContent {
    #[serde(default)]
    parts: Vec<GeneratePart>,
}

#[derive(Deserialize)]
struct GeneratePart {
    #[serde(default)]
    text: String,
}

async fn generate_text(
    client: &reqwest::Client,
    base_url: &str,
    api_key: &str,
    prompt: &str,
    max_tokens: u32,
    temperature: f64,
    json_response: bool,
) -> Result<String> {
    let url = format!("{base_url}/models/{GENERATE_MODEL}:generateContent?key={api_key}");

    let mut generation_config = serde_json::json!({
        "maxOutputTokens": max_tokens,
        "temperature": temperature,
    });
    if json_response {
        generation_config["responseMimeType"] = serde_json::json!("application/json");
    }
    let body = serde_json::json!({
        "contents": [{"role": "user", "parts": [{"text": prompt}]}],
        "generationConfig": generation_config,
    });

    let resp = client
        .post(&url)
        .json(&body)
        .send()
        .await
        .context("gemini generate request")?;
    if !resp.status().is_success() {
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        bail!("gemini generate {status}: {}", truncate_body(&body));
    }

    let parsed: GenerateResponse = resp.json().await.context("gemini generate decode")?;
    let text = parsed
        .candidates
        .first()
        .and_then(|c| c.content.parts.first())
        .map(|p| p.text.trim().to_string())
        .unwrap_or_default();
    if text.is_empty() {
        bail!("empty response");
    }
    Ok(text)
}

fn truncate_body(body: &str) -> &str {
    &body[..body.len().min(300)]
}
