use crate::core::config::GeminiConfig;
use crate::core::error::{Result, StoryboardError};
use crate::core::state::{ImageSize, SceneDraft};
use crate::services::credential::KeyProvider;
use crate::services::prompt::{analysis_prompt, CHAT_SYSTEM_INSTRUCTION, IMAGE_ASPECT_RATIO};
use crate::services::provider::{ChatSession, ProviderClient, TextStream};
use crate::utils::lock;
use crate::utils::sse::sse_data;
use crate::utils::text::strip_code_blocks;
use async_trait::async_trait;
use futures_util::future;
use futures_util::stream::{self, StreamExt};
use log::{debug, warn};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Clone)]
pub struct GeminiClient {
    base_url: String,
    text_model: String,
    image_model: String,
    chat_model: String,
    keys: Arc<dyn KeyProvider>,
    client: reqwest::Client,
}

impl std::fmt::Debug for GeminiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiClient")
            .field("base_url", &self.base_url)
            .field("text_model", &self.text_model)
            .field("image_model", &self.image_model)
            .field("chat_model", &self.chat_model)
            .finish_non_exhaustive()
    }
}

// --- Request ---

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<GeminiSystemInstruction>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<serde_json::Value>,
}

#[derive(Serialize, Clone, Debug, PartialEq)]
struct GeminiContent {
    role: String,
    parts: Vec<GeminiPart>,
}

impl GeminiContent {
    fn user(text: &str) -> Self {
        Self {
            role: "user".to_string(),
            parts: vec![GeminiPart { text: text.to_string() }],
        }
    }

    fn model(text: &str) -> Self {
        Self {
            role: "model".to_string(),
            parts: vec![GeminiPart { text: text.to_string() }],
        }
    }
}

#[derive(Serialize)]
struct GeminiSystemInstruction {
    parts: Vec<GeminiPart>,
}

#[derive(Serialize, Clone, Debug, PartialEq)]
struct GeminiPart {
    text: String,
}

// --- Response ---

#[derive(Deserialize)]
struct GeminiResponse {
    candidates: Option<Vec<GeminiCandidate>>,
    error: Option<GeminiError>,
}

#[derive(Deserialize)]
struct GeminiCandidate {
    content: Option<GeminiContentResponse>,
    #[serde(rename = "finishReason")]
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct GeminiContentResponse {
    #[serde(default)]
    parts: Vec<GeminiPartResponse>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiPartResponse {
    text: Option<String>,
    inline_data: Option<GeminiInlineData>,
    #[serde(default)]
    thought: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiInlineData {
    mime_type: Option<String>,
    data: String,
}

#[derive(Deserialize, Debug)]
struct GeminiError {
    message: String,
}

#[derive(Deserialize)]
struct GeminiErrorEnvelope {
    error: GeminiError,
}

impl GeminiResponse {
    fn parts(&self) -> &[GeminiPartResponse] {
        self.candidates
            .as_ref()
            .and_then(|c| c.first())
            .and_then(|c| c.content.as_ref())
            .map(|c| c.parts.as_slice())
            .unwrap_or(&[])
    }

    /// Visible text of the first candidate, thought parts excluded.
    fn text(&self) -> Option<String> {
        let text: String = self
            .parts()
            .iter()
            .filter(|p| !p.thought)
            .filter_map(|p| p.text.as_deref())
            .collect();
        (!text.is_empty()).then_some(text)
    }

    fn first_image(&self) -> Option<&GeminiInlineData> {
        self.parts()
            .iter()
            .find_map(|p| p.inline_data.as_ref().filter(|d| !d.data.is_empty()))
    }

    fn finish_reason(&self) -> &str {
        self.candidates
            .as_ref()
            .and_then(|c| c.first())
            .and_then(|c| c.finish_reason.as_deref())
            .unwrap_or("UNKNOWN")
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum AnalysisPayload {
    Wrapped { scenes: Vec<SceneDraft> },
    Bare(Vec<SceneDraft>),
}

fn analysis_schema() -> serde_json::Value {
    json!({
        "type": "OBJECT",
        "properties": {
            "scenes": {
                "type": "ARRAY",
                "items": {
                    "type": "OBJECT",
                    "properties": {
                        "visualDescription": { "type": "STRING" },
                        "caption": { "type": "STRING" },
                        "shotType": { "type": "STRING" }
                    },
                    "required": ["visualDescription", "caption", "shotType"]
                }
            }
        }
    })
}

fn image_config(size: ImageSize) -> serde_json::Value {
    json!({
        "responseModalities": ["TEXT", "IMAGE"],
        "imageConfig": {
            "aspectRatio": IMAGE_ASPECT_RATIO,
            "imageSize": size.as_str()
        }
    })
}

/// All or nothing: any shape mismatch rejects the whole analysis.
pub(crate) fn parse_scene_drafts(text: &str) -> Result<Vec<SceneDraft>> {
    let clean_json = strip_code_blocks(text);
    let payload: AnalysisPayload = serde_json::from_str(&clean_json).map_err(|e| {
        StoryboardError::Analysis(format!("Failed to parse analysis JSON: {}", e))
    })?;
    Ok(match payload {
        AnalysisPayload::Wrapped { scenes } => scenes,
        AnalysisPayload::Bare(scenes) => scenes,
    })
}

fn data_url(image: &GeminiInlineData) -> String {
    format!(
        "data:{};base64,{}",
        image.mime_type.as_deref().unwrap_or("image/png"),
        image.data
    )
}

/// One SSE event of a streamed reply; `None` when it carries no visible text.
fn decode_chat_event(data: &str) -> Result<Option<String>> {
    let chunk: GeminiResponse = serde_json::from_str(data)?;
    if let Some(err) = &chunk.error {
        return Err(StoryboardError::ChatStream(err.message.clone()));
    }
    Ok(chunk.text())
}

async fn check_status(
    resp: reqwest::Response,
    kind: fn(String) -> StoryboardError,
) -> Result<reqwest::Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }

    let body = resp.text().await.unwrap_or_default();
    let message = serde_json::from_str::<GeminiErrorEnvelope>(&body)
        .map(|e| e.error.message)
        .unwrap_or(body);

    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return Err(StoryboardError::Credential(format!(
            "Gemini rejected the API key (HTTP {}): {}",
            status.as_u16(),
            message
        )));
    }
    Err(kind(format!(
        "Gemini API error (HTTP {}): {}",
        status.as_u16(),
        message
    )))
}

impl GeminiClient {
    pub fn new(config: &GeminiConfig, keys: Arc<dyn KeyProvider>) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder();
        if let Some(secs) = config.timeout_seconds {
            builder = builder.timeout(Duration::from_secs(secs));
        }

        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            text_model: config.text_model.clone(),
            image_model: config.image_model.clone(),
            chat_model: config.chat_model.clone(),
            keys,
            client: builder.build()?,
        })
    }

    fn endpoint(&self, model: &str, method: &str) -> String {
        format!("{}/models/{}:{}", self.base_url, model, method)
    }

    async fn post(&self, url: &str, body: &GeminiRequest) -> Result<reqwest::Response> {
        let api_key = self
            .keys
            .api_key()
            .ok_or_else(|| StoryboardError::Credential("No API key selected".to_string()))?;

        debug!("POST {}", url);
        let resp = self
            .client
            .post(url)
            .header("x-goog-api-key", api_key)
            .json(body)
            .send()
            .await?;
        Ok(resp)
    }

    async fn generate(
        &self,
        model: &str,
        body: &GeminiRequest,
        kind: fn(String) -> StoryboardError,
    ) -> Result<GeminiResponse> {
        let url = self.endpoint(model, "generateContent");
        let resp = check_status(self.post(&url, body).await?, kind).await?;

        let response_text = resp.text().await?;
        let result: GeminiResponse = serde_json::from_str(&response_text)
            .map_err(|e| kind(format!("Failed to parse Gemini response: {}", e)))?;

        if let Some(err) = &result.error {
            return Err(kind(format!("Gemini API returned error: {}", err.message)));
        }
        Ok(result)
    }
}

#[async_trait]
impl ProviderClient for GeminiClient {
    async fn analyze_script(&self, script: &str) -> Result<Vec<SceneDraft>> {
        let body = GeminiRequest {
            contents: vec![GeminiContent::user(&analysis_prompt(script))],
            system_instruction: None,
            generation_config: Some(json!({
                "responseMimeType": "application/json",
                "responseSchema": analysis_schema()
            })),
        };

        let result = self
            .generate(&self.text_model, &body, StoryboardError::Analysis)
            .await?;
        let text = result.text().ok_or_else(|| {
            StoryboardError::Analysis(format!(
                "No response from AI. Finish reason: {}",
                result.finish_reason()
            ))
        })?;

        parse_scene_drafts(&text)
    }

    async fn generate_image(&self, prompt: &str, size: ImageSize) -> Result<String> {
        let body = GeminiRequest {
            contents: vec![GeminiContent::user(prompt)],
            system_instruction: None,
            generation_config: Some(image_config(size)),
        };

        let result = self
            .generate(&self.image_model, &body, StoryboardError::ImageGeneration)
            .await?;

        match result.first_image() {
            Some(image) => Ok(data_url(image)),
            None => {
                if let Some(text) = result.text() {
                    warn!("Image model answered with text only: {}", text);
                }
                Err(StoryboardError::ImageGeneration(format!(
                    "No image generated. Finish reason: {}",
                    result.finish_reason()
                )))
            }
        }
    }

    async fn open_chat_session(&self) -> Result<Arc<dyn ChatSession>> {
        // Fail early rather than on the first message.
        if self.keys.api_key().is_none() {
            return Err(StoryboardError::Credential("No API key selected".to_string()));
        }
        Ok(Arc::new(GeminiChatSession {
            client: self.clone(),
            history: Arc::new(Mutex::new(Vec::new())),
        }))
    }
}

pub struct GeminiChatSession {
    client: GeminiClient,
    history: Arc<Mutex<Vec<GeminiContent>>>,
}

struct PendingTurn {
    deltas: TextStream,
    user_turn: Option<GeminiContent>,
    reply: String,
    history: Arc<Mutex<Vec<GeminiContent>>>,
    done: bool,
}

/// Passes deltas through unchanged and commits the user turn and the full
/// reply to the history once the stream ends cleanly.
fn record_turn(
    deltas: TextStream,
    user_turn: GeminiContent,
    history: Arc<Mutex<Vec<GeminiContent>>>,
) -> TextStream {
    let turn = PendingTurn {
        deltas,
        user_turn: Some(user_turn),
        reply: String::new(),
        history,
        done: false,
    };

    stream::unfold(turn, |mut turn| async move {
        if turn.done {
            return None;
        }
        match turn.deltas.next().await {
            Some(Ok(delta)) => {
                turn.reply.push_str(&delta);
                Some((Ok(delta), turn))
            }
            Some(Err(e)) => {
                turn.done = true;
                turn.user_turn = None;
                Some((Err(e), turn))
            }
            None => {
                if let Some(user_turn) = turn.user_turn.take() {
                    let mut history = lock(&turn.history);
                    history.push(user_turn);
                    history.push(GeminiContent::model(&turn.reply));
                }
                None
            }
        }
    })
    .boxed()
}

#[async_trait]
impl ChatSession for GeminiChatSession {
    async fn send_message_stream(&self, text: &str) -> Result<TextStream> {
        let user_turn = GeminiContent::user(text);
        let mut contents = lock(&self.history).clone();
        contents.push(user_turn.clone());

        let body = GeminiRequest {
            contents,
            system_instruction: Some(GeminiSystemInstruction {
                parts: vec![GeminiPart {
                    text: CHAT_SYSTEM_INSTRUCTION.to_string(),
                }],
            }),
            generation_config: None,
        };

        let url = format!(
            "{}?alt=sse",
            self.client
                .endpoint(&self.client.chat_model, "streamGenerateContent")
        );
        let resp = check_status(
            self.client.post(&url, &body).await?,
            StoryboardError::ChatStream,
        )
        .await?;

        let bytes = resp
            .bytes_stream()
            .map(|chunk| chunk.map(|b| b.to_vec()))
            .boxed();
        let deltas = sse_data(bytes)
            .map(|event| -> Result<Option<String>> { decode_chat_event(&event?) })
            .filter_map(|delta| future::ready(delta.transpose()))
            .boxed();

        Ok(record_turn(deltas, user_turn, self.history.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::credential::StaticKeyProvider;

    fn client(key: Option<&str>) -> GeminiClient {
        let keys = Arc::new(StaticKeyProvider::new(key.map(|k| k.to_string())));
        GeminiClient::new(&GeminiConfig::default(), keys).unwrap()
    }

    #[test]
    fn test_gemini_response_parsing_safety_block() {
        let json = r#"{
            "candidates": [
                {
                    "finishReason": "SAFETY",
                    "index": 0
                }
            ]
        }"#;

        let result: GeminiResponse = serde_json::from_str(json).unwrap();
        assert!(result.text().is_none());
        assert!(result.first_image().is_none());
        assert_eq!(result.finish_reason(), "SAFETY");
    }

    #[test]
    fn test_text_skips_thought_parts() {
        let json = r#"{
            "candidates": [{
                "content": {
                    "parts": [
                        { "text": "planning...", "thought": true },
                        { "text": "{\"scenes\":" },
                        { "text": " []}" }
                    ],
                    "role": "model"
                },
                "finishReason": "STOP"
            }]
        }"#;

        let result: GeminiResponse = serde_json::from_str(json).unwrap();
        assert_eq!(result.text().as_deref(), Some("{\"scenes\": []}"));
    }

    #[test]
    fn test_first_inline_image_wins() {
        let json = r#"{
            "candidates": [{
                "content": {
                    "parts": [
                        { "text": "Here is your frame" },
                        { "inlineData": { "mimeType": "image/jpeg", "data": "AAAA" } },
                        { "inlineData": { "mimeType": "image/png", "data": "BBBB" } }
                    ]
                }
            }]
        }"#;

        let result: GeminiResponse = serde_json::from_str(json).unwrap();
        let image = result.first_image().unwrap();
        assert_eq!(data_url(image), "data:image/jpeg;base64,AAAA");
    }

    #[test]
    fn test_data_url_defaults_to_png() {
        let image = GeminiInlineData {
            mime_type: None,
            data: "QUJD".to_string(),
        };
        assert_eq!(data_url(&image), "data:image/png;base64,QUJD");
    }

    #[test]
    fn test_parse_scene_drafts_wrapped_and_bare() {
        let wrapped = r#"{"scenes": [
            {"visualDescription": "Fog over a pier", "caption": "Arrival", "shotType": "Wide shot"},
            {"visualDescription": "A hand on a rope", "caption": "Mooring", "shotType": "Close-up"}
        ]}"#;
        let drafts = parse_scene_drafts(wrapped).unwrap();
        assert_eq!(drafts.len(), 2);
        assert_eq!(drafts[1].shot_type, "Close-up");

        let bare = "```json\n[{\"visualDescription\": \"a\", \"caption\": \"b\", \"shotType\": \"c\"}]\n```";
        assert_eq!(parse_scene_drafts(bare).unwrap()[0].caption, "b");
    }

    #[test]
    fn test_parse_scene_drafts_rejects_missing_field() {
        let json = r#"{"scenes": [
            {"visualDescription": "ok", "caption": "ok", "shotType": "ok"},
            {"visualDescription": "no caption", "shotType": "Wide"}
        ]}"#;
        let err = parse_scene_drafts(json).unwrap_err();
        assert!(matches!(err, StoryboardError::Analysis(_)));
    }

    #[test]
    fn test_image_request_shape() {
        let body = GeminiRequest {
            contents: vec![GeminiContent::user("a prompt")],
            system_instruction: None,
            generation_config: Some(image_config(ImageSize::TwoK)),
        };
        let value = serde_json::to_value(&body).unwrap();

        assert_eq!(value["generationConfig"]["imageConfig"]["aspectRatio"], "16:9");
        assert_eq!(value["generationConfig"]["imageConfig"]["imageSize"], "2K");
        assert_eq!(value["contents"][0]["parts"][0]["text"], "a prompt");
        assert!(value.get("systemInstruction").is_none());
    }

    #[test]
    fn test_decode_chat_event() {
        let delta = r#"{"candidates":[{"content":{"parts":[{"text":"Hel"}],"role":"model"}}]}"#;
        assert_eq!(decode_chat_event(delta).unwrap().as_deref(), Some("Hel"));

        let empty = r#"{"candidates":[{"content":{"parts":[]},"finishReason":"STOP"}]}"#;
        assert!(decode_chat_event(empty).unwrap().is_none());

        let error = r#"{"error":{"code":503,"message":"overloaded"}}"#;
        assert!(matches!(
            decode_chat_event(error).unwrap_err(),
            StoryboardError::ChatStream(_)
        ));
    }

    #[tokio::test]
    async fn test_record_turn_commits_history_on_completion() {
        let history = Arc::new(Mutex::new(Vec::new()));
        let deltas = stream::iter(vec![Ok("Hel".to_string()), Ok("lo".to_string())]).boxed();

        let out: Vec<String> = record_turn(deltas, GeminiContent::user("hi"), history.clone())
            .map(|d| d.unwrap())
            .collect()
            .await;

        assert_eq!(out, vec!["Hel", "lo"]);
        let history = lock(&history);
        assert_eq!(*history, vec![GeminiContent::user("hi"), GeminiContent::model("Hello")]);
    }

    #[tokio::test]
    async fn test_record_turn_skips_history_on_error() {
        let history = Arc::new(Mutex::new(Vec::new()));
        let deltas = stream::iter(vec![
            Ok("partial".to_string()),
            Err(StoryboardError::ChatStream("reset".to_string())),
            Ok("never".to_string()),
        ])
        .boxed();

        let out: Vec<Result<String>> =
            record_turn(deltas, GeminiContent::user("hi"), history.clone())
                .collect()
                .await;

        assert_eq!(out.len(), 2);
        assert!(out[1].is_err());
        assert!(lock(&history).is_empty());
    }

    #[tokio::test]
    async fn test_missing_key_fails_before_network() {
        let gemini = client(None);
        let err = gemini
            .generate_image("a prompt", ImageSize::OneK)
            .await
            .unwrap_err();
        assert!(err.is_credential());
        assert!(gemini.open_chat_session().await.is_err());
    }

    #[test]
    fn test_endpoint_trims_trailing_slash() {
        let keys = Arc::new(StaticKeyProvider::new(None));
        let config = GeminiConfig {
            base_url: "http://localhost:9000/v1beta/".to_string(),
            ..GeminiConfig::default()
        };
        let gemini = GeminiClient::new(&config, keys).unwrap();
        assert_eq!(
            gemini.endpoint("m", "generateContent"),
            "http://localhost:9000/v1beta/models/m:generateContent"
        );
        assert!(format!("{:?}", client(Some("secret"))).find("secret").is_none());
    }
}
