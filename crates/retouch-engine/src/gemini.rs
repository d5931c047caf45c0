use std::time::Duration;

use anyhow::{bail, Context, Result};
use reqwest::blocking::{Client as HttpClient, Response as HttpResponse};
use retouch_contracts::restoration::{parse_plan, ImageRef, PlanStep, RestoreError};
use serde_json::{json, Value};

use crate::config::{GatewayConfig, ResolvedModels, API_KEY_ENV_VARS};
use crate::gateway::{truncate_text, RestorationGateway};

/// Gemini `generateContent` gateway: a vision text model plans and writes
/// prompts, an image model applies the edits.
pub struct GeminiGateway {
    api_base: String,
    api_key: String,
    text_model: String,
    image_model: String,
    timeout: Duration,
    http: HttpClient,
}

impl GeminiGateway {
    pub fn new(config: &GatewayConfig, models: &ResolvedModels) -> Result<Self, RestoreError> {
        let Some(api_key) = config.api_key.clone() else {
            return Err(RestoreError::Config(format!(
                "{} not set",
                API_KEY_ENV_VARS.join(" or ")
            )));
        };
        let http = HttpClient::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|err| RestoreError::Config(format!("HTTP client setup failed: {err}")))?;
        Ok(Self {
            api_base: config.api_base.trim_end_matches('/').to_string(),
            api_key,
            text_model: models.text_model.clone(),
            image_model: models.image_model.clone(),
            timeout: config.request_timeout,
            http,
        })
    }

    pub fn text_model(&self) -> &str {
        &self.text_model
    }

    pub fn image_model(&self) -> &str {
        &self.image_model
    }

    fn endpoint_for_model(&self, model: &str) -> String {
        let trimmed = model.trim();
        let model_path = if trimmed.starts_with("models/") {
            trimmed.to_string()
        } else {
            format!("models/{trimmed}")
        };
        format!("{}/{}:generateContent", self.api_base, model_path)
    }

    fn generate_content(&self, model: &str, payload: &Value) -> Result<Value> {
        let endpoint = self.endpoint_for_model(model);
        let response = self
            .http
            .post(&endpoint)
            .query(&[("key", self.api_key.as_str())])
            .timeout(self.timeout)
            .json(payload)
            .send()
            .with_context(|| format!("Gemini request failed ({endpoint})"))?;
        let body = response_json_or_error("Gemini", response)?;
        if let Some(message) = body
            .get("error")
            .and_then(|error| error.get("message"))
            .and_then(Value::as_str)
        {
            bail!("Gemini API error: {message}");
        }
        if let Some(reason) = block_reason(&body) {
            bail!("Gemini blocked the request ({reason})");
        }
        Ok(body)
    }
}

impl RestorationGateway for GeminiGateway {
    fn name(&self) -> &str {
        "gemini"
    }

    fn request_plan(&self, image: &ImageRef, instructions: &str) -> Result<Vec<PlanStep>> {
        let payload = json!({
            "contents": [{
                "role": "user",
                "parts": [image_part(image), { "text": planning_instruction(instructions) }],
            }],
            "generationConfig": {
                "responseMimeType": "application/json",
                "responseSchema": plan_response_schema(),
            },
        });
        let body = self.generate_content(&self.text_model, &payload)?;
        let text = extract_text(&body);
        if text.is_empty() {
            bail!("Gemini returned no plan text");
        }
        parse_plan(&text).with_context(|| {
            format!("Gemini plan was unusable: {}", truncate_text(&text, 240))
        })
    }

    fn request_edit_prompt(
        &self,
        image: &ImageRef,
        goal: &str,
        instructions: &str,
    ) -> Result<String> {
        let payload = json!({
            "contents": [{
                "role": "user",
                "parts": [image_part(image), { "text": prompt_writer_instruction(goal, instructions) }],
            }],
        });
        let body = self.generate_content(&self.text_model, &payload)?;
        let text = extract_text(&body);
        if text.is_empty() {
            bail!("Gemini returned an empty prompt");
        }
        Ok(text)
    }

    fn request_image_edit(&self, image: &ImageRef, prompt: &str) -> Result<ImageRef> {
        let payload = json!({
            "contents": [{
                "role": "user",
                "parts": [image_part(image), { "text": prompt }],
            }],
            "generationConfig": {
                "responseModalities": ["IMAGE", "TEXT"],
            },
        });
        let body = self.generate_content(&self.image_model, &payload)?;
        match extract_image(&body)? {
            Some(edited) => Ok(edited),
            None => {
                let text = extract_text(&body);
                if text.is_empty() {
                    bail!("Gemini returned no image");
                }
                bail!("Gemini returned no image: {}", truncate_text(&text, 240))
            }
        }
    }
}

fn planning_instruction(instructions: &str) -> String {
    let mut text = String::from(
        "You are an expert photo restorer. Study this photograph and decide which \
         restoration work it needs, such as removing scratches, dust and creases, \
         repairing tears or missing areas, recovering faded contrast, reducing noise, \
         sharpening soft detail, or colorizing. Return an ordered plan of 1 to 4 steps, \
         most fundamental repairs first. Each step is an object with `step` (1, 2, 3, ...) \
         and `goal` (one short imperative sentence). Return only the JSON array.",
    );
    let instructions = instructions.trim();
    if !instructions.is_empty() {
        text.push_str("\n\nThe owner of the photo asked for: ");
        text.push_str(instructions);
    }
    text
}

fn prompt_writer_instruction(goal: &str, instructions: &str) -> String {
    let mut text = format!(
        "You are writing an instruction for an image editing model that will edit this exact \
         photograph. The current restoration goal is: {goal}\n\n\
         Write one precise editing instruction for that goal only, describing what to change \
         and what must stay the same (faces, identity, composition, period details). \
         Reply with the instruction text and nothing else."
    );
    let instructions = instructions.trim();
    if !instructions.is_empty() {
        text.push_str("\n\nKeep the owner's wishes in mind: ");
        text.push_str(instructions);
    }
    text
}

fn plan_response_schema() -> Value {
    json!({
        "type": "ARRAY",
        "items": {
            "type": "OBJECT",
            "properties": {
                "step": { "type": "INTEGER" },
                "goal": { "type": "STRING" },
            },
            "required": ["step", "goal"],
        },
    })
}

fn image_part(image: &ImageRef) -> Value {
    json!({
        "inlineData": {
            "mimeType": image.mime_type(),
            "data": image.to_base64(),
        }
    })
}

fn candidate_parts(body: &Value) -> Vec<Value> {
    body.get("candidates")
        .and_then(Value::as_array)
        .and_then(|candidates| candidates.first())
        .and_then(|candidate| candidate.get("content"))
        .and_then(|content| content.get("parts"))
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default()
}

fn extract_text(body: &Value) -> String {
    candidate_parts(body)
        .iter()
        .filter(|part| !part.get("thought").and_then(Value::as_bool).unwrap_or(false))
        .filter_map(|part| part.get("text").and_then(Value::as_str))
        .collect::<Vec<&str>>()
        .join("")
        .trim()
        .to_string()
}

fn extract_image(body: &Value) -> Result<Option<ImageRef>> {
    for part in candidate_parts(body) {
        let Some(inline) = part
            .get("inlineData")
            .or_else(|| part.get("inline_data"))
            .and_then(Value::as_object)
        else {
            continue;
        };
        let data = inline
            .get("data")
            .and_then(Value::as_str)
            .unwrap_or_default();
        if data.is_empty() {
            continue;
        }
        let mime_type = inline
            .get("mimeType")
            .or_else(|| inline.get("mime_type"))
            .and_then(Value::as_str)
            .unwrap_or("image/png");
        let image = ImageRef::from_base64(mime_type, data).context("Gemini image decode failed")?;
        return Ok(Some(image));
    }
    Ok(None)
}

fn block_reason(body: &Value) -> Option<String> {
    if let Some(reason) = body
        .get("promptFeedback")
        .and_then(|feedback| feedback.get("blockReason"))
        .and_then(Value::as_str)
    {
        return Some(reason.to_string());
    }
    let finish = body
        .get("candidates")
        .and_then(Value::as_array)
        .and_then(|candidates| candidates.first())
        .and_then(|candidate| candidate.get("finishReason"))
        .and_then(Value::as_str)?;
    match finish {
        "SAFETY" | "PROHIBITED_CONTENT" | "IMAGE_SAFETY" | "BLOCKLIST" => Some(finish.to_string()),
        _ => None,
    }
}

fn response_json_or_error(provider: &str, response: HttpResponse) -> Result<Value> {
    let status = response.status();
    let code = status.as_u16();
    let body = response
        .text()
        .with_context(|| format!("{provider} response body read failed"))?;
    if !status.is_success() {
        bail!(
            "{provider} request failed ({code}): {}",
            truncate_text(&body, 512)
        );
    }
    let parsed: Value = serde_json::from_str(&body)
        .with_context(|| format!("{provider} returned invalid JSON payload"))?;
    Ok(parsed)
}
