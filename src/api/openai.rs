use crate::config::Config;
use crate::inventory::{GeneratedScript, ScriptGenerator, VerseRef};
use crate::logw;
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

const RESPONSES_URL: &str = "https://api.openai.com/v1/responses";

#[derive(Debug, Deserialize)]
struct ScriptPayload {
    script: String,
    #[serde(default)]
    keywords: Vec<String>,
}

fn extract_output_text(root: &serde_json::Value) -> Option<String> {
    if let Some(err) = root.get("error").filter(|e| !e.is_null()) {
        let msg = err.get("message").and_then(|v| v.as_str()).unwrap_or("unknown");
        let code = err.get("code").and_then(|v| v.as_str()).unwrap_or("-");
        logw(format!("OpenAI error ({}): {}", code, msg));
        return None;
    }

    root.get("output")?
        .as_array()?
        .iter()
        .filter_map(|item| item.get("content").and_then(|v| v.as_array()))
        .flatten()
        .find(|entry| entry.get("type").and_then(|v| v.as_str()) == Some("output_text"))
        .and_then(|entry| entry.get("text"))
        .and_then(|v| v.as_str())
        .map(str::to_string)
}

fn script_prompt(verse: &VerseRef) -> String {
    format!(
        "Write a 45-second YouTube Shorts devotional script about {verse}.\n\
         Include:\n\
         1) An attention-grabbing hook (a relatable problem)\n\
         2) The verse woven in naturally\n\
         3) A modern application or takeaway\n\
         4) End with: \"Don't forget to like and subscribe for daily Bible verses!\"\n\n\
         Requirements:\n\
         - 60-65 words total\n\
         - Conversational, modern language spoken directly to the viewer\n\
         - NO formatting markers, headings or brackets\n\n\
         Return STRICT JSON ONLY with this shape:\n\
         {{\"script\":\"...\",\"keywords\":[\"three\",\"stock footage\",\"search terms\"]}}\n\
         The keywords must describe calm, uplifting background footage."
    )
}

/// Generates fresh inventory scripts through the OpenAI Responses API.
pub struct OpenAiScriptGenerator {
    client: Client,
    api_key: String,
    model: String,
}

impl OpenAiScriptGenerator {
    pub fn new(client: Client, cfg: &Config) -> Result<Self> {
        cfg.require_openai()?;
        Ok(Self {
            client,
            api_key: cfg.openai_key.clone(),
            model: cfg.openai_model.clone(),
        })
    }
}

#[async_trait]
impl ScriptGenerator for OpenAiScriptGenerator {
    async fn generate(&self, verse: &VerseRef) -> Result<GeneratedScript> {
        let body = json!({
            "model": self.model,
            "input": [
                {"role": "system", "content": "You are a helpful assistant designed to output JSON."},
                {"role": "user", "content": script_prompt(verse)},
            ],
            "text": {"format": {"type": "json_object"}},
        });

        let resp = self
            .client
            .post(RESPONSES_URL)
            .bearer_auth(&self.api_key)
            .json(&body)
            .timeout(Duration::from_secs(120))
            .send()
            .await
            .context("OpenAI request failed")?;

        let status = resp.status();
        let root: serde_json::Value = resp
            .json()
            .await
            .context("OpenAI response was not JSON")?;
        if !status.is_success() {
            extract_output_text(&root);
            anyhow::bail!("OpenAI HTTP {}", status.as_u16());
        }

        let text = extract_output_text(&root).context("OpenAI response had no output text")?;
        parse_script_payload(&text)
    }
}

fn parse_script_payload(text: &str) -> Result<GeneratedScript> {
    let payload: ScriptPayload =
        serde_json::from_str(text).context("OpenAI output was not the expected JSON")?;
    let script = payload.script.trim().to_string();
    if script.is_empty() {
        anyhow::bail!("OpenAI returned an empty script");
    }
    Ok(GeneratedScript {
        text: script,
        keywords: payload
            .keywords
            .into_iter()
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty())
            .collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_output_text_in_message_content() {
        let root = json!({
            "output": [
                {"type": "reasoning", "summary": []},
                {"type": "message", "content": [
                    {"type": "output_text", "text": "{\"script\":\"hi\"}"}
                ]}
            ]
        });
        assert_eq!(extract_output_text(&root).as_deref(), Some("{\"script\":\"hi\"}"));
    }

    #[test]
    fn error_body_yields_none() {
        let root = json!({"error": {"message": "quota", "code": "insufficient_quota"}});
        assert!(extract_output_text(&root).is_none());
    }

    #[test]
    fn parses_payload_and_trims_keywords() {
        let parsed = parse_script_payload(
            r#"{"script":"  Feeling anxious? Philippians 4:6 says...  ","keywords":[" calm lake ",""]}"#,
        )
        .unwrap();
        assert!(parsed.text.starts_with("Feeling anxious?"));
        assert_eq!(parsed.keywords, vec!["calm lake"]);
    }

    #[test]
    fn empty_script_is_rejected() {
        assert!(parse_script_payload(r#"{"script":"   "}"#).is_err());
    }

    #[test]
    fn prompt_names_the_verse() {
        let verse = VerseRef::parse("Psalm 23:1-4").unwrap();
        assert!(script_prompt(&verse).contains("Psalm 23:1-4"));
    }
}
