// src/utils/chat_template.rs
use minijinja::{context, Environment};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct Message {
    pub role: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<Value>>,
}

impl Message {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Message {
            role: role.into(),
            content: content.into(),
            ..Default::default()
        }
    }

    pub fn with_tool_calls(mut self, tool_calls: Vec<Value>) -> Self {
        self.tool_calls = Some(tool_calls);
        self
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ApplyChatTemplateError {
    #[error("failed to add chat template")]
    AddTemplateError(#[source] minijinja::Error),
    #[error("failed to get chat template")]
    GetTemplateError(#[source] minijinja::Error),
    #[error("failed to render chat template")]
    RenderTemplateError(#[source] minijinja::Error),
    #[error("failed to read chat template {0}")]
    ReadTemplateError(String, #[source] std::io::Error),
    #[error("invalid tokenizer config {0}")]
    TokenizerConfigError(String, #[source] serde_json::Error),
}

#[derive(Clone, Debug)]
pub struct ChatTemplate {
    chat_template: Option<String>,
    bos_token: Option<String>,
    eos_token: Option<String>,
    enable_thinking: bool,
}

impl ChatTemplate {
    pub fn new(
        chat_template: Option<String>,
        bos_token: Option<String>,
        eos_token: Option<String>,
        enable_thinking: bool,
    ) -> Self {
        ChatTemplate {
            chat_template,
            bos_token,
            eos_token,
            enable_thinking,
        }
    }

    /// Raw Jinja source, if any.
    pub fn source(&self) -> Option<&str> {
        self.chat_template.as_deref()
    }

    /// Source with the Python-only constructs minijinja lacks rewritten.
    pub fn prepared_source(&self) -> Result<String, ApplyChatTemplateError> {
        let Some(template) = self.chat_template.as_ref() else {
            return Err(ApplyChatTemplateError::GetTemplateError(
                minijinja::Error::new(minijinja::ErrorKind::TemplateNotFound, "Not found!"),
            ));
        };
        let mut template = template.replace("[::-1]", "|reverse");
        if template.contains("{{ meta }}") {
            template = template.replace("{%- set meta = message.get(\"metadata\", \"\") %}", "");
            template = template.replace("{{ meta }}", "");
        }
        Ok(template)
    }

    /// Render `messages` with this template.
    pub fn render(
        &self,
        messages: &[Message],
        add_generation_prompt: bool,
    ) -> Result<String, ApplyChatTemplateError> {
        let source = self.prepared_source()?;
        let mut env = Environment::new();
        env.set_lstrip_blocks(true);
        env.set_trim_blocks(true);
        env.set_unknown_method_callback(minijinja_contrib::pycompat::unknown_method_callback);
        env.add_template("vllm-stream", &source)
            .map_err(ApplyChatTemplateError::AddTemplateError)?;
        let template = env
            .get_template("vllm-stream")
            .map_err(ApplyChatTemplateError::GetTemplateError)?;
        template
            .render(context! {
              messages => messages,
              add_generation_prompt => add_generation_prompt,
              bos_token => self.bos_token,
              eos_token => self.eos_token,
              enable_thinking => self.enable_thinking,
            })
            .map_err(ApplyChatTemplateError::RenderTemplateError)
    }
}

#[derive(Deserialize)]
struct NamedTemplate {
    name: String,
    template: String,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum TemplateField {
    Single(String),
    Named(Vec<NamedTemplate>),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum TokenField {
    Plain(String),
    Added { content: String },
}

impl TokenField {
    fn into_content(self) -> String {
        match self {
            TokenField::Plain(content) | TokenField::Added { content } => content,
        }
    }
}

/// The parts of `tokenizer_config.json` / `chat_template.json` that matter here.
#[derive(Deserialize)]
struct TokenizerConfig {
    chat_template: Option<TemplateField>,
    bos_token: Option<TokenField>,
    eos_token: Option<TokenField>,
}

/// Load a chat template from a raw Jinja file or a JSON tokenizer config.
///
/// A config may hold several named templates; `default` is preferred, then the
/// first one listed.
pub fn load_chat_template(path: impl AsRef<Path>) -> Result<ChatTemplate, ApplyChatTemplateError> {
    let path = path.as_ref();
    let source = std::fs::read_to_string(path)
        .map_err(|e| ApplyChatTemplateError::ReadTemplateError(path.display().to_string(), e))?;

    if path.extension() != Some("json".as_ref()) {
        return Ok(ChatTemplate::new(Some(source), None, None, true));
    }

    let config: TokenizerConfig = serde_json::from_str(&source)
        .map_err(|e| ApplyChatTemplateError::TokenizerConfigError(path.display().to_string(), e))?;
    let chat_template = config.chat_template.and_then(|field| match field {
        TemplateField::Single(template) => Some(template),
        TemplateField::Named(mut templates) => {
            let idx = templates
                .iter()
                .position(|t| t.name == "default")
                .unwrap_or(0);
            (idx < templates.len()).then(|| templates.swap_remove(idx).template)
        }
    });
    if chat_template.is_none() {
        tracing::warn!("no chat_template found in {}", path.display());
    }
    Ok(ChatTemplate::new(
        chat_template,
        config.bos_token.map(TokenField::into_content),
        config.eos_token.map(TokenField::into_content),
        true,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const CHATML: &str = "{% for message in messages %}<|im_start|>{{ message.role }}\n{{ message.content }}<|im_end|>\n{% endfor %}{% if add_generation_prompt %}<|im_start|>assistant\n{% endif %}";

    fn temp_file(name: &str, contents: &str) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!("vllm-stream-{}", uuid::Uuid::new_v4().simple()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        path
    }

    #[test]
    fn test_render() {
        let template = ChatTemplate::new(Some(CHATML.to_string()), None, None, false);
        let prompt = template.render(&[Message::new("user", "Hi")], true).unwrap();
        assert_eq!(
            prompt,
            "<|im_start|>user\nHi<|im_end|>\n<|im_start|>assistant\n"
        );
        let prompt = template.render(&[Message::new("user", "Hi")], false).unwrap();
        assert_eq!(prompt, "<|im_start|>user\nHi<|im_end|>\n");
    }

    #[test]
    fn test_render_pycompat_methods() {
        let template = ChatTemplate::new(
            Some("{% for m in messages %}{{ m.content.strip() }}{% endfor %}".to_string()),
            None,
            None,
            false,
        );
        let out = template.render(&[Message::new("user", "  padded  ")], false).unwrap();
        assert_eq!(out, "padded");
    }

    #[test]
    fn test_missing_template() {
        let template = ChatTemplate::new(None, None, None, false);
        assert!(matches!(
            template.render(&[Message::new("user", "Hi")], true),
            Err(ApplyChatTemplateError::GetTemplateError(_))
        ));
    }

    #[test]
    fn test_prepared_source_rewrites() {
        let template = ChatTemplate::new(
            Some("{% for m in messages[::-1] %}{{ m.content }}{% endfor %}".to_string()),
            None,
            None,
            false,
        );
        assert_eq!(
            template.prepared_source().unwrap(),
            "{% for m in messages|reverse %}{{ m.content }}{% endfor %}"
        );
        let out = template
            .render(&[Message::new("user", "a"), Message::new("user", "b")], false)
            .unwrap();
        assert_eq!(out, "ba");
    }

    #[test]
    fn test_load_jinja_file() {
        let path = temp_file("chat_template.jinja", CHATML);
        let template = load_chat_template(&path).unwrap();
        assert_eq!(template.source(), Some(CHATML));
    }

    #[test]
    fn test_load_tokenizer_config() {
        let config = serde_json::json!({
            "chat_template": CHATML,
            "bos_token": {"content": "<s>", "lstrip": false},
            "eos_token": "</s>",
        });
        let path = temp_file("tokenizer_config.json", &config.to_string());
        let template = load_chat_template(&path).unwrap();
        assert_eq!(template.source(), Some(CHATML));
        assert_eq!(template.bos_token.as_deref(), Some("<s>"));
        assert_eq!(template.eos_token.as_deref(), Some("</s>"));
    }

    #[test]
    fn test_load_named_templates() {
        let config = serde_json::json!({
            "chat_template": [
                {"name": "tool_use", "template": "tools"},
                {"name": "default", "template": "plain"},
            ],
        });
        let path = temp_file("tokenizer_config.json", &config.to_string());
        assert_eq!(load_chat_template(&path).unwrap().source(), Some("plain"));
    }

    #[test]
    fn test_load_errors() {
        assert!(matches!(
            load_chat_template("/nonexistent/chat_template.jinja"),
            Err(ApplyChatTemplateError::ReadTemplateError(..))
        ));
        let path = temp_file("tokenizer_config.json", "{not json");
        assert!(matches!(
            load_chat_template(&path),
            Err(ApplyChatTemplateError::TokenizerConfigError(..))
        ));
    }
}
