// src/core/profile.rs
//! Setup-time knowledge about a chat template.
//!
//! Inference walks and renders the template, so it runs once per distinct
//! template and the result is shared by every sequence using it.

use crate::reasoning::{infer_thinking_tags, ThinkingTags};
use crate::template;
use crate::tools::{infer_tool_call_format, ToolCallFormat};
use crate::utils::chat_template::ChatTemplate;
use crate::utils::config::ParserConfig;
use ahash::AHashMap;
use parking_lot::RwLock;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TemplateProfile {
    pub thinking_tags: ThinkingTags,
    pub tool_format: ToolCallFormat,
}

impl TemplateProfile {
    pub fn from_template(chat_template: &ChatTemplate) -> Self {
        let thinking_tags = match chat_template.prepared_source() {
            Ok(source) => match template::parse(&source) {
                Ok(ast) => infer_thinking_tags(&ast),
                Err(e) => {
                    tracing::warn!("unable to parse chat template for thinking tags: {}", e);
                    ThinkingTags::default()
                }
            },
            Err(_) => ThinkingTags::default(),
        };
        let tool_format = match infer_tool_call_format(chat_template) {
            Ok(format) => format,
            Err(e) => {
                tracing::debug!("using default tool call format: {}", e);
                ToolCallFormat::default()
            }
        };
        tracing::info!(
            "template profile: thinking tags {:?}/{:?}, tool call {:?}..{:?} ({}, {})",
            thinking_tags.opening,
            thinking_tags.closing,
            tool_format.prefix,
            tool_format.suffix,
            tool_format.name_field,
            tool_format.arguments_field
        );
        Self {
            thinking_tags,
            tool_format,
        }
    }

    /// Apply explicit settings from `config` over the inferred values.
    pub fn with_overrides(&self, config: &ParserConfig) -> Self {
        let mut profile = self.clone();
        if let Some(tag) = &config.opening_tag {
            profile.thinking_tags.opening = tag.clone();
        }
        if let Some(tag) = &config.closing_tag {
            profile.thinking_tags.closing = tag.clone();
        }
        if let Some(prefix) = &config.tool_prefix {
            profile.tool_format.prefix = prefix.clone();
        }
        if let Some(field) = &config.tool_name_field {
            profile.tool_format.name_field = field.clone();
        }
        if let Some(field) = &config.tool_arguments_field {
            profile.tool_format.arguments_field = field.clone();
        }
        if let Some(suffix) = &config.tool_suffix {
            profile.tool_format.suffix = suffix.clone();
        }
        profile
    }
}

/// Profiles keyed by template source.
#[derive(Default)]
pub struct TemplateCache {
    profiles: RwLock<AHashMap<String, Arc<TemplateProfile>>>,
}

impl TemplateCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_infer(&self, chat_template: &ChatTemplate) -> Arc<TemplateProfile> {
        let key = chat_template.source().unwrap_or_default();
        if let Some(profile) = self.profiles.read().get(key) {
            return Arc::clone(profile);
        }
        let profile = Arc::new(TemplateProfile::from_template(chat_template));
        // another thread may have inferred the same template meanwhile
        Arc::clone(
            self.profiles
                .write()
                .entry(key.to_string())
                .or_insert(profile),
        )
    }

    pub fn len(&self) -> usize {
        self.profiles.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.read().is_empty()
    }
}
