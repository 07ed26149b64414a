// src/core/mod.rs
pub mod profile;
pub mod sequence;

pub use profile::{TemplateCache, TemplateProfile};
pub use sequence::{ParsedDelta, SequenceParser};
