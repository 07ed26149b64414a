use anyhow::{Context, Result};
use clap::Parser;
use serde::Serialize;
use std::io::{Read, Write};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use vllm_stream::core::{ParsedDelta, SequenceParser, TemplateCache};
use vllm_stream::server::streaming::{ends_on_char_boundary, flush_pending};
use vllm_stream::server::{CompletionResponse, DoneReason, PendingResponse, ResponseSequence};
use vllm_stream::utils::chat_template::{load_chat_template, ChatTemplate};
use vllm_stream::utils::config::ParserConfig;

#[derive(Parser, Debug)]
#[command(author, version, about = "Replay recorded model output through the streaming parsers", long_about = None)]
struct Args {
    /// Chat template: a Jinja file or a tokenizer_config.json
    #[arg(long)]
    template: Option<PathBuf>,

    /// Parser settings (JSON)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Recorded model outputs, one sequence each; read from stdin when omitted
    #[arg(long)]
    input: Vec<PathBuf>,

    /// Bytes per replayed fragment
    #[arg(long, default_value_t = 3)]
    chunk_size: usize,

    #[arg(long, default_value_t = false)]
    log: bool,
}

#[derive(Serialize)]
struct OutputLine<'a> {
    sequence: usize,
    #[serde(flatten)]
    delta: &'a ParsedDelta,
    done: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    done_reason: Option<DoneReason>,
}

/// Parses flushed records and writes each non-empty delta as a JSON line.
struct ReplaySequence<W: Write> {
    id: usize,
    pending: Vec<PendingResponse>,
    parser: SequenceParser,
    out: W,
}

impl<W: Write> ResponseSequence for ReplaySequence<W> {
    fn pending(&self) -> &[PendingResponse] {
        &self.pending
    }

    fn clear(&mut self) {
        self.pending.clear();
    }

    fn send(&mut self, response: CompletionResponse) -> bool {
        let mut delta = self.parser.add(&response.content);
        if response.done {
            delta.append(self.parser.finish());
        } else if delta.is_empty() {
            return true;
        }
        let line = OutputLine {
            sequence: self.id,
            delta: &delta,
            done: response.done,
            done_reason: response.done_reason,
        };
        match serde_json::to_string(&line) {
            Ok(json) => writeln!(self.out, "{json}").is_ok(),
            Err(e) => {
                tracing::error!("failed to encode delta: {}", e);
                false
            }
        }
    }
}

/// Feed `output` through a fresh sequence in `chunk_size` byte fragments.
fn replay<W: Write>(seq: &mut ReplaySequence<W>, output: &[u8], chunk_size: usize) -> Result<()> {
    // flush only on character boundaries, as a runner does between tokens
    for chunk in output.chunks(chunk_size.max(1)) {
        seq.pending.push(PendingResponse::new(chunk));
        if ends_on_char_boundary(seq.pending()) && !flush_pending(seq) {
            anyhow::bail!("output closed");
        }
    }
    seq.pending
        .push(PendingResponse::done("", Some(DoneReason::Stop)));
    if !flush_pending(seq) {
        anyhow::bail!("output closed");
    }
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();
    let level = if args.log { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .with_writer(std::io::stderr)
        .init();

    let config = match &args.config {
        Some(path) => ParserConfig::from_file(path)?,
        None => ParserConfig::default(),
    };
    let chat_template = match &args.template {
        Some(path) => load_chat_template(path)?,
        None => {
            tracing::warn!("no chat template given, thinking tags must come from --config");
            ChatTemplate::new(None, None, None, true)
        }
    };

    let outputs = if args.input.is_empty() {
        let mut buf = Vec::new();
        std::io::stdin()
            .read_to_end(&mut buf)
            .context("reading stdin")?;
        vec![buf]
    } else {
        args.input
            .iter()
            .map(|path| std::fs::read(path).with_context(|| format!("reading {}", path.display())))
            .collect::<Result<Vec<_>>>()?
    };

    let cache = TemplateCache::new();
    let mut out = std::io::stdout().lock();
    for (id, output) in outputs.iter().enumerate() {
        let profile = cache.get_or_infer(&chat_template);
        let mut seq = ReplaySequence {
            id,
            pending: Vec::new(),
            parser: SequenceParser::new(&profile, &config),
            out: &mut out,
        };
        replay(&mut seq, output, args.chunk_size)?;
    }
    tracing::debug!("replayed {} sequence(s), {} template profile(s)", outputs.len(), cache.len());
    out.flush()?;
    Ok(())
}
