use crate::config::ClientConfig;
use crate::error::ChatError;
use crate::providers::BackendFlavor;
use crate::reassembly::PairOrder;
use crate::transport::TransportKind;
use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "chat-relay")]
#[command(version = "0.3.0")]
#[command(about = "Chat with a hosted conversational backend from the terminal")]
pub struct Args {
    /// Backend base URL (overrides the config file)
    #[arg(long)]
    pub url: Option<String>,

    /// TOML config file
    #[arg(long, short)]
    pub config: Option<PathBuf>,

    /// How replies are fetched: auto, direct, poll or stream
    #[arg(long, value_enum, default_value = "auto")]
    pub transport: TransportKind,

    /// Request body layout
    #[arg(long, value_enum)]
    pub flavor: Option<BackendFlavor>,

    /// How a [response, state] pair is told apart
    #[arg(long, value_enum)]
    pub pair_order: Option<PairOrder>,

    /// System prompt sent with every turn
    #[arg(long)]
    pub system: Option<String>,

    /// Snapshot file for the message list
    #[arg(long)]
    pub snapshot: Option<PathBuf>,

    /// Do not read or write a snapshot
    #[arg(long)]
    pub no_snapshot: bool,

    /// Send one message, print the reply and exit
    #[arg(long)]
    pub prompt: Option<String>,

    /// Debug logging on stderr
    #[arg(long, short)]
    pub verbose: bool,

    /// Print shell completions and exit
    #[arg(long, value_enum)]
    pub completions: Option<clap_complete::Shell>,
}

impl Args {
    /// Config file (if any), then the environment, then these flags.
    pub fn resolve_config(&self) -> Result<ClientConfig, ChatError> {
        let base = match &self.config {
            Some(path) => ClientConfig::load(path)?,
            None => ClientConfig::default(),
        };
        let mut config = base.with_env();
        if let Some(url) = &self.url {
            config.base_url = url.clone();
        }
        if let Some(flavor) = self.flavor {
            config.flavor = flavor;
        }
        if let Some(order) = self.pair_order {
            config.pair_order = order;
        }
        if let Some(system) = &self.system {
            config.sampling.system_prompt = system.clone();
        }
        if let Some(path) = &self.snapshot {
            config.snapshot_path = Some(path.clone());
        }
        if self.no_snapshot {
            config.snapshot_path = None;
        }
        config.validate()?;
        Ok(config)
    }
}

/// How to bring the terminal from one rendering of the reply to the next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Redraw<'a> {
    /// The new text extends the old one; print the suffix.
    Append(&'a str),
    /// The text was replaced; print it again on a fresh line.
    Replace(&'a str),
    Unchanged,
}

pub fn redraw<'a>(shown: &str, next: &'a str) -> Redraw<'a> {
    if shown == next {
        Redraw::Unchanged
    } else if let Some(suffix) = next.strip_prefix(shown) {
        Redraw::Append(suffix)
    } else {
        Redraw::Replace(next)
    }
}

/// Terminal rendering of one growing reply.
#[derive(Debug, Clone, Default)]
pub struct ReplyView {
    label: String,
    shown: String,
}

impl ReplyView {
    /// `label` starts the fresh line a replaced reply is reprinted on.
    pub fn new(label: impl Into<String>) -> Self {
        ReplyView {
            label: label.into(),
            shown: String::new(),
        }
    }

    /// Output that takes the screen from the current rendering to `next`.
    pub fn update(&mut self, next: &str) -> Option<String> {
        let out = match redraw(&self.shown, next) {
            Redraw::Unchanged => return None,
            Redraw::Append(suffix) => suffix.to_string(),
            Redraw::Replace(all) => format!("\n{} {all}", self.label),
        };
        self.shown = next.to_string();
        Some(out)
    }
}

/// REPL commands recognised at the prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input<'a> {
    Send(&'a str),
    Reset,
    Quit,
    Empty,
}

pub fn parse_input(line: &str) -> Input<'_> {
    match line.trim() {
        "" => Input::Empty,
        "/reset" | "/new" => Input::Reset,
        "/quit" | "/exit" => Input::Quit,
        _ => Input::Send(line.trim_end_matches(['\r', '\n'])),
    }
}
