use chat_relay::cli::{parse_input, Args, Input, ReplyView};
use chat_relay::session::{TurnHandle, TurnUpdate};
use chat_relay::snapshot::SnapshotStore;
use chat_relay::transport::Transport;
use chat_relay::{ChatError, ChatSession, Message, Role};
use clap::{CommandFactory, Parser};
use colored::*;
use std::io::{self, Write};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

fn init_tracing(verbose: bool) {
    let default = if verbose { "chat_relay=debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn print_header(session: &ChatSession, base_url: &str) {
    println!("{}", "CHAT RELAY".bright_cyan().bold());
    println!("{}: {}", "Backend".bright_yellow(), base_url);
    println!(
        "{}: {}",
        "Transport".bright_yellow(),
        session.transport().kind().to_string().bright_white()
    );
    println!(
        "{}",
        "Enter sends, /reset starts over, /quit exits, Ctrl-C cancels a reply".dimmed()
    );
    println!("{}", "=".repeat(50).bright_blue());
}

fn print_history(messages: &[Message]) {
    for m in messages {
        match m.role {
            Role::User => println!("{} {}", "you>".bright_green().bold(), m.content),
            Role::Assistant => println!("{} {}", "bot>".bright_cyan().bold(), m.content),
        }
    }
}

fn banner(err: &ChatError) {
    eprintln!("{} {}", "[error]".bright_red().bold(), err.user_notice());
}

fn reply_view() -> ReplyView {
    ReplyView::new("bot>".bright_cyan().bold().to_string())
}

fn show(view: &mut ReplyView, text: &str) {
    if let Some(out) = view.update(text) {
        print!("{out}");
        let _ = io::stdout().flush();
    }
}

/// Drive one turn, redrawing the reply as it grows. Ctrl-C cancels it.
async fn stream_turn(session: &mut ChatSession, mut handle: TurnHandle) {
    print!("{} ", "bot>".bright_cyan().bold());
    let _ = io::stdout().flush();
    let mut view = reply_view();
    loop {
        tokio::select! {
            event = handle.next_event() => {
                let Some(event) = event else { break };
                if let TurnUpdate::Text(text) = &event.update {
                    show(&mut view, text);
                }
                if let Some(outcome) = session.apply(event) {
                    match outcome {
                        Ok(_) => println!(),
                        Err(e @ ChatError::Shape { .. }) => {
                            let raw = session
                                .messages()
                                .last()
                                .map(|m| m.content.clone())
                                .unwrap_or_default();
                            println!("\n{}\n{}", e.user_notice().yellow(), raw);
                        }
                        Err(e) => {
                            println!();
                            banner(&e);
                        }
                    }
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                session.cancel();
                println!("\r{}", "(cancelled)".dimmed());
                break;
            }
        }
    }
}

fn save_snapshot(store: Option<&SnapshotStore>, session: &ChatSession) {
    if let Some(store) = store {
        if let Err(e) = store.save(session.messages()) {
            tracing::warn!(error = %e, path = %store.path().display(), "could not save snapshot");
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    if let Some(shell) = args.completions {
        clap_complete::generate(shell, &mut Args::command(), "chat-relay", &mut io::stdout());
        return Ok(());
    }

    init_tracing(args.verbose);

    let config = args.resolve_config()?;
    let transport = Transport::new(args.transport, config.clone())?;
    let store = config
        .snapshot_path
        .as_ref()
        .map(|path| SnapshotStore::new(path, config.greeting.clone()));

    let mut session = ChatSession::new(transport, &config);
    if let Some(store) = &store {
        session = session.with_messages(store.load());
    }

    // One-shot mode
    if let Some(prompt) = &args.prompt {
        let mut view = reply_view();
        let result = session.run_turn(prompt, |text| show(&mut view, text)).await;
        save_snapshot(store.as_ref(), &session);
        return match result {
            Ok(text) => {
                show(&mut view, &text);
                println!();
                Ok(())
            }
            Err(e) => {
                if let ChatError::Shape { raw } = &e {
                    println!("{}", chat_relay::normalize::pretty_raw(raw));
                }
                banner(&e);
                Err(e.into())
            }
        };
    }

    print_header(&session, &config.base_url);
    print_history(session.messages());

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("{} ", "you>".bright_green().bold());
        let _ = io::stdout().flush();
        let Some(line) = lines.next_line().await? else {
            break;
        };
        match parse_input(&line) {
            Input::Empty => continue,
            Input::Quit => break,
            Input::Reset => {
                session.reset();
                save_snapshot(store.as_ref(), &session);
                println!("{}", "Conversation cleared.".dimmed());
                print_history(session.messages());
            }
            Input::Send(text) => match session.send(text) {
                Ok(handle) => {
                    stream_turn(&mut session, handle).await;
                    save_snapshot(store.as_ref(), &session);
                }
                Err(e) => banner(&e),
            },
        }
    }

    session.cancel();
    save_snapshot(store.as_ref(), &session);
    Ok(())
}
