//! The copilot command line: chat in the terminal or serve over HTTP.

#[macro_use]
extern crate tracing;

use std::collections::HashMap;
use std::io::Write as _;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};
use copilot::config::Config;
use copilot::core::conversation::{result_to_text, scheduled_message_text};
use copilot::core::{
    Agent, ChatEvent, ChatEvents, Decision, Decisions, FinishReason,
};
use copilot::scheduler::{FiredTask, TokioScheduler};
use copilot::server::{self, AppState};
use copilot::store::FileStore;
use copilot::SessionBuilder;
use copilot_openai_model::OpenAIProvider;
use indicatif::{ProgressBar, ProgressStyle};
use owo_colors::OwoColorize;
use serde_json::Value;
use tokio::io::{self, AsyncBufReadExt, BufReader, Lines, Stdin};
use tokio::net::TcpListener;
use tokio::select;
use tokio::time::sleep;
use tracing_subscriber::EnvFilter;

const BAR_CHAR: &str = "▎";

type Input = Lines<BufReader<Stdin>>;

enum Next {
    Line(io::Result<Option<String>>),
    Task(FiredTask),
}

#[derive(Debug, Parser)]
#[command(
    name = "copilot",
    version,
    about = "A health copilot for your lab results"
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Chat with the copilot in the terminal (the default).
    Chat {
        /// Name of the conversation, restored from the data directory if
        /// one is configured.
        #[arg(long, default_value = "terminal")]
        conversation: String,
    },
    /// Serve the HTTP interface.
    Serve {
        /// Overrides `COPILOT_LISTEN_ADDR`.
        #[arg(long)]
        listen: Option<SocketAddr>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Variables already set in the environment win over both files.
    dotenvy::from_filename(".dev.vars").ok();
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = Config::from_env()?;
    debug!("{config:?}");

    match cli.command {
        None => chat(config, "terminal".to_owned()).await,
        Some(Commands::Chat { conversation }) => {
            chat(config, conversation).await
        }
        Some(Commands::Serve { listen }) => serve(config, listen).await,
    }
}

async fn serve(mut config: Config, listen: Option<SocketAddr>) -> Result<()> {
    if let Some(listen) = listen {
        config.listen_addr = listen;
    }
    let scheduler = Arc::new(TokioScheduler::new());
    let state = AppState::from_config(&config, scheduler);
    let addr = config.listen_addr;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to listen on {addr}"))?;
    server::serve(listener, state, async {
        tokio::signal::ctrl_c().await.ok();
    })
    .await?;
    Ok(())
}

async fn chat(config: Config, conversation: String) -> Result<()> {
    let provider = OpenAIProvider::new(config.provider_config()?);
    let scheduler = TokioScheduler::new();
    let mut fired_tasks = scheduler.subscribe();

    let mut builder = SessionBuilder::with_model_provider(provider)
        .with_id(&conversation)
        .with_scheduler(Arc::new(scheduler))
        .with_max_steps(config.max_steps);
    if let Some(dir) = &config.data_dir {
        builder = builder.with_store(Arc::new(FileStore::new(dir)));
    }
    let agent = builder.build_restored().await?;

    let restored = agent.messages().await?.len();
    if restored > 0 {
        println!("{}", format!("Restored {restored} messages.").dimmed());
    }

    let mut input = BufReader::new(io::stdin()).lines();
    loop {
        print!("> ");
        flush();

        let next = select! {
            line = input.next_line() => Next::Line(line),
            Some(task) = fired_tasks.recv() => Next::Task(task),
        };
        let line = match next {
            Next::Task(task) => {
                println!();
                TurnView::new(true)
                    .render(&agent, task.events, &mut input)
                    .await?;
                continue;
            }
            Next::Line(Ok(Some(line))) => line,
            Next::Line(Ok(None)) => break,
            Next::Line(Err(err)) => {
                error!("error reading input: {err}");
                break;
            }
        };

        match line.trim() {
            "" => continue,
            "/quit" | "/exit" => break,
            "/clear" => {
                agent.clear_history().await?;
                println!("{}", "History cleared.".dimmed());
            }
            "/debug" => print_messages(&agent).await?,
            text => {
                let events = agent.send_message(text)?;
                TurnView::new(false)
                    .render(&agent, events, &mut input)
                    .await?;
            }
        }
    }
    Ok(())
}

/// Prints the stored conversation as the JSON the server returns.
async fn print_messages(agent: &Agent) -> Result<()> {
    let messages = agent.messages().await?;
    match serde_json::to_string_pretty(&messages) {
        Ok(json) => println!("{}", json.dimmed()),
        Err(err) => error!("failed to serialize messages: {err}"),
    }
    Ok(())
}

/// Renders the events of a turn, and of the turns that follow it when the
/// user answers confirmation prompts.
struct TurnView {
    progress_style: ProgressStyle,
    progress_bar: Option<ProgressBar>,
    scheduled: bool,
    streaming: bool,
    text: String,
    calls: HashMap<String, (String, Value)>,
}

impl TurnView {
    fn new(scheduled: bool) -> Self {
        let progress_style =
            ProgressStyle::with_template("{spinner} {wide_msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏");
        Self {
            progress_style,
            progress_bar: None,
            scheduled,
            streaming: false,
            text: String::new(),
            calls: HashMap::new(),
        }
    }

    async fn render(
        mut self,
        agent: &Agent,
        mut events: ChatEvents,
        input: &mut Input,
    ) -> Result<()> {
        loop {
            let mut awaiting = vec![];
            while let Some(event) = self.next_event(&mut events).await {
                match event {
                    ChatEvent::TextDelta { delta, .. } => {
                        self.print_delta(&delta)
                    }
                    ChatEvent::ToolCall {
                        tool_call_id,
                        tool_name,
                        args,
                        requires_confirmation,
                        ..
                    } => {
                        self.end_text();
                        if !requires_confirmation {
                            println!(
                                "{}🔧 {}",
                                BAR_CHAR.bright_black(),
                                tool_name.dimmed()
                            );
                        }
                        self.calls.insert(tool_call_id, (tool_name, args));
                    }
                    ChatEvent::ToolResult {
                        tool_name, result, ..
                    } => {
                        self.end_text();
                        let mut text = result_to_text(&result);
                        if text.chars().count() > 72 {
                            text = text.chars().take(72).collect();
                            text.push('…');
                        }
                        println!(
                            "{}↳ {}: {}",
                            BAR_CHAR.bright_black(),
                            tool_name.dimmed(),
                            text.dimmed()
                        );
                    }
                    ChatEvent::AwaitingConfirmation { tool_call_ids } => {
                        awaiting = tool_call_ids;
                    }
                    ChatEvent::Error { message } => {
                        self.end_text();
                        let bar = BAR_CHAR.bright_red();
                        println!("{bar}❌ {}", message.red());
                    }
                    ChatEvent::Finished { reason } => {
                        self.end_text();
                        if reason == FinishReason::StepLimit {
                            let note = "Stopped after too many steps.";
                            println!("{}", note.dimmed());
                        }
                    }
                }
            }
            self.finish_progress();

            if awaiting.is_empty() {
                return Ok(());
            }
            let Some(decisions) = self.ask(&awaiting, input).await else {
                return Ok(());
            };
            events = agent.confirm(decisions)?;
        }
    }

    async fn next_event(
        &mut self,
        events: &mut ChatEvents,
    ) -> Option<ChatEvent> {
        loop {
            if !self.streaming {
                let style = &self.progress_style;
                self.progress_bar
                    .get_or_insert_with(|| {
                        let progress_bar = ProgressBar::new_spinner();
                        progress_bar.set_style(style.clone());
                        progress_bar.set_message("🤔 Thinking...");
                        progress_bar
                    })
                    .inc(1);
            }
            select! {
                event = events.recv() => {
                    // Finish the progress bar before printing anything else.
                    self.finish_progress();
                    return event;
                }
                _ = sleep(Duration::from_millis(100)) => {}
            }
        }
    }

    fn finish_progress(&mut self) {
        if let Some(progress_bar) = self.progress_bar.take() {
            progress_bar.finish_and_clear();
        }
    }

    fn print_delta(&mut self, delta: &str) {
        if self.scheduled {
            // Shown at once when complete, to recognize scheduled messages.
            self.text.push_str(delta);
            return;
        }
        if !self.streaming {
            self.streaming = true;
            print!("{}🤖 ", BAR_CHAR.bright_cyan());
        }
        print!("{}", delta.bright_white());
        flush();
    }

    fn end_text(&mut self) {
        if self.streaming {
            println!();
            self.streaming = false;
        }
        if self.text.is_empty() {
            return;
        }
        let text = std::mem::take(&mut self.text);
        match scheduled_message_text(&text) {
            Some(message) => println!(
                "{}⏰ {}",
                BAR_CHAR.bright_magenta(),
                message.bright_white()
            ),
            None => {
                let bar = BAR_CHAR.bright_cyan();
                println!("{bar}🤖 {}", text.bright_white())
            }
        }
    }

    /// Asks the user about each waiting call. Returns `None` if the input
    /// is closed.
    async fn ask(
        &self,
        ids: &[String],
        input: &mut Input,
    ) -> Option<Decisions> {
        let mut decisions = Decisions::new();
        for id in ids {
            let bar = BAR_CHAR.bright_yellow();
            match self.calls.get(id) {
                Some((tool_name, args)) => {
                    let args = serde_json::to_string_pretty(args)
                        .unwrap_or_else(|_| args.to_string());
                    println!(
                        "\n{bar}⚠️  The copilot wants to use {}:",
                        tool_name.bold()
                    );
                    for line in args.lines() {
                        println!("{bar}{}", line.bright_white());
                    }
                }
                None => {
                    println!("\n{bar}⚠️  The copilot wants to run call {id}")
                }
            }
            print!("Proceed? [Y/n]: ");
            flush();

            let line = match input.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => return None,
                Err(err) => {
                    error!("error reading input: {err}");
                    return None;
                }
            };
            let line = line.trim();
            let approved =
                line.is_empty() || line.eq_ignore_ascii_case("y");
            let decision = if approved {
                Decision::Approve
            } else {
                Decision::Reject
            };
            decisions.insert(id.clone(), decision);
            println!();
        }
        Some(decisions)
    }
}

fn flush() {
    if let Err(err) = std::io::stdout().flush() {
        warn!("failed to flush stdout: {err}");
    }
}
