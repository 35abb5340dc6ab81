mod colors;

use std::env;
use std::future::Future;
use std::io::{IsTerminal, Read, Write};
use std::path::Path;

use dialoguer::{Input, Select, theme::ColorfulTheme};
use tracing_subscriber::EnvFilter;

use colors::*;
use ddgchat::config::Config;
use ddgchat::duckchat::{ChatSession, ImageAttachment, SessionConfig, StreamEvent, Transport};
use ddgchat::error::Error;
use ddgchat::format::Role;
use ddgchat::models::{Model, supports_images, supports_web_search};

#[tokio::main]
async fn main() {
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    let args: Vec<String> = env::args().collect();
    let debug = args.iter().any(|a| a == "--debug" || a == "-d");
    let args: Vec<String> = args
        .into_iter()
        .skip(1)
        .filter(|a| a != "--debug" && a != "-d")
        .collect();

    match args.first().map(String::as_str) {
        None => run_chat(&[], debug).await,
        Some("chat") => run_chat(&args[1..], debug).await,
        Some("ask") => run_ask(&args[1..], debug).await,
        Some("models") => run_models_command(),
        Some("config") => run_config_command(&args[1..]),
        Some("-h" | "--help" | "help") => print_help(),
        Some("-V" | "--version" | "version") => {
            println!("ddgchat {}", env!("CARGO_PKG_VERSION"));
        }
        Some(arg) if arg.starts_with('-') => run_chat(&args, debug).await,
        Some(arg) => {
            eprintln!("{}Unknown command:{} {}", RED, RESET, arg);
            eprintln!();
            eprintln!("Run '{}ddgchat --help{}' for usage information.", YELLOW, RESET);
            std::process::exit(1);
        }
    }
}

fn init_logging(config: &Config) {
    let filter = if config.logging.debug {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("ddgchat=debug,warn"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("ddgchat=info,warn"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();
}

fn load_config(model: Option<String>, debug: bool) -> Config {
    match Config::load() {
        Ok(config) => config.with_overrides(model, debug),
        Err(e) => {
            eprintln!("{}Config error:{} {}", RED, RESET, e);
            std::process::exit(1);
        }
    }
}

fn print_error(e: &Error) {
    eprintln!("{}Error:{} {}", RED, RESET, e);
    if let Some(suggestion) = e.suggestion() {
        eprintln!("  {}Tip:{} {}", YELLOW, RESET, suggestion);
    }
}

async fn ctrl_c() {
    if tokio::signal::ctrl_c().await.is_err() {
        std::future::pending::<()>().await;
    }
}

/// Stream a reply to stdout until `cancel` resolves. Cancelling while waiting
/// for the response or mid-stream drops the partial reply.
/// Returns false when cancelled.
async fn stream_reply<T: Transport>(
    session: &mut ChatSession<T>,
    prompt: &str,
    images: &[ImageAttachment],
    cancel: impl Future<Output = ()>,
) -> ddgchat::Result<bool> {
    tokio::pin!(cancel);
    let cancelled = || -> ddgchat::Result<bool> {
        println!();
        println!("{}(cancelled){}", DIM, RESET);
        Ok(false)
    };

    let mut stream = tokio::select! {
        _ = &mut cancel => return cancelled(),
        stream = session.stream_message(prompt, images) => stream?,
    };
    let mut stdout = std::io::stdout();

    loop {
        tokio::select! {
            _ = &mut cancel => return cancelled(),
            event = stream.next() => match event? {
                Some(StreamEvent::Fragment(text)) => {
                    print!("{}", text);
                    let _ = stdout.flush();
                }
                Some(StreamEvent::Completed(_)) | None => {
                    println!();
                    return Ok(true);
                }
            }
        }
    }
}

struct AskOptions {
    model: Option<String>,
    images: Vec<String>,
    web: bool,
    news: bool,
    local: bool,
    no_stream: bool,
    prompt: String,
}

fn parse_ask_args(args: &[String]) -> Result<AskOptions, String> {
    let mut options = AskOptions {
        model: None,
        images: Vec::new(),
        web: false,
        news: false,
        local: false,
        no_stream: false,
        prompt: String::new(),
    };
    let mut words = Vec::new();

    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--model" | "-m" => {
                i += 1;
                let value = args.get(i).ok_or("--model requires a value")?;
                options.model = Some(value.clone());
            }
            "--image" | "-i" => {
                i += 1;
                let value = args.get(i).ok_or("--image requires a path")?;
                options.images.push(value.clone());
            }
            "--web" => options.web = true,
            "--news" => options.news = true,
            "--local" => options.local = true,
            "--no-stream" => options.no_stream = true,
            arg if arg.starts_with("--") => return Err(format!("unknown option {}", arg)),
            word => words.push(word.to_string()),
        }
        i += 1;
    }

    options.prompt = words.join(" ");
    Ok(options)
}

async fn run_ask(args: &[String], debug: bool) {
    let mut options = match parse_ask_args(args) {
        Ok(options) => options,
        Err(e) => {
            eprintln!("{}Error:{} {}", RED, RESET, e);
            eprintln!("Usage: ddgchat ask [--model <MODEL>] [--image <PATH>] [--web] [--news] [--local] [--no-stream] <PROMPT>");
            std::process::exit(1);
        }
    };

    // Allow `echo question | ddgchat ask`
    if options.prompt.is_empty() && !std::io::stdin().is_terminal() {
        let mut input = String::new();
        if std::io::stdin().read_to_string(&mut input).is_ok() {
            options.prompt = input.trim().to_string();
        }
    }
    if options.prompt.is_empty() {
        eprintln!("Usage: ddgchat ask [OPTIONS] <PROMPT>");
        std::process::exit(1);
    }

    let config = load_config(options.model.take(), debug);
    init_logging(&config);

    let mut images = Vec::with_capacity(options.images.len());
    for path in &options.images {
        match ImageAttachment::from_path(Path::new(path)) {
            Ok(image) => images.push(image),
            Err(e) => {
                eprintln!("{}Cannot read image {}:{} {}", RED, path, RESET, e);
                std::process::exit(1);
            }
        }
    }

    let mut session = ChatSession::new(&config.client.default_model, SessionConfig::from(&config));
    if options.web {
        session.enable_web_search();
    }
    if options.news {
        session.enable_news_search();
    }
    if options.local {
        session.enable_local_features();
    }
    if !images.is_empty() && !session.supports_images() {
        eprintln!(
            "{}Note:{} {} does not accept images, sending text only",
            YELLOW,
            RESET,
            session.model()
        );
    }

    let result = if options.no_stream {
        session.send_message(&options.prompt, &images).await.map(|text| {
            println!("{}", text);
            true
        })
    } else {
        stream_reply(&mut session, &options.prompt, &images, ctrl_c()).await
    };

    match result {
        Ok(true) => {}
        Ok(false) => std::process::exit(130),
        Err(e) => {
            print_error(&e);
            std::process::exit(1);
        }
    }
}

enum ReplAction {
    Continue,
    Exit,
}

enum PromptOutcome {
    Line(String),
    Closed,
    Interrupted,
}

/// Wait for a line of input unless `interrupt` resolves first.
async fn prompt_line(
    input: impl Future<Output = Option<String>>,
    interrupt: impl Future<Output = ()>,
) -> PromptOutcome {
    tokio::select! {
        line = input => match line {
            Some(line) => PromptOutcome::Line(line),
            None => PromptOutcome::Closed,
        },
        _ = interrupt => PromptOutcome::Interrupted,
    }
}

async fn read_input(prompt: &'static str) -> Option<String> {
    tokio::task::spawn_blocking(move || {
        Input::<String>::with_theme(&ColorfulTheme::default())
            .with_prompt(prompt)
            .allow_empty(true)
            .interact_text()
    })
    .await
    .ok()?
    .ok()
}

async fn pick_model(current: &str) -> Option<&'static str> {
    let current = Model::all().iter().position(|m| m.id() == current).unwrap_or(0);
    tokio::task::spawn_blocking(move || {
        let items: Vec<String> = Model::all()
            .iter()
            .map(|m| format!("{} ({})", m.display_name(), m.id()))
            .collect();
        Select::with_theme(&ColorfulTheme::default())
            .with_prompt("Model")
            .items(&items)
            .default(current)
            .interact_opt()
    })
    .await
    .ok()?
    .ok()
    .flatten()
    .map(|idx| Model::all()[idx].id())
}

fn print_history(session: &ChatSession) {
    if session.history().is_empty() {
        println!("{}(empty){}", DIM, RESET);
        return;
    }
    for message in session.history() {
        let (color, label) = match message.role {
            Role::User => (GREEN, "you"),
            Role::Assistant => (CYAN, "assistant"),
        };
        let images = message.content.image_count();
        if images > 0 {
            println!(
                "{}{}{} {}{}[{} image(s)]{}",
                color,
                label,
                RESET,
                message.content.text(),
                DIM,
                images,
                RESET
            );
        } else {
            println!("{}{}{} {}", color, label, RESET, message.content.text());
        }
    }
}

fn print_tools(session: &ChatSession) {
    let tools = session.tools();
    let flag = |on: bool| if on { format!("{}on{}", GREEN, RESET) } else { format!("{}off{}", DIM, RESET) };
    let web = if supports_web_search(session.model()) {
        flag(tools.web_search)
    } else {
        format!("{}n/a for this model{}", DIM, RESET)
    };
    println!("  web search       {}", web);
    println!("  news search      {}", flag(tools.news_search));
    println!("  videos search    {}", flag(tools.videos_search));
    println!("  local search     {}", flag(tools.local_search));
    println!("  weather forecast {}", flag(tools.weather_forecast));
}

async fn handle_command(
    session: &mut ChatSession,
    pending_images: &mut Vec<ImageAttachment>,
    command: &str,
) -> ReplAction {
    let (name, arg) = match command.split_once(' ') {
        Some((name, arg)) => (name, arg.trim()),
        None => (command, ""),
    };

    match name {
        "exit" | "quit" | "q" => return ReplAction::Exit,
        "clear" => {
            session.clear();
            pending_images.clear();
            println!("{}Conversation cleared.{}", DIM, RESET);
        }
        "model" => {
            let model = if arg.is_empty() {
                pick_model(session.model()).await.map(str::to_string)
            } else {
                Some(arg.to_string())
            };
            if let Some(model) = model {
                session.set_model(&model);
                println!("Model: {}{}{}", CYAN, session.model(), RESET);
            }
        }
        "history" => print_history(session),
        "tools" => {
            match arg {
                "web" => {
                    if !session.enable_web_search() {
                        println!("{}Web search needs {}.{}", YELLOW, Model::Gpt4oMini.id(), RESET);
                    }
                }
                "news" => session.enable_news_search(),
                "local" => session.enable_local_features(),
                "none" => session.configure_tools(ddgchat::duckchat::ToolOverrides {
                    web_search: Some(false),
                    news_search: Some(false),
                    videos_search: Some(false),
                    local_search: Some(false),
                    weather_forecast: Some(false),
                }),
                "" => {}
                other => println!("{}Unknown tool '{}'. Use web, news, local or none.{}", YELLOW, other, RESET),
            }
            print_tools(session);
        }
        "image" => {
            if arg.is_empty() {
                println!("Usage: /image <path>");
            } else {
                match ImageAttachment::from_path(Path::new(arg)) {
                    Ok(image) => {
                        pending_images.push(image);
                        if !supports_images(session.model()) {
                            println!(
                                "{}{} does not accept images; it will be dropped.{}",
                                YELLOW,
                                session.model(),
                                RESET
                            );
                        } else {
                            println!("{}Image attached to the next message.{}", DIM, RESET);
                        }
                    }
                    Err(e) => print_error(&e),
                }
            }
        }
        "help" => print_repl_help(),
        other => println!("{}Unknown command /{}. Try /help.{}", YELLOW, other, RESET),
    }
    ReplAction::Continue
}

fn print_repl_help() {
    println!(
        r#"  {YELLOW}/model{RESET} [NAME]   Switch model (picker when no name)
  {YELLOW}/tools{RESET} [TOOL]   Show tools or enable web, news, local, none
  {YELLOW}/image{RESET} <PATH>   Attach an image to the next message
  {YELLOW}/history{RESET}        Show the conversation
  {YELLOW}/clear{RESET}          Start a new conversation
  {YELLOW}/exit{RESET}           Quit
  {DIM}Ctrl-C cancels a pending reply; at the prompt it quits.{RESET}"#
    );
}

async fn run_chat(args: &[String], debug: bool) {
    let mut model = None;
    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--model" | "-m" => {
                i += 1;
                if let Some(value) = args.get(i) {
                    model = Some(value.clone());
                } else {
                    eprintln!("{}Error:{} --model requires a value", RED, RESET);
                    std::process::exit(1);
                }
            }
            other => {
                eprintln!("{}Unknown option:{} {}", RED, RESET, other);
                std::process::exit(1);
            }
        }
        i += 1;
    }

    let config = load_config(model, debug);
    init_logging(&config);

    let mut session = ChatSession::new(&config.client.default_model, SessionConfig::from(&config));
    let mut pending_images = Vec::new();

    println!();
    println!(
        "{}{}ddgchat{} {}{}{}  {}/help for commands, /exit to quit{}",
        BOLD,
        GREEN,
        RESET,
        CYAN,
        session.model(),
        RESET,
        DIM,
        RESET
    );
    println!();

    loop {
        let line = match prompt_line(read_input("you"), ctrl_c()).await {
            PromptOutcome::Line(line) => line,
            PromptOutcome::Closed => break,
            PromptOutcome::Interrupted => {
                // The blocking prompt thread cannot be joined, so leave directly
                println!();
                std::process::exit(130);
            }
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if let Some(command) = line.strip_prefix('/') {
            match handle_command(&mut session, &mut pending_images, command).await {
                ReplAction::Continue => continue,
                ReplAction::Exit => break,
            }
        }

        print!("{}{}assistant{} ", BOLD, CYAN, RESET);
        let _ = std::io::stdout().flush();
        let images = std::mem::take(&mut pending_images);
        if let Err(e) = stream_reply(&mut session, line, &images, ctrl_c()).await {
            println!();
            print_error(&e);
        }
    }
}

fn run_models_command() {
    println!();
    println!("{}Available models{}", BOLD, RESET);
    println!();
    for model in Model::all() {
        let mut tags = Vec::new();
        if supports_images(model.id()) {
            tags.push("images");
        }
        if supports_web_search(model.id()) {
            tags.push("web search");
        }
        let tags = if tags.is_empty() {
            String::new()
        } else {
            format!(" {}[{}]{}", DIM, tags.join(", "), RESET)
        };
        let default = if *model == Model::default() {
            format!(" {}(default){}", GREEN, RESET)
        } else {
            String::new()
        };
        println!(
            "  {}{:<16}{} {}{}{}",
            YELLOW,
            model.display_name(),
            RESET,
            model.id(),
            tags,
            default
        );
    }
    println!();
    println!(
        "{}Aliases: gpt, claude, llama, mistral, o4{}",
        DIM, RESET
    );
    println!();
}

fn run_config_command(args: &[String]) {
    match args.first().map(String::as_str) {
        None | Some("show") => show_config(),
        Some("init") => {
            let force = args[1..].iter().any(|a| a == "--force" || a == "-f");
            init_config(&Config::path(), force);
        }
        Some(other) => {
            eprintln!("{}Unknown config command:{} {}", RED, RESET, other);
            eprintln!("Usage: ddgchat config [show | init [--force]]");
            std::process::exit(1);
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
enum InitOutcome {
    Written,
    AlreadyExists,
}

/// Write the default configuration to `path` unless a file is already there.
fn write_default_config(path: &Path, force: bool) -> Result<InitOutcome, ddgchat::config::ConfigError> {
    if path.exists() && !force {
        return Ok(InitOutcome::AlreadyExists);
    }
    Config::default().save_to(path)?;
    Ok(InitOutcome::Written)
}

fn init_config(path: &Path, force: bool) {
    match write_default_config(path, force) {
        Ok(InitOutcome::Written) => {
            println!("{}Wrote default config to{} {}", GREEN, RESET, path.display());
        }
        Ok(InitOutcome::AlreadyExists) => {
            println!(
                "{}Config already exists at{} {} {}(use --force to overwrite){}",
                YELLOW,
                RESET,
                path.display(),
                DIM,
                RESET
            );
        }
        Err(e) => {
            eprintln!("{}Config error:{} {}", RED, RESET, e);
            std::process::exit(1);
        }
    }
}

fn show_config() {
    println!();
    println!("{}{}ddgchat Configuration{}", BOLD, GREEN, RESET);
    println!();

    let config_path = Config::path();
    println!("{}Config file:{}", BOLD, RESET);
    if config_path.exists() {
        println!("  {}{}{}", CYAN, config_path.display(), RESET);
    } else {
        println!(
            "  {} {}{}(not created yet){}",
            config_path.display(),
            DIM,
            YELLOW,
            RESET
        );
    }
    println!();

    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}Config error:{} {}", RED, RESET, e);
            Config::default()
        }
    };

    println!("{}Current settings:{}", BOLD, RESET);
    println!();

    println!("  {}[client]{}", DIM, RESET);
    println!("    timeout_secs = {}{}{}", CYAN, config.client.timeout_secs, RESET);
    println!("    max_retries = {}{}{}", CYAN, config.client.max_retries, RESET);
    println!("    retry_delay_ms = {}{}{}", CYAN, config.client.retry_delay_ms, RESET);
    println!(
        "    default_model = {}\"{}\"{}",
        CYAN, config.client.default_model, RESET
    );
    println!();

    println!("  {}[rate_limit]{}", DIM, RESET);
    println!("    enabled = {}{}{}", CYAN, config.rate_limit.enabled, RESET);
    println!(
        "    max_per_minute = {}{}{}",
        CYAN, config.rate_limit.max_per_minute, RESET
    );
    println!(
        "    max_per_hour = {}{}{}",
        CYAN, config.rate_limit.max_per_hour, RESET
    );
    println!();

    println!("  {}[tools]{}", DIM, RESET);
    println!("    web_search = {}{}{}", CYAN, config.tools.web_search, RESET);
    println!("    news_search = {}{}{}", CYAN, config.tools.news_search, RESET);
    println!("    videos_search = {}{}{}", CYAN, config.tools.videos_search, RESET);
    println!("    local_search = {}{}{}", CYAN, config.tools.local_search, RESET);
    println!(
        "    weather_forecast = {}{}{}",
        CYAN, config.tools.weather_forecast, RESET
    );
    println!();

    println!("  {}[logging]{}", DIM, RESET);
    println!("    enabled = {}{}{}", CYAN, config.logging.enabled, RESET);
    println!("    debug = {}{}{}", CYAN, config.logging.debug, RESET);
    println!();

    println!(
        "  {}[profile] fe_version = \"{}\", {} cookie(s){}",
        DIM,
        config.profile.fe_version,
        config.profile.cookies.len(),
        RESET
    );
    println!();
}

fn print_help() {
    println!(
        r#"
{BOLD}{GREEN}ddgchat{RESET} {DIM}{version}{RESET}
{DIM}Terminal client for DuckDuckGo AI Chat{RESET}

{BOLD}USAGE:{RESET}  {GREEN}ddgchat{RESET} [COMMAND] [OPTIONS]

{BOLD}COMMANDS{RESET}
┌─────────────┬────────────────────────────────────────┐
│ {YELLOW}chat{RESET}        │ Interactive conversation (default)     │
│ {YELLOW}ask{RESET}         │ Send one prompt and print the reply    │
│ {YELLOW}models{RESET}      │ List available models                  │
│ {YELLOW}config{RESET}      │ Show current configuration             │
│ {YELLOW}config init{RESET} │ Write a default config file            │
│ {YELLOW}version{RESET}     │ Show version information               │
│ {YELLOW}help{RESET}        │ Show this help message                 │
└─────────────┴────────────────────────────────────────┘

{BOLD}OPTIONS{RESET}
┌──────────────────────┬───────────────────────────────────────┐
│ {YELLOW}-m{RESET}, {YELLOW}--model{RESET} <MODEL>  │ Model id or alias                     │
│ {YELLOW}-d{RESET}, {YELLOW}--debug{RESET}          │ Enable debug logging                  │
├──────────────────────┼───────────────────────────────────────┤
│ {YELLOW}-i{RESET}, {YELLOW}--image{RESET} <PATH>   │ {DIM}ask:{RESET} Attach an image (repeatable)   │
│ {YELLOW}--web{RESET}                │ {DIM}ask:{RESET} Enable web search              │
│ {YELLOW}--news{RESET}               │ {DIM}ask:{RESET} Enable news search             │
│ {YELLOW}--local{RESET}              │ {DIM}ask:{RESET} Enable local search and weather│
│ {YELLOW}--no-stream{RESET}          │ {DIM}ask:{RESET} Print the reply when complete  │
└──────────────────────┴───────────────────────────────────────┘

{BOLD}EXAMPLES{RESET}
  {GREEN}ddgchat{RESET}                                 {DIM}# Start chatting{RESET}
  {GREEN}ddgchat chat -m claude{RESET}                  {DIM}# Chat with Claude 3 Haiku{RESET}
  {GREEN}ddgchat ask "what is a monad"{RESET}           {DIM}# One-shot question{RESET}
  {GREEN}ddgchat ask --web "rust 2024 edition"{RESET}   {DIM}# With web search{RESET}
  {GREEN}ddgchat ask -i cat.png "what is this"{RESET}   {DIM}# With an image{RESET}

{BOLD}CONFIGURATION{RESET}
  {DIM}{path}{RESET}
"#,
        version = env!("CARGO_PKG_VERSION"),
        path = Config::path().display(),
    );
}
