#![forbid(unsafe_code)]

use chatc::config::{load_config, ClientConfig, Cli, Commands};
use chatc::connection::{chat_connection_manager, ChatCommand};
use chatc::events::EventBus;
use chatc::geo::resolve_own_address;
use chatc::key_exchange::{generate_secret, PreSharedKey};
use chatc::local_api::{self, ApiHandles};
use chatc::session::SessionContext;

use base64::Engine;
use clap::Parser;
use std::io::IsTerminal;
use std::path::Path;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::EnvFilter;

// ── ANSI style helpers ──────────────────────────────────────────────

const RESET: &str = "\x1b[0m";
const BOLD: &str = "\x1b[1m";
const DIM: &str = "\x1b[2m";
const GREEN: &str = "\x1b[32m";
const RED: &str = "\x1b[31m";
const YELLOW: &str = "\x1b[33m";
const CYAN: &str = "\x1b[36m";

const IMAGE_EXTENSIONS: [&str; 3] = ["png", "jpg", "jpeg"];

fn tty() -> bool {
    std::io::stdout().is_terminal()
}

// ── Shared helpers ──────────────────────────────────────────────────

/// Local API address for CLI subcommands: `--listen`, else the config file,
/// else the built-in default.
fn daemon_addr(cli: &Cli) -> String {
    let listen = cli.listen.clone().unwrap_or_else(|| {
        load_config(cli.config.as_deref())
            .map_or_else(|_| ClientConfig::default().listen, |c| c.listen)
    });
    match listen.strip_prefix("tcp://") {
        Some(addr) => addr.to_string(),
        None => listen,
    }
}

fn init_tracing(cli: &Cli) -> anyhow::Result<()> {
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        let directive = match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        };
        EnvFilter::new(directive)
    };

    if let Some(ref path) = cli.log_file {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| anyhow::anyhow!("failed to open log file {path:?}: {e}"))?;
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::sync::Mutex::new(file))
            .with_ansi(false)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    Ok(())
}

/// Reads a PNG or JPEG file and returns it as Base64.
async fn read_image(path: &Path) -> anyhow::Result<String> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    if !IMAGE_EXTENSIONS.contains(&ext.as_str()) {
        anyhow::bail!("only PNG and JPEG images are supported: {}", path.display());
    }
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", path.display()))?;
    Ok(base64::engine::general_purpose::STANDARD.encode(bytes))
}

// ── Daemon ──────────────────────────────────────────────────────────

async fn run_daemon(cli: &Cli) -> anyhow::Result<()> {
    let mut config = load_config(cli.config.as_deref())?;

    if let Some(ref server) = cli.server {
        config.server = server.clone();
    }
    if let Some(ref listen) = cli.listen {
        config.listen = listen.clone();
    }

    config
        .validate()
        .map_err(|e| anyhow::anyhow!("Invalid configuration: {e}"))?;

    let psk = PreSharedKey::new(&config.psk)
        .map_err(|e| anyhow::anyhow!("Invalid pre-shared key: {e}"))?;

    // Startup banner
    if std::io::stderr().is_terminal() {
        let v = env!("CARGO_PKG_VERSION");
        eprintln!();
        eprintln!("  {BOLD}◈ Chat Client{RESET} {DIM}v{v}{RESET}");
        eprintln!("  {DIM}Server{RESET}     {}", config.server);
        eprintln!("  {DIM}Listen{RESET}     {}", config.listen);
        eprintln!();
    }

    let events = EventBus::new(1024);
    let events_tx = events.sender();
    let state_rx = events.watch_state();

    let Some(own) = resolve_own_address(&config, &events).await else {
        anyhow::bail!("could not determine own address; set client.ip to skip the lookup");
    };
    info!(ip = %own.ip, "starting chatc daemon");

    let config = Arc::new(config);
    let (commands_tx, commands_rx) = mpsc::channel::<ChatCommand>(256);
    let ctx = SessionContext::new(psk, own, &config.client.username_label, events);

    let conn_handle = tokio::spawn({
        let config = config.clone();
        async move {
            chat_connection_manager(config, ctx, commands_rx).await;
        }
    });

    let api_handle = tokio::spawn({
        let listen = config.listen.clone();
        let handles = ApiHandles {
            commands: commands_tx,
            events: events_tx,
            state: state_rx,
        };
        async move { local_api::start_local_api(&listen, handles).await }
    });

    tokio::select! {
        _ = conn_handle => {
            info!("Chat connection manager exited");
        }
        result = api_handle => {
            result?.map_err(|e| anyhow::anyhow!("Local API error: {e}"))?;
            info!("Local API server exited");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("received shutdown signal");
        }
    }

    Ok(())
}

// ── Daemon IPC ──────────────────────────────────────────────────────

async fn daemon_connect(addr: &str) -> TcpStream {
    match TcpStream::connect(addr).await {
        Ok(stream) => stream,
        Err(e) => {
            if tty() {
                eprintln!();
                eprintln!("  {RED}✗{RESET} Could not connect to daemon");
                eprintln!("    {DIM}{e}{RESET}");
                eprintln!();
                eprintln!("    Is chatc running? Try: {BOLD}chatc start{RESET}");
                eprintln!();
            } else {
                eprintln!("Failed to connect to daemon: {e}");
            }
            std::process::exit(1);
        }
    }
}

async fn daemon_cmd(addr: &str, cmd: &serde_json::Value) -> anyhow::Result<String> {
    let stream = daemon_connect(addr).await;
    let (reader, mut writer) = stream.into_split();
    let mut reader = tokio::io::BufReader::new(reader);

    writer
        .write_all(serde_json::to_string(cmd)?.as_bytes())
        .await?;
    writer.write_all(b"\n").await?;

    let mut line = String::new();
    reader.read_line(&mut line).await?;

    Ok(line)
}

/// Sends `cmd` and prints the reply, pretty when stdout is a terminal.
async fn run_cmd(
    addr: &str,
    cmd: serde_json::Value,
    pretty: fn(&serde_json::Value),
) -> anyhow::Result<()> {
    let resp = daemon_cmd(addr, &cmd).await?;
    if tty() {
        let json: serde_json::Value = serde_json::from_str(resp.trim())?;
        pretty(&json);
    } else {
        print!("{resp}");
    }
    Ok(())
}

async fn watch_events(addr: &str) -> anyhow::Result<()> {
    let stream = daemon_connect(addr).await;
    let (reader, mut writer) = stream.into_split();
    let mut lines = tokio::io::BufReader::new(reader).lines();

    writer.write_all(b"{\"cmd\":\"subscribe\"}\n").await?;

    while let Some(line) = lines.next_line().await? {
        if tty() {
            if let Ok(json) = serde_json::from_str::<serde_json::Value>(&line) {
                fmt_event(&json);
            }
        } else {
            println!("{line}");
        }
    }
    Ok(())
}

// ── Pretty formatters ───────────────────────────────────────────────

fn state_dot(state: &str) -> String {
    match state {
        "ready" => format!("{GREEN}●{RESET}"),
        "connecting" | "awaiting_session_key" => format!("{YELLOW}●{RESET}"),
        _ => format!("{RED}●{RESET}"),
    }
}

fn fmt_status(json: &serde_json::Value) {
    let state = json["state"].as_str().unwrap_or("unknown");
    let v = env!("CARGO_PKG_VERSION");

    println!();
    println!("  {BOLD}◈ Chat Client{RESET} {DIM}v{v}{RESET}");
    println!();
    println!("  {DIM}Status{RESET}     {} {state}", state_dot(state));
    println!();
}

fn fmt_act(json: &serde_json::Value) {
    let status = json["status"].as_str().unwrap_or("error");
    let error = json["error"].as_str();

    match (status, error) {
        ("sent", _) => {
            let id = json["id"].as_str().unwrap_or("?");
            println!("  {GREEN}✓{RESET} Sent {DIM}({id}){RESET}");
        }
        (_, Some(msg)) => println!("  {RED}✗{RESET} {msg}"),
        _ => println!("  {RED}✗{RESET} Send failed"),
    }
}

fn message_body(m: &serde_json::Value) -> String {
    if m["class"] == "image" {
        format!("{DIM}[image]{RESET}")
    } else {
        m["content"].as_str().unwrap_or("").to_string()
    }
}

fn fmt_messages(json: &serde_json::Value) {
    println!();
    match json["messages"].as_array() {
        Some(list) if list.is_empty() => println!("  {DIM}No messages{RESET}"),
        Some(list) => {
            for m in list {
                let time = m["timestamp"].as_str().unwrap_or("");
                let author = m["author"].as_str().unwrap_or("?");
                let id = m["id"].as_str().unwrap_or("?");
                let color = if m["origin"] == "own" { GREEN } else { CYAN };
                println!(
                    "  {DIM}{time}{RESET} {color}{author}{RESET}  {}  {DIM}{id}{RESET}",
                    message_body(m)
                );
            }
        }
        None => {
            let err = json["error"].as_str().unwrap_or("could not read messages");
            println!("  {RED}✗{RESET} {err}");
        }
    }
    println!();
}

fn fmt_online(json: &serde_json::Value) {
    println!();
    match json["online"].as_array() {
        Some(list) if list.is_empty() => println!("  {DIM}Nobody else is online{RESET}"),
        Some(list) => {
            for ip in list {
                println!("  {GREEN}●{RESET} {}", ip.as_str().unwrap_or("?"));
            }
            println!();
            println!("  {DIM}{} online{RESET}", list.len());
        }
        None => {
            let err = json["error"]
                .as_str()
                .unwrap_or("could not read online list");
            println!("  {RED}✗{RESET} {err}");
        }
    }
    println!();
}

fn fmt_whoami(json: &serde_json::Value) {
    let a = &json["address"];
    println!();
    if a.is_null() {
        println!("  {DIM}Address unknown{RESET}");
    } else {
        let field = |k: &str| a[k].as_str().unwrap_or("").to_string();
        println!("  {DIM}IP{RESET}         {CYAN}{}{RESET}", field("ip"));
        let place: Vec<String> = ["district", "city", "region", "country"]
            .into_iter()
            .map(field)
            .filter(|s| !s.is_empty())
            .collect();
        if !place.is_empty() {
            println!("  {DIM}Location{RESET}   {}", place.join(", "));
        }
        let isp = field("isp");
        if !isp.is_empty() {
            println!("  {DIM}ISP{RESET}        {isp}");
        }
    }
    println!();
}

fn fmt_reconnect(json: &serde_json::Value) {
    if let Some(err) = json["error"].as_str() {
        println!("  {RED}✗{RESET} {err}");
    } else {
        println!("  {GREEN}✓{RESET} Reconnecting");
    }
}

fn fmt_event(json: &serde_json::Value) {
    let s = |k: &str| json[k].as_str().unwrap_or("").to_string();
    match json["event"].as_str().unwrap_or("") {
        "state_changed" => {
            let state = s("state");
            println!("  {} {DIM}{state}{RESET}", state_dot(&state));
        }
        "session_ready" => println!("  {GREEN}✓{RESET} Secure session established"),
        "key_exchange_failed" => {
            println!("  {RED}✗{RESET} Key exchange failed: {}", s("reason"));
        }
        "message_created" => {
            let m = &json["message"];
            let author = m["author"].as_str().unwrap_or("?");
            let time = m["timestamp"].as_str().unwrap_or("");
            println!("  {DIM}{time}{RESET} {CYAN}{author}{RESET}  {}", message_body(m));
        }
        "message_edited" => println!("  {DIM}edited {}{RESET}", s("id")),
        "message_removed" => println!("  {DIM}revoked {}{RESET}", s("id")),
        "presence_changed" => {
            let n = json["peers"].as_array().map_or(0, Vec::len);
            println!("  {DIM}{n} online{RESET}");
        }
        "system_notice" => println!("  {YELLOW}●{RESET} {}", s("content")),
        "own_address" => {
            let ip = json["info"]["ip"].as_str().unwrap_or("?");
            println!("  {DIM}own address {ip}{RESET}");
        }
        "address_lookup_failed" => {
            println!("  {RED}✗{RESET} Address lookup failed: {}", s("reason"));
        }
        _ => {}
    }
}

// ── Main ────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        eprintln!("Failed to install rustls crypto provider - may already be installed or unsupported platform");
    }

    let cli = Cli::parse();

    init_tracing(&cli)?;

    match &cli.command {
        Commands::Start => run_daemon(&cli).await?,

        Commands::Genkey => println!("{}", generate_secret()),

        Commands::Status => {
            let cmd = serde_json::json!({"cmd": "status"});
            run_cmd(&daemon_addr(&cli), cmd, fmt_status).await?;
        }

        Commands::Send { message } => {
            let cmd = serde_json::json!({"cmd": "send", "content": message});
            run_cmd(&daemon_addr(&cli), cmd, fmt_act).await?;
        }

        Commands::SendImage { path } => {
            let content = read_image(path).await?;
            let cmd = serde_json::json!({"cmd": "send_image", "content": content});
            run_cmd(&daemon_addr(&cli), cmd, fmt_act).await?;
        }

        Commands::Edit { id, content } => {
            let cmd = serde_json::json!({"cmd": "edit", "id": id, "content": content});
            run_cmd(&daemon_addr(&cli), cmd, fmt_act).await?;
        }

        Commands::EditImage { id, path } => {
            let content = read_image(path).await?;
            let cmd = serde_json::json!({"cmd": "edit_image", "id": id, "content": content});
            run_cmd(&daemon_addr(&cli), cmd, fmt_act).await?;
        }

        Commands::Revoke { id } => {
            let cmd = serde_json::json!({"cmd": "revoke", "id": id});
            run_cmd(&daemon_addr(&cli), cmd, fmt_act).await?;
        }

        Commands::Messages => {
            let cmd = serde_json::json!({"cmd": "messages"});
            run_cmd(&daemon_addr(&cli), cmd, fmt_messages).await?;
        }

        Commands::Online => {
            let cmd = serde_json::json!({"cmd": "online"});
            run_cmd(&daemon_addr(&cli), cmd, fmt_online).await?;
        }

        Commands::Whoami => {
            let cmd = serde_json::json!({"cmd": "whoami"});
            run_cmd(&daemon_addr(&cli), cmd, fmt_whoami).await?;
        }

        Commands::Watch => watch_events(&daemon_addr(&cli)).await?,

        Commands::Reconnect => {
            let cmd = serde_json::json!({"cmd": "reconnect"});
            run_cmd(&daemon_addr(&cli), cmd, fmt_reconnect).await?;
        }
    }
    Ok(())
}
