use crate::connection::ChatCommand;
use crate::error::SendError;
use crate::events::ChatEvent;
use crate::session::{ConnState, UserAction};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chat_common::ContentClass;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tracing::{debug, info, warn};

/// Maximum command line length (16 MB). Images travel inline as Base64.
const MAX_CMD_LEN: usize = 16 * 1_048_576;

const REPLY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
enum ApiCommand {
    Send { content: String },
    SendImage { content: String },
    Edit { id: String, content: String },
    EditImage { id: String, content: String },
    Revoke { id: String },
    Status,
    Messages,
    Online,
    Whoami,
    Reconnect,
    Subscribe,
}

#[derive(Debug, Clone, Serialize)]
struct ActResponse {
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
struct StatusResponse {
    state: ConnState,
}

/// Channels the local API uses to reach the connection task.
#[derive(Debug, Clone)]
pub struct ApiHandles {
    /// Requests to the connection task.
    pub commands: mpsc::Sender<ChatCommand>,
    /// Source of `subscribe` streams.
    pub events: broadcast::Sender<ChatEvent>,
    /// Latest connection state.
    pub state: watch::Receiver<ConnState>,
}

/// # Errors
///
/// Returns an error if binding the local API listener fails.
pub async fn start_local_api(listen: &str, handles: ApiHandles) -> anyhow::Result<()> {
    if let Some(path) = listen.strip_prefix("unix://") {
        let listener = tokio::net::UnixListener::bind(path)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
        }

        info!("Local API listening on unix socket: {}", path);

        loop {
            let (stream, _) = listener.accept().await?;
            let handles = handles.clone();
            let (reader, writer) = stream.into_split();

            tokio::spawn(async move {
                if let Err(e) = handle_local_client(reader, writer, handles).await {
                    debug!("Client handler error: {}", e);
                }
            });
        }
    } else if let Some(addr) = listen.strip_prefix("tcp://") {
        let listener = TcpListener::bind(addr).await?;
        info!("Local API listening on TCP: {}", addr);

        loop {
            let (stream, _) = listener.accept().await?;
            let handles = handles.clone();
            let (reader, writer) = stream.into_split();

            tokio::spawn(async move {
                if let Err(e) = handle_local_client(reader, writer, handles).await {
                    debug!("Client handler error: {}", e);
                }
            });
        }
    } else {
        anyhow::bail!(
            "Invalid listen address format: {listen}. Use unix://path or tcp://addr:port"
        );
    }
}

async fn handle_local_client<R, W>(
    reader: R,
    mut writer: W,
    handles: ApiHandles,
) -> anyhow::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut line = String::new();
    loop {
        line.clear();
        let mut limited = (&mut reader).take(MAX_CMD_LEN as u64 + 1);
        match tokio::io::AsyncBufReadExt::read_line(&mut limited, &mut line).await {
            Ok(0) => break, // EOF
            Ok(_) => {}
            Err(e) => return Err(e.into()),
        }
        if line.len() > MAX_CMD_LEN {
            let error = serde_json::to_string(&serde_json::json!({
                "error": format!("command exceeds maximum length ({MAX_CMD_LEN} bytes)")
            }))? + "\n";
            writer.write_all(error.as_bytes()).await?;
            continue;
        }

        let cmd: ApiCommand = match serde_json::from_str(&line) {
            Ok(cmd) => cmd,
            Err(e) => {
                let error =
                    serde_json::to_string(&serde_json::json!({"error": e.to_string()}))? + "\n";
                writer.write_all(error.as_bytes()).await?;
                continue;
            }
        };

        let response = match cmd {
            ApiCommand::Send { content } => {
                let action = UserAction::Send {
                    class: ContentClass::Text,
                    content,
                };
                handle_act(action, &handles.commands).await?
            }
            ApiCommand::SendImage { content } => match check_image(&content) {
                Ok(()) => {
                    let action = UserAction::Send {
                        class: ContentClass::Image,
                        content,
                    };
                    handle_act(action, &handles.commands).await?
                }
                Err(e) => act_error(&e)?,
            },
            ApiCommand::Edit { id, content } => {
                let action = UserAction::Edit {
                    class: ContentClass::Text,
                    id,
                    content,
                };
                handle_act(action, &handles.commands).await?
            }
            ApiCommand::EditImage { id, content } => match check_image(&content) {
                Ok(()) => {
                    let action = UserAction::Edit {
                        class: ContentClass::Image,
                        id,
                        content,
                    };
                    handle_act(action, &handles.commands).await?
                }
                Err(e) => act_error(&e)?,
            },
            ApiCommand::Revoke { id } => {
                handle_act(UserAction::Revoke { id }, &handles.commands).await?
            }
            ApiCommand::Status => {
                let resp = StatusResponse {
                    state: *handles.state.borrow(),
                };
                serde_json::to_string(&resp)? + "\n"
            }
            ApiCommand::Messages => {
                match request(&handles.commands, |reply| ChatCommand::Messages { reply }).await {
                    Ok(messages) => {
                        serde_json::to_string(&serde_json::json!({"messages": messages}))? + "\n"
                    }
                    Err(e) => error_line(&e)?,
                }
            }
            ApiCommand::Online => {
                match request(&handles.commands, |reply| ChatCommand::Online { reply }).await {
                    Ok(online) => {
                        serde_json::to_string(&serde_json::json!({"online": online}))? + "\n"
                    }
                    Err(e) => error_line(&e)?,
                }
            }
            ApiCommand::Whoami => {
                match request(&handles.commands, |reply| ChatCommand::WhoAmI { reply }).await {
                    Ok(address) => {
                        serde_json::to_string(&serde_json::json!({"address": address}))? + "\n"
                    }
                    Err(e) => error_line(&e)?,
                }
            }
            ApiCommand::Reconnect => match handles.commands.send(ChatCommand::Reconnect).await {
                Ok(()) => serde_json::to_string(&serde_json::json!({"status": "reconnecting"}))? + "\n",
                Err(_) => error_line(&anyhow::anyhow!("chat task is not running"))?,
            },
            ApiCommand::Subscribe => {
                handle_subscribe(handles.events.subscribe(), &mut writer).await?;
                return Ok(());
            }
        };

        writer.write_all(response.as_bytes()).await?;
    }

    Ok(())
}

fn check_image(content: &str) -> anyhow::Result<()> {
    if content.is_empty() {
        anyhow::bail!("image content must not be empty");
    }
    BASE64
        .decode(content)
        .map_err(|e| anyhow::anyhow!("Invalid base64 image: {e}"))?;
    Ok(())
}

fn act_error(e: &anyhow::Error) -> anyhow::Result<String> {
    let resp = ActResponse {
        status: "error",
        id: None,
        error: Some(e.to_string()),
    };
    Ok(serde_json::to_string(&resp)? + "\n")
}

fn error_line(e: &anyhow::Error) -> anyhow::Result<String> {
    Ok(serde_json::to_string(&serde_json::json!({"error": e.to_string()}))? + "\n")
}

async fn request<T>(
    commands: &mpsc::Sender<ChatCommand>,
    build: impl FnOnce(oneshot::Sender<T>) -> ChatCommand,
) -> anyhow::Result<T> {
    let (reply_tx, reply_rx) = oneshot::channel();
    commands
        .send(build(reply_tx))
        .await
        .map_err(|_| anyhow::anyhow!("chat task is not running"))?;
    match tokio::time::timeout(REPLY_TIMEOUT, reply_rx).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(_)) => Err(anyhow::anyhow!("chat task dropped the request")),
        Err(_) => Err(anyhow::anyhow!("timed out waiting for chat task")),
    }
}

async fn handle_act(
    action: UserAction,
    commands: &mpsc::Sender<ChatCommand>,
) -> anyhow::Result<String> {
    let outcome: anyhow::Result<Result<String, SendError>> =
        request(commands, |reply| ChatCommand::Act { action, reply }).await;
    let resp = match outcome {
        Ok(Ok(id)) => ActResponse {
            status: "sent",
            id: Some(id),
            error: None,
        },
        Ok(Err(e)) => ActResponse {
            status: "error",
            id: None,
            error: Some(e.to_string()),
        },
        Err(e) => ActResponse {
            status: "error",
            id: None,
            error: Some(e.to_string()),
        },
    };
    Ok(serde_json::to_string(&resp)? + "\n")
}

async fn handle_subscribe<W>(
    mut events: broadcast::Receiver<ChatEvent>,
    writer: &mut W,
) -> anyhow::Result<()>
where
    W: AsyncWrite + Unpin,
{
    loop {
        match events.recv().await {
            Ok(event) => {
                if let Ok(json) = serde_json::to_string(&event) {
                    if writer.write_all((json + "\n").as_bytes()).await.is_err() {
                        break;
                    }
                }
            }
            Err(broadcast::error::RecvError::Lagged(n)) => {
                warn!(dropped = n, "subscribe stream lagged, events dropped");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
    Ok(())
}
