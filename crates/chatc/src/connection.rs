use crate::config::ClientConfig;
use crate::error::{ConnError, SendError};
use crate::reconnect::ReconnectSchedule;
use crate::session::{Outbound, SessionContext, UserAction};
use crate::store::Message as ChatMessage;
use chat_common::AddressInfo;
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval_at, Instant};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

/// A request from the local API to the connection task.
#[derive(Debug)]
pub enum ChatCommand {
    /// Send, edit or revoke. Replies with the message id once the frame is
    /// written.
    Act {
        /// What to do.
        action: UserAction,
        /// Outcome.
        reply: oneshot::Sender<Result<String, SendError>>,
    },
    /// Snapshot of visible messages.
    Messages {
        /// Messages in creation order.
        reply: oneshot::Sender<Vec<ChatMessage>>,
    },
    /// Snapshot of the displayed online list.
    Online {
        /// Peer addresses.
        reply: oneshot::Sender<Vec<String>>,
    },
    /// Our own address, once known.
    WhoAmI {
        /// Address details.
        reply: oneshot::Sender<Option<AddressInfo>>,
    },
    /// Drop the live channel and connect again immediately.
    Reconnect,
}

#[derive(Debug, PartialEq, Eq)]
enum Exit {
    Shutdown,
    Reconnect,
}

enum Applied {
    Handled,
    Transmit(Outbound, oneshot::Sender<Result<String, SendError>>),
    Reconnect,
}

/// Answers a command from session state. Actions that produce a frame are
/// handed back for the caller to write.
fn apply_command(ctx: &mut SessionContext, command: ChatCommand) -> Applied {
    match command {
        ChatCommand::Act { action, reply } => match ctx.submit(action) {
            Ok(outbound) => Applied::Transmit(outbound, reply),
            Err(e) => {
                let _ = reply.send(Err(e));
                Applied::Handled
            }
        },
        ChatCommand::Messages { reply } => {
            let _ = reply.send(ctx.store().messages());
            Applied::Handled
        }
        ChatCommand::Online { reply } => {
            let _ = reply.send(ctx.presence().display_list());
            Applied::Handled
        }
        ChatCommand::WhoAmI { reply } => {
            let _ = reply.send(ctx.presence().own().cloned());
            Applied::Handled
        }
        ChatCommand::Reconnect => Applied::Reconnect,
    }
}

/// Serves a command while no channel is open.
fn apply_offline(ctx: &mut SessionContext, command: ChatCommand) {
    match apply_command(ctx, command) {
        Applied::Handled => {}
        Applied::Transmit(_, reply) => {
            let _ = reply.send(Err(SendError::ConnectionLost));
        }
        Applied::Reconnect => debug!("reconnect already pending"),
    }
}

/// Top-level connection loop: connect, run the session, wait the fixed
/// delay, repeat. Returns once the command channel is closed.
pub async fn chat_connection_manager(
    config: Arc<ClientConfig>,
    mut ctx: SessionContext,
    mut commands: mpsc::Receiver<ChatCommand>,
) {
    let mut schedule = ReconnectSchedule::new(Duration::from_millis(config.reconnect.delay_ms));

    loop {
        ctx.begin_connect();
        let outcome = connect_and_run(&config, &mut ctx, &mut commands).await;
        let was_ready = ctx.has_session_key();
        ctx.on_close();

        match outcome {
            Ok(Exit::Shutdown) => {
                info!("command channel closed, stopping connection task");
                break;
            }
            Ok(Exit::Reconnect) => {
                info!("reconnecting on request");
                schedule.reset();
                continue;
            }
            Err(e) => {
                warn!(error = %e, "chat connection lost");
                if was_ready {
                    schedule.reset();
                }
            }
        }

        let delay = schedule.next_delay();
        info!(
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            attempt = schedule.attempts(),
            "reconnecting"
        );
        if !wait_serving_commands(&mut ctx, &mut commands, delay).await {
            info!("command channel closed, stopping connection task");
            break;
        }
    }
}

/// Sleeps for `delay` while still answering commands. Returns `false` if the
/// command channel closed.
async fn wait_serving_commands(
    ctx: &mut SessionContext,
    commands: &mut mpsc::Receiver<ChatCommand>,
    delay: Duration,
) -> bool {
    let sleep = tokio::time::sleep(delay);
    tokio::pin!(sleep);
    loop {
        tokio::select! {
            () = &mut sleep => return true,
            command = commands.recv() => {
                let Some(command) = command else { return false };
                apply_offline(ctx, command);
            }
        }
    }
}

async fn connect_and_run(
    config: &ClientConfig,
    ctx: &mut SessionContext,
    commands: &mut mpsc::Receiver<ChatCommand>,
) -> Result<Exit, ConnError> {
    let connect = tokio_tungstenite::connect_async(config.server.as_str());
    tokio::pin!(connect);
    let ws = loop {
        tokio::select! {
            result = &mut connect => break result?.0,
            command = commands.recv() => {
                let Some(command) = command else { return Ok(Exit::Shutdown) };
                apply_offline(ctx, command);
            }
        }
    };
    let (mut ws_tx, mut ws_rx) = ws.split();
    info!(server = %config.server, "connected to chat server");

    for frame in ctx.on_open()? {
        ws_tx.send(Message::Text(frame)).await?;
    }

    let period = Duration::from_secs(config.keepalive.interval_s);
    let mut ping_interval = interval_at(Instant::now() + period, period);

    loop {
        tokio::select! {
            msg = ws_rx.next() => {
                let msg = msg.ok_or(ConnError::Closed)??;
                match msg {
                    Message::Text(text) => ctx.handle_frame(&text),
                    Message::Ping(data) => ws_tx.send(Message::Pong(data)).await?,
                    Message::Pong(_) => debug!("pong received"),
                    Message::Close(_) => return Err(ConnError::Closed),
                    Message::Binary(data) => {
                        debug!(len = data.len(), "ignoring binary frame");
                    }
                    Message::Frame(_) => {}
                }
            }

            command = commands.recv() => {
                let Some(command) = command else {
                    let _ = ws_tx.send(Message::Close(None)).await;
                    return Ok(Exit::Shutdown);
                };
                match apply_command(ctx, command) {
                    Applied::Handled => {}
                    Applied::Transmit(outbound, reply) => {
                        if let Err(e) = ws_tx.send(Message::Text(outbound.frame)).await {
                            let _ = reply.send(Err(SendError::ConnectionLost));
                            return Err(e.into());
                        }
                        let _ = reply.send(Ok(outbound.id));
                    }
                    Applied::Reconnect => {
                        let _ = ws_tx.send(Message::Close(None)).await;
                        return Ok(Exit::Reconnect);
                    }
                }
            }

            _ = ping_interval.tick() => {
                ws_tx.send(Message::Ping(Vec::new())).await?;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventBus;
    use crate::key_exchange::PreSharedKey;
    use crate::session::ConnState;
    use chat_common::ContentClass;

    fn closed_ctx() -> SessionContext {
        let own = AddressInfo {
            ip: "192.0.2.1".into(),
            ..AddressInfo::default()
        };
        let psk = PreSharedKey::new("0123456789abcdefghijklmnopqrstuv").unwrap();
        let mut ctx = SessionContext::new(psk, own, "You", EventBus::new(16));
        ctx.begin_connect();
        ctx.on_close();
        ctx
    }

    #[tokio::test]
    async fn waiting_still_answers_commands() {
        let mut ctx = closed_ctx();
        let (tx, mut rx) = mpsc::channel(8);

        let (act_tx, act_rx) = oneshot::channel();
        tx.send(ChatCommand::Act {
            action: UserAction::Send {
                class: ContentClass::Text,
                content: "hi".into(),
            },
            reply: act_tx,
        })
        .await
        .unwrap();
        let (who_tx, who_rx) = oneshot::channel();
        tx.send(ChatCommand::WhoAmI { reply: who_tx }).await.unwrap();
        tx.send(ChatCommand::Reconnect).await.unwrap();

        let finished = wait_serving_commands(&mut ctx, &mut rx, Duration::from_millis(50)).await;

        assert!(finished);
        assert_eq!(
            act_rx.await.unwrap(),
            Err(SendError::NotReady(ConnState::Closed))
        );
        assert_eq!(who_rx.await.unwrap().unwrap().ip, "192.0.2.1");
        assert!(ctx.store().is_empty());
    }

    #[tokio::test]
    async fn waiting_stops_when_commands_close() {
        let mut ctx = closed_ctx();
        let (tx, mut rx) = mpsc::channel::<ChatCommand>(1);
        drop(tx);
        let finished = wait_serving_commands(&mut ctx, &mut rx, Duration::from_secs(60)).await;
        assert!(!finished);
    }

    #[tokio::test]
    async fn manager_returns_when_commands_close() {
        let mut config = ClientConfig::default();
        // nothing listens on the discard port
        config.server = "ws://127.0.0.1:9".to_string();
        config.reconnect.delay_ms = 20;
        let ctx = closed_ctx();
        let (tx, rx) = mpsc::channel::<ChatCommand>(1);

        let task = tokio::spawn(chat_connection_manager(Arc::new(config), ctx, rx));
        tokio::time::sleep(Duration::from_millis(60)).await;
        drop(tx);

        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("manager should stop")
            .unwrap();
    }
}
