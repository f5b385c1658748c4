//! Per-connection handler: identify, join, then shuttle commands and deltas.

use std::net::SocketAddr;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::broadcast;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use swatch_common::errors::CommandError;
use swatch_sync::content::ContentSelection;
use swatch_sync::protocol::{Command, ParticipantProfile};
use swatch_sync::registry::{RoomHandle, RoomRegistry};

use crate::protocol::{ClientFrame, ClientHello, ServerFrame};

type WsSink = futures_util::stream::SplitSink<
    tokio_tungstenite::WebSocketStream<tokio::net::TcpStream>,
    Message,
>;
type WsStream =
    futures_util::stream::SplitStream<tokio_tungstenite::WebSocketStream<tokio::net::TcpStream>>;

/// Handle a single WebSocket connection for its whole lifetime.
pub async fn handle_connection(
    ws: tokio_tungstenite::WebSocketStream<tokio::net::TcpStream>,
    addr: SocketAddr,
    registry: RoomRegistry,
) {
    let (mut sink, mut stream) = ws.split();

    // 1. The first frame names the room and the participant.
    let Some((room_id, participant)) = read_hello(&mut stream, addr).await else {
        return;
    };
    let participant_id = participant.id.clone();

    // 2. Join the room; subscribe before applying so no delta slips past.
    let handle = registry.room(&room_id).await;
    let mut deltas = handle.subscribe();
    if let Err(err) = handle.apply(Command::Join { participant }).await {
        let _ = send_frame(
            &mut sink,
            &ServerFrame::Error {
                message: err.to_string(),
            },
        )
        .await;
        return;
    }

    // 3. Welcome the client with full state plus the log so far.
    let welcome = match handle.snapshot().await {
        Ok(snapshot) => {
            let events = handle.events_since(0).await.unwrap_or_default();
            ServerFrame::Welcome { snapshot, events }
        }
        Err(err) => {
            let _ = send_frame(
                &mut sink,
                &ServerFrame::Error {
                    message: err.to_string(),
                },
            )
            .await;
            return;
        }
    };
    if send_frame(&mut sink, &welcome).await.is_err() {
        let _ = leave(&handle, &participant_id).await;
        return;
    }

    info!(
        peer = %addr,
        room_id = %room_id,
        participant_id = %participant_id,
        "participant connected"
    );

    // 4. Shuttle loop.
    loop {
        tokio::select! {
            delta = deltas.recv() => match delta {
                Ok(delta) => {
                    if send_frame(&mut sink, &ServerFrame::Delta { delta }).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    // The client still has CatchUp; just flag the gap.
                    warn!(peer = %addr, skipped, "delta subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },

            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    if !handle_frame(&text, &handle, &participant_id, &mut sink).await {
                        break;
                    }
                }
                Some(Ok(Message::Ping(data))) => {
                    // A live socket is as good as an explicit heartbeat.
                    let _ = sink.send(Message::Pong(data)).await;
                    let _ = handle
                        .apply(Command::Heartbeat {
                            participant_id: participant_id.clone(),
                        })
                        .await;
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Err(err)) => {
                    debug!(peer = %addr, error = %err, "WS error");
                    break;
                }
                _ => {}
            }
        }
    }

    // 5. Cleanup: a closed socket is a departure.
    let _ = leave(&handle, &participant_id).await;
    info!(
        peer = %addr,
        room_id = %room_id,
        participant_id = %participant_id,
        "participant disconnected"
    );
}

/// Process one text frame. Returns false when the socket is done for.
async fn handle_frame(
    text: &str,
    handle: &RoomHandle,
    participant_id: &str,
    sink: &mut WsSink,
) -> bool {
    let frame = match serde_json::from_str::<ClientFrame>(text) {
        Ok(frame) => frame,
        Err(err) => {
            return send_frame(
                sink,
                &ServerFrame::Error {
                    message: format!("bad frame: {err}"),
                },
            )
            .await
            .is_ok();
        }
    };

    let outcome = match frame {
        ClientFrame::Command { command } => {
            if command.issuer() != participant_id {
                Err(CommandError::NotAuthorized(
                    "command issuer does not match connection identity".into(),
                ))
            } else {
                handle.apply(command).await.map(|_| None)
            }
        }
        ClientFrame::LoadUrl {
            participant_id: issuer,
            url,
        } => {
            if issuer != participant_id {
                Err(CommandError::NotAuthorized(
                    "command issuer does not match connection identity".into(),
                ))
            } else {
                match ContentSelection::from_url(&url) {
                    Ok(selection) => handle
                        .apply(Command::LoadContent {
                            participant_id: issuer,
                            selection,
                        })
                        .await
                        .map(|_| None),
                    Err(err) => Err(CommandError::from(err)),
                }
            }
        }
        ClientFrame::CatchUp { after_seq } => handle.events_since(after_seq).await.map(Some),
    };

    match outcome {
        // Deltas reach this client through the broadcast subscription.
        Ok(None) => true,
        Ok(Some(events)) => send_frame(sink, &ServerFrame::Events { events })
            .await
            .is_ok(),
        Err(err) => send_frame(
            sink,
            &ServerFrame::Error {
                message: err.to_string(),
            },
        )
        .await
        .is_ok(),
    }
}

async fn leave(handle: &RoomHandle, participant_id: &str) -> Result<(), CommandError> {
    handle
        .apply(Command::Leave {
            participant_id: participant_id.to_string(),
        })
        .await
        .map(|_| ())
}

/// Read and parse the first message as a hello.
async fn read_hello(
    stream: &mut WsStream,
    addr: SocketAddr,
) -> Option<(String, ParticipantProfile)> {
    // Wait up to 10 seconds for the hello message.
    let frame = tokio::time::timeout(std::time::Duration::from_secs(10), stream.next()).await;

    match frame {
        Ok(Some(Ok(Message::Text(text)))) => match serde_json::from_str::<ClientHello>(&text) {
            Ok(ClientHello::Join {
                room_id,
                participant,
            }) => Some((room_id, participant)),
            Err(err) => {
                warn!(peer = %addr, error = %err, "invalid hello message");
                None
            }
        },
        Ok(Some(Ok(_))) => {
            warn!(peer = %addr, "expected text hello, got binary");
            None
        }
        Ok(Some(Err(err))) => {
            warn!(peer = %addr, error = %err, "WS error during hello");
            None
        }
        Ok(None) => {
            debug!(peer = %addr, "connection closed before hello");
            None
        }
        Err(_) => {
            warn!(peer = %addr, "hello timeout (10s)");
            None
        }
    }
}

/// Send a ServerFrame as a JSON text frame.
async fn send_frame(
    sink: &mut WsSink,
    frame: &ServerFrame,
) -> Result<(), tokio_tungstenite::tungstenite::Error> {
    let json = serde_json::to_string(frame).unwrap();
    sink.send(Message::Text(json.into())).await
}
