use crate::protocol::{Request, Response, frame_codec};
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use shared::TtlMs;
use sqlkv::{Client, ValueOption};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio_util::codec::Framed;
use tracing::{debug, error};

pub async fn process_connection(
    socket: TcpStream,
    client: Arc<Client>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    socket.set_nodelay(true).ok();

    let mut framed = Framed::new(socket, frame_codec());

    while let Some(frame_result) = framed.next().await {
        let frame = frame_result?;

        let response = match Request::decode(frame.freeze()) {
            Ok(request) => {
                debug!("Received request: {:?}", request);
                handle_request(&client, request).await
            }
            Err(e) => {
                error!("Failed to decode request: {}", e);
                Response::Error { msg: e }
            }
        };

        framed.send(response.encode()).await?;
    }

    Ok(())
}

/// Runs one request against the client. Values cross the wire as JSON text.
pub async fn handle_request(client: &Client, request: Request) -> Response {
    match request {
        Request::Ping => Response::Pong,

        Request::Keys => match client.keys().await {
            Ok(keys) => Response::Keys { keys },
            Err(e) => Response::Error {
                msg: format!("Keys failed: {}", e),
            },
        },

        Request::Get { key } => match client.get::<serde_json::Value>(&key).await {
            Ok(got) => match got.value {
                Some(value) => match serde_json::to_vec(&value) {
                    Ok(bytes) => Response::Value {
                        value: Bytes::from(bytes),
                    },
                    Err(e) => Response::Error {
                        msg: format!("Get failed: {}", e),
                    },
                },
                None => Response::NotFound,
            },
            Err(e) => Response::Error {
                msg: format!("Get failed: {}", e),
            },
        },

        Request::Set { key, value, ttl_ms } => {
            let value: serde_json::Value = match serde_json::from_slice(&value) {
                Ok(value) => value,
                Err(e) => {
                    return Response::Error {
                        msg: format!("Set failed: value is not JSON: {}", e),
                    };
                }
            };

            let mut option = ValueOption::new();
            if let Some(ttl) = ttl_ms {
                option = option.with_ttl(TtlMs(ttl));
            }

            match client.set(&key, &value, option).await {
                Ok(()) => Response::Ok,
                Err(e) => Response::Error {
                    msg: format!("Set failed: {}", e),
                },
            }
        }

        Request::Del { key } => match client.del(&key).await {
            Ok(resp) if resp.deleted => Response::Ok,
            Ok(_) => Response::NotFound,
            Err(e) => Response::Error {
                msg: format!("Del failed: {}", e),
            },
        },

        Request::Refresh => match client.refresh().await {
            Ok(()) => Response::Ok,
            Err(e) => Response::Error {
                msg: format!("Refresh failed: {}", e),
            },
        },
    }
}
