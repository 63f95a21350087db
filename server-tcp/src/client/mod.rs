use crate::protocol::{Request, Response, frame_codec};
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use shared::{Error, Result};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio_util::codec::{Framed, LengthDelimitedCodec};

/// Client side of the TCP protocol over a single connection.
///
/// Requests are sent one at a time; each call waits for its response.
pub struct TcpClient {
    framed: Framed<TcpStream, LengthDelimitedCodec>,
}

fn transport(err: impl std::fmt::Display) -> Error {
    Error::Internal(format!("transport: {}", err))
}

fn unexpected(response: Response) -> Error {
    match response {
        Response::Error { msg } => Error::Internal(msg),
        other => Error::Internal(format!("unexpected response: {:?}", other)),
    }
}

impl TcpClient {
    pub async fn connect(addr: impl ToSocketAddrs) -> Result<Self> {
        let stream = TcpStream::connect(addr).await.map_err(transport)?;
        stream.set_nodelay(true).map_err(transport)?;
        Ok(Self {
            framed: Framed::new(stream, frame_codec()),
        })
    }

    async fn call(&mut self, request: Request) -> Result<Response> {
        self.send_raw(request.encode()).await
    }

    pub async fn ping(&mut self) -> Result<()> {
        match self.call(Request::Ping).await? {
            Response::Pong => Ok(()),
            other => Err(unexpected(other)),
        }
    }

    pub async fn keys(&mut self) -> Result<Vec<String>> {
        match self.call(Request::Keys).await? {
            Response::Keys { keys } => Ok(keys),
            other => Err(unexpected(other)),
        }
    }

    pub async fn get(&mut self, key: &str) -> Result<Option<serde_json::Value>> {
        let request = Request::Get {
            key: key.to_string(),
        };
        match self.call(request).await? {
            Response::Value { value } => serde_json::from_slice(&value)
                .map(Some)
                .map_err(|e| Error::Codec(e.to_string())),
            Response::NotFound => Ok(None),
            other => Err(unexpected(other)),
        }
    }

    pub async fn set(
        &mut self,
        key: &str,
        value: &serde_json::Value,
        ttl_ms: Option<u64>,
    ) -> Result<()> {
        let value = serde_json::to_vec(value).map_err(|e| Error::Codec(e.to_string()))?;
        let request = Request::Set {
            key: key.to_string(),
            value: Bytes::from(value),
            ttl_ms,
        };
        match self.call(request).await? {
            Response::Ok => Ok(()),
            other => Err(unexpected(other)),
        }
    }

    /// Returns whether a live row was deleted.
    pub async fn del(&mut self, key: &str) -> Result<bool> {
        let request = Request::Del {
            key: key.to_string(),
        };
        match self.call(request).await? {
            Response::Ok => Ok(true),
            Response::NotFound => Ok(false),
            other => Err(unexpected(other)),
        }
    }

    pub async fn refresh(&mut self) -> Result<()> {
        match self.call(Request::Refresh).await? {
            Response::Ok => Ok(()),
            other => Err(unexpected(other)),
        }
    }

    /// Sends a raw frame and returns the decoded response.
    pub async fn send_raw(&mut self, frame: Bytes) -> Result<Response> {
        self.framed.send(frame).await.map_err(transport)?;
        match self.framed.next().await {
            Some(frame) => {
                let frame = frame.map_err(transport)?;
                Response::decode(frame.freeze()).map_err(transport)
            }
            None => Err(transport("connection closed by server")),
        }
    }
}
