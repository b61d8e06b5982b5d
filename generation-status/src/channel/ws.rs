//! WebSocket push channel

use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use std::time::Duration;
use tokio_tungstenite::{connect_async, tungstenite::Message};

use crate::error::ChannelError;

/// Text frames of an open push channel; ends when the channel closes
pub type MessageStream = BoxStream<'static, Result<String, ChannelError>>;

#[async_trait]
pub trait PushConnector: Send + Sync {
    /// Open the channel at `path` (already keyed by the client id)
    async fn connect(&self, path: &str) -> Result<MessageStream, ChannelError>;
}

/// tokio-tungstenite connector against one WebSocket base URL
#[derive(Debug, Clone)]
pub struct WsConnector {
    ws_base_url: String,
    timeout: Duration,
}

impl WsConnector {
    pub fn new(ws_base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            ws_base_url: ws_base_url.into().trim_end_matches('/').to_string(),
            timeout,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}/{}", self.ws_base_url, path.trim_start_matches('/'))
    }
}

#[async_trait]
impl PushConnector for WsConnector {
    async fn connect(&self, path: &str) -> Result<MessageStream, ChannelError> {
        let url = self.url(path);
        let (ws_stream, _) = tokio::time::timeout(self.timeout, connect_async(url.as_str()))
            .await
            .map_err(|_| ChannelError::Timeout)?
            .map_err(|e| ChannelError::Connect(e.to_string()))?;

        tracing::debug!(url = %url, "push channel open");

        let frames = ws_stream
            .take_while(|frame| futures::future::ready(!matches!(frame, Ok(Message::Close(_)))))
            .filter_map(|frame| async move {
                match frame {
                    Ok(Message::Text(text)) => Some(Ok(text.to_string())),
                    Ok(Message::Binary(bytes)) => Some(
                        String::from_utf8(bytes.to_vec())
                            .map_err(|e| ChannelError::Protocol(e.to_string())),
                    ),
                    Ok(_) => None,
                    Err(e) => Some(Err(ChannelError::Protocol(e.to_string()))),
                }
            });

        Ok(frames.boxed())
    }
}
