//! Outbound WebSocket connections to upstream services

use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::retry::is_auth_failure;
use crate::{Error, Result};

/// Client-side WebSocket stream
pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Open a WebSocket, optionally with extra request headers
///
/// A 401/403 during the upgrade becomes [`Error::Auth`] so callers can
/// stop retrying.
///
/// # Errors
///
/// Returns error if the URL is invalid or the handshake fails
pub async fn connect(url: &str, headers: &[(&'static str, String)]) -> Result<WsStream> {
    let mut request = url
        .into_client_request()
        .map_err(|e| Error::Config(format!("invalid WebSocket URL {url}: {e}")))?;

    for (name, value) in headers {
        let value = HeaderValue::from_str(value)
            .map_err(|e| Error::Config(format!("invalid {name} header: {e}")))?;
        request.headers_mut().insert(*name, value);
    }

    match tokio_tungstenite::connect_async(request).await {
        Ok((stream, _response)) => Ok(stream),
        Err(tungstenite::Error::Http(response)) if is_auth_failure(response.status().as_u16()) => {
            Err(Error::Auth(format!(
                "upstream rejected credentials ({})",
                response.status()
            )))
        }
        Err(e) => Err(e.into()),
    }
}

/// Serialize `value` into a text frame
///
/// # Errors
///
/// Returns error if serialization fails
pub fn json_message<T: serde::Serialize>(value: &T) -> Result<Message> {
    Ok(Message::Text(serde_json::to_string(value)?.into()))
}
