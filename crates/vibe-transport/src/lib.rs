//! Vibe Transport Layer
//!
//! HTTP transports that carry a Vibe socket's bytes:
//! - [`LongPollTransport`]: back-to-back short `GET` requests
//! - [`StreamTransport`]: one persistent `GET` with `data: ...\n\n` records
//!
//! Both adapt raw HTTP exchanges to the uniform [`Transport`] contract and
//! report what happens through a channel of [`TransportEvent`]s
//! (open/text/binary/error/close). The socket layer consumes those events
//! without knowing which transport produced them.

mod base;
pub mod config;
pub mod error;
pub mod framing;
pub mod longpoll;
pub mod stream;
pub mod transport;

use std::sync::Arc;

use url::Url;

pub use config::HttpConfig;
pub use error::TransportError;
pub use framing::RecordDecoder;
pub use longpoll::{BodyKind, LongPollTransport};
pub use stream::StreamTransport;
pub use transport::{Payload, Transport, TransportEvent, TransportEvents};

/// Create the transport named by the `transport` query parameter of `uri`.
///
/// The returned transport is not connected yet; call
/// [`Transport::connect`] once the events receiver has a consumer.
pub fn open(
    uri: &str,
    client: reqwest::Client,
) -> Result<(Arc<dyn Transport>, TransportEvents), TransportError> {
    let url = Url::parse(uri)?;
    let kind = url
        .query_pairs()
        .find(|(name, _)| name == base::TRANSPORT_PARAM)
        .map(|(_, value)| value.into_owned());

    match kind.as_deref() {
        Some(longpoll::TRANSPORT_NAME) => {
            let (transport, events) = LongPollTransport::new(uri, client)?;
            Ok((Arc::new(transport), events))
        }
        Some(stream::TRANSPORT_NAME) => {
            let (transport, events) = StreamTransport::new(uri, client)?;
            Ok((Arc::new(transport), events))
        }
        _ => Err(TransportError::UnsupportedUri {
            uri: uri.to_string(),
            expected: "longpoll or stream",
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn open_rejects_unknown_transport() {
        let err = open("http://localhost/vibe?transport=ws", reqwest::Client::new()).err();
        assert!(matches!(err, Some(TransportError::UnsupportedUri { .. })));
    }

    #[tokio::test]
    async fn open_picks_transport_from_query() {
        let (transport, _events) =
            open("http://localhost/vibe?transport=stream", reqwest::Client::new()).unwrap();
        assert_eq!(transport.uri(), "http://localhost/vibe?transport=stream");
        assert!(transport.id().is_none());
    }
}
