use std::time::Duration;

use crate::{draft::Draft, MAX_PAYLOAD_READ, MAX_READ_BUFFER};

/// Default limit for an opening handshake head, 8 KiB.
pub const MAX_HANDSHAKE_SIZE: usize = 8 * 1024;

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Configuration options for a WebSocket connection.
///
/// `Options` allows users to set parameters that govern the behavior of a WebSocket connection,
/// including payload size limits, UTF-8 validation, the drafts accepted during the handshake and
/// the timeouts applied by the async adapter.
///
/// # Example
/// ```rust
/// use std::time::Duration;
/// use wscore::{Draft, Options};
///
/// let options = Options::default()
///     .with_max_payload_read(64 * 1024)
///     .with_protocols(["chat", "superchat"])
///     .with_drafts([Draft::Rfc6455, Draft::LegacyHixie])
///     .with_close_timeout(Duration::from_secs(1));
///
/// assert_eq!(options.max_read_buffer(), 128 * 1024);
/// ```
#[derive(Clone, Debug)]
pub struct Options {
    /// Maximum allowed payload size for a single incoming frame, in bytes.
    ///
    /// Default: 1 MiB (1,048,576 bytes) as defined in [`MAX_PAYLOAD_READ`]
    pub max_payload_read: Option<usize>,

    /// Maximum size allowed for the buffer that accumulates fragmented messages.
    ///
    /// Once the accumulated fragments of one message exceed this limit the connection is failed
    /// with close code 1009.
    ///
    /// Default: 2 MiB (2,097,152 bytes) as defined in [`MAX_READ_BUFFER`], or twice the
    /// configured `max_payload_read` value if that is set.
    pub max_read_buffer: Option<usize>,

    /// Flag to determine whether incoming text messages must be valid UTF-8.
    ///
    /// Default: `true`
    pub check_utf8: bool,

    /// Drafts accepted during the opening handshake, in order of preference. A client uses the
    /// first entry.
    ///
    /// Default: `[Draft::Rfc6455]`
    pub drafts: Vec<Draft>,

    /// Subprotocols offered by a client, or supported by a server.
    pub protocols: Vec<String>,

    /// Time allowed for the opening handshake before the connection is dropped.
    ///
    /// Default: 10 seconds
    pub handshake_timeout: Option<Duration>,

    /// Time allowed for the peer to answer a close frame.
    ///
    /// Default: 5 seconds
    pub close_timeout: Option<Duration>,

    /// Maximum size of an opening handshake head.
    ///
    /// Default: 8 KiB
    pub max_handshake_size: Option<usize>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            max_payload_read: None,
            max_read_buffer: None,
            check_utf8: true,
            drafts: vec![Draft::Rfc6455],
            protocols: Vec::new(),
            handshake_timeout: None,
            close_timeout: None,
            max_handshake_size: None,
        }
    }
}

impl Options {
    /// Sets the maximum allowed payload size for incoming frames.
    pub fn with_max_payload_read(self, size: usize) -> Self {
        Self {
            max_payload_read: Some(size),
            ..self
        }
    }

    /// Sets the maximum read buffer size for accumulated fragmented messages.
    pub fn with_max_read_buffer(self, size: usize) -> Self {
        Self {
            max_read_buffer: Some(size),
            ..self
        }
    }

    /// Disables UTF-8 validation of incoming text messages.
    ///
    /// Text payloads are then delivered as received; [`crate::FrameView::as_str`] still reports
    /// invalid data by returning `None`.
    pub fn without_utf8_validation(self) -> Self {
        Self {
            check_utf8: false,
            ..self
        }
    }

    /// Sets the drafts accepted during the handshake, in order of preference.
    pub fn with_drafts(self, drafts: impl IntoIterator<Item = Draft>) -> Self {
        Self {
            drafts: drafts.into_iter().collect(),
            ..self
        }
    }

    /// Sets the subprotocols offered (client) or supported (server).
    pub fn with_protocols<I, S>(self, protocols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            protocols: protocols.into_iter().map(Into::into).collect(),
            ..self
        }
    }

    pub fn with_handshake_timeout(self, timeout: Duration) -> Self {
        Self {
            handshake_timeout: Some(timeout),
            ..self
        }
    }

    pub fn with_close_timeout(self, timeout: Duration) -> Self {
        Self {
            close_timeout: Some(timeout),
            ..self
        }
    }

    pub fn with_max_handshake_size(self, size: usize) -> Self {
        Self {
            max_handshake_size: Some(size),
            ..self
        }
    }

    /// Effective per-frame payload limit.
    pub fn max_payload_read(&self) -> usize {
        self.max_payload_read.unwrap_or(MAX_PAYLOAD_READ)
    }

    /// Effective limit for one reassembled message.
    pub fn max_read_buffer(&self) -> usize {
        self.max_read_buffer.unwrap_or_else(|| {
            self.max_payload_read
                .map(|payload_read| payload_read.saturating_mul(2))
                .unwrap_or(MAX_READ_BUFFER)
        })
    }

    pub fn handshake_timeout(&self) -> Duration {
        self.handshake_timeout.unwrap_or(HANDSHAKE_TIMEOUT)
    }

    pub fn close_timeout(&self) -> Duration {
        self.close_timeout.unwrap_or(CLOSE_TIMEOUT)
    }

    pub fn max_handshake_size(&self) -> usize {
        self.max_handshake_size.unwrap_or(MAX_HANDSHAKE_SIZE)
    }

    /// The draft a client requests, [`Draft::Rfc6455`] when the list is empty.
    pub fn client_draft(&self) -> Draft {
        self.drafts.first().copied().unwrap_or(Draft::Rfc6455)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = Options::default();
        assert_eq!(options.max_payload_read(), MAX_PAYLOAD_READ);
        assert_eq!(options.max_read_buffer(), MAX_READ_BUFFER);
        assert!(options.check_utf8);
        assert_eq!(options.drafts, vec![Draft::Rfc6455]);
        assert_eq!(options.handshake_timeout(), Duration::from_secs(10));
        assert_eq!(options.close_timeout(), Duration::from_secs(5));
        assert_eq!(options.max_handshake_size(), MAX_HANDSHAKE_SIZE);
    }

    #[test]
    fn test_read_buffer_follows_payload_limit() {
        let options = Options::default().with_max_payload_read(1000);
        assert_eq!(options.max_read_buffer(), 2000);

        let options = options.with_max_read_buffer(1500);
        assert_eq!(options.max_read_buffer(), 1500);
    }

    #[test]
    fn test_builder_methods() {
        let options = Options::default()
            .without_utf8_validation()
            .with_protocols(["chat"])
            .with_drafts([Draft::LegacyHixie])
            .with_handshake_timeout(Duration::from_millis(250));

        assert!(!options.check_utf8);
        assert_eq!(options.protocols, vec!["chat".to_string()]);
        assert_eq!(options.client_draft(), Draft::LegacyHixie);
        assert_eq!(options.handshake_timeout(), Duration::from_millis(250));

        assert_eq!(
            Options::default().with_drafts([]).client_draft(),
            Draft::Rfc6455
        );
    }
}
