// ── Bus transport seam ──
//
// The core never owns a network connection. Whatever carries messages to
// the zigbee2mqtt broker implements `BusTransport`; tests use an
// in-memory recorder.

use thiserror::Error;

/// Failures surfaced by a bus transport's publish primitive.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("not connected to the message bus")]
    NotConnected,

    #[error("outbound buffer full")]
    Busy,

    #[error("publish to {topic} failed: {reason}")]
    Publish { topic: String, reason: String },
}

/// Outbound half of the message bus.
///
/// `publish` must return promptly; implementations hand the payload to
/// their own I/O machinery instead of waiting on the network.
pub trait BusTransport: Send + Sync {
    fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), TransportError>;
}

#[cfg(test)]
pub(crate) mod memory {
    use std::sync::Mutex;

    use super::{BusTransport, TransportError};

    /// Records every publish. Optionally fails all of them.
    #[derive(Default)]
    pub(crate) struct RecordingTransport {
        pub(crate) published: Mutex<Vec<(String, String)>>,
        pub(crate) fail: bool,
    }

    impl RecordingTransport {
        pub(crate) fn failing() -> Self {
            Self {
                fail: true,
                ..Self::default()
            }
        }

        #[allow(clippy::unwrap_used)]
        pub(crate) fn taken(&self) -> Vec<(String, String)> {
            std::mem::take(&mut *self.published.lock().unwrap())
        }
    }

    impl BusTransport for RecordingTransport {
        #[allow(clippy::unwrap_used)]
        fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), TransportError> {
            if self.fail {
                return Err(TransportError::NotConnected);
            }
            self.published.lock().unwrap().push((
                topic.to_owned(),
                String::from_utf8_lossy(payload).into_owned(),
            ));
            Ok(())
        }
    }
}
