//! Transport seam
//!
//! The send loop never touches a socket. A [`Transport`] accepts one attempt
//! at a time and says whether it was acknowledged on the spot or whether the
//! outcome will be reported later as a [`TransportEvent`].

use bytes::Bytes;
use thiserror::Error;

/// Result of handing a payload to the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransmitStatus {
    /// Acknowledged synchronously
    Delivered,
    /// Ack or close will arrive later (or never)
    Pending,
}

/// Asynchronous notification from the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportEvent {
    /// The peer acknowledged the outstanding attempt
    Ack,
    /// The peer closed the connection
    Closed,
}

/// Transport errors
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Peer closed the connection")]
    Closed,

    #[error("Payload of {size} bytes exceeds the transport limit of {max}")]
    PayloadTooLarge { size: usize, max: usize },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Something that can attempt to deliver one payload
pub trait Transport {
    /// Attempt to send `payload`
    fn attempt_send(&mut self, payload: &Bytes) -> Result<TransmitStatus, TransportError>;
}

impl<T: Transport + ?Sized> Transport for &mut T {
    fn attempt_send(&mut self, payload: &Bytes) -> Result<TransmitStatus, TransportError> {
        (**self).attempt_send(payload)
    }
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn attempt_send(&mut self, payload: &Bytes) -> Result<TransmitStatus, TransportError> {
        (**self).attempt_send(payload)
    }
}
