//! Public entry points pairing two endpoints into relays.

use std::io::{Error as IoError, ErrorKind as IoErrorKind, Result as IoResult};

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::bridge::{Bridge, StatsFn};
use crate::endpoint::Endpoint;

/// Relay `src` into `dst` until end of stream or peer failure.
///
/// Pre-read leftover bytes on `src` are delivered first. Peer resets are
/// handled as half-closes and do not surface as errors; only resource and
/// descriptor failures do. Returns the number of bytes delivered to `dst`.
pub async fn bridge_one_direction(src: &mut Endpoint, dst: &Endpoint) -> IoResult<u64> {
    let leftover = src.take_leftover();
    Bridge::new(src, dst, leftover, None)?.run().await
}

/// Full-duplex relay between two endpoints.
///
/// Both directions run concurrently, each with its own pipe; the call
/// completes once both are done. One direction finishing early (half-close)
/// leaves the other running. Returns the bytes delivered in each direction,
/// `(a_to_b, b_to_a)`.
pub async fn bridge_duplex(a: &mut Endpoint, b: &mut Endpoint) -> IoResult<(u64, u64)> {
    let a_leftover = a.take_leftover();
    let b_leftover = b.take_leftover();
    let a_to_b = Bridge::new(a, b, a_leftover, None)?;
    let b_to_a = Bridge::new(b, a, b_leftover, None)?;
    tokio::try_join!(a_to_b.run(), b_to_a.run())
}

/// Owning duplex relay with the knobs the free functions do not expose:
/// cancellation and per-direction statistics callbacks.
pub struct DuplexBridge {
    a: Endpoint,
    b: Endpoint,
    cancellation_token: Option<CancellationToken>,
    stats_a_to_b: Option<StatsFn>,
    stats_b_to_a: Option<StatsFn>,
}

impl DuplexBridge {
    pub fn new(a: Endpoint, b: Endpoint) -> Self {
        Self {
            a,
            b,
            cancellation_token: None,
            stats_a_to_b: None,
            stats_b_to_a: None,
        }
    }

    /// Set cancellation token for external shutdown. Cancellation closes the
    /// pipes and drops the registrations; the endpoints themselves stay open.
    pub fn cancellation_token(mut self, token: CancellationToken) -> Self {
        self.cancellation_token = Some(token);
        self
    }

    /// Set per-direction statistics callbacks, invoked with each chunk
    /// delivered to the respective destination.
    pub fn with_stats<F1, F2>(mut self, a_to_b: F1, b_to_a: F2) -> Self
    where
        F1: FnMut(usize) + Send + 'static,
        F2: FnMut(usize) + Send + 'static,
    {
        self.stats_a_to_b = Some(Box::new(a_to_b));
        self.stats_b_to_a = Some(Box::new(b_to_a));
        self
    }

    /// Get the endpoints back without running (consumes self).
    pub fn into_endpoints(self) -> (Endpoint, Endpoint) {
        (self.a, self.b)
    }

    /// Run both directions to completion.
    /// Returns the bytes delivered in each direction, `(a_to_b, b_to_a)`.
    pub async fn run(mut self) -> IoResult<(u64, u64)> {
        let a_leftover = self.a.take_leftover();
        let b_leftover = self.b.take_leftover();
        let a_to_b = Bridge::new(&self.a, &self.b, a_leftover, self.stats_a_to_b.take())?;
        let b_to_a = Bridge::new(&self.b, &self.a, b_leftover, self.stats_b_to_a.take())?;
        let relay = async move { tokio::try_join!(a_to_b.run(), b_to_a.run()) };

        match self.cancellation_token.take() {
            Some(token) => {
                tokio::select! {
                    result = relay => result,
                    _ = token.cancelled() => {
                        debug!("duplex bridge cancelled");
                        Err(IoError::new(
                            IoErrorKind::Interrupted,
                            "duplex bridge was cancelled",
                        ))
                    }
                }
            }
            None => relay.await,
        }
    }
}
