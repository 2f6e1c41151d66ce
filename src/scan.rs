//! Time-bounded discovery passes with retry on transient disconnects.

use crate::advertisement::Advertisement;
use crate::radio::{RadioError, RadioStack, ScanEvent};
use std::time::Duration;
use thiserror::Error;

/// Errors that abort a scan.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScanError {
    /// Non-transient radio failure
    #[error("scan failed: {0}")]
    Fatal(String),
    /// The retry cap was reached while the link kept dropping
    #[error("scan gave up after {attempts} attempts interrupted by disconnects")]
    RetriesExhausted { attempts: u32 },
}

impl From<RadioError> for ScanError {
    fn from(err: RadioError) -> Self {
        ScanError::Fatal(err.to_string())
    }
}

/// One discovery pass over the radio.
pub struct ScanSession<'a> {
    radio: &'a dyn RadioStack,
    duration: Duration,
    max_retries: Option<u32>,
}

impl<'a> ScanSession<'a> {
    /// Create a session scanning for `duration`.
    ///
    /// A pass interrupted by a disconnect is restarted from scratch, at most
    /// `max_retries` times (forever when `None`).
    pub fn new(radio: &'a dyn RadioStack, duration: Duration, max_retries: Option<u32>) -> Self {
        ScanSession {
            radio,
            duration,
            max_retries,
        }
    }

    /// Run the pass and return one advertisement per address, in the order
    /// addresses were first seen, carrying the latest data received.
    pub async fn scan(&self) -> Result<Vec<Advertisement>, ScanError> {
        let mut retries = 0u32;

        let events = loop {
            match self.radio.start_discovery(self.duration).await {
                Ok(events) => break events,
                Err(e) if e.is_transient() => {
                    if self.max_retries.is_some_and(|max| retries >= max) {
                        return Err(ScanError::RetriesExhausted {
                            attempts: retries + 1,
                        });
                    }
                    retries += 1;
                    tracing::warn!(error = %e, retry = retries, "scan interrupted, retrying");
                }
                Err(e) => return Err(e.into()),
            }
        };

        Ok(collect_advertisements(events))
    }
}

fn collect_advertisements(events: Vec<ScanEvent>) -> Vec<Advertisement> {
    let mut ads: Vec<Advertisement> = Vec::new();

    for event in events {
        let ad = event.into_advertisement();
        match ads.iter_mut().find(|known| known.address == ad.address) {
            Some(known) => *known = ad,
            None => ads.push(ad),
        }
    }

    ads
}
