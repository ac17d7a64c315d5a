//! Ambiguity resolution for fill ratios inside the ambiguous band.
//!
//! An external classification capability (a remote model, typically) can be
//! injected behind the `ExternalClassifier` trait; every call is bounded by
//! a timeout and any failure mode collapses to abstention, so grading never
//! depends on network availability for correctness.

use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use log::warn;
use omr_grade_core::GrayImage;
use thiserror::Error;

use crate::marks::MarkParams;

#[derive(Debug, Error)]
pub enum ClassifyError {
    #[error("external classifier failed: {0}")]
    Failed(String),
}

/// Region handed to the external capability.
#[derive(Clone, Debug)]
pub struct ClassifyRequest {
    /// Cropped bubble neighbourhood from the normalized image.
    pub region: GrayImage,
    /// Measured fill ratio of the candidate, 0..=100.
    pub fill_ratio: f32,
    /// Candidate option alphabet.
    pub alphabet: Vec<char>,
    /// The option the candidate maps to on the template.
    pub suggested: char,
}

/// Injected classification capability. `Ok(None)` means the capability
/// abstains.
pub trait ExternalClassifier: Send + Sync {
    fn classify(&self, request: &ClassifyRequest) -> Result<Option<char>, ClassifyError>;
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Resolution {
    Accepted(char),
    Abstained,
}

/// Resolves ambiguous-band candidates, either through an injected external
/// classifier (timeout-bounded) or a deterministic local fallback.
pub struct AmbiguityResolver {
    classifier: Option<Arc<dyn ExternalClassifier>>,
    timeout: Duration,
    band_midpoint: f32,
}

impl AmbiguityResolver {
    /// Local-fallback-only resolver.
    pub fn local(params: &MarkParams) -> Self {
        Self {
            classifier: None,
            timeout: Duration::from_secs(5),
            band_midpoint: 0.5 * (params.ambiguous_low + params.marked_threshold),
        }
    }

    /// Resolver delegating to an external capability, bounded by `timeout`.
    pub fn with_classifier(
        params: &MarkParams,
        classifier: Arc<dyn ExternalClassifier>,
        timeout: Duration,
    ) -> Self {
        Self {
            classifier: Some(classifier),
            timeout,
            band_midpoint: 0.5 * (params.ambiguous_low + params.marked_threshold),
        }
    }

    /// Resolve one ambiguous candidate. Never blocks past the configured
    /// timeout; a timeout is an abstention.
    pub fn resolve(&self, request: ClassifyRequest) -> Resolution {
        match &self.classifier {
            Some(classifier) => self.resolve_external(classifier.clone(), request),
            None => self.resolve_local(&request),
        }
    }

    /// Nearest-threshold heuristic: a fill at or past the band midpoint is
    /// closer to "marked" than to "unmarked" and keeps the mapped option.
    fn resolve_local(&self, request: &ClassifyRequest) -> Resolution {
        if request.fill_ratio >= self.band_midpoint {
            Resolution::Accepted(request.suggested)
        } else {
            Resolution::Abstained
        }
    }

    fn resolve_external(
        &self,
        classifier: Arc<dyn ExternalClassifier>,
        request: ClassifyRequest,
    ) -> Resolution {
        let alphabet = request.alphabet.clone();
        let (tx, rx) = mpsc::channel();
        // The call runs on a helper thread; if it outlives the timeout the
        // thread is abandoned and its result discarded.
        thread::spawn(move || {
            let _ = tx.send(classifier.classify(&request));
        });

        match rx.recv_timeout(self.timeout) {
            Ok(Ok(Some(option))) => {
                let up = option.to_ascii_uppercase();
                if alphabet.contains(&up) {
                    Resolution::Accepted(up)
                } else {
                    warn!("external classifier returned unknown option {option:?}");
                    Resolution::Abstained
                }
            }
            Ok(Ok(None)) => Resolution::Abstained,
            Ok(Err(err)) => {
                warn!("external classifier error: {err}");
                Resolution::Abstained
            }
            Err(_) => {
                warn!("external classifier timed out after {:?}", self.timeout);
                Resolution::Abstained
            }
        }
    }
}
