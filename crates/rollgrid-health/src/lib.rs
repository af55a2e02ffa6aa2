//! rollgrid-health — is the freshly started binary serving?
//!
//! A target is healthy when `GET http://<endpoint>/healthz` answers with
//! a body that is exactly `ok` once surrounding whitespace is trimmed.
//! The status code is not consulted.
//!
//! `HealthProbe` is the seam the rollout polls through; `HttpHealthProbe`
//! is the real implementation.

pub mod checker;

pub use checker::{http_check, http_probe, HealthProbe, HttpHealthProbe, ProbeFuture, ProbeResult, HEALTHY_BODY};
