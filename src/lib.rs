//! gardo: access control enforcement.
//!
//! Rate limiting, session/device trust, and MFA verification throttling for
//! identity services. The enforcement logic lives in [`enforce`]; [`api`]
//! exposes it over HTTP and [`cli`] wires up configuration and telemetry.

pub mod api;
pub mod cli;
pub mod enforce;
