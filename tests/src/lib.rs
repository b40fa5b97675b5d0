//! Conformance test crate; all tests live under `conformance/`.
