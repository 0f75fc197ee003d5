//! Frontend implementations for the check execution engine (spec §4.F, §6.4).
//!
//! `visor-engine::bus::Frontend` is the seam; this crate supplies the one
//! normative external format (NDJSON, spec §6.4) plus stub adapters for the
//! richer surfaces (GitHub PR comments, a TUI) that are out of scope here but
//! still need a place to subscribe once those surfaces are built.

pub mod ndjson;
pub mod stub;

pub use ndjson::NdjsonFrontend;
pub use stub::{GithubCommentFrontend, TuiFrontend};
