// SPDX-FileCopyrightText: 2026 Vela Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Query classification for the Vela dispatcher.
//!
//! [`Classifier`] runs a fixed cascade of deterministic reflex patterns,
//! length heuristics, and an optional embedding-based prototype stage,
//! and returns a [`vela_core::RoutingDecision`] for every query.

pub mod classifier;
pub mod patterns;
pub mod semantic;

pub use classifier::{Classifier, category};
pub use patterns::{ReflexPatterns, normalize};
pub use semantic::{SemanticMatch, SemanticStage, cosine_similarity};
