// SPDX-FileCopyrightText: Copyright © 2024-2026 The Bob Authors
//
// SPDX-License-Identifier: MPL-2.0

//! The build scheduler/runner (spec.md §4.4): ties the step graph, the
//! artifact cache, and the shared-package store together into the engine
//! that actually drives a build. Also carries the small ambient pieces
//! (version/platform constants, job-server, cancellation) the rest of the
//! crates don't own individually.

pub mod buildinfo;
pub mod download;
pub mod jobserver;
pub mod scheduler;
pub mod status;

pub use download::{Attempt, DownloadError, DownloadPolicy, LayerOverride};
pub use jobserver::{JobServer, JobServerKind, Token};
pub use scheduler::{audit_input_refs, Engine, EngineConfig, EngineError, ScheduledStep, StepOutcome, StepRunner};
pub use status::{StatusError, StatusStore, StepStatus};
