// This file is part of Psdpile.
// Copyright (C) 2022-2023 Calle Laakkonen
//
// Psdpile is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// As additional permission under section 7, you are allowed to distribute
// the software through an app store, even if that store has restrictive
// terms and conditions that are incompatible with the GPL, provided that
// the source is also available under the GPL with or without this permission
// through a channel without those restrictive terms and conditions.
//
// Psdpile is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with Psdpile.  If not, see <https://www.gnu.org/licenses/>.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::{CompositeError, CompositeResult};

/// Cooperative cancellation flag shared between a host and the worker
/// pools. Long running operations poll it between layers and between
/// tiles.
#[derive(Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> CancelToken {
        CancelToken::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}

/// Shared coordination state for a batch of scoped workers: the mutex
/// guarding the result collection, a first-error slot and the abort
/// flag the workers poll.
///
/// The thread join itself is handled by `std::thread::scope`; `finish`
/// is called after the scope ends and reports cancellation or the first
/// recorded worker error.
pub(crate) struct ParallelContext<'t, R> {
    token: Option<&'t CancelToken>,
    failed: AtomicBool,
    error: Mutex<Option<CompositeError>>,
    results: Mutex<R>,
}

impl<'t, R> ParallelContext<'t, R> {
    pub fn new(token: Option<&'t CancelToken>, results: R) -> Self {
        ParallelContext {
            token,
            failed: AtomicBool::new(false),
            error: Mutex::new(None),
            results: Mutex::new(results),
        }
    }

    pub fn token(&self) -> Option<&'t CancelToken> {
        self.token
    }

    /// True once any worker has failed or the host cancelled.
    pub fn aborted(&self) -> bool {
        self.failed.load(Ordering::Relaxed)
            || self.token.map_or(false, |t| t.is_cancelled())
    }

    /// Record a worker error. Only the first error is kept.
    pub fn record(&self, err: CompositeError) {
        if !self.failed.swap(true, Ordering::Relaxed) {
            *self.error.lock().unwrap() = Some(err);
        }
    }

    pub fn lock_results(&self) -> MutexGuard<'_, R> {
        self.results.lock().unwrap()
    }

    /// Consume the context after all workers have been joined.
    /// Cancellation wins over recorded worker errors, matching the
    /// caller-facing contract that a cancelled operation reports
    /// `Cancelled`.
    pub fn finish(self) -> CompositeResult<R> {
        if self.token.map_or(false, |t| t.is_cancelled()) {
            return Err(CompositeError::Cancelled);
        }
        if let Some(err) = self.error.into_inner().unwrap() {
            return Err(err);
        }
        Ok(self.results.into_inner().unwrap())
    }
}
