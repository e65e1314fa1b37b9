// SPDX-FileCopyrightText: Copyright © 2024-2026 The Bob Authors
//
// SPDX-License-Identifier: MPL-2.0

//! Download policy (spec.md §4.4 step 4, generalized per §9's "replacing
//! dynamic dispatch" note into a closed enum instead of free-form flags).

use regex::Regex;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("invalid --download-layer regex `{0}`: {1}")]
    InvalidRegex(String, regex::Error),
}

/// Whether and how the scheduler should prefer a cache hit over building.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadPolicy {
    /// Always build, never attempt a download.
    No,
    /// Try a download; build on miss.
    Yes,
    /// Download dependencies, but always build the requested leaf.
    Deps,
    /// Fail the step outright if the download misses.
    Forced,
    /// Like `Forced`, but only for dependencies; the leaf still builds.
    ForcedDeps,
    /// Try a download; if it fails verification or transfer, fall back to
    /// building rather than failing the step.
    ForcedFallback,
    /// Download only packages whose recipe name matches the given regex;
    /// everything else builds.
    PackagesRegex(String),
}

/// A `--download-layer <regex>` override, applied per recipe-matching glob
/// on top of the base policy (spec.md §4.4 step 4).
#[derive(Debug, Clone)]
pub struct LayerOverride {
    pattern: Regex,
    pub policy: DownloadPolicy,
}

impl LayerOverride {
    pub fn new(pattern: &str, policy: DownloadPolicy) -> Result<Self, DownloadError> {
        let pattern = Regex::new(pattern).map_err(|e| DownloadError::InvalidRegex(pattern.to_string(), e))?;
        Ok(Self { pattern, policy })
    }

    pub fn matches(&self, recipe_name: &str) -> bool {
        self.pattern.is_match(recipe_name)
    }
}

/// Whether attempting a download for `recipe_name` is worthwhile under
/// `base`, taking the first matching `--download-layer` override (if any).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attempt {
    /// Try a download; a miss is not fatal, fall through to building.
    TryThenBuild,
    /// A miss is a fatal step failure.
    TryOrFail,
    /// Skip the download attempt outright.
    SkipBuild,
}

pub fn resolve(base: &DownloadPolicy, overrides: &[LayerOverride], recipe_name: &str, is_leaf: bool) -> Attempt {
    for rule in overrides {
        if rule.matches(recipe_name) {
            return resolve(&rule.policy, &[], recipe_name, is_leaf);
        }
    }

    match base {
        DownloadPolicy::No => Attempt::SkipBuild,
        DownloadPolicy::Yes | DownloadPolicy::ForcedFallback => Attempt::TryThenBuild,
        DownloadPolicy::Deps => {
            if is_leaf {
                Attempt::SkipBuild
            } else {
                Attempt::TryThenBuild
            }
        }
        DownloadPolicy::Forced => Attempt::TryOrFail,
        DownloadPolicy::ForcedDeps => {
            if is_leaf {
                Attempt::SkipBuild
            } else {
                Attempt::TryOrFail
            }
        }
        DownloadPolicy::PackagesRegex(pattern) => {
            // Tolerates an invalid regex as "no match" — the CLI layer is
            // responsible for validating this eagerly via `LayerOverride::new`.
            match Regex::new(pattern) {
                Ok(re) if re.is_match(recipe_name) => Attempt::TryThenBuild,
                _ => Attempt::SkipBuild,
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn deps_policy_skips_the_leaf_but_tries_dependencies() {
        assert_eq!(resolve(&DownloadPolicy::Deps, &[], "root", true), Attempt::SkipBuild);
        assert_eq!(resolve(&DownloadPolicy::Deps, &[], "libfoo", false), Attempt::TryThenBuild);
    }

    #[test]
    fn forced_fails_on_miss_but_forced_deps_spares_the_leaf() {
        assert_eq!(resolve(&DownloadPolicy::Forced, &[], "root", true), Attempt::TryOrFail);
        assert_eq!(resolve(&DownloadPolicy::ForcedDeps, &[], "root", true), Attempt::SkipBuild);
        assert_eq!(resolve(&DownloadPolicy::ForcedDeps, &[], "libfoo", false), Attempt::TryOrFail);
    }

    #[test]
    fn layer_override_takes_precedence_over_base_policy() {
        let overrides = vec![LayerOverride::new("^lib.*", DownloadPolicy::No).unwrap()];
        assert_eq!(resolve(&DownloadPolicy::Yes, &overrides, "libfoo", false), Attempt::SkipBuild);
        assert_eq!(resolve(&DownloadPolicy::Yes, &overrides, "root", true), Attempt::TryThenBuild);
    }

    #[test]
    fn packages_regex_only_downloads_matching_names() {
        let policy = DownloadPolicy::PackagesRegex("^lib".to_string());
        assert_eq!(resolve(&policy, &[], "libfoo", false), Attempt::TryThenBuild);
        assert_eq!(resolve(&policy, &[], "root", true), Attempt::SkipBuild);
    }
}
