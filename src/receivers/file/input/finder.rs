// SPDX-License-Identifier: Apache-2.0

use glob::glob;
use std::collections::HashSet;
use std::path::PathBuf;
use tracing::warn;

/// Expands a file group's glob patterns into candidate paths.
#[derive(Debug, Clone)]
pub struct FileFinder {
    patterns: Vec<String>,
}

impl FileFinder {
    pub fn new(patterns: Vec<String>) -> Self {
        Self { patterns }
    }

    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }

    /// Evaluate every pattern, in order, returning each matching path once.
    ///
    /// A bad pattern or an unreadable directory only affects its own pattern;
    /// the failure is logged and the remaining patterns are still evaluated.
    pub fn find_files(&self) -> Vec<PathBuf> {
        let mut seen = HashSet::new();
        let mut paths = Vec::new();

        for pattern in &self.patterns {
            let matches = match glob(pattern) {
                Ok(m) => m,
                Err(e) => {
                    warn!(pattern = %pattern, error = %e, "Invalid glob pattern, skipping.");
                    continue;
                }
            };

            for entry in matches {
                match entry {
                    Ok(path) => {
                        if seen.insert(path.clone()) {
                            paths.push(path);
                        }
                    }
                    Err(e) => {
                        warn!(pattern = %pattern, error = %e, "Failed to evaluate glob match.");
                    }
                }
            }
        }

        paths
    }
}
