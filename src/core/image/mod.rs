// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 itsakeyfut
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Image format parsers
//!
//! Every image format funnels into the same disc model. The daemon
//! ships parsers for plain ISO images and CUE/BIN pairs; anything else
//! can be plugged in through the [`ImageParser`] trait and the
//! registry.

use std::path::{Path, PathBuf};

use crate::core::disc::Disc;
use crate::core::error::ParserError;

mod cue;
mod iso;

pub use cue::CueParser;
pub use iso::IsoParser;

/// A disc image format parser
pub trait ImageParser: Send + Sync {
    /// Short format name for logs
    fn name(&self) -> &'static str;

    /// Quick check whether this parser wants the file
    fn can_handle(&self, path: &Path) -> bool;

    /// Parse the image files into a disc
    fn parse(&self, paths: &[PathBuf]) -> Result<Disc, ParserError>;
}

/// Ordered collection of parsers tried in registration order
pub struct ParserRegistry {
    parsers: Vec<Box<dyn ImageParser>>,
}

impl ParserRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self {
            parsers: Vec::new(),
        }
    }

    /// Registry with the built-in parsers
    pub fn with_default_parsers() -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(CueParser));
        registry.register(Box::new(IsoParser));
        registry
    }

    /// Add a parser; later registrations are tried later
    pub fn register(&mut self, parser: Box<dyn ImageParser>) {
        self.parsers.push(parser);
    }

    /// Parse image files with the first parser that recognizes them
    pub fn load(&self, paths: &[PathBuf]) -> Result<Disc, ParserError> {
        let first = paths
            .first()
            .ok_or_else(|| ParserError::Malformed("no image files given".into()))?;

        for parser in &self.parsers {
            if parser.can_handle(first) {
                log::info!("parsing {} with the {} parser", first.display(), parser.name());
                return parser.parse(paths);
            }
        }

        Err(ParserError::UnsupportedFormat(
            first.display().to_string(),
        ))
    }
}

impl Default for ParserRegistry {
    fn default() -> Self {
        Self::with_default_parsers()
    }
}
