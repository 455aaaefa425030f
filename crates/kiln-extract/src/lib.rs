//! Turns loosely formatted model responses into file writes.
//!
//! [`ResponseCodeExtractor`] runs an ordered pipeline of
//! [`ExtractionStrategy`] values over one response:
//!
//! 1. `Directive`: an explicit `FILES TO MODIFY:` section of `FILE:`/`CONTENT:` entries.
//! 2. `FencedBlock`: fenced code blocks routed through [`HEURISTIC_RULES`], only
//!    when no directive entry was found.
//! 3. `StructuredDataRepair`: a repaired JSON config, only when the request
//!    mentions a structured config format.
//!
//! The first strategy to claim a path keeps it, except that a repaired config
//! replaces a heuristic claim on the same path. Extraction never fails; a
//! response with no recognizable structure yields no files.

mod content;
mod directive;
mod fenced;
mod structured_repair;

use serde::Serialize;

pub use fenced::{
    infer_target_from_content, scan_fenced_blocks, FencedBlock, HeuristicRule, HEURISTIC_RULES,
};
pub use structured_repair::normalize_json_like;

pub const DEFAULT_DIRECTIVE_MARKER: &str = "FILES TO MODIFY";
pub const DEFAULT_STRUCTURED_CONFIG_FILE: &str = "vercel.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
/// Which strategy produced an [`ExtractedFile`]; diagnostics only.
pub enum ExtractionOrigin {
    Explicit,
    Heuristic,
    StructuredRepair,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
/// One file write derived from a model response.
pub struct ExtractedFile {
    /// Sanitized relative path.
    pub path: String,
    pub content: String,
    pub origin: ExtractionOrigin,
}

#[derive(Debug, Clone, Copy, Default)]
/// Inputs for one extraction pass.
pub struct ExtractionRequest<'a> {
    pub response: &'a str,
    /// Path supplied by the caller for this write request, if any.
    pub target_path: Option<&'a str>,
    /// Error text that triggered the request.
    pub error_text: Option<&'a str>,
    /// Free-form user instruction that accompanied the request.
    pub instruction: Option<&'a str>,
}

impl<'a> ExtractionRequest<'a> {
    pub fn new(response: &'a str) -> Self {
        Self {
            response,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Extraction strategies in dispatch priority order.
pub enum ExtractionStrategy {
    Directive,
    FencedBlock,
    StructuredDataRepair,
}

impl ExtractionStrategy {
    pub const ORDER: [ExtractionStrategy; 3] = [
        ExtractionStrategy::Directive,
        ExtractionStrategy::FencedBlock,
        ExtractionStrategy::StructuredDataRepair,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Directive => "directive",
            Self::FencedBlock => "fenced_block",
            Self::StructuredDataRepair => "structured_data_repair",
        }
    }

    fn run(
        self,
        config: &ExtractorConfig,
        request: &ExtractionRequest<'_>,
        claimed: &[ExtractedFile],
    ) -> Vec<ExtractedFile> {
        match self {
            Self::Directive => directive::extract_directive_files(request.response, config),
            Self::FencedBlock => {
                let directive_found = claimed
                    .iter()
                    .any(|file| file.origin == ExtractionOrigin::Explicit);
                if directive_found {
                    return Vec::new();
                }
                fenced::extract_heuristic_files(request.response, request.target_path)
            }
            Self::StructuredDataRepair => {
                if !structured_repair::mentions_structured_config(request) {
                    return Vec::new();
                }
                structured_repair::extract_repaired_config(request, config)
                    .into_iter()
                    .collect()
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Public struct `ExtractorConfig` used across Kiln components.
pub struct ExtractorConfig {
    /// Header introducing the explicit directive section, matched case-insensitively.
    pub directive_marker: String,
    /// Target for repaired configs whose error text names no known manifest.
    pub default_structured_config_file: String,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            directive_marker: DEFAULT_DIRECTIVE_MARKER.to_string(),
            default_structured_config_file: DEFAULT_STRUCTURED_CONFIG_FILE.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default)]
/// Deterministic response-to-files pipeline.
pub struct ResponseCodeExtractor {
    config: ExtractorConfig,
}

impl ResponseCodeExtractor {
    pub fn new(config: ExtractorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ExtractorConfig {
        &self.config
    }

    pub fn extract(&self, request: &ExtractionRequest<'_>) -> Vec<ExtractedFile> {
        let mut claimed: Vec<ExtractedFile> = Vec::new();
        for strategy in ExtractionStrategy::ORDER {
            let produced = strategy.run(&self.config, request, &claimed);
            tracing::debug!(
                strategy = strategy.as_str(),
                produced = produced.len(),
                "extraction strategy finished"
            );
            merge_claims(&mut claimed, produced);
        }
        claimed
    }
}

/// Appends `produced` to `claimed`, dropping any file whose path is already claimed.
///
/// A repaired config replaces a heuristic claim on the same path; explicit
/// entries are never replaced.
fn merge_claims(claimed: &mut Vec<ExtractedFile>, produced: Vec<ExtractedFile>) {
    for file in produced {
        let Some(existing) = claimed
            .iter_mut()
            .find(|existing| existing.path == file.path)
        else {
            claimed.push(file);
            continue;
        };
        if existing.origin == ExtractionOrigin::Heuristic
            && file.origin == ExtractionOrigin::StructuredRepair
        {
            tracing::debug!(
                path = file.path.as_str(),
                "replacing heuristic claim with repaired config"
            );
            *existing = file;
            continue;
        }
        tracing::debug!(
            path = file.path.as_str(),
            origin = ?file.origin,
            "dropping extracted file for already claimed path"
        );
    }
}
