use std::collections::HashSet;

use globset::{Glob, GlobSet, GlobSetBuilder};
use smelter_core::NoiseFilterSettings;

/// Compile a list of glob patterns into one matcher. A pattern that fails to
/// compile is a configuration problem the caller surfaces, never skipped.
pub fn compile_globs(patterns: &[String]) -> Result<GlobSet, globset::Error> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    builder.build()
}

/// The filterable surface of a source event. Borrowed out of the event so
/// suppression checks allocate nothing per item.
#[derive(Debug, Clone, Copy)]
pub struct CandidateEvent<'a> {
    pub author: Option<&'a str>,
    pub title: Option<&'a str>,
    pub labels: &'a [String],
    pub path: Option<&'a str>,
}

/// Per-estate noise suppression, compiled once per run from the stored
/// settings. Suppression is advisory: a suppressed event still counts toward
/// the watermark so a noisy backlog window is not re-scanned forever.
pub struct NoiseFilter {
    enabled: bool,
    filter_authors: bool,
    filter_labels: bool,
    filter_paths: bool,
    filter_titles: bool,
    ignore_authors: HashSet<String>,
    ignore_labels: HashSet<String>,
    ignore_paths: GlobSet,
    ignore_title_prefixes: Vec<String>,
}

impl NoiseFilter {
    pub fn from_settings(settings: &NoiseFilterSettings) -> Result<Self, globset::Error> {
        Ok(Self {
            enabled: settings.enabled,
            filter_authors: settings.filter_authors,
            filter_labels: settings.filter_labels,
            filter_paths: settings.filter_paths,
            filter_titles: settings.filter_titles,
            ignore_authors: settings.ignore_authors.iter().cloned().collect(),
            ignore_labels: settings.ignore_labels.iter().cloned().collect(),
            ignore_paths: compile_globs(&settings.ignore_paths)?,
            ignore_title_prefixes: settings
                .ignore_title_prefixes
                .iter()
                .map(|prefix| prefix.to_lowercase())
                .collect(),
        })
    }

    pub fn suppresses(&self, event: &CandidateEvent) -> bool {
        if !self.enabled {
            return false;
        }

        if self.filter_authors {
            if let Some(author) = event.author {
                if self.ignore_authors.contains(author) {
                    return true;
                }
            }
        }

        if self.filter_labels
            && event
                .labels
                .iter()
                .any(|label| self.ignore_labels.contains(label))
        {
            return true;
        }

        // Path rules only apply to events that carry a path at all
        if self.filter_paths {
            if let Some(path) = event.path {
                if self.ignore_paths.is_match(path) {
                    return true;
                }
            }
        }

        if self.filter_titles {
            if let Some(title) = event.title {
                let title = title.to_lowercase();
                if self
                    .ignore_title_prefixes
                    .iter()
                    .any(|prefix| title.starts_with(prefix.as_str()))
                {
                    return true;
                }
            }
        }

        false
    }
}
