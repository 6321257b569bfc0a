#![forbid(unsafe_code)]

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// File extension of corpus fixtures.
pub const SOURCE_EXTENSION: &str = "c";

/// The include directive the normalizer removes.
pub const STDIO_INCLUDE: &str = "#include <stdio.h>";

/// Replacement for [`STDIO_INCLUDE`]: the one libc symbol the corpus needs.
pub const PRINTF_FORWARD_DECL: &str = "int printf(const char *format, ...);";

/// Lexical constructs that disqualify a fixture from the run.
///
/// This is a substring scan, not a tokenizer: a marker inside a string
/// literal or comment still excludes the file. Over-exclusion is the
/// accepted tradeoff.
pub const DISALLOWED_MARKERS: [&str; 7] = [
    "struct", "union", "enum", "#define", "#if", "typedef", "sizeof",
];

#[derive(Debug, Error)]
pub enum CorpusError {
    #[error("cannot read corpus directory {path}: {source}")]
    ReadDir {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("cannot read fixture {path}: {source}")]
    ReadFixture {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("cannot write fixture {path}: {source}")]
    WriteFixture {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("fixture {name:?} does not have a numeric stem")]
    NonNumericStem { name: String },
    #[error("cannot read exclusion config {path}: {source}")]
    ReadExclusions {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("exclusion config {path} is malformed: {source}")]
    ExclusionFormat {
        path: PathBuf,
        source: serde_yaml::Error,
    },
}

/// One discovered corpus fixture.
///
/// Identity is the zero-padded numeric stem of the file name (`042.c` has
/// id 42); the deny-list is keyed on that id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    name: String,
    stem: String,
    path: PathBuf,
    id: u32,
}

impl SourceFile {
    pub fn from_path(path: PathBuf) -> Result<Self, CorpusError> {
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        let stem = path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_default();
        let id = stem
            .parse::<u32>()
            .map_err(|_| CorpusError::NonNumericStem { name: name.clone() })?;
        Ok(Self {
            name,
            stem,
            path,
            id,
        })
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// File name without the source extension; doubles as the case name.
    #[must_use]
    pub fn stem(&self) -> &str {
        &self.stem
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn id(&self) -> u32 {
        self.id
    }
}

/// Lists `*.c` fixtures in `root`, sorted by file name.
///
/// Zero-padded stems make the lexicographic order numeric as well.
pub fn discover(root: &Path) -> Result<Vec<SourceFile>, CorpusError> {
    let entries = fs::read_dir(root).map_err(|source| CorpusError::ReadDir {
        path: root.to_path_buf(),
        source,
    })?;

    let mut files = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|source| CorpusError::ReadDir {
            path: root.to_path_buf(),
            source,
        })?;
        let path = entry.path();
        if path
            .extension()
            .is_some_and(|ext| ext == SOURCE_EXTENSION)
        {
            files.push(SourceFile::from_path(path)?);
        }
    }

    files.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(files)
}

/// Pure rewrite behind [`normalize_fixture`]: `Some(rewritten)` when the
/// include was present, `None` when there is nothing to do.
#[must_use]
pub fn normalize_text(text: &str) -> Option<String> {
    text.contains(STDIO_INCLUDE)
        .then(|| text.replace(STDIO_INCLUDE, PRINTF_FORWARD_DECL))
}

/// Rewrites one fixture in place, replacing [`STDIO_INCLUDE`] with
/// [`PRINTF_FORWARD_DECL`]. Returns whether the file changed.
///
/// Idempotent: once replaced the include no longer matches, so a second
/// pass leaves the file byte-identical and untouched on disk.
pub fn normalize_fixture(path: &Path) -> Result<bool, CorpusError> {
    let text = fs::read_to_string(path).map_err(|source| CorpusError::ReadFixture {
        path: path.to_path_buf(),
        source,
    })?;

    let Some(rewritten) = normalize_text(&text) else {
        return Ok(false);
    };
    fs::write(path, rewritten).map_err(|source| CorpusError::WriteFixture {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(true)
}

/// Normalizes the whole corpus as a single pre-pass. Returns how many
/// fixtures were rewritten. Any read or write failure aborts the run.
pub fn normalize_corpus(files: &[SourceFile]) -> Result<usize, CorpusError> {
    let mut rewritten = 0;
    for file in files {
        if normalize_fixture(file.path())? {
            tracing::debug!(fixture = file.name(), "replaced stdio include");
            rewritten += 1;
        }
    }
    Ok(rewritten)
}

/// First disallowed marker occurring anywhere in `text`, if any.
#[must_use]
pub fn find_marker(text: &str) -> Option<&'static str> {
    DISALLOWED_MARKERS
        .iter()
        .copied()
        .find(|marker| text.contains(marker))
}

/// Externally-supplied deny-lists, keyed on fixture ids.
///
/// The split into `known_broken` and `not_of_interest` is organizational;
/// filtering unions them. The lists carry no rationale.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExclusionSet {
    #[serde(default)]
    pub known_broken: BTreeSet<u32>,
    #[serde(default)]
    pub not_of_interest: BTreeSet<u32>,
}

impl ExclusionSet {
    pub fn from_yaml_str(body: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(body)
    }

    pub fn from_yaml_file(path: &Path) -> Result<Self, CorpusError> {
        let body = fs::read_to_string(path).map_err(|source| CorpusError::ReadExclusions {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&body).map_err(|source| CorpusError::ExclusionFormat {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Union of both lists: the effective deny-list.
    #[must_use]
    pub fn denied(&self) -> BTreeSet<u32> {
        self.known_broken
            .union(&self.not_of_interest)
            .copied()
            .collect()
    }

    #[must_use]
    pub fn contains(&self, id: u32) -> bool {
        self.known_broken.contains(&id) || self.not_of_interest.contains(&id)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.known_broken.is_empty() && self.not_of_interest.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "rule")]
pub enum RejectionReason {
    DisallowedMarker { marker: String },
    DenyListed { id: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rejection {
    pub name: String,
    pub reason: RejectionReason,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdmissionOutcome {
    pub admitted: Vec<SourceFile>,
    pub rejections: Vec<Rejection>,
}

/// Applies both admission rules to the discovered corpus.
///
/// The content rule is evaluated and logged before the deny-list rule so a
/// marker hit is always attributed to its marker, even for fixtures that
/// are also deny-listed.
pub fn filter_corpus(
    files: Vec<SourceFile>,
    exclusions: &ExclusionSet,
) -> Result<AdmissionOutcome, CorpusError> {
    let mut admitted = Vec::with_capacity(files.len());
    let mut rejections = Vec::new();

    for file in files {
        let text = fs::read_to_string(file.path()).map_err(|source| CorpusError::ReadFixture {
            path: file.path().to_path_buf(),
            source,
        })?;

        if let Some(marker) = find_marker(&text) {
            tracing::info!(fixture = file.name(), marker, "excluded: disallowed marker");
            rejections.push(Rejection {
                name: file.name().to_owned(),
                reason: RejectionReason::DisallowedMarker {
                    marker: marker.to_owned(),
                },
            });
            continue;
        }

        if exclusions.contains(file.id()) {
            tracing::info!(fixture = file.name(), id = file.id(), "excluded: deny-listed");
            rejections.push(Rejection {
                name: file.name().to_owned(),
                reason: RejectionReason::DenyListed { id: file.id() },
            });
            continue;
        }

        admitted.push(file);
    }

    Ok(AdmissionOutcome {
        admitted,
        rejections,
    })
}
