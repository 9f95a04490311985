//! File scanner: walk a root directory and classify every file.
//!
//! Traversal is depth-first in file-name order so repeated scans of the same
//! tree are deterministic. Directories whose name starts with `.` are pruned
//! when `skip_hidden` is set, and the root's ignore file (gitignore syntax)
//! is compiled once into a [`GlobSet`] and applied to every relative path.
//!
//! Nothing here is fatal below the root: unreadable directories are logged
//! and treated as empty, oversized files are counted and dropped, and files
//! outside the extension allow-list are returned with `supported = false`.

use anyhow::{bail, Result};
use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::config::ScanConfig;
use crate::models::{DocumentType, ScannedFile};

/// Extension (lowercase, no dot) → document type.
const SUPPORTED_EXTENSIONS: &[(&str, DocumentType)] = &[
    ("md", DocumentType::Markdown),
    ("markdown", DocumentType::Markdown),
    ("mdx", DocumentType::Markdown),
    ("txt", DocumentType::Text),
    ("text", DocumentType::Text),
    ("adoc", DocumentType::Text),
    ("rst", DocumentType::Rst),
    ("html", DocumentType::Html),
    ("htm", DocumentType::Html),
    ("pdf", DocumentType::Pdf),
    ("docx", DocumentType::Docx),
    ("pptx", DocumentType::Pptx),
    ("xlsx", DocumentType::Xlsx),
    ("rs", DocumentType::Code),
    ("py", DocumentType::Code),
    ("js", DocumentType::Code),
    ("jsx", DocumentType::Code),
    ("ts", DocumentType::Code),
    ("tsx", DocumentType::Code),
    ("go", DocumentType::Code),
    ("java", DocumentType::Code),
    ("kt", DocumentType::Code),
    ("c", DocumentType::Code),
    ("h", DocumentType::Code),
    ("cc", DocumentType::Code),
    ("cpp", DocumentType::Code),
    ("hpp", DocumentType::Code),
    ("cs", DocumentType::Code),
    ("rb", DocumentType::Code),
    ("php", DocumentType::Code),
    ("swift", DocumentType::Code),
    ("scala", DocumentType::Code),
    ("sh", DocumentType::Code),
    ("sql", DocumentType::Code),
    ("lua", DocumentType::Code),
    ("json", DocumentType::Data),
    ("yaml", DocumentType::Data),
    ("yml", DocumentType::Data),
    ("toml", DocumentType::Data),
    ("csv", DocumentType::Data),
    ("xml", DocumentType::Data),
];

const LANGUAGES: &[(&str, &str)] = &[
    ("rs", "rust"),
    ("py", "python"),
    ("js", "javascript"),
    ("jsx", "javascript"),
    ("ts", "typescript"),
    ("tsx", "typescript"),
    ("go", "go"),
    ("java", "java"),
    ("kt", "kotlin"),
    ("c", "c"),
    ("h", "c"),
    ("cc", "cpp"),
    ("cpp", "cpp"),
    ("hpp", "cpp"),
    ("cs", "csharp"),
    ("rb", "ruby"),
    ("php", "php"),
    ("swift", "swift"),
    ("scala", "scala"),
    ("sh", "shell"),
    ("sql", "sql"),
    ("lua", "lua"),
    ("md", "markdown"),
    ("markdown", "markdown"),
    ("mdx", "markdown"),
];

/// Key used in `unsupported_by_extension` for files with no extension.
pub const NO_EXTENSION: &str = "(none)";

#[derive(Debug, Clone)]
pub struct ScanOptions {
    pub respect_ignore_file: bool,
    pub skip_hidden: bool,
    pub max_file_size_bytes: u64,
    pub ignore_file: String,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self::from(&ScanConfig::default())
    }
}

impl From<&ScanConfig> for ScanOptions {
    fn from(c: &ScanConfig) -> Self {
        Self {
            respect_ignore_file: c.respect_ignore_file,
            skip_hidden: c.skip_hidden,
            max_file_size_bytes: c.max_file_size_bytes,
            ignore_file: c.ignore_file.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ScanStats {
    /// Every file reached by the walk, including oversized ones.
    pub total_files: usize,
    pub supported_files: usize,
    pub unsupported_files: usize,
    pub unsupported_by_extension: BTreeMap<String, usize>,
    /// Hidden directories pruned from the walk.
    pub hidden_skipped: usize,
    /// Files and directories excluded by the ignore file.
    pub ignored_skipped: usize,
    pub oversized_skipped: usize,
    /// Directory entries that could not be read.
    pub unreadable: usize,
}

/// Compiled ignore-file rules.
///
/// Later lines override earlier ones, as in gitignore: the highest-indexed
/// matching pattern decides, and a `!` pattern re-includes.
pub struct IgnoreRules {
    set: GlobSet,
    /// Per compiled glob: (negated, directory-only).
    flags: Vec<(bool, bool)>,
}

impl IgnoreRules {
    pub fn empty() -> Self {
        Self {
            set: GlobSet::empty(),
            flags: Vec::new(),
        }
    }

    /// Parse gitignore-style content. Invalid patterns are logged and skipped.
    pub fn parse(content: &str) -> Self {
        let mut builder = GlobSetBuilder::new();
        let mut flags = Vec::new();

        for raw in content.lines() {
            let line = raw.trim_end();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let (negated, line) = match line.strip_prefix('!') {
                Some(rest) => (true, rest),
                None => (false, line),
            };
            let (dir_only, line) = match line.strip_suffix('/') {
                Some(rest) => (true, rest),
                None => (false, line),
            };
            if line.is_empty() {
                continue;
            }

            let anchored = line.contains('/');
            let base = line.trim_start_matches('/');
            let head = if anchored {
                base.to_string()
            } else {
                format!("**/{}", base)
            };

            // The pattern itself, then everything beneath a matching directory.
            for (pattern, only_dirs) in [(head.clone(), dir_only), (format!("{}/**", head), false)]
            {
                match GlobBuilder::new(&pattern).literal_separator(true).build() {
                    Ok(glob) => {
                        builder.add(glob);
                        flags.push((negated, only_dirs));
                    }
                    Err(e) => {
                        warn!(pattern = %pattern, error = %e, "skipping invalid ignore pattern");
                    }
                }
            }
        }

        match builder.build() {
            Ok(set) => Self { set, flags },
            Err(e) => {
                warn!(error = %e, "failed to compile ignore rules; ignoring none");
                Self::empty()
            }
        }
    }

    pub fn is_ignored(&self, relative_path: &str, is_dir: bool) -> bool {
        let matches = self.set.matches(relative_path);
        for idx in matches.into_iter().rev() {
            let (negated, dir_only) = self.flags[idx];
            if dir_only && !is_dir {
                continue;
            }
            return !negated;
        }
        false
    }
}

/// Map a lowercase extension (no dot) to its document type.
pub fn document_type_for_extension(ext: &str) -> Option<DocumentType> {
    SUPPORTED_EXTENSIONS
        .iter()
        .find(|(e, _)| *e == ext)
        .map(|(_, t)| *t)
}

pub fn language_for_extension(ext: &str) -> Option<&'static str> {
    LANGUAGES.iter().find(|(e, _)| *e == ext).map(|(_, l)| *l)
}

/// Heuristic test-file detection from the relative path.
pub fn is_test_path(relative_path: &str) -> bool {
    let mut components: Vec<&str> = relative_path.split('/').collect();
    let file_name = components.pop().unwrap_or("");

    if components
        .iter()
        .any(|c| matches!(*c, "test" | "tests" | "__tests__" | "spec" | "specs"))
    {
        return true;
    }

    let stem = file_name.split('.').next().unwrap_or("").to_lowercase();
    let lower = file_name.to_lowercase();
    stem.starts_with("test_")
        || stem.ends_with("_test")
        || stem.ends_with("_spec")
        || lower.contains(".test.")
        || lower.contains(".spec.")
}

/// Walk `root` and classify every regular file.
pub fn scan(root: &Path, options: &ScanOptions) -> Result<(Vec<ScannedFile>, ScanStats)> {
    if !root.is_dir() {
        bail!("Scan root is not a directory: {}", root.display());
    }

    let rules = if options.respect_ignore_file {
        load_ignore_rules(root, &options.ignore_file)
    } else {
        IgnoreRules::empty()
    };

    let mut files = Vec::new();
    let mut stats = ScanStats::default();

    let mut walker = WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter();

    while let Some(entry) = walker.next() {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                let at = e
                    .path()
                    .map(|p| p.display().to_string())
                    .unwrap_or_default();
                warn!(path = %at, error = %e, "unreadable directory entry, skipping");
                stats.unreadable += 1;
                continue;
            }
        };
        if entry.depth() == 0 {
            continue;
        }

        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        let rel_str = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        let file_type = entry.file_type();

        if file_type.is_dir() {
            let hidden = entry.file_name().to_string_lossy().starts_with('.');
            if options.skip_hidden && hidden {
                debug!(path = %rel_str, "skipping hidden directory");
                stats.hidden_skipped += 1;
                walker.skip_current_dir();
            } else if rules.is_ignored(&rel_str, true) {
                stats.ignored_skipped += 1;
                walker.skip_current_dir();
            }
            continue;
        }

        if !file_type.is_file() {
            continue;
        }

        if rules.is_ignored(&rel_str, false) {
            stats.ignored_skipped += 1;
            continue;
        }

        stats.total_files += 1;

        let size_bytes = match entry.metadata() {
            Ok(m) => m.len(),
            Err(e) => {
                warn!(path = %rel_str, error = %e, "failed to stat file, skipping");
                stats.unreadable += 1;
                continue;
            }
        };
        if size_bytes > options.max_file_size_bytes {
            debug!(path = %rel_str, size_bytes, "skipping oversized file");
            stats.oversized_skipped += 1;
            continue;
        }

        let ext = path
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        let document_type = document_type_for_extension(&ext);
        let supported = document_type.is_some();

        if supported {
            stats.supported_files += 1;
        } else {
            stats.unsupported_files += 1;
            let key = if ext.is_empty() {
                NO_EXTENSION.to_string()
            } else {
                format!(".{}", ext)
            };
            *stats.unsupported_by_extension.entry(key).or_insert(0) += 1;
        }

        files.push(ScannedFile {
            path: path.to_path_buf(),
            is_test: is_test_path(&rel_str),
            relative_path: rel_str,
            extension: if ext.is_empty() {
                String::new()
            } else {
                format!(".{}", ext)
            },
            supported,
            document_type,
            language: language_for_extension(&ext).map(str::to_string),
            size_bytes,
        });
    }

    Ok((files, stats))
}

fn load_ignore_rules(root: &Path, ignore_file: &str) -> IgnoreRules {
    let path = root.join(ignore_file);
    if !path.is_file() {
        return IgnoreRules::empty();
    }
    match std::fs::read_to_string(&path) {
        Ok(content) => IgnoreRules::parse(&content),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "failed to read ignore file");
            IgnoreRules::empty()
        }
    }
}

/// CLI entry point for `docmem scan`.
pub fn run_scan(root: &Path, options: &ScanOptions) -> Result<()> {
    let (files, stats) = scan(root, options)?;

    println!("scan {}", root.display());
    println!("  total files: {}", stats.total_files);
    println!("  supported: {}", stats.supported_files);
    println!("  unsupported: {}", stats.unsupported_files);
    for (ext, count) in &stats.unsupported_by_extension {
        println!("    {}: {}", ext, count);
    }
    println!("  hidden dirs skipped: {}", stats.hidden_skipped);
    println!("  ignored: {}", stats.ignored_skipped);
    println!("  oversized: {}", stats.oversized_skipped);

    let tests = files.iter().filter(|f| f.supported && f.is_test).count();
    if tests > 0 {
        println!("  test files: {}", tests);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write(root: &Path, rel: &str, content: &[u8]) {
        let p = root.join(rel);
        fs::create_dir_all(p.parent().unwrap()).unwrap();
        fs::write(p, content).unwrap();
    }

    #[test]
    fn test_mixed_supported_and_unsupported() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "readme.md", b"# Hi");
        write(tmp.path(), "paper.pdf", b"%PDF-1.4");
        write(tmp.path(), "blob.xyz", b"??");

        let (files, stats) = scan(tmp.path(), &ScanOptions::default()).unwrap();
        assert_eq!(stats.total_files, 3);
        assert_eq!(stats.supported_files, 2);
        assert_eq!(stats.unsupported_files, 1);
        assert_eq!(stats.unsupported_by_extension.get(".xyz"), Some(&1));
        assert_eq!(files.len(), 3);
        let xyz = files.iter().find(|f| f.extension == ".xyz").unwrap();
        assert!(!xyz.supported);
        assert!(xyz.document_type.is_none());
    }

    #[test]
    fn test_extension_match_is_case_insensitive() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "NOTES.MD", b"x");
        let (files, stats) = scan(tmp.path(), &ScanOptions::default()).unwrap();
        assert_eq!(stats.supported_files, 1);
        assert_eq!(files[0].document_type, Some(DocumentType::Markdown));
        assert_eq!(files[0].extension, ".md");
    }

    #[test]
    fn test_hidden_directories_skipped() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), ".git/config.toml", b"x");
        write(tmp.path(), ".cache/a/b.md", b"x");
        write(tmp.path(), "docs/a.md", b"x");

        let (files, stats) = scan(tmp.path(), &ScanOptions::default()).unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(stats.hidden_skipped, 2);

        let opts = ScanOptions {
            skip_hidden: false,
            ..ScanOptions::default()
        };
        let (files, _) = scan(tmp.path(), &opts).unwrap();
        assert_eq!(files.len(), 3);
    }

    #[test]
    fn test_ignore_file_applied() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), ".gitignore", b"target/\n*.log\n/build\n!keep.log\n");
        write(tmp.path(), "target/out.md", b"x");
        write(tmp.path(), "sub/target/deep.md", b"x");
        write(tmp.path(), "app.log", b"x");
        write(tmp.path(), "keep.log", b"x");
        write(tmp.path(), "build/x.md", b"x");
        write(tmp.path(), "sub/build/y.md", b"x");
        write(tmp.path(), "src/main.rs", b"fn main() {}");

        let (files, stats) = scan(tmp.path(), &ScanOptions::default()).unwrap();
        let mut rels: Vec<&str> = files.iter().map(|f| f.relative_path.as_str()).collect();
        rels.sort();
        assert_eq!(
            rels,
            vec![".gitignore", "keep.log", "src/main.rs", "sub/build/y.md"]
        );
        assert!(stats.ignored_skipped >= 3);
    }

    #[test]
    fn test_ignore_file_can_be_disabled() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), ".gitignore", b"*.md\n");
        write(tmp.path(), "a.md", b"x");
        let opts = ScanOptions {
            respect_ignore_file: false,
            ..ScanOptions::default()
        };
        let (_, stats) = scan(tmp.path(), &opts).unwrap();
        assert_eq!(stats.supported_files, 1);
    }

    #[test]
    fn test_oversized_counted_not_returned() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "big.md", &vec![b'a'; 2048]);
        write(tmp.path(), "small.md", b"a");
        let opts = ScanOptions {
            max_file_size_bytes: 1024,
            ..ScanOptions::default()
        };
        let (files, stats) = scan(tmp.path(), &opts).unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(stats.oversized_skipped, 1);
        assert_eq!(stats.total_files, 2);
    }

    #[test]
    fn test_traversal_order_is_deterministic() {
        let tmp = TempDir::new().unwrap();
        for name in ["c.md", "a.md", "b/z.md", "b/a.md"] {
            write(tmp.path(), name, b"x");
        }
        let (files, _) = scan(tmp.path(), &ScanOptions::default()).unwrap();
        let rels: Vec<&str> = files.iter().map(|f| f.relative_path.as_str()).collect();
        assert_eq!(rels, vec!["a.md", "b/a.md", "b/z.md", "c.md"]);
    }

    #[test]
    fn test_missing_root_errors() {
        let tmp = TempDir::new().unwrap();
        assert!(scan(&tmp.path().join("nope"), &ScanOptions::default()).is_err());
    }

    #[test]
    fn test_is_test_path() {
        assert!(is_test_path("tests/integration.rs"));
        assert!(is_test_path("src/parser_test.go"));
        assert!(is_test_path("web/app.spec.ts"));
        assert!(is_test_path("pkg/test_utils.py"));
        assert!(!is_test_path("src/lib.rs"));
        assert!(!is_test_path("docs/testing.md"));
    }

    #[test]
    fn test_language_tags() {
        assert_eq!(language_for_extension("rs"), Some("rust"));
        assert_eq!(language_for_extension("pdf"), None);
    }
}
