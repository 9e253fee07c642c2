//! Source-tree scanner: walks theme and extension directories and greps
//! file contents for tracker keywords.

use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, error, warn};
use walkdir::{DirEntry, WalkDir};

use crate::catalog::Catalog;
use crate::scanner::{DetectedTracker, DetectionMethod, Evidence, EvidenceScanner};

/// Only these file types can carry tracker embeds worth grepping.
const ALLOWED_EXTENSIONS: &[&str] = &["php", "js", "html", "twig", "liquid"];

/// Dependency directories are skipped entirely (not descended into).
const EXCLUDED_DIRS: &[&str] = &["node_modules", "vendor"];

#[derive(Clone)]
pub struct FileScanner {
    catalog: Arc<Catalog>,
    roots: Vec<PathBuf>,
}

impl FileScanner {
    pub fn new(catalog: Arc<Catalog>, roots: Vec<PathBuf>) -> Self {
        Self { catalog, roots }
    }

    fn is_excluded(entry: &DirEntry) -> bool {
        entry.file_type().is_dir()
            && entry
                .file_name()
                .to_str()
                .map(|name| EXCLUDED_DIRS.contains(&name))
                .unwrap_or(false)
    }

    fn has_allowed_extension(entry: &DirEntry) -> bool {
        entry
            .path()
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| ALLOWED_EXTENSIONS.contains(&e.to_lowercase().as_str()))
            .unwrap_or(false)
    }

    /// Walk all roots synchronously. Unreadable files and directories are
    /// skipped; the walk itself never fails.
    pub fn scan_blocking(&self) -> Vec<DetectedTracker> {
        let mut found = Vec::new();

        for root in &self.roots {
            let walker = WalkDir::new(root)
                .into_iter()
                .filter_entry(|e| !Self::is_excluded(e));

            for entry in walker {
                let entry = match entry {
                    Ok(entry) => entry,
                    Err(e) => {
                        warn!("Skipping unreadable entry under {}: {}", root.display(), e);
                        continue;
                    }
                };
                if !entry.file_type().is_file() || !Self::has_allowed_extension(&entry) {
                    continue;
                }

                let content = match std::fs::read_to_string(entry.path()) {
                    Ok(content) => content,
                    Err(e) => {
                        debug!("Skipping unreadable file {}: {}", entry.path().display(), e);
                        continue;
                    }
                };
                let lowercased = content.to_lowercase();

                // A file may match several distinct services; within one
                // service the first keyword hit decides.
                for def in self.catalog.iter() {
                    if !def.matches_keywords(&lowercased) {
                        continue;
                    }
                    found.push(DetectedTracker {
                        service_id: def.service_id.clone(),
                        detection_method: DetectionMethod::File,
                        evidence: Evidence::File {
                            path: entry.path().display().to_string(),
                        },
                        extracted_id: def.extract_id(&content),
                    });
                }
            }
        }

        found
    }
}

#[async_trait::async_trait]
impl EvidenceScanner for FileScanner {
    fn method(&self) -> DetectionMethod {
        DetectionMethod::File
    }

    async fn scan(&self) -> Vec<DetectedTracker> {
        let scanner = self.clone();
        match tokio::task::spawn_blocking(move || scanner.scan_blocking()).await {
            Ok(found) => found,
            Err(e) => {
                error!("File scan task failed: {}", e);
                vec![]
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn catalog() -> Arc<Catalog> {
        Arc::new(Catalog::builtin().unwrap())
    }

    fn write(dir: &std::path::Path, rel: &str, content: &str) {
        let path = dir.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    #[test]
    fn detects_keyword_in_allowed_file() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "theme/footer.php",
            "<?php // loads Hotjar\necho 'hotjar widget';",
        );

        let scanner = FileScanner::new(catalog(), vec![dir.path().to_path_buf()]);
        let found = scanner.scan_blocking();

        assert_eq!(found.len(), 1);
        assert_eq!(found[0].service_id, "hotjar");
        assert_eq!(found[0].detection_method, DetectionMethod::File);
        match &found[0].evidence {
            Evidence::File { path } => assert!(path.ends_with("footer.php")),
            other => panic!("unexpected evidence: {:?}", other),
        }
    }

    #[test]
    fn extracts_tracking_id() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "header.js",
            "ga('create', 'UA-123456-1', 'auto');",
        );

        let scanner = FileScanner::new(catalog(), vec![dir.path().to_path_buf()]);
        let found = scanner.scan_blocking();

        assert_eq!(found.len(), 1);
        assert_eq!(found[0].service_id, "google_analytics");
        assert_eq!(found[0].extracted_id.as_deref(), Some("UA-123456-1"));
    }

    #[test]
    fn excluded_directories_are_not_descended() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "node_modules/pkg/index.js",
            "hotjar google-analytics.com",
        );
        write(dir.path(), "vendor/lib/a.php", "connect.facebook.net");

        let scanner = FileScanner::new(catalog(), vec![dir.path().to_path_buf()]);
        assert!(scanner.scan_blocking().is_empty());
    }

    #[test]
    fn disallowed_extensions_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "notes.txt", "hotjar");
        write(dir.path(), "image.css", "hotjar");

        let scanner = FileScanner::new(catalog(), vec![dir.path().to_path_buf()]);
        assert!(scanner.scan_blocking().is_empty());
    }

    #[test]
    fn one_file_can_match_multiple_services() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "tags.html",
            "<script src='https://www.google-analytics.com/analytics.js'></script>\n\
             <script src='https://static.hotjar.com/c/hotjar.js'></script>",
        );

        let scanner = FileScanner::new(catalog(), vec![dir.path().to_path_buf()]);
        let mut services: Vec<_> = scanner
            .scan_blocking()
            .into_iter()
            .map(|d| d.service_id)
            .collect();
        services.sort();
        assert_eq!(services, vec!["google_analytics", "hotjar"]);
    }

    #[test]
    fn missing_root_yields_empty() {
        let scanner = FileScanner::new(catalog(), vec![PathBuf::from("/does/not/exist")]);
        assert!(scanner.scan_blocking().is_empty());
    }
}
