use anyhow::{Context, Result, anyhow};
use chrono::Local;
use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::translation::document::{Chapter, Document, Glossary};
use crate::translation::prompts::parse_glossary_response;

// @module: File and directory utilities for the CLI

static CHAPTER_NUMBER_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+").unwrap());

// @struct: File operations utility
pub struct FileManager;

impl FileManager {
    // @checks: Directory existence
    pub fn dir_exists<P: AsRef<Path>>(path: P) -> bool {
        path.as_ref().exists() && path.as_ref().is_dir()
    }

    // @creates: Directory and parents if needed
    pub fn ensure_dir<P: AsRef<Path>>(path: P) -> Result<()> {
        let path = path.as_ref();
        if !path.exists() {
            fs::create_dir_all(path)?;
        }
        Ok(())
    }

    /// Find files with a specific extension in a directory
    pub fn find_files<P: AsRef<Path>>(dir: P, extension: &str) -> Result<Vec<PathBuf>> {
        let mut result = Vec::new();
        let extension = extension.trim_start_matches('.');

        for entry in WalkDir::new(dir.as_ref()).follow_links(true) {
            let entry = entry.context("Failed to read directory entry")?;
            let path = entry.path();

            if path.is_file()
                && path
                    .extension()
                    .is_some_and(|ext| ext.to_string_lossy().eq_ignore_ascii_case(extension))
            {
                result.push(path.to_path_buf());
            }
        }

        Ok(result)
    }

    /// Read a file to a string
    pub fn read_to_string<P: AsRef<Path>>(path: P) -> Result<String> {
        fs::read_to_string(&path)
            .with_context(|| format!("Failed to read file: {:?}", path.as_ref()))
    }

    /// Write a string to a file
    pub fn write_to_file<P: AsRef<Path>>(path: P, content: &str) -> Result<()> {
        // Ensure the parent directory exists
        if let Some(parent) = path.as_ref().parent() {
            Self::ensure_dir(parent)?;
        }

        fs::write(&path, content)
            .with_context(|| format!("Failed to write to file: {:?}", path.as_ref()))?;

        Ok(())
    }

    // @reads: One chapter per .txt file, ordered by the first number in the file name
    // @returns: Chapters with the file stem as id and a leading "# " line as title
    pub fn read_chapters<P: AsRef<Path>>(dir: P) -> Result<Vec<Chapter>> {
        let dir = dir.as_ref();
        if !Self::dir_exists(dir) {
            return Err(anyhow!("Input directory does not exist: {:?}", dir));
        }

        let mut files = Self::find_files(dir, "txt")?;
        files.sort_by_key(|path| {
            let stem = Self::file_stem(path);
            let number = CHAPTER_NUMBER_REGEX
                .find(&stem)
                .and_then(|m| m.as_str().parse::<u64>().ok())
                .unwrap_or(u64::MAX);
            (number, stem)
        });

        files
            .iter()
            .map(|path| {
                let text = Self::read_to_string(path)?;
                let mut chapter = Chapter::new(&Self::file_stem(path), &text);
                if let Some(title) = text.lines().next().and_then(|l| l.strip_prefix("# ")) {
                    chapter.title = Some(title.trim().to_string());
                }
                Ok(chapter)
            })
            .collect()
    }

    // @generates: Output path for a translated chapter
    pub fn translation_path<P: AsRef<Path>>(
        output_dir: P,
        chapter_id: &str,
        target_language: &str,
    ) -> PathBuf {
        output_dir
            .as_ref()
            .join(format!("{}.{}.txt", chapter_id, target_language))
    }

    // @writes: Every translated chapter; returns how many were written
    pub fn write_translations<P: AsRef<Path>>(
        document: &Document,
        output_dir: P,
        target_language: &str,
    ) -> Result<usize> {
        Self::ensure_dir(&output_dir)?;

        let mut written = 0;
        for chapter in &document.chapters {
            if let Some(text) = &chapter.translated_text {
                let path = Self::translation_path(&output_dir, &chapter.id, target_language);
                Self::write_to_file(&path, text)?;
                written += 1;
            }
        }
        Ok(written)
    }

    // @writes: Markdown report of proofing findings, grouped by chapter
    pub fn write_findings_report<P: AsRef<Path>>(document: &Document, path: P) -> Result<usize> {
        let mut report = String::new();
        let _ = writeln!(report, "# Proofing report: {}", document.id);
        let _ = writeln!(report, "\nGenerated {}\n", Local::now().format("%Y-%m-%d %H:%M:%S"));

        let mut total = 0;
        for chapter in document.chapters.iter().filter(|c| !c.findings.is_empty()) {
            let _ = writeln!(report, "## {}\n", chapter.id);
            for finding in &chapter.findings {
                let _ = writeln!(
                    report,
                    "- **{}** ({}): {}",
                    finding.kind,
                    if finding.location.is_empty() { "-" } else { finding.location.as_str() },
                    finding.description
                );
                total += 1;
            }
            report.push('\n');
        }

        if total == 0 {
            report.push_str("No findings.\n");
        }

        Self::write_to_file(path, &report)?;
        Ok(total)
    }

    // @reads: JSON glossary file, [{"term", "translation", "category"}]
    pub fn read_glossary<P: AsRef<Path>>(path: P) -> Result<Glossary> {
        let text = Self::read_to_string(&path)?;
        let entries = parse_glossary_response(&text, "supplied")
            .map_err(|e| anyhow!("Invalid glossary file {:?}: {}", path.as_ref(), e))?;
        Ok(Glossary::from_entries(entries))
    }

    // @writes: Glossary as pretty JSON
    pub fn write_glossary<P: AsRef<Path>>(glossary: &Glossary, path: P) -> Result<()> {
        let json = serde_json::to_string_pretty(&glossary.to_entries())?;
        Self::write_to_file(path, &json)
    }

    fn file_stem(path: &Path) -> String {
        path.file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default()
    }
}
