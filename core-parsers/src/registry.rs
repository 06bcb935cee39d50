// =====================================================================================
// File: core-parsers/src/registry.rs
// Description: Extension-indexed parser registry
// Author: arkSong (arksong2018@gmail.com)
// =====================================================================================

use crate::{ConfigAuditParser, DomainGroupsParser, ParserError, ParserResult, PkiAuditParser};
use core_model::{Report, ToolType};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// Capability set implemented by every concrete report parser
pub trait ReportParser: Send + Sync {
    /// Tool family this parser produces reports for
    fn tool_type(&self) -> ToolType;

    /// Supported file extensions including the leading dot (e.g. `".xml"`)
    fn supported_extensions(&self) -> &'static [&'static str];

    /// Cheap structural probe (root tag, header row, JSON keys). Never a full
    /// semantic parse; a `true` here only means this parser should be tried.
    fn can_parse(&self, path: &Path) -> bool;

    /// Parse the file into a normalized report with its findings
    fn parse(&self, path: &Path) -> ParserResult<Report>;

    /// Basic file validation shared by all parsers
    fn validate_file(&self, path: &Path) -> bool {
        if !path.exists() {
            return false;
        }
        match file_extension(path) {
            Some(ext) => self.supported_extensions().contains(&ext.as_str()),
            None => false,
        }
    }
}

impl std::fmt::Debug for dyn ReportParser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReportParser")
            .field("tool_type", &self.tool_type())
            .finish()
    }
}

/// Lowercased extension with leading dot
pub(crate) fn file_extension(path: &Path) -> Option<String> {
    path.extension()
        .map(|ext| format!(".{}", ext.to_string_lossy().to_ascii_lowercase()))
}

/// Registry mapping file extensions to ordered parser lists
pub struct ParserRegistry {
    parsers: Vec<Arc<dyn ReportParser>>,
    extension_map: HashMap<String, Vec<Arc<dyn ReportParser>>>,
}

impl ParserRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            parsers: Vec::new(),
            extension_map: HashMap::new(),
        }
    }

    /// Registry with the built-in parsers registered in probe order
    pub fn with_default_parsers() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(ConfigAuditParser::new()));
        registry.register(Arc::new(DomainGroupsParser::new()));
        registry.register(Arc::new(PkiAuditParser::new()));
        registry
    }

    /// Register a parser; registration order is probe order per extension
    pub fn register(&mut self, parser: Arc<dyn ReportParser>) {
        for ext in parser.supported_extensions() {
            self.extension_map
                .entry((*ext).to_string())
                .or_default()
                .push(Arc::clone(&parser));
        }
        self.parsers.push(parser);
    }

    /// Find the first registered parser whose probe accepts the file
    pub fn find_parser(&self, path: &Path) -> ParserResult<Arc<dyn ReportParser>> {
        let extension = file_extension(path).ok_or_else(|| ParserError::UnsupportedType {
            extension: String::new(),
        })?;

        let candidates =
            self.extension_map
                .get(&extension)
                .ok_or_else(|| ParserError::UnsupportedType {
                    extension: extension.clone(),
                })?;

        for parser in candidates {
            if parser.can_parse(path) {
                debug!(
                    "Selected {} parser for {}",
                    parser.tool_type(),
                    path.display()
                );
                return Ok(Arc::clone(parser));
            }
        }

        Err(ParserError::NoParser {
            path: path.display().to_string(),
        })
    }

    /// Get a parser by tool type
    pub fn get_parser(&self, tool_type: ToolType) -> Option<Arc<dyn ReportParser>> {
        self.parsers
            .iter()
            .find(|p| p.tool_type() == tool_type)
            .cloned()
    }

    /// All extensions with at least one registered parser
    pub fn supported_extensions(&self) -> Vec<String> {
        let mut extensions: Vec<String> = self.extension_map.keys().cloned().collect();
        extensions.sort();
        extensions
    }
}

impl Default for ParserRegistry {
    fn default() -> Self {
        Self::with_default_parsers()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn temp_file(suffix: &str, contents: &str) -> NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(suffix).tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn test_unknown_extension() {
        let registry = ParserRegistry::with_default_parsers();
        let file = temp_file(".bin", "binary");
        let err = registry.find_parser(file.path()).unwrap_err();
        assert_eq!(err.error_code(), "UNSUPPORTED_TYPE");
    }

    #[test]
    fn test_no_parser_matches_unknown_json() {
        let registry = ParserRegistry::with_default_parsers();
        let file = temp_file(".json", r#"{"unrelated": true}"#);
        let err = registry.find_parser(file.path()).unwrap_err();
        assert_eq!(err.error_code(), "NO_PARSER");
    }

    #[test]
    fn test_dispatch_by_structure() {
        let registry = ParserRegistry::with_default_parsers();

        let groups = temp_file(
            ".json",
            r#"{"domain": "corp.local", "groups": {"Domain Admins": ["alice"]}}"#,
        );
        let parser = registry.find_parser(groups.path()).unwrap();
        assert_eq!(parser.tool_type(), ToolType::DomainAnalysis);

        let pki = temp_file(
            ".json",
            r#"{"domain": "corp.local", "certificate_templates": {}}"#,
        );
        let parser = registry.find_parser(pki.path()).unwrap();
        assert_eq!(parser.tool_type(), ToolType::PkiAudit);

        let xml = temp_file(
            ".xml",
            "<HealthcheckData><DomainFQDN>corp.local</DomainFQDN></HealthcheckData>",
        );
        let parser = registry.find_parser(xml.path()).unwrap();
        assert_eq!(parser.tool_type(), ToolType::ConfigAudit);
    }

    #[test]
    fn test_supported_extensions() {
        let registry = ParserRegistry::with_default_parsers();
        let extensions = registry.supported_extensions();
        assert!(extensions.contains(&".xml".to_string()));
        assert!(extensions.contains(&".json".to_string()));
        assert!(extensions.contains(&".csv".to_string()));
    }
}
