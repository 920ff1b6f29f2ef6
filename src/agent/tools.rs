//! Tool definitions for specialist agents.
//!
//! This module defines the read-only repository tools a remote model may
//! call while a specialist runs, and executes those calls locally. Every
//! tool is confined to the repository root, and a specialist can only call
//! the tools it declared.

use crate::error::BackendError;
use crate::models::ToolKind;
use crate::scanner::RepositoryContext;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::debug;

const DEFAULT_CONTEXT_LINES: usize = 6;
const DEFAULT_MAX_CHARS: usize = 4000;
const HEAD_SNIPPET_LINES: usize = 200;
const DEFAULT_INDEX_SAMPLE: usize = 200;

/// Tool definition in the chat-completions tool-calling format.
#[derive(Debug, Clone, Serialize)]
pub struct ToolDefinition {
    #[serde(rename = "type")]
    pub tool_type: String,
    pub function: FunctionDefinition,
}

#[derive(Debug, Clone, Serialize)]
pub struct FunctionDefinition {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// A tool call made by the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    #[serde(rename = "type", default = "function_type")]
    pub call_type: String,
    pub function: FunctionCall,
}

fn function_type() -> String {
    "function".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    /// JSON-encoded arguments, as the API sends them.
    pub arguments: String,
}

/// Result of executing a tool.
#[derive(Debug, Clone, Serialize)]
pub struct ToolResult {
    pub success: bool,
    pub output: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolResult {
    pub fn success(output: String) -> Self {
        Self {
            success: true,
            output,
            error: None,
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            output: String::new(),
            error: Some(message),
        }
    }

    /// Text handed back to the model.
    pub fn into_message(self) -> String {
        if self.success {
            self.output
        } else {
            format!("Error: {}", self.error.unwrap_or_default())
        }
    }
}

/// Executes tool calls for one specialist.
///
/// Holds no mutable state, so one executor can serve concurrent calls.
pub struct ToolExecutor {
    context: Arc<RepositoryContext>,
    allowed: Vec<ToolKind>,
}

impl ToolExecutor {
    pub fn new(context: Arc<RepositoryContext>, allowed: Vec<ToolKind>) -> Self {
        Self { context, allowed }
    }

    /// Execute a tool call.
    ///
    /// Tool-level problems (bad path, missing file) come back as an error
    /// [`ToolResult`] for the model to react to. Calling a tool outside the
    /// declared set is a hard [`BackendError::Tool`].
    pub fn execute(&self, name: &str, args: &Value) -> Result<ToolResult, BackendError> {
        let tool = ToolKind::from_name(name)
            .filter(|t| self.allowed.contains(t))
            .ok_or_else(|| BackendError::Tool {
                tool: name.to_string(),
                message: "tool not declared for this specialist".to_string(),
            })?;

        debug!("Executing tool: {} with args: {}", name, args);

        Ok(match tool {
            ToolKind::ScanRepoIndex => self.scan_repo_index(args),
            ToolKind::ListFiles => self.list_files(args),
            ToolKind::ReadCodeSnippet => self.read_code_snippet(args),
            ToolKind::SearchCode => self.search_code(args),
            ToolKind::GetFileInfo => self.get_file_info(args),
            ToolKind::LoadRulesText => {
                ToolResult::success(self.context.rules_text.clone().unwrap_or_default())
            }
        })
    }

    /// Counts by extension, optionally with a sample of paths.
    fn scan_repo_index(&self, args: &Value) -> ToolResult {
        let include_files = args
            .get("include_files")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        let max_files = args
            .get("max_files")
            .and_then(|v| v.as_u64())
            .map(|n| n as usize)
            .unwrap_or(DEFAULT_INDEX_SAMPLE);

        let mut summary = json!({
            "root": self.context.root.display().to_string(),
            "num_files": self.context.files.len(),
            "counts_by_ext": self.context.counts_by_extension(),
        });

        if include_files {
            let sample: Vec<&str> = self
                .context
                .files
                .iter()
                .take(max_files)
                .map(|f| f.path.as_str())
                .collect();
            summary["files_sample"] = json!(sample);
            summary["files_sample_truncated"] = json!(self.context.files.len() > max_files);
        }

        ToolResult::success(json!({ "summary": summary }).to_string())
    }

    /// List files in a directory.
    fn list_files(&self, args: &Value) -> ToolResult {
        let dir = args
            .get("directory")
            .and_then(|v| v.as_str())
            .unwrap_or(".");

        let Some(dir_path) = self.context.resolve(dir) else {
            return ToolResult::error("Access denied: path outside repository".to_string());
        };

        match self.context.scanner().list_directory(&dir_path) {
            Ok(entries) => ToolResult::success(entries.join("\n")),
            Err(e) => ToolResult::error(e.to_string()),
        }
    }

    /// Read a clipped snippet around a line range.
    fn read_code_snippet(&self, args: &Value) -> ToolResult {
        let path = match args.get("path").and_then(|v| v.as_str()) {
            Some(p) => p,
            None => return ToolResult::error("Missing required parameter: path".to_string()),
        };

        let Some(full_path) = self.context.resolve(path) else {
            return ToolResult::error("Access denied: path outside repository".to_string());
        };

        if !full_path.is_file() {
            return ToolResult::error(format!("File not found: {}", path));
        }

        let text = match std::fs::read(&full_path) {
            Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            Err(e) => return ToolResult::error(format!("Failed to read file: {}", e)),
        };

        let line_start = args.get("line_start").and_then(|v| v.as_u64());
        let line_end = args.get("line_end").and_then(|v| v.as_u64());
        let context_lines = args
            .get("context_lines")
            .and_then(|v| v.as_u64())
            .map(|n| n as usize)
            .unwrap_or(DEFAULT_CONTEXT_LINES);
        let max_chars = args
            .get("max_chars")
            .and_then(|v| v.as_u64())
            .map(|n| n as usize)
            .unwrap_or(DEFAULT_MAX_CHARS);

        let mut snippet = snippet_of(&text, line_start, line_end, context_lines);
        if snippet.len() > max_chars {
            let cut = floor_char_boundary(&snippet, max_chars);
            snippet.truncate(cut);
            snippet.push_str("\n[clipped]");
        }

        ToolResult::success(format!(
            "// path: {}\n{}",
            self.context.relative(&full_path),
            snippet
        ))
    }

    /// Search for a literal pattern in the indexed files.
    fn search_code(&self, args: &Value) -> ToolResult {
        let pattern = match args.get("pattern").and_then(|v| v.as_str()) {
            Some(p) if !p.is_empty() => p,
            _ => return ToolResult::error("Missing required parameter: pattern".to_string()),
        };

        let max_results = args
            .get("max_results")
            .and_then(|v| v.as_u64())
            .unwrap_or(10) as usize;

        let mut results = Vec::new();
        'files: for file in &self.context.files {
            let Ok(content) = std::fs::read_to_string(self.context.root.join(&file.path)) else {
                continue;
            };
            for (line_num, line) in content.lines().enumerate() {
                if line.contains(pattern) {
                    results.push(format!("{}:{}: {}", file.path, line_num + 1, line.trim()));
                    if results.len() >= max_results {
                        break 'files;
                    }
                }
            }
        }

        ToolResult::success(results.join("\n"))
    }

    /// Get information about a file.
    fn get_file_info(&self, args: &Value) -> ToolResult {
        let path = match args.get("path").and_then(|v| v.as_str()) {
            Some(p) => p,
            None => return ToolResult::error("Missing required parameter: path".to_string()),
        };

        let Some(full_path) = self.context.resolve(path) else {
            return ToolResult::error("Access denied: path outside repository".to_string());
        };

        let metadata = match std::fs::metadata(&full_path) {
            Ok(m) => m,
            Err(_) => return ToolResult::error(format!("File not found: {}", path)),
        };

        let language = full_path
            .extension()
            .and_then(|e| e.to_str())
            .map(|ext| match ext {
                "rs" => "Rust",
                "py" => "Python",
                "js" | "jsx" => "JavaScript",
                "ts" | "tsx" => "TypeScript",
                "go" => "Go",
                "java" => "Java",
                "c" | "h" => "C",
                "cpp" | "hpp" => "C++",
                _ => ext,
            })
            .unwrap_or("Unknown");

        let line_count = if full_path.is_file() {
            std::fs::read_to_string(&full_path)
                .map(|c| c.lines().count())
                .unwrap_or(0)
        } else {
            0
        };

        // Minimal format: lang,lines,bytes
        ToolResult::success(format!("{},{},{}", language, line_count, metadata.len()))
    }
}

/// Head of the file when no range is given, else the range plus context.
fn snippet_of(
    text: &str,
    line_start: Option<u64>,
    line_end: Option<u64>,
    context_lines: usize,
) -> String {
    let lines: Vec<&str> = text.lines().collect();
    let n = lines.len();
    if n == 0 {
        return String::new();
    }

    if line_start.is_none() && line_end.is_none() {
        return lines[..n.min(HEAD_SNIPPET_LINES)].join("\n");
    }

    let start = (line_start.or(line_end).unwrap_or(1) as usize).clamp(1, n);
    let end = (line_end.map(|e| e as usize).unwrap_or(start)).clamp(start, n);
    let from = start.saturating_sub(context_lines).max(1);
    let to = (end + context_lines).min(n);
    lines[from - 1..to].join("\n")
}

fn floor_char_boundary(s: &str, mut idx: usize) -> usize {
    while idx > 0 && !s.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

/// Definitions for the given tool set, in declaration order.
pub fn tool_definitions(tools: &[ToolKind]) -> Vec<ToolDefinition> {
    tools.iter().map(|t| definition_for(*t)).collect()
}

fn definition_for(tool: ToolKind) -> ToolDefinition {
    let (description, parameters) = match tool {
        ToolKind::ScanRepoIndex => (
            "Index repository files and return counts by type. Optionally return a sampled file list.",
            json!({
                "type": "object",
                "properties": {
                    "include_files": {"type": "boolean", "description": "Include a sample of file paths"},
                    "max_files": {"type": "integer", "description": "Maximum number of sampled paths"}
                },
                "required": []
            }),
        ),
        ToolKind::ListFiles => (
            "List files and directories in a repository directory.",
            json!({
                "type": "object",
                "properties": {
                    "directory": {"type": "string", "description": "Directory relative to repository root. Use '.' for root."}
                },
                "required": []
            }),
        ),
        ToolKind::ReadCodeSnippet => (
            "Read a small code snippet from a file with optional line range and surrounding context. Returns clipped text.",
            json!({
                "type": "object",
                "properties": {
                    "path": {"type": "string", "description": "Path relative to repository root"},
                    "line_start": {"type": "integer"},
                    "line_end": {"type": "integer"},
                    "context_lines": {"type": "integer", "description": "Lines of context around the range (default 6)"},
                    "max_chars": {"type": "integer", "description": "Clip the snippet to this many characters (default 4000)"}
                },
                "required": ["path"]
            }),
        ),
        ToolKind::SearchCode => (
            "Search for a literal text pattern in the indexed source files. Returns path:line: text matches.",
            json!({
                "type": "object",
                "properties": {
                    "pattern": {"type": "string", "description": "Text pattern to search for"},
                    "max_results": {"type": "integer", "description": "Maximum number of results (default: 10)"}
                },
                "required": ["pattern"]
            }),
        ),
        ToolKind::GetFileInfo => (
            "Get metadata about a file as language,line_count,bytes.",
            json!({
                "type": "object",
                "properties": {
                    "path": {"type": "string", "description": "Path to the file"}
                },
                "required": ["path"]
            }),
        ),
        ToolKind::LoadRulesText => (
            "Return the best-practice guidelines configured for this run.",
            json!({"type": "object", "properties": {}, "required": []}),
        ),
    };

    ToolDefinition {
        tool_type: "function".to_string(),
        function: FunctionDefinition {
            name: tool.name().to_string(),
            description: description.to_string(),
            parameters,
        },
    }
}
