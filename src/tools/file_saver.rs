//! File saver tool
//!
//! Writes model-produced content to disk. Relative paths land in a
//! timestamped session folder under the output directory, so each request
//! keeps its files together.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::io::AsyncWriteExt;

use crate::core::{Result, StepwiseError, ToolResult};
use crate::tools::tool::{optional_str, required_str, Tool};

/// Tool for saving content to local files
pub struct FileSaver {
    /// Root for relative paths
    output_dir: PathBuf,
    /// Current session folder name, created lazily
    session: Mutex<Option<String>>,
}

impl FileSaver {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            session: Mutex::new(None),
        }
    }

    /// Start a new session folder for the next write
    pub fn reset_session(&self) {
        if let Ok(mut session) = self.session.lock() {
            *session = None;
        }
    }

    /// Directory where relative paths are written for this session
    pub fn session_dir(&self) -> PathBuf {
        let name = match self.session.lock() {
            Ok(mut session) => session
                .get_or_insert_with(|| chrono::Local::now().format("%Y%m%d_%H%M%S").to_string())
                .clone(),
            Err(_) => "session".to_string(),
        };
        self.output_dir.join(name)
    }

    fn resolve(&self, file_path: &str, output_dir: Option<&str>) -> PathBuf {
        let path = Path::new(file_path);
        if path.is_absolute() {
            return path.to_path_buf();
        }
        match output_dir {
            Some(dir) => PathBuf::from(dir).join(path),
            None => self.session_dir().join(path),
        }
    }
}

#[async_trait]
impl Tool for FileSaver {
    fn name(&self) -> &str {
        "file_saver"
    }

    fn description(&self) -> &str {
        "Save content to a local file at a specified path. Use this tool when you need to save text, code, or generated content to a file. Always provide both 'content' and 'file_path'. Relative paths are saved in the output directory."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "content": {
                    "type": "string",
                    "description": "(required) The content to save to the file."
                },
                "file_path": {
                    "type": "string",
                    "description": "(required) The path where the file should be saved, including filename and extension."
                },
                "mode": {
                    "type": "string",
                    "description": "(optional) 'w' to overwrite (default) or 'a' to append.",
                    "enum": ["w", "a"],
                    "default": "w"
                },
                "output_dir": {
                    "type": "string",
                    "description": "(optional) Directory for relative paths instead of the session folder."
                }
            },
            "required": ["content", "file_path"]
        })
    }

    async fn execute(&self, args: Value) -> Result<ToolResult> {
        let content = match args.get("content") {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Null) | None => {
                return Err(StepwiseError::tool("Missing 'content' argument"))
            }
            Some(other) => other.to_string(),
        };
        let file_path = required_str(&args, "file_path")?.trim();
        if file_path.is_empty() {
            return Err(StepwiseError::tool("'file_path' must be a non-empty string"));
        }
        let append = match optional_str(&args, "mode").unwrap_or("w") {
            "w" => false,
            "a" => true,
            other => {
                return Err(StepwiseError::tool(format!(
                    "Invalid mode '{}': use 'w' or 'a'",
                    other
                )))
            }
        };

        let path = self.resolve(file_path, optional_str(&args, "output_dir"));
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .append(append)
            .truncate(!append)
            .open(&path)
            .await?;
        file.write_all(content.as_bytes()).await?;
        file.flush().await?;

        tracing::info!(path = %path.display(), bytes = content.len(), "Saved file");
        Ok(ToolResult::success(format!(
            "Content successfully saved to {}",
            path.display()
        )))
    }
}
