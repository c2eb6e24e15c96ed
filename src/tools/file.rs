//! File writing tool, confined to the sandbox.

use async_trait::async_trait;

use super::{ParamKind, Sandbox, Tool, ToolArguments, ToolDescriptor, ToolError, ToolParameter, ToolResult};

/// Write (or overwrite) a UTF-8 text file in the sandbox.
pub struct WriteFile {
    sandbox: Sandbox,
    descriptor: ToolDescriptor,
}

impl WriteFile {
    pub fn new(sandbox: Sandbox) -> Self {
        let descriptor = ToolDescriptor::new(
            "write_file",
            "Write text content to a file in the sandbox directory. Overwrites the file if it exists. \
             Use it to save reports (e.g. Markdown) or to create scripts that run_script can execute.",
        )
        .with_parameter(ToolParameter::required(
            "filename",
            ParamKind::String,
            "Plain file name, e.g. 'report.md' or 'script.py'. Directories are ignored.",
        ))
        .with_parameter(ToolParameter::required(
            "content",
            ParamKind::String,
            "Full text to write into the file",
        ));

        Self { sandbox, descriptor }
    }

    /// Write `content` to `filename` under the sandbox root.
    pub async fn write(&self, filename: &str, content: &str) -> ToolResult {
        let path = match self.sandbox.resolve(filename) {
            Ok(path) => path,
            Err(e) => return e.into(),
        };

        tracing::info!("Writing {} bytes to {}", content.len(), path.display());

        match tokio::fs::write(&path, content).await {
            Ok(()) => ToolResult::Ok(format!(
                "File '{}' written successfully ({} bytes).",
                path.display(),
                content.len()
            )),
            Err(source) => {
                tracing::warn!("Write to {} failed: {}", path.display(), source);
                ToolError::FileIo {
                    path: path.display().to_string(),
                    source,
                }
                .into()
            }
        }
    }
}

#[async_trait]
impl Tool for WriteFile {
    fn descriptor(&self) -> &ToolDescriptor {
        &self.descriptor
    }

    async fn invoke(&self, args: &ToolArguments) -> ToolResult {
        let (filename, content) = match (args.str("filename"), args.str("content")) {
            (Ok(filename), Ok(content)) => (filename, content),
            (Err(e), _) | (_, Err(e)) => return e.into(),
        };
        self.write(filename, content).await
    }
}
