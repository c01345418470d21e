//! File-writing tools offered to the model.
//!
//! Every tool writes inside a single output directory. Failures are
//! reported back to the model as text and never abort the job.

use super::ollama::ToolDef;
use serde_json::{json, Map, Value};
use std::path::{Component, Path, PathBuf};
use tracing::{info, warn};

pub struct OutputTools {
    dir: PathBuf,
}

impl OutputTools {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        OutputTools { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn definitions() -> Vec<ToolDef> {
        vec![
            ToolDef::function(
                "write_text",
                "Write plain text to a file in the output directory.",
                json!({
                    "type": "object",
                    "properties": {
                        "filename": {"type": "string"},
                        "data": {"type": "string"}
                    },
                    "required": ["filename", "data"]
                }),
            ),
            ToolDef::function(
                "write_json",
                "Write any JSON value, pretty-printed, to a file in the output directory.",
                json!({
                    "type": "object",
                    "properties": {
                        "filename": {"type": "string"},
                        "data": {}
                    },
                    "required": ["filename", "data"]
                }),
            ),
            ToolDef::function(
                "write_csv",
                "Write a list of objects as CSV. Headers default to the keys of the first row.",
                json!({
                    "type": "object",
                    "properties": {
                        "filename": {"type": "string"},
                        "data": {"type": "array", "items": {"type": "object"}},
                        "headers": {"type": "array", "items": {"type": "string"}}
                    },
                    "required": ["filename", "data"]
                }),
            ),
        ]
    }

    /// Run the named tool and return the message to hand back to the model.
    pub async fn call(&self, name: &str, args: &Value) -> String {
        let result = match name {
            "write_text" => self.write_text(args).await,
            "write_json" => self.write_json(args).await,
            "write_csv" => self.write_csv(args).await,
            other => Err(format!("unknown tool '{other}'")),
        };

        match result {
            Ok(message) => message,
            Err(e) => {
                warn!(tool = name, error = %e, "Tool call failed");
                format!("Error: {e}")
            }
        }
    }

    async fn write_text(&self, args: &Value) -> Result<String, String> {
        let filename = str_arg(args, "filename")?;
        let data = str_arg(args, "data")?;
        if data.is_empty() {
            return Ok("No data to write in the file".to_string());
        }

        let path = self.write(filename, data.as_bytes()).await?;
        Ok(format!("Text successfully written to {}", path.display()))
    }

    async fn write_json(&self, args: &Value) -> Result<String, String> {
        let filename = str_arg(args, "filename")?;
        let data = args.get("data").unwrap_or(&Value::Null);
        if is_blank(data) {
            return Ok("No data to write in the file".to_string());
        }

        let body = serde_json::to_string_pretty(data).map_err(|e| e.to_string())?;
        let path = self.write(filename, body.as_bytes()).await?;
        Ok(format!("Json successfully written to {}", path.display()))
    }

    async fn write_csv(&self, args: &Value) -> Result<String, String> {
        let filename = str_arg(args, "filename")?;
        let filename = if filename.ends_with(".csv") {
            filename.to_string()
        } else {
            format!("{filename}.csv")
        };

        let rows: Vec<&Map<String, Value>> = match args.get("data") {
            Some(Value::Array(items)) => items
                .iter()
                .map(|item| item.as_object().ok_or("every row must be an object"))
                .collect::<Result<_, _>>()?,
            _ => return Err("'data' must be an array of objects".to_string()),
        };
        let Some(first) = rows.first() else {
            return Err("No data provided to write.".to_string());
        };

        let headers: Vec<String> = match args.get("headers") {
            Some(Value::Array(names)) if !names.is_empty() => names
                .iter()
                .map(|n| n.as_str().map(str::to_string).ok_or("headers must be strings"))
                .collect::<Result<_, _>>()?,
            _ => first.keys().cloned().collect(),
        };

        let mut out = String::new();
        push_record(&mut out, headers.iter().map(String::as_str));
        for row in &rows {
            let cells: Vec<String> = headers
                .iter()
                .map(|h| row.get(h).map(cell).unwrap_or_default())
                .collect();
            push_record(&mut out, cells.iter().map(String::as_str));
        }

        let path = self.write(&filename, out.as_bytes()).await?;
        info!(rows = rows.len(), path = %path.display(), "Wrote CSV");
        Ok(format!("CSV successfully written to {}", path.display()))
    }

    async fn write(&self, filename: &str, contents: &[u8]) -> Result<PathBuf, String> {
        let path = self.resolve(filename)?;
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| format!("cannot create {}: {e}", self.dir.display()))?;
        tokio::fs::write(&path, contents)
            .await
            .map_err(|e| format!("cannot write {}: {e}", path.display()))?;

        info!(path = %path.display(), bytes = contents.len(), "Tool wrote file");
        Ok(path)
    }

    /// Map a model-supplied filename into the output directory. Only a
    /// single plain path component is accepted.
    fn resolve(&self, filename: &str) -> Result<PathBuf, String> {
        let mut components = Path::new(filename).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(name)), None) if !filename.contains(['/', '\\']) => {
                Ok(self.dir.join(name))
            }
            _ => Err(format!("invalid filename '{filename}'")),
        }
    }
}

fn str_arg<'a>(args: &'a Value, key: &str) -> Result<&'a str, String> {
    args.get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| format!("missing string argument '{key}'"))
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
        _ => false,
    }
}

fn cell(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn push_record<'a>(out: &mut String, fields: impl Iterator<Item = &'a str>) {
    for (i, field) in fields.enumerate() {
        if i > 0 {
            out.push(',');
        }
        if field.contains([',', '"', '\n', '\r']) {
            out.push('"');
            out.push_str(&field.replace('"', "\"\""));
            out.push('"');
        } else {
            out.push_str(field);
        }
    }
    out.push_str("\r\n");
}
