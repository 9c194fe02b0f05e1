use std::fmt;
use std::path::PathBuf;

/// Stage of the GLSL toolchain a compile message originates from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceStage {
    Vertex,
    Fragment,
    Linker,
}

impl fmt::Display for SourceStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceStage::Vertex => write!(f, "vertex"),
            SourceStage::Fragment => write!(f, "fragment"),
            SourceStage::Linker => write!(f, "linker"),
        }
    }
}

/// One parsed line of a GL shader info log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileMessage {
    pub stage: SourceStage,
    /// 1-based line in the submitted source, 0 when the driver gave none.
    pub line: u32,
    pub message: String,
}

/// Structured result of a failed compile or link.
///
/// `messages` is what editor-style consumers annotate source lines with;
/// `raw` keeps the driver log verbatim for display.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompileLog {
    pub messages: Vec<CompileMessage>,
    pub raw: String,
}

impl CompileLog {
    pub fn stage_messages(&self, stage: SourceStage) -> impl Iterator<Item = &CompileMessage> {
        self.messages.iter().filter(move |m| m.stage == stage)
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty() && self.raw.is_empty()
    }
}

/// Engine-level errors used across resona crates.
///
/// Contract rule: this type lives in `resona-core` and is re-exported by the
/// backend crates. Programming errors (index out of range, releasing an
/// object that was never created) are `debug_assert!`s, not variants here.
#[derive(Debug)]
pub enum EngineError {
    // ---- Config / assets ----
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    Json {
        path: PathBuf,
        source: serde_json::Error,
    },

    InvalidConfig {
        path: PathBuf,
        msg: String,
    },

    // ---- Runtime-facing (backend) ----
    /// Shader compilation or linking failed; recoverable (resubmit source).
    ShaderCompile(CompileLog),
    /// GL object creation failed (FBO incomplete, zero-size texture, lost
    /// context). The failing owner must fall back to its released state.
    GlCreate(String),

    // ---- Fallback ----
    Other(String),
}

impl EngineError {
    pub fn other<T: Into<String>>(s: T) -> Self {
        EngineError::Other(s.into())
    }

    /// The structured compile log, when this is a compile error.
    pub fn compile_log(&self) -> Option<&CompileLog> {
        match self {
            EngineError::ShaderCompile(log) => Some(log),
            _ => None,
        }
    }
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::Io { path, source } => {
                write!(f, "io error at {}: {}", path.display(), source)
            }
            EngineError::Json { path, source } => {
                write!(f, "json parse error at {}: {}", path.display(), source)
            }
            EngineError::InvalidConfig { path, msg } => {
                write!(f, "invalid config at {}: {}", path.display(), msg)
            }
            EngineError::ShaderCompile(log) => match log.messages.first() {
                Some(m) => write!(
                    f,
                    "shader compile error ({} stage, line {}): {} ({} message(s))",
                    m.stage,
                    m.line,
                    m.message,
                    log.messages.len()
                ),
                None => write!(f, "shader compile error: {}", log.raw),
            },
            EngineError::GlCreate(msg) => write!(f, "backend object creation failed: {msg}"),
            EngineError::Other(msg) => write!(f, "{msg}"),
        }
    }
}

impl std::error::Error for EngineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            EngineError::Io { source, .. } => Some(source),
            EngineError::Json { source, .. } => Some(source),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compile_error_display_leads_with_first_message() {
        let err = EngineError::ShaderCompile(CompileLog {
            messages: vec![
                CompileMessage {
                    stage: SourceStage::Fragment,
                    line: 12,
                    message: "syntax error".into(),
                },
                CompileMessage {
                    stage: SourceStage::Fragment,
                    line: 14,
                    message: "undeclared identifier".into(),
                },
            ],
            raw: String::new(),
        });
        let text = err.to_string();
        assert!(text.contains("fragment"));
        assert!(text.contains("line 12"));
        assert!(text.contains("2 message(s)"));
    }

    #[test]
    fn stage_messages_filters_by_stage() {
        let log = CompileLog {
            messages: vec![
                CompileMessage {
                    stage: SourceStage::Vertex,
                    line: 1,
                    message: "a".into(),
                },
                CompileMessage {
                    stage: SourceStage::Fragment,
                    line: 2,
                    message: "b".into(),
                },
            ],
            raw: String::new(),
        };
        assert_eq!(log.stage_messages(SourceStage::Fragment).count(), 1);
        assert_eq!(log.stage_messages(SourceStage::Linker).count(), 0);
    }
}
