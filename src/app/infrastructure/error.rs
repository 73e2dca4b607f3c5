use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Settings error: {0}")]
    Settings(String),
}

/// Convenience type alias for Results with AppError
pub type Result<T> = std::result::Result<T, AppError>;

/// Failure of a single plugin. The `Display` output is what gets recorded in
/// the per-spec error map shown to the note author.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PluginError {
    #[error("plugin source is empty")]
    EmptySource,

    #[error("plugin must return a table, got {0}")]
    NotATable(String),

    #[error("{0}")]
    Script(String),

    #[error("use() failed: {0}")]
    Use(String),
}

impl PluginError {
    pub fn script(err: &mlua::Error) -> Self {
        Self::Script(lua_error_message(err))
    }

    pub fn use_failed(err: &mlua::Error) -> Self {
        Self::Use(lua_error_message(err))
    }
}

/// Reduce an mlua error to its first meaningful line (no traceback).
pub fn lua_error_message(err: &mlua::Error) -> String {
    match err {
        mlua::Error::CallbackError { cause, .. } => lua_error_message(cause),
        mlua::Error::RuntimeError(msg) | mlua::Error::SyntaxError { message: msg, .. } => {
            first_line(msg)
        }
        mlua::Error::MemoryError(msg) => format!("out of memory: {}", first_line(msg)),
        other => first_line(&other.to_string()),
    }
}

fn first_line(msg: &str) -> String {
    msg.lines().next().unwrap_or_default().trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let app_err: AppError = io_err.into();
        assert!(matches!(app_err, AppError::Io(_)));
        assert!(app_err.to_string().contains("file not found"));
    }

    #[test]
    fn test_error_display() {
        let err = AppError::Settings("invalid limit".to_string());
        assert_eq!(err.to_string(), "Settings error: invalid limit");

        let err = PluginError::Use("boom".to_string());
        assert_eq!(err.to_string(), "use() failed: boom");

        let err = PluginError::NotATable("number".to_string());
        assert_eq!(err.to_string(), "plugin must return a table, got number");
    }

    #[test]
    fn test_lua_error_message_drops_traceback() {
        let err = mlua::Error::RuntimeError("[string \"p\"]:1: boom\nstack traceback:\n\t[C]: in ?".into());
        assert_eq!(lua_error_message(&err), "[string \"p\"]:1: boom");
    }
}
