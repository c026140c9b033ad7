use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid configuration: {0}")]
    Configuration(String),

    #[error(
        "unbalanced section exit: expected '{expected}' on top of the stack, found {}",
        top_label(.found.as_deref())
    )]
    UnbalancedScope {
        expected: String,
        found: Option<String>,
    },

    #[error("failed to write report to {}: {source}", path.display())]
    ReportWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to serialize report: {0}")]
    Json(#[from] serde_json::Error),
}

fn top_label(found: Option<&str>) -> String {
    match found {
        Some(name) => format!("'{name}'"),
        None => "an empty stack".to_owned(),
    }
}
