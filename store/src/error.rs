use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("failed to open store directory {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read collection {collection}: {source}")]
    Read {
        collection: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to append to collection {collection}: {source}")]
    Write {
        collection: String,
        #[source]
        source: std::io::Error,
    },

    #[error("corrupt record in {collection} at line {line}: {source}")]
    Corrupt {
        collection: String,
        line: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error("record not found: {id}")]
    NotFound { id: String },
}
