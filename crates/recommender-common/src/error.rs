/// Error types for the shared recommender infrastructure.
///
/// These cover the components the recommender leans on but does not own: the vector
/// store, the embedding model and outbound page fetches. Application errors live in
/// the server crate and wrap `CommonError` via `#[from]`.

#[derive(Debug, thiserror::Error)]
pub enum CommonError {
    #[error("vector db error: {0}")]
    VectorDb(String),

    #[error("embedding error: {0}")]
    Embedding(String),

    #[error("fetch error: {0}")]
    Fetch(String),
}
