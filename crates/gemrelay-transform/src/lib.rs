pub mod request;
pub mod response;
pub mod stream;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TranslateError {
    /// Nothing translatable was left after dropping unsupported shapes.
    #[error("request contains no translatable content")]
    EmptyRequest,
}
