//! Template library abstraction.
//!
//! A template library stores named container layout documents. Fetching is
//! best effort: callers fall back to a built-in layout on any failure.

use async_trait::async_trait;
use bytes::Bytes;

use crate::Result;

/// Trait for container layout stores.
#[async_trait]
pub trait TemplateLibrary: Send + Sync {
    /// Fetch the raw layout document stored under `name`.
    async fn fetch(&self, name: &str) -> Result<Bytes>;
}
