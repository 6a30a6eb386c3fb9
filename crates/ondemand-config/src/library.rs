//! Template library implementations.

use async_trait::async_trait;
use bytes::Bytes;
use ondemand_core::template::TemplateLibrary;
use ondemand_core::{Error, Result};
use regex::Regex;
use std::path::PathBuf;
use std::sync::{Arc, LazyLock};
use tracing::debug;
use url::Url;

use crate::{ConfigError, ConfigResult};

/// File extension of layout documents.
pub const LAYOUT_EXTENSION: &str = "kdl";

static NAME_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._-]*$").unwrap());

/// Layout names are plain identifiers; anything path-like is refused.
fn check_name(name: &str) -> Result<()> {
    if NAME_REGEX.is_match(name) && !name.contains("..") {
        Ok(())
    } else {
        Err(Error::Validation(format!("invalid layout name '{}'", name)))
    }
}

/// Layouts stored as `<root>/<name>.kdl`.
pub struct DirectoryLibrary {
    root: PathBuf,
}

impl DirectoryLibrary {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl TemplateLibrary for DirectoryLibrary {
    async fn fetch(&self, name: &str) -> Result<Bytes> {
        check_name(name)?;
        let path = self.root.join(format!("{}.{}", name, LAYOUT_EXTENSION));
        debug!(path = %path.display(), "Reading layout");

        tokio::fs::read(&path)
            .await
            .map(Bytes::from)
            .map_err(|e| Error::TemplateLibrary(format!("{}: {}", path.display(), e)))
    }
}

/// Layouts served as `<base>/<name>.kdl`.
pub struct HttpLibrary {
    client: reqwest::Client,
    base: Url,
}

impl HttpLibrary {
    pub fn new(base: Url) -> Self {
        Self {
            client: reqwest::Client::new(),
            base,
        }
    }

    fn url_for(&self, name: &str) -> Result<Url> {
        let file = format!("{}.{}", urlencoding::encode(name), LAYOUT_EXTENSION);
        self.base
            .join(&file)
            .map_err(|e| Error::TemplateLibrary(format!("invalid layout url: {}", e)))
    }
}

#[async_trait]
impl TemplateLibrary for HttpLibrary {
    async fn fetch(&self, name: &str) -> Result<Bytes> {
        check_name(name)?;
        let url = self.url_for(name)?;
        debug!(url = %url, "Fetching layout");

        let response = self
            .client
            .get(url.clone())
            .header("User-Agent", "ondemand-scheduler")
            .send()
            .await
            .map_err(|e| Error::TemplateLibrary(e.to_string()))?;

        if !response.status().is_success() {
            return Err(Error::TemplateLibrary(format!(
                "{} returned {}",
                url,
                response.status()
            )));
        }

        response
            .bytes()
            .await
            .map_err(|e| Error::TemplateLibrary(e.to_string()))
    }
}

/// Open a library from a directory path or an http(s) base URL.
///
/// The base URL is treated as a directory: a missing trailing slash is added
/// so that joining a layout name keeps the last path segment.
pub fn open_library(location: &str) -> ConfigResult<Arc<dyn TemplateLibrary>> {
    if location.starts_with("http://") || location.starts_with("https://") {
        let mut base = location.to_string();
        if !base.ends_with('/') {
            base.push('/');
        }
        let url = Url::parse(&base).map_err(|e| ConfigError::InvalidValue {
            field: "template-library".to_string(),
            message: e.to_string(),
        })?;
        Ok(Arc::new(HttpLibrary::new(url)))
    } else {
        Ok(Arc::new(DirectoryLibrary::new(location)))
    }
}
