use std::sync::Arc;

use url::Url;

use super::error::QueryError;

/// Server URL plus query parameters.
///
/// The query list is shared between clones and copied on the first write,
/// so every query derived from a base starts from the same state without
/// seeing later changes made through another clone.
#[derive(Debug, Clone)]
pub struct Params {
    server: Url,
    query: Arc<Vec<(String, String)>>,
}

impl Params {
    pub fn new(server: Url) -> Self {
        let query = server
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        let mut server = server;
        server.set_query(None);
        Self {
            server,
            query: Arc::new(query),
        }
    }

    pub fn parse(url: &str) -> Result<Self, QueryError> {
        let server = Url::parse(url).map_err(|source| QueryError::InvalidUrl {
            url: url.to_string(),
            source,
        })?;
        Ok(Self::new(server))
    }

    pub fn server(&self) -> &Url {
        &self.server
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.query.iter().any(|(k, _)| k == key)
    }

    pub fn pairs(&self) -> &[(String, String)] {
        &self.query
    }

    /// Sets `key`, dropping any previous values for it.
    pub fn set(&mut self, key: impl Into<String>, value: impl ToString) {
        let key = key.into();
        let query = Arc::make_mut(&mut self.query);
        query.retain(|(k, _)| *k != key);
        query.push((key, value.to_string()));
    }

    /// Adds another value for `key`.
    pub fn append(&mut self, key: impl Into<String>, value: impl ToString) {
        Arc::make_mut(&mut self.query).push((key.into(), value.to_string()));
    }

    pub fn remove(&mut self, key: &str) {
        if self.contains(key) {
            Arc::make_mut(&mut self.query).retain(|(k, _)| k != key);
        }
    }

    pub fn with(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.set(key, value);
        self
    }

    /// Resolves `path` against the server URL and appends the query.
    ///
    /// Absolute URLs are used as given, without the server or its query.
    /// Query parameters already present in `path` are kept.
    pub fn url(&self, path: &str) -> Result<Url, QueryError> {
        let absolute = path.starts_with("http://") || path.starts_with("https://");
        let target = if absolute {
            path.to_string()
        } else {
            format!(
                "{}/{}",
                self.server.as_str().trim_end_matches('/'),
                path.trim_start_matches('/')
            )
        };
        let mut url = Url::parse(&target).map_err(|source| QueryError::InvalidUrl {
            url: target.clone(),
            source,
        })?;
        if !absolute && !self.query.is_empty() {
            url.query_pairs_mut()
                .extend_pairs(self.query.iter().map(|(k, v)| (k.as_str(), v.as_str())));
        }
        Ok(url)
    }
}
