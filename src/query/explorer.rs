use url::form_urlencoded;

use super::filter::Order;

/// Query options for explorer endpoints.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExplorerParams {
    query: Vec<(String, String)>,
}

impl ExplorerParams {
    pub fn new() -> Self {
        Self::default()
    }

    fn set(mut self, key: &str, value: impl ToString) -> Self {
        self.query.retain(|(k, _)| k != key);
        self.query.push((key.to_string(), value.to_string()));
        self
    }

    pub fn with_limit(self, limit: u32) -> Self {
        self.set("limit", limit)
    }

    pub fn with_offset(self, offset: u32) -> Self {
        self.set("offset", offset)
    }

    pub fn with_cursor(self, cursor: u64) -> Self {
        self.set("cursor", cursor)
    }

    pub fn with_order(self, order: Order) -> Self {
        self.set("order", order)
    }

    /// Block hash or height the view is taken at.
    pub fn with_block(self, block: impl ToString) -> Self {
        self.set("block", block)
    }

    pub fn with_since(self, block: impl ToString) -> Self {
        self.set("since", block)
    }

    /// Unpack packed bytes inside contract values.
    pub fn with_unpack(self) -> Self {
        self.set("unpack", 1)
    }

    /// Include raw primitive trees next to decoded contract values.
    pub fn with_prim(self) -> Self {
        self.set("prim", 1)
    }

    pub fn with_meta(self) -> Self {
        self.set("meta", 1)
    }

    pub fn with_merge(self) -> Self {
        self.set("merge", 1)
    }

    pub fn with_storage(self) -> Self {
        self.set("storage", 1)
    }

    pub fn with_rights(self) -> Self {
        self.set("rights", 1)
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.query.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
    }

    /// Appends the options to `path` as a query string.
    pub fn append_to(&self, path: &str) -> String {
        if self.query.is_empty() {
            return path.to_string();
        }
        let encoded = form_urlencoded::Serializer::new(String::new())
            .extend_pairs(self.query.iter())
            .finish();
        let sep = if path.contains('?') { '&' } else { '?' };
        format!("{}{}{}", path, sep, encoded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_to_path() {
        let p = ExplorerParams::new().with_limit(10).with_order(Order::Desc).with_prim();
        assert_eq!(
            p.append_to("explorer/contract/KT1x/calls"),
            "explorer/contract/KT1x/calls?limit=10&order=desc&prim=1"
        );
        assert_eq!(ExplorerParams::new().append_to("explorer/tip"), "explorer/tip");
        assert_eq!(
            ExplorerParams::new().with_cursor(5).append_to("x?prim=1"),
            "x?prim=1&cursor=5"
        );
    }

    #[test]
    fn test_set_replaces() {
        let p = ExplorerParams::new().with_limit(10).with_limit(20);
        assert_eq!(p.get("limit"), Some("20"));
    }
}
