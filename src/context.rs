//! Request context forwarded to collaborators

use std::collections::HashMap;

/// Opaque carrier for caller identity and cancellation hints.
///
/// The packing core forwards a context unchanged to the envelope key
/// provider and the data loader; it never inspects the contents itself.
/// Providers may use it to verify access and reject a request, loaders to
/// propagate deadlines to their backing store.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    values: HashMap<String, String>,
}

impl RequestContext {
    /// Create an empty context
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a named value, returning the updated context
    pub fn with_value(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }

    /// Look up a named value
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_values() {
        let ctx = RequestContext::new().with_value("caller", "svc-audit");
        assert_eq!(ctx.get("caller"), Some("svc-audit"));
        assert_eq!(ctx.get("missing"), None);
    }
}
