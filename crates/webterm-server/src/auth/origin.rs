//! Origin allow-list for browser upgrade requests.

/// Origins allowed to open a terminal.
///
/// Built once from configuration. Comparison ignores ASCII case and a
/// trailing `/`; a `*` entry allows every origin.
#[derive(Debug, Clone)]
pub struct OriginPolicy {
    allow_any: bool,
    allowed: Vec<String>,
}

impl OriginPolicy {
    pub fn new<S: AsRef<str>>(origins: &[S]) -> Self {
        let allow_any = origins.iter().any(|o| o.as_ref().trim() == "*");
        let allowed = origins
            .iter()
            .map(|o| normalize(o.as_ref()))
            .filter(|o| !o.is_empty() && o != "*")
            .collect();
        Self { allow_any, allowed }
    }

    /// Whether a request declaring `origin` may upgrade.
    ///
    /// A missing `Origin` header means a non-browser or same-origin client
    /// and is permitted.
    pub fn permits(&self, origin: Option<&str>) -> bool {
        let Some(origin) = origin else {
            return true;
        };
        if self.allow_any {
            return true;
        }
        let origin = normalize(origin);
        self.allowed.iter().any(|allowed| *allowed == origin)
    }
}

fn normalize(origin: &str) -> String {
    origin.trim().trim_end_matches('/').to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_origin_is_permitted() {
        let policy = OriginPolicy::new(&["http://localhost:3000"]);
        assert!(policy.permits(None));
    }

    #[test]
    fn exact_and_normalized_matches() {
        let policy = OriginPolicy::new(&["http://localhost:3000", "https://Admin.Example.com/"]);
        assert!(policy.permits(Some("http://localhost:3000")));
        assert!(policy.permits(Some("http://localhost:3000/")));
        assert!(policy.permits(Some("https://admin.example.com")));
        assert!(!policy.permits(Some("http://localhost:3001")));
        assert!(!policy.permits(Some("https://localhost:3000")));
        assert!(!policy.permits(Some("http://evil.example")));
        assert!(!policy.permits(Some("")));
    }

    #[test]
    fn wildcard() {
        let policy = OriginPolicy::new(&["*"]);
        assert!(policy.permits(Some("http://anything.test")));
    }

    #[test]
    fn empty_list_allows_only_missing_origin() {
        let policy = OriginPolicy::new::<&str>(&[]);
        assert!(policy.permits(None));
        assert!(!policy.permits(Some("http://localhost:3000")));
    }
}
