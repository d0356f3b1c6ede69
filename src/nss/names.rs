/// How a domain maps query strings to stored names
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameRules {
    pub domain: String,
    pub fully_qualified: bool,
    pub case_sensitive: bool,
}

impl NameRules {
    pub fn new(domain: &str, fully_qualified: bool, case_sensitive: bool) -> Self {
        Self {
            domain: domain.to_string(),
            fully_qualified,
            case_sensitive,
        }
    }

    /// Short stored name a query refers to, if the query is acceptable at all.
    ///
    /// `name@domain` is always accepted; a bare name only when the domain
    /// does not require fully-qualified names.
    pub fn canonical(&self, query: &str) -> Option<String> {
        let base = match query.rsplit_once('@') {
            Some((base, domain)) if domain.eq_ignore_ascii_case(&self.domain) => base,
            Some(_) => return None,
            None if self.fully_qualified => return None,
            None => query,
        };
        if base.is_empty() {
            return None;
        }
        Some(if self.case_sensitive {
            base.to_string()
        } else {
            base.to_lowercase()
        })
    }

    /// Name as the daemon reports it
    pub fn display(&self, name: &str) -> String {
        if self.fully_qualified {
            format!("{}@{}", name, self.domain)
        } else {
            name.to_string()
        }
    }
}

impl Default for NameRules {
    fn default() -> Self {
        Self::new("test", false, true)
    }
}
