//! Glob-like tool-name matching shared by the policy filter, the approval
//! gate, and the result guard's denylist (spec §6 "Tool policy patterns").
//!
//! Three pattern forms: an exact name, a `.*`-suffixed prefix
//! (`"sandbox.*"` matches `"sandbox.read"`), and a bare `*` wildcard
//! (`"mcp:*"` matches anything starting with `"mcp:"`).

/// Resolves a short tool alias to its canonical MCP name
/// (`mcp:server.tool`), if any. External collaborator.
pub trait AliasResolver: Send + Sync {
    fn resolve(&self, short_name: &str) -> Option<String>;
}

/// An [`AliasResolver`] that never resolves anything.
pub struct NoAliases;
impl AliasResolver for NoAliases {
    fn resolve(&self, _short_name: &str) -> Option<String> {
        None
    }
}

/// Does `name` match `pattern`, per the three pattern forms above?
pub fn glob_match(pattern: &str, name: &str) -> bool {
    if let Some(prefix) = pattern.strip_suffix(".*") {
        return name == prefix || name.starts_with(&format!("{prefix}."));
    }
    if let Some(prefix) = pattern.strip_suffix('*') {
        return name.starts_with(prefix);
    }
    pattern == name
}

/// A named set of glob patterns (used for denylists, elevated-tools lists,
/// async-tools lists, and require-approval lists — all of which share this
/// matching contract).
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct PatternSet(pub Vec<String>);

impl PatternSet {
    pub fn new(patterns: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self(patterns.into_iter().map(Into::into).collect())
    }

    /// Does `name` (optionally resolved through `alias`) match any pattern
    /// in this set?
    pub fn matches(&self, name: &str, alias: &dyn AliasResolver) -> bool {
        if self.0.iter().any(|p| glob_match(p, name)) {
            return true;
        }
        if let Some(canonical) = alias.resolve(name) {
            return self.0.iter().any(|p| glob_match(p, &canonical));
        }
        false
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_match() {
        assert!(glob_match("search", "search"));
        assert!(!glob_match("search", "search2"));
    }

    #[test]
    fn prefix_dot_star_match() {
        assert!(glob_match("sandbox.*", "sandbox.read"));
        assert!(glob_match("sandbox.*", "sandbox"));
        assert!(!glob_match("sandbox.*", "sandboxed"));
    }

    #[test]
    fn bare_star_match() {
        assert!(glob_match("mcp:*", "mcp:server.tool"));
        assert!(!glob_match("mcp:*", "local:tool"));
    }

    #[test]
    fn pattern_set_resolves_alias() {
        struct Alias;
        impl AliasResolver for Alias {
            fn resolve(&self, short_name: &str) -> Option<String> {
                if short_name == "search" {
                    Some("mcp:web.search".into())
                } else {
                    None
                }
            }
        }
        let set = PatternSet::new(["mcp:*"]);
        assert!(set.matches("search", &Alias));
        assert!(!set.matches("search", &NoAliases));
    }
}
