//! Policy information point and attribute finder specifications.

use crate::invocation::AttributeFinderInvocation;

/// How a finder specification relates to a concrete invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchKind {
    /// Non-variadic finder with exactly the invocation's argument count.
    ExactMatch,
    /// Variadic finder accepting the invocation's argument count.
    VarargsMatch,
    NoMatch,
}

/// One attribute entry point a PIP offers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeFinderSpecification {
    /// Dot-separated attribute name.
    pub attribute_name: String,
    /// Number of declared arguments (the minimum for variadic finders).
    pub arity: usize,
    pub variadic: bool,
}

impl AttributeFinderSpecification {
    pub fn exact(attribute_name: impl Into<String>, arity: usize) -> Self {
        AttributeFinderSpecification {
            attribute_name: attribute_name.into(),
            arity,
            variadic: false,
        }
    }

    pub fn varargs(attribute_name: impl Into<String>, min_arity: usize) -> Self {
        AttributeFinderSpecification {
            attribute_name: attribute_name.into(),
            arity: min_arity,
            variadic: true,
        }
    }

    /// Match this finder against an invocation.
    pub fn matches(&self, invocation: &AttributeFinderInvocation) -> MatchKind {
        if self.attribute_name != invocation.attribute_name {
            return MatchKind::NoMatch;
        }
        let argc = invocation.arguments.len();
        if self.variadic {
            if argc >= self.arity {
                MatchKind::VarargsMatch
            } else {
                MatchKind::NoMatch
            }
        } else if argc == self.arity {
            MatchKind::ExactMatch
        } else {
            MatchKind::NoMatch
        }
    }

    /// Whether two finders claim the same signature. Exact and variadic
    /// finders on the same name coexist; the exact one wins at resolution.
    pub fn collides_with(&self, other: &AttributeFinderSpecification) -> bool {
        self.attribute_name == other.attribute_name
            && self.variadic == other.variadic
            && (self.variadic || self.arity == other.arity)
    }
}

/// A PIP's registration metadata: its name and the finders it serves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyInformationPointSpecification {
    pub name: String,
    pub description: String,
    pub finders: Vec<AttributeFinderSpecification>,
}

impl PolicyInformationPointSpecification {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        PolicyInformationPointSpecification {
            name: name.into(),
            description: description.into(),
            finders: Vec::new(),
        }
    }

    pub fn with_finder(mut self, finder: AttributeFinderSpecification) -> Self {
        self.finders.push(finder);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::invocation::InvocationContext;
    use arbiter_core::Value;
    use arbiter_interchange::AuthorizationSubscription;
    use std::time::Duration;

    fn invocation(name: &str, argc: usize) -> AttributeFinderInvocation {
        AttributeFinderInvocation {
            configuration_id: "cfg".to_string(),
            attribute_name: name.to_string(),
            entity: None,
            arguments: (0..argc).map(|i| Value::number(i as i64)).collect(),
            initial_timeout: Duration::from_millis(500),
            poll_interval: Duration::from_millis(50),
            backoff: Duration::from_secs(1),
            retries: 0,
            fresh: false,
            ctx: InvocationContext::new(
                AuthorizationSubscription::new(
                    Value::text("s"),
                    Value::text("a"),
                    Value::text("r"),
                ),
                Value::Undefined,
            ),
        }
    }

    #[test]
    fn exact_matching() {
        let finder = AttributeFinderSpecification::exact("time.now", 0);
        assert_eq!(finder.matches(&invocation("time.now", 0)), MatchKind::ExactMatch);
        assert_eq!(finder.matches(&invocation("time.now", 1)), MatchKind::NoMatch);
        assert_eq!(finder.matches(&invocation("geo.here", 0)), MatchKind::NoMatch);
    }

    #[test]
    fn varargs_matching_accepts_at_least_min_arity() {
        let finder = AttributeFinderSpecification::varargs("time.now", 1);
        assert_eq!(finder.matches(&invocation("time.now", 0)), MatchKind::NoMatch);
        assert_eq!(finder.matches(&invocation("time.now", 1)), MatchKind::VarargsMatch);
        assert_eq!(finder.matches(&invocation("time.now", 4)), MatchKind::VarargsMatch);
    }

    #[test]
    fn collision_rules() {
        let exact0 = AttributeFinderSpecification::exact("a.b", 0);
        let exact0_dup = AttributeFinderSpecification::exact("a.b", 0);
        let exact1 = AttributeFinderSpecification::exact("a.b", 1);
        let varargs = AttributeFinderSpecification::varargs("a.b", 0);
        let varargs_dup = AttributeFinderSpecification::varargs("a.b", 2);

        assert!(exact0.collides_with(&exact0_dup));
        assert!(!exact0.collides_with(&exact1));
        assert!(!exact0.collides_with(&varargs));
        assert!(varargs.collides_with(&varargs_dup));
    }
}
