use std::{fmt, sync::Arc};

/// A subscription target: an exact channel name or a glob pattern.
///
/// The two namespaces never collide: `Literal("a*")` and `Pattern("a*")`
/// are different subscriptions, issued with different wire commands.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ChannelSpec {
    Literal(Arc<str>),
    Pattern(Arc<str>),
}

impl ChannelSpec {
    pub fn literal(name: impl Into<Arc<str>>) -> Self {
        Self::Literal(name.into())
    }

    pub fn pattern(glob: impl Into<Arc<str>>) -> Self {
        Self::Pattern(glob.into())
    }

    /// Infers the variant from the text: anything containing `*` is a
    /// pattern. `?` and `[` are legal in channel names, so globs using only
    /// those must go through [`ChannelSpec::pattern`].
    pub fn parse(raw: &str) -> Self {
        if raw.contains('*') {
            Self::Pattern(Arc::from(raw))
        } else {
            Self::Literal(Arc::from(raw))
        }
    }

    /// The channel name or glob text.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Literal(s) | Self::Pattern(s) => s,
        }
    }

    pub fn is_pattern(&self) -> bool {
        matches!(self, Self::Pattern(_))
    }

    /// One-letter tag used inside subscription ids.
    pub fn tag(&self) -> char {
        match self {
            Self::Literal(_) => 'L',
            Self::Pattern(_) => 'P',
        }
    }

    /// Wire verbs used to (un)subscribe this spec.
    pub fn subscribe_verb(&self) -> &'static str {
        match self {
            Self::Literal(_) => "SUBSCRIBE",
            Self::Pattern(_) => "PSUBSCRIBE",
        }
    }

    pub fn unsubscribe_verb(&self) -> &'static str {
        match self {
            Self::Literal(_) => "UNSUBSCRIBE",
            Self::Pattern(_) => "PUNSUBSCRIBE",
        }
    }
}

impl fmt::Display for ChannelSpec {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "{}:{}", self.tag(), self.as_str())
    }
}
