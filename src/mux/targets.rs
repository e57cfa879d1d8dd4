/// Channel input of subscribe/unsubscribe calls.
///
/// The shape is preserved through the call: a single channel yields a
/// single id, a list yields a list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Targets {
    One(String),
    Many(Vec<String>),
}

impl Targets {
    pub fn is_single(&self) -> bool {
        matches!(self, Targets::One(_))
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Targets::One(s) => s.is_empty(),
            Targets::Many(v) => v.is_empty(),
        }
    }

    pub fn into_vec(self) -> Vec<String> {
        match self {
            Targets::One(s) => vec![s],
            Targets::Many(v) => v,
        }
    }

    pub fn as_slice(&self) -> &[String] {
        match self {
            Targets::One(s) => std::slice::from_ref(s),
            Targets::Many(v) => v,
        }
    }
}

impl From<&str> for Targets {
    fn from(s: &str) -> Self {
        Targets::One(s.to_string())
    }
}

impl From<String> for Targets {
    fn from(s: String) -> Self {
        Targets::One(s)
    }
}

impl From<&String> for Targets {
    fn from(s: &String) -> Self {
        Targets::One(s.clone())
    }
}

impl From<Vec<String>> for Targets {
    fn from(v: Vec<String>) -> Self {
        Targets::Many(v)
    }
}

impl From<Vec<&str>> for Targets {
    fn from(v: Vec<&str>) -> Self {
        Targets::Many(v.into_iter().map(str::to_string).collect())
    }
}

impl From<&[&str]> for Targets {
    fn from(v: &[&str]) -> Self {
        Targets::Many(v.iter().map(|s| s.to_string()).collect())
    }
}

impl From<&[String]> for Targets {
    fn from(v: &[String]) -> Self {
        Targets::Many(v.to_vec())
    }
}

impl<const N: usize> From<[&str; N]> for Targets {
    fn from(v: [&str; N]) -> Self {
        Targets::Many(v.iter().map(|s| s.to_string()).collect())
    }
}
