use std::fmt;
use std::sync::{Arc, LazyLock};

use regex::Regex;

type NameFn = Arc<dyn Fn(&str) -> String + Send + Sync>;

static CAMEL_BOUNDARY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([a-z0-9])([A-Z])").expect("static regex"));

/// Symmetric identifier conversion: applied to outgoing identifiers before quoting and to
/// incoming result column names after decoding.
#[derive(Clone)]
pub struct NameTransform {
    outgoing: NameFn,
    incoming: NameFn,
}

impl NameTransform {
    pub fn new<O, I>(outgoing: O, incoming: I) -> Self
    where
        O: Fn(&str) -> String + Send + Sync + 'static,
        I: Fn(&str) -> String + Send + Sync + 'static,
    {
        Self {
            outgoing: Arc::new(outgoing),
            incoming: Arc::new(incoming),
        }
    }

    /// `camelCase` in application code, `snake_case` in the database.
    #[must_use]
    pub fn camel_snake() -> Self {
        Self::new(to_snake_case, to_camel_case)
    }

    #[must_use]
    pub fn outgoing(&self, name: &str) -> String {
        (self.outgoing)(name)
    }

    #[must_use]
    pub fn incoming(&self, name: &str) -> String {
        (self.incoming)(name)
    }
}

impl fmt::Debug for NameTransform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NameTransform").finish_non_exhaustive()
    }
}

/// `userId` -> `user_id`.
#[must_use]
pub fn to_snake_case(name: &str) -> String {
    CAMEL_BOUNDARY
        .replace_all(name, "${1}_${2}")
        .to_lowercase()
}

/// `user_id` -> `userId`. Leading underscores are kept.
#[must_use]
pub fn to_camel_case(name: &str) -> String {
    let trimmed = name.trim_start_matches('_');
    let mut out = String::with_capacity(name.len());
    out.push_str(&name[..name.len() - trimmed.len()]);
    let mut upper_next = false;
    for ch in trimmed.chars() {
        if ch == '_' {
            upper_next = true;
        } else if upper_next {
            out.extend(ch.to_uppercase());
            upper_next = false;
        } else {
            out.push(ch);
        }
    }
    out
}
