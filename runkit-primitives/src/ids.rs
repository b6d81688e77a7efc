//! Run identifiers.

use std::fmt::{self, Display, Formatter};

use uuid::Uuid;

/// Random identifier attached to one batch run so its per-operation logs
/// correlate.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct RunId(Uuid);

impl RunId {
    /// Generates a fresh v4 identifier.
    #[must_use]
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Display for RunId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn runs_get_distinct_hyphenated_ids() {
        let first = RunId::random();
        let second = RunId::random();
        assert_ne!(first, second);
        assert_eq!(first.to_string().len(), 36);
    }
}
