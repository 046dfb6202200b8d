use std::fmt;

/// Identity of one node in the event-type hierarchy.
///
/// The hierarchy is a closed world, so kind names are compile-time
/// constants. Two kinds refer to the same node exactly when their names are
/// equal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Kind(&'static str);

impl Kind {
    /// Creates a kind from its qualified name, e.g. `"users::UserCreated"`.
    pub const fn new(name: &'static str) -> Self {
        Self(name)
    }

    /// The qualified name as given at construction.
    pub const fn name(&self) -> &'static str {
        self.0
    }

    /// Deterministic lowercase hyphenated rendering of the qualified name,
    /// used as the kind's log key.
    ///
    /// `"users::UserCreated"` renders as `"users-user-created"`. Path
    /// separators and underscores become hyphens; a hyphen is inserted
    /// before an uppercase letter that follows a lowercase letter or digit.
    pub fn key(&self) -> String {
        let mut key = String::with_capacity(self.0.len() + 4);
        for (index, segment) in self.0.split("::").enumerate() {
            if index > 0 {
                key.push('-');
            }
            let mut prev_lower = false;
            for ch in segment.chars() {
                if ch == '_' {
                    key.push('-');
                    prev_lower = false;
                } else if ch.is_ascii_uppercase() {
                    if prev_lower {
                        key.push('-');
                    }
                    key.push(ch.to_ascii_lowercase());
                    prev_lower = false;
                } else {
                    key.push(ch);
                    prev_lower = ch.is_ascii_lowercase() || ch.is_ascii_digit();
                }
            }
        }
        key
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}
