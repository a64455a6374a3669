//! T-SQL quoting.

use std::fmt;

/// A T-SQL Unicode string literal wrapper.
///
/// Display writes the value as `N'...'`, doubling embedded quotes.
///
/// # Example
/// ```
/// use plinth::sql::Lit;
/// assert_eq!(format!("{}", Lit("foo")), "N'foo'");
/// assert_eq!(format!("{}", Lit("it's")), "N'it''s'");
/// ```
pub struct Lit<T: AsRef<str>>(pub T);

impl<T: AsRef<str>> fmt::Display for Lit<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("N'")?;
        for c in self.0.as_ref().chars() {
            if c == '\'' {
                f.write_str("''")?;
            } else {
                write!(f, "{c}")?;
            }
        }
        f.write_str("'")
    }
}

/// A T-SQL identifier wrapper.
///
/// Display writes the value in square brackets, doubling any `]`.
///
/// # Example
/// ```
/// use plinth::sql::Ident;
/// assert_eq!(format!("{}", Ident("user")), "[user]");
/// assert_eq!(format!("{}", Ident("odd]name")), "[odd]]name]");
/// ```
pub struct Ident<T: AsRef<str>>(pub T);

impl<T: AsRef<str>> fmt::Display for Ident<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[")?;
        for c in self.0.as_ref().chars() {
            if c == ']' {
                f.write_str("]]")?;
            } else {
                write!(f, "{c}")?;
            }
        }
        f.write_str("]")
    }
}

/// Quote a list of identifiers as `[a], [b]`.
pub fn ident_list<T: AsRef<str>>(names: &[T]) -> String {
    names
        .iter()
        .map(|n| Ident(n.as_ref()).to_string())
        .collect::<Vec<_>>()
        .join(", ")
}
