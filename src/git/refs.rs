use std::collections::HashSet;

use crate::error::{Error, Result};

/// A ref name and the object id it points to
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RefState {
    pub name: String,
    pub oid: String,
}

impl RefState {
    pub fn new(name: impl Into<String>, oid: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            oid: oid.into(),
        }
    }
}

/// Parse `git for-each-ref --format='%(objectname) %(refname)'` output,
/// keeping the order git produced
pub fn parse_for_each_ref(output: &str) -> Result<Vec<RefState>> {
    output
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| {
            let (oid, name) = line
                .split_once(' ')
                .ok_or_else(|| Error::Parse(format!("malformed ref line '{}'", line)))?;
            Ok(RefState::new(name.trim(), oid.trim()))
        })
        .collect()
}

/// Names of refs in `after` whose `(name, oid)` pair is absent from `before`.
/// Deleted refs are not reported.
pub fn changed_refs(before: &[RefState], after: &[RefState]) -> Vec<String> {
    let before: HashSet<&RefState> = before.iter().collect();
    after
        .iter()
        .filter(|state| !before.contains(state))
        .map(|state| state.name.clone())
        .collect()
}

/// Render the ref listing served by `list` and uploaded next to the archive:
/// `<oid> <refname>` per ref, then `@<target> HEAD`.
pub fn render_listing(refs: &[RefState], head: Option<&str>) -> String {
    if refs.is_empty() {
        return String::new();
    }

    let mut listing = String::new();
    for state in refs {
        listing.push_str(&state.oid);
        listing.push(' ');
        listing.push_str(&state.name);
        listing.push('\n');
    }
    if let Some(target) = head {
        listing.push('@');
        listing.push_str(target);
        listing.push_str(" HEAD\n");
    }
    listing
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_listing_format() {
        let refs = vec![
            RefState::new("refs/heads/main", "h1"),
            RefState::new("refs/heads/dev", "h2"),
        ];
        assert_eq!(
            render_listing(&refs, Some("refs/heads/main")),
            "h1 refs/heads/main\nh2 refs/heads/dev\n@refs/heads/main HEAD\n"
        );
    }

    #[test]
    fn test_empty_mirror_lists_nothing() {
        assert_eq!(render_listing(&[], Some("refs/heads/main")), "");
    }

    #[test]
    fn test_parse_for_each_ref() -> Result<()> {
        let output = "1111 refs/heads/main\n2222 refs/tags/v1\n\n";
        let refs = parse_for_each_ref(output)?;
        assert_eq!(
            refs,
            vec![
                RefState::new("refs/heads/main", "1111"),
                RefState::new("refs/tags/v1", "2222"),
            ]
        );
        assert!(parse_for_each_ref("garbage").is_err());
        Ok(())
    }

    #[test]
    fn test_changed_refs() {
        let before = vec![
            RefState::new("refs/heads/main", "a"),
            RefState::new("refs/heads/dev", "b"),
            RefState::new("refs/heads/gone", "c"),
        ];
        let after = vec![
            RefState::new("refs/heads/main", "a2"),
            RefState::new("refs/heads/dev", "b"),
            RefState::new("refs/heads/new", "d"),
        ];
        assert_eq!(
            changed_refs(&before, &after),
            vec!["refs/heads/main", "refs/heads/new"]
        );
        assert!(changed_refs(&after, &after).is_empty());
    }
}
