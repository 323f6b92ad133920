//! Data paths such as `items[2].x` or `owner.name`.

/// One step of a data path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathSegment<'a> {
    /// A member or key name.
    Member(&'a str),
    /// An array index.
    Index(usize),
}

/// Split a data path into segments. Returns `None` for malformed paths.
///
/// ```
/// use metatype_data::path::{PathSegment, parse_path};
///
/// assert_eq!(
///     parse_path("items[2].x"),
///     Some(vec![
///         PathSegment::Member("items"),
///         PathSegment::Index(2),
///         PathSegment::Member("x"),
///     ])
/// );
/// ```
pub fn parse_path(path: &str) -> Option<Vec<PathSegment<'_>>> {
    let mut segments = Vec::new();
    let mut rest = path.trim();
    let mut first = true;
    while !rest.is_empty() {
        if let Some(after) = rest.strip_prefix('[') {
            let close = after.find(']')?;
            let index = after[..close].trim().parse().ok()?;
            segments.push(PathSegment::Index(index));
            rest = &after[close + 1..];
        } else {
            let body = if first { rest } else { rest.strip_prefix('.')? };
            let end = body.find(['.', '[']).unwrap_or(body.len());
            let name = &body[..end];
            if name.is_empty() {
                return None;
            }
            segments.push(PathSegment::Member(name));
            rest = &body[end..];
        }
        first = false;
    }
    Some(segments)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_members_and_indices() {
        assert_eq!(
            parse_path("owner.name"),
            Some(vec![PathSegment::Member("owner"), PathSegment::Member("name")])
        );
        assert_eq!(
            parse_path("[0][1]"),
            Some(vec![PathSegment::Index(0), PathSegment::Index(1)])
        );
        assert_eq!(parse_path(""), Some(vec![]));
    }

    #[test]
    fn rejects_malformed_paths() {
        assert_eq!(parse_path("a..b"), None);
        assert_eq!(parse_path("a[x]"), None);
        assert_eq!(parse_path("a[1"), None);
        assert_eq!(parse_path("a[1]b"), None);
        assert_eq!(parse_path(".a"), None);
    }
}
