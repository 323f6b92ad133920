//! Compound type name syntax.
//!
//! | Syntax | Meaning |
//! |--------|---------|
//! | `array<T>` | dynamic array of `T` |
//! | `[N]T` | native array of `N` elements of `T` |
//! | `handle<C>` | strong handle to class `C` |
//! | `weak<C>` | weak handle to class `C` |
//! | `class<C>` | class reference constrained to `C` (`class<>` for any class) |
//! | `resource<C>` | reference to a resource of class `C` |

/// A parsed compound name. Inner names are borrowed from the input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompoundName<'a> {
    Array(&'a str),
    NativeArray(usize, &'a str),
    Handle(&'a str),
    Weak(&'a str),
    ClassRef(Option<&'a str>),
    Resource(&'a str),
}

impl<'a> CompoundName<'a> {
    /// Parse `name`, returning `None` for plain or malformed names.
    pub fn parse(name: &'a str) -> Option<Self> {
        let name = name.trim();
        if let Some(rest) = name.strip_prefix('[') {
            let (count, inner) = rest.split_once(']')?;
            let count = count.trim().parse().ok()?;
            return non_empty(inner).map(|inner| CompoundName::NativeArray(count, inner));
        }
        let (prefix, inner) = generic(name)?;
        match prefix {
            "array" => non_empty(inner).map(CompoundName::Array),
            "handle" => non_empty(inner).map(CompoundName::Handle),
            "weak" => non_empty(inner).map(CompoundName::Weak),
            "resource" => non_empty(inner).map(CompoundName::Resource),
            "class" => Some(CompoundName::ClassRef(non_empty(inner))),
            _ => None,
        }
    }
}

/// Split `prefix<inner>`, checking the angle brackets balance.
fn generic(name: &str) -> Option<(&str, &str)> {
    let open = name.find('<')?;
    let inner = name[open + 1..].strip_suffix('>')?;
    let mut depth = 0i32;
    for c in inner.chars() {
        match c {
            '<' => depth += 1,
            '>' => {
                depth -= 1;
                if depth < 0 {
                    return None;
                }
            }
            _ => {}
        }
    }
    (depth == 0).then(|| (name[..open].trim(), inner.trim()))
}

fn non_empty(s: &str) -> Option<&str> {
    let s = s.trim();
    (!s.is_empty()).then_some(s)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_every_form() {
        assert_eq!(CompoundName::parse("array<int32>"), Some(CompoundName::Array("int32")));
        assert_eq!(
            CompoundName::parse("[4]float"),
            Some(CompoundName::NativeArray(4, "float"))
        );
        assert_eq!(CompoundName::parse("handle<Node>"), Some(CompoundName::Handle("Node")));
        assert_eq!(CompoundName::parse("weak<Node>"), Some(CompoundName::Weak("Node")));
        assert_eq!(CompoundName::parse("class<>"), Some(CompoundName::ClassRef(None)));
        assert_eq!(
            CompoundName::parse("class<Shape>"),
            Some(CompoundName::ClassRef(Some("Shape")))
        );
        assert_eq!(
            CompoundName::parse("resource<Texture>"),
            Some(CompoundName::Resource("Texture"))
        );
    }

    #[test]
    fn nested_names_keep_the_inner_text() {
        assert_eq!(
            CompoundName::parse("array<array<handle<Node>>>"),
            Some(CompoundName::Array("array<handle<Node>>"))
        );
        assert_eq!(
            CompoundName::parse("[2][3]int8"),
            Some(CompoundName::NativeArray(2, "[3]int8"))
        );
    }

    #[test]
    fn rejects_malformed_names() {
        for name in ["int32", "array<", "array<>", "array<a>>", "map<int32>", "[x]int8", "[3]"] {
            assert_eq!(CompoundName::parse(name), None, "{name}");
        }
    }
}
