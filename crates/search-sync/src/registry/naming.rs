//! Index naming.
//!
//! An index is named `{environment}_{collection}`, where the collection is
//! the snake-cased, pluralized type name (`Observation` -> `observations`,
//! `ObservationPhoto` -> `observation_photos`).

/// Returns the collection name for a record type.
pub fn collection_name(record_type: &str) -> String {
    pluralize(&snake_case(record_type))
}

/// Returns the index name for a collection in an environment.
pub fn index_name(environment: &str, collection: &str) -> String {
    format!("{}_{}", environment, collection)
}

/// Converts `CamelCase` (or `Namespaced::CamelCase`) to `snake_case`.
pub fn snake_case(name: &str) -> String {
    let name = name.rsplit("::").next().unwrap_or(name);
    let chars: Vec<char> = name.chars().collect();
    let mut out = String::with_capacity(name.len() + 4);

    for (i, &c) in chars.iter().enumerate() {
        if c.is_uppercase() {
            let prev = i.checked_sub(1).map(|p| chars[p]);
            let next = chars.get(i + 1).copied();
            let boundary = match prev {
                Some(p) if p.is_lowercase() || p.is_ascii_digit() => true,
                Some(p) if p.is_uppercase() => next.is_some_and(|n| n.is_lowercase()),
                _ => false,
            };
            if boundary && !out.ends_with('_') {
                out.push('_');
            }
            out.extend(c.to_lowercase());
        } else if c == '-' || c == ' ' {
            out.push('_');
        } else {
            out.push(c);
        }
    }

    out
}

fn pluralize(word: &str) -> String {
    if word.is_empty() {
        return String::new();
    }

    let ends_with_consonant_y = word.ends_with('y')
        && !word[..word.len() - 1].ends_with(['a', 'e', 'i', 'o', 'u']);

    if ends_with_consonant_y {
        format!("{}ies", &word[..word.len() - 1])
    } else if ["s", "x", "z", "ch", "sh"].iter().any(|s| word.ends_with(s)) {
        format!("{}es", word)
    } else {
        format!("{}s", word)
    }
}
