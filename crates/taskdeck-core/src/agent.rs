/// Normalize an agent identifier for comparisons and reservations.
///
/// Agent names are case-insensitive keys; an empty-after-trim value means
/// the task is unassigned and returns `None`.
pub fn normalized_agent(value: Option<&str>) -> Option<String> {
    let token = value?.trim().to_lowercase();
    if token.is_empty() {
        None
    } else {
        Some(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lowercases_and_trims() {
        assert_eq!(normalized_agent(Some("  Matrix ")), Some("matrix".into()));
    }

    #[test]
    fn test_empty_and_whitespace_are_unassigned() {
        assert_eq!(normalized_agent(Some("")), None);
        assert_eq!(normalized_agent(Some("   ")), None);
        assert_eq!(normalized_agent(None), None);
    }
}
