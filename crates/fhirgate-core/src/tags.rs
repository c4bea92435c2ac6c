//! Tag code systems used by the sync-scope rewriter.

/// Search parameter used for server-side tag filtering.
pub const SEARCH_PARAM_TAG: &str = "_tag";

/// Separator between multiple values of one search parameter.
pub const PARAM_VALUES_SEPARATOR: &str = ",";

/// Separator between a code system URL and a code value.
pub const CODE_URL_VALUE_SEPARATOR: &str = "|";

/// Code system for location scope tags.
pub const LOCATION_TAG_URL: &str = "https://fhirgate.org/location-tag-id";

/// Code system for organization scope tags.
pub const ORGANIZATION_TAG_URL: &str = "https://fhirgate.org/organisation-tag-id";

/// Code system for care-team scope tags.
pub const CARE_TEAM_TAG_URL: &str = "https://fhirgate.org/care-team-tag-id";

/// Fixed unguessable location identifier injected for zero-scope principals.
///
/// A principal with no assignments must see nothing, so searches are pinned
/// to a tag value that no resource carries.
pub const ZERO_SCOPE_SENTINEL: &str = "Zq3vXhNnT0kAPwd86EtJcRbYiD2sM5oeHlgVKuC9WxFfS1mUyLaG4rIO7jzBpQhT6dNvZkXcM0sWEyAboRt2PiLqU8fJ1gD5aKeVwnOCHmx3rYS9zuT4lNQbGpE7MAiXhcJ0vdRysWFoK6fZPq8UgBnTmE1LJwaVDCr5kOYXNh2Si9e3IuMtzGdQ";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sentinel_is_not_a_plausible_id() {
        assert!(ZERO_SCOPE_SENTINEL.len() > 100);
        assert!(!ZERO_SCOPE_SENTINEL.contains(PARAM_VALUES_SEPARATOR));
        assert!(!ZERO_SCOPE_SENTINEL.contains(CODE_URL_VALUE_SEPARATOR));
    }
}
