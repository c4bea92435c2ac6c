//! FHIR reference parsing helpers.
//!
//! References appear throughout the practitioner graph as `ResourceType/id`
//! strings. The id part is everything after the first `/`; a string without
//! a `/` is already an id.

use serde_json::Value;

/// Returns the id part of a FHIR reference.
///
/// ```
/// use fhirgate_core::reference::reference_id_part;
///
/// assert_eq!(reference_id_part("Patient/123"), "123");
/// assert_eq!(reference_id_part("123"), "123");
/// assert_eq!(reference_id_part("Patient/123/_history/2"), "123/_history/2");
/// ```
#[must_use]
pub fn reference_id_part(reference: &str) -> &str {
    match reference.find('/') {
        Some(idx) => &reference[idx + 1..],
        None => reference,
    }
}

/// Returns the resource type part of a reference, if it has one.
#[must_use]
pub fn reference_resource_type(reference: &str) -> Option<&str> {
    reference.find('/').map(|idx| &reference[..idx])
}

/// Collects reference strings from a JSON value.
///
/// Handles a direct string, a `Reference` object with a `reference` field,
/// and arrays of either.
pub fn collect_references(value: &Value, refs: &mut Vec<String>) {
    if let Some(s) = value.as_str() {
        refs.push(s.to_string());
        return;
    }

    if let Some(reference) = value.get("reference") {
        if let Some(s) = reference.as_str() {
            refs.push(s.to_string());
        }
        return;
    }

    if let Some(arr) = value.as_array() {
        for item in arr {
            collect_references(item, refs);
        }
    }
}

/// Collects the id parts of all references under a named field of a resource.
#[must_use]
pub fn field_reference_ids(resource: &Value, field: &str) -> Vec<String> {
    let mut refs = Vec::new();
    if let Some(value) = resource.get(field) {
        collect_references(value, &mut refs);
    }
    refs.iter()
        .map(|r| reference_id_part(r).to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_reference_id_part() {
        assert_eq!(reference_id_part("X/y"), "y");
        assert_eq!(reference_id_part("y"), "y");
        assert_eq!(reference_id_part("X/y/z"), "y/z");
        assert_eq!(reference_id_part("Organization/org-1"), "org-1");
    }

    #[test]
    fn test_reference_resource_type() {
        assert_eq!(reference_resource_type("Patient/123"), Some("Patient"));
        assert_eq!(reference_resource_type("123"), None);
    }

    #[test]
    fn test_collect_references_string() {
        let mut refs = Vec::new();
        collect_references(&json!("Patient/1"), &mut refs);
        assert_eq!(refs, vec!["Patient/1"]);
    }

    #[test]
    fn test_collect_references_object_and_array() {
        let mut refs = Vec::new();
        collect_references(
            &json!([
                {"reference": "Practitioner/a"},
                {"reference": "Organization/b"},
                "Location/c"
            ]),
            &mut refs,
        );
        assert_eq!(refs, vec!["Practitioner/a", "Organization/b", "Location/c"]);
    }

    #[test]
    fn test_field_reference_ids() {
        let resource = json!({
            "resourceType": "CareTeam",
            "managingOrganization": [
                {"reference": "Organization/org-1"},
                {"reference": "Organization/org-2"}
            ]
        });
        assert_eq!(
            field_reference_ids(&resource, "managingOrganization"),
            vec!["org-1", "org-2"]
        );
        assert!(field_reference_ids(&resource, "subject").is_empty());
    }
}
