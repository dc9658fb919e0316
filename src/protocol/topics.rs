//! Topic template rendering and device id validation

use thiserror::Error;

/// Placeholder substituted with the device identifier
pub const DEVICE_ID_PLACEHOLDER: &str = "{device_id}";

/// Collapse repeated slashes and drop a trailing slash.
///
/// Unlike path canonicalization, a missing leading slash is preserved because
/// `a/b` and `/a/b` are different MQTT topics.
pub fn normalize_topic(topic: &str) -> String {
    let mut result = topic.to_string();
    while result.contains("//") {
        result = result.replace("//", "/");
    }
    if result.len() > 1 && result.ends_with('/') {
        result.pop();
    }
    result
}

/// Render a publish topic for the given device
pub fn render_topic(template: &str, device_id: &str) -> String {
    normalize_topic(&template.replace(DEVICE_ID_PLACEHOLDER, device_id))
}

pub fn validate_topic_template(template: &str) -> Result<(), ValidationError> {
    if !template.contains(DEVICE_ID_PLACEHOLDER) {
        return Err(ValidationError::MissingDevicePlaceholder(template.to_string()));
    }
    if template.contains('+') || template.contains('#') {
        return Err(ValidationError::WildcardInTopic(template.to_string()));
    }
    Ok(())
}

pub fn validate_device_id(device_id: &str) -> Result<(), ValidationError> {
    if device_id.is_empty() {
        return Err(ValidationError::EmptyDeviceId);
    }

    for ch in device_id.chars() {
        if !ch.is_ascii_alphanumeric() && ch != '.' && ch != '_' && ch != '-' {
            return Err(ValidationError::InvalidDeviceIdChar(ch));
        }
    }

    Ok(())
}

#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    #[error("Device ID cannot be empty")]
    EmptyDeviceId,
    #[error("Device ID contains invalid character: '{0}'")]
    InvalidDeviceIdChar(char),
    #[error("Topic template '{0}' must contain {{device_id}}")]
    MissingDevicePlaceholder(String),
    #[error("Topic template '{0}' must not contain MQTT wildcards")]
    WildcardInTopic(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_render_topic() {
        assert_eq!(
            render_topic("ups/data/{device_id}", "40A36BC38E91"),
            "ups/data/40A36BC38E91"
        );
        assert_eq!(
            render_topic("/sites/{device_id}/power/", "dev-1"),
            "/sites/dev-1/power"
        );
    }

    #[test]
    fn test_normalize_preserves_missing_leading_slash() {
        assert_eq!(normalize_topic("a//b///c"), "a/b/c");
        assert_eq!(normalize_topic("/a/b/"), "/a/b");
        assert_eq!(normalize_topic("/"), "/");
    }

    #[test]
    fn test_template_validation() {
        assert!(validate_topic_template("ups/{device_id}").is_ok());
        assert_eq!(
            validate_topic_template("ups/data"),
            Err(ValidationError::MissingDevicePlaceholder("ups/data".into()))
        );
        assert!(matches!(
            validate_topic_template("ups/+/{device_id}"),
            Err(ValidationError::WildcardInTopic(_))
        ));
    }

    #[test]
    fn test_device_id_validation() {
        assert!(validate_device_id("40A36BC38E91").is_ok());
        assert!(validate_device_id("site_1.ups-a").is_ok());
        assert_eq!(validate_device_id(""), Err(ValidationError::EmptyDeviceId));
        assert_eq!(
            validate_device_id("ups/1"),
            Err(ValidationError::InvalidDeviceIdChar('/'))
        );
    }

    proptest! {
        #[test]
        fn prop_rendered_topic_has_no_double_slash(
            prefix in "[a-z/]{0,12}",
            id in "[A-Za-z0-9._-]{1,16}",
        ) {
            let template = format!("{prefix}/{DEVICE_ID_PLACEHOLDER}");
            let topic = render_topic(&template, &id);
            prop_assert!(!topic.contains("//"));
            prop_assert!(topic.contains(&id));
        }
    }
}
