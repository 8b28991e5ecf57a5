pub fn is_truthy(value: impl AsRef<str>) -> bool {
    matches!(
        value.as_ref().trim().to_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

pub fn is_falsy(value: impl AsRef<str>) -> bool {
    matches!(
        value.as_ref().trim().to_lowercase().as_str(),
        "0" | "false" | "no" | "off"
    )
}

/// Parses a boolean config value; `None` when it is neither truthy nor falsy.
pub fn parse_flag(value: impl AsRef<str>) -> Option<bool> {
    let value = value.as_ref();
    if is_truthy(value) {
        Some(true)
    } else if is_falsy(value) {
        Some(false)
    } else {
        None
    }
}
