//! Small edits on raw `content-type` values. Parameters other than the one being edited are kept
//! byte for byte.

/// The `charset` parameter, unquoted. An empty value counts as absent.
pub(crate) fn charset_param(content_type: &str) -> Option<&str> {
    content_type.split(';').skip(1).find_map(|param| {
        let (key, value) = param.split_once('=')?;
        if !key.trim().eq_ignore_ascii_case(mime::CHARSET.as_str()) {
            return None;
        }

        let value = value.trim();
        let value = value.strip_prefix('"').and_then(|v| v.strip_suffix('"')).unwrap_or(value);
        (!value.is_empty()).then_some(value)
    })
}

/// Puts `media_type` into the first segment that is not a `key=value` parameter.
pub(crate) fn with_media_type(content_type: &str, media_type: &str) -> String {
    let mut segments: Vec<&str> = content_type.split(';').collect();
    match segments.iter().position(|segment| !segment.contains('=')) {
        Some(index) => segments[index] = media_type,
        None => segments.insert(0, media_type),
    }
    segments.join(";")
}

/// Sets the `charset` parameter, dropping any empty one already there.
pub(crate) fn with_charset(content_type: &str, charset: &str) -> String {
    let mut value: String = content_type
        .split(';')
        .filter(|segment| {
            segment.split_once('=').is_none_or(|(key, _)| !key.trim().eq_ignore_ascii_case(mime::CHARSET.as_str()))
        })
        .collect::<Vec<_>>()
        .join(";");

    value.push_str("; charset=");
    value.push_str(charset);
    value
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_charset_param() {
        assert_eq!(charset_param("text/plain;charset=ISO-8859-1"), Some("ISO-8859-1"));
        assert_eq!(charset_param("text/plain; Charset=\"utf-16le\""), Some("utf-16le"));
        assert_eq!(charset_param("text/plain; format=flowed; CHARSET = latin1 "), Some("latin1"));
        assert_eq!(charset_param("text/plain; charset="), None);
        assert_eq!(charset_param("text/plain"), None);
        assert_eq!(charset_param("charset=utf-8"), None);
    }

    #[test]
    fn test_with_media_type() {
        assert_eq!(with_media_type("text/plain; charset=utf-8", "application/json"), "application/json; charset=utf-8");
        assert_eq!(with_media_type("text/html", "application/json"), "application/json");
        assert_eq!(with_media_type("", "application/json"), "application/json");
        assert_eq!(with_media_type("charset=utf-8", "application/json"), "application/json;charset=utf-8");
    }

    #[test]
    fn test_with_charset() {
        assert_eq!(with_charset("text/html", "utf-8"), "text/html; charset=utf-8");
        assert_eq!(with_charset("text/html; charset=", "latin1"), "text/html; charset=latin1");
    }
}
