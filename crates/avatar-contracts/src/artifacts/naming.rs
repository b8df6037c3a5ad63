use std::path::Path;

/// Number of digits in the millisecond suffix of a stored artifact name.
pub const TIMESTAMP_DIGITS: usize = 13;

pub const IMAGE_EXTENSIONS: [&str; 5] = ["png", "jpg", "jpeg", "webp", "gif"];

pub fn is_image_path(path: &Path) -> bool {
    path.extension()
        .and_then(|value| value.to_str())
        .map(|ext| {
            let lowered = ext.to_ascii_lowercase();
            IMAGE_EXTENSIONS.contains(&lowered.as_str())
        })
        .unwrap_or(false)
}

/// Splits `name_1712345678901` into `("name", Some(1712345678901))`.
///
/// Stems without an exact 13 digit suffix are returned whole.
pub fn split_timestamp(stem: &str) -> (&str, Option<u64>) {
    let Some((prefix, suffix)) = stem.rsplit_once('_') else {
        return (stem, None);
    };
    if suffix.len() != TIMESTAMP_DIGITS || !suffix.bytes().all(|byte| byte.is_ascii_digit()) {
        return (stem, None);
    }
    match suffix.parse::<u64>() {
        Ok(stamp) => (prefix, Some(stamp)),
        Err(_) => (stem, None),
    }
}

pub fn logical_name(stem: &str) -> &str {
    split_timestamp(stem).0
}

/// `{underscored-concept}[_{backend}]`, the part of a stored name before the timestamp.
pub fn cache_key(underscored_concept: &str, backend_tag: Option<&str>) -> String {
    match backend_tag {
        Some(tag) if !tag.trim().is_empty() => format!("{underscored_concept}_{}", tag.trim()),
        _ => underscored_concept.to_string(),
    }
}

pub fn storage_file_name(key: &str, stamp_ms: u64, ext: &str) -> String {
    format!("{key}_{stamp_ms:0width$}.{ext}", width = TIMESTAMP_DIGITS)
}

/// Gallery label: extension and timestamp removed, underscores shown as spaces.
pub fn display_name(storage_name: &str) -> String {
    let stem = Path::new(storage_name)
        .file_stem()
        .and_then(|value| value.to_str())
        .unwrap_or(storage_name);
    logical_name(stem).replace('_', " ")
}

pub fn extension_for_mime(mime: Option<&str>) -> &'static str {
    match mime.map(|value| value.trim().to_ascii_lowercase()).as_deref() {
        Some("image/jpeg") | Some("image/jpg") => "jpg",
        Some("image/webp") => "webp",
        Some("image/gif") => "gif",
        _ => "png",
    }
}
