//! Upload type detection

use std::path::Path;

/// Extension used when neither the name nor the content identifies the file
pub const UNKNOWN_EXTENSION: &str = "bin";

/// Extension for the input working file: taken from the declared name, else
/// sniffed from content.
pub fn input_extension(original_file_name: &str, bytes: &[u8]) -> String {
    Path::new(original_file_name)
        .extension()
        .and_then(|e| e.to_str())
        .filter(|e| !e.is_empty() && e.chars().all(|c| c.is_ascii_alphanumeric()))
        .map(|e| e.to_ascii_lowercase())
        .or_else(|| sniff_extension(bytes))
        .unwrap_or_else(|| UNKNOWN_EXTENSION.to_string())
}

/// Extension guessed from content, `infer` first then `tree_magic_mini`
pub fn sniff_extension(bytes: &[u8]) -> Option<String> {
    if let Some(kind) = infer::get(bytes) {
        return Some(kind.extension().to_string());
    }
    extension_for_mimetype(tree_magic_mini::from_u8(bytes))
}

/// Map a mimetype to a file extension. `None` for the generic binary type
/// and for subtypes that do not make a plain extension.
fn extension_for_mimetype(mimetype: &str) -> Option<String> {
    let essence = mimetype.split(';').next().unwrap_or_default().trim();
    if essence.is_empty() || essence == "application/octet-stream" {
        return None;
    }
    let subtype = essence.split_once('/')?.1;

    let ext = match subtype {
        "plain" => "txt",
        "quicktime" => "mov",
        "x-matroska" => "mkv",
        "x-msvideo" => "avi",
        "jpeg" => "jpg",
        "svg+xml" => "svg",
        other => other.strip_prefix("x-").unwrap_or(other),
    };
    if ext.is_empty() || !ext.chars().all(|c| c.is_ascii_alphanumeric()) {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}
