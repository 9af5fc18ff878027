use std::sync::LazyLock;

static MAGIC_BYTES: LazyLock<Vec<(&'static [u8], &'static str)>> = LazyLock::new(|| {
    vec![
        (&[0xFF, 0xD8, 0xFF], "image/jpeg"),
        (&[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A], "image/png"),
        (b"GIF87a", "image/gif"),
        (b"GIF89a", "image/gif"),
        (b"BM", "image/bmp"),
        (b"II*\x00", "image/tiff"),
        (b"MM\x00*", "image/tiff"),
        (b"%PDF-", "application/pdf"),
        (b"PK\x03\x04", "application/zip"),
        (&[0x1F, 0x8B, 0x08], "application/gzip"),
    ]
});

const BLOCKED_EXTENSIONS: &[&str] = &[
    "exe", "dll", "so", "dylib", "app", "deb", "rpm", "dmg", "pkg", "msi", "scr", "bat", "cmd",
    "com", "pif", "vbs", "vbe", "js", "jse", "ws", "wsf", "wsc", "wsh", "ps1", "lnk", "inf",
    "reg", "jar", "sh", "bash",
];

#[derive(Debug, Clone)]
pub struct FileValidationConfig {
    pub allowed_types: Vec<String>,
    pub block_executables: bool,
    pub check_magic_bytes: bool,
}

impl Default for FileValidationConfig {
    fn default() -> Self {
        Self {
            allowed_types: default_evidence_types(),
            block_executables: true,
            check_magic_bytes: true,
        }
    }
}

/// Images and PDF.
pub fn default_evidence_types() -> Vec<String> {
    vec![
        "image/jpeg".into(),
        "image/png".into(),
        "image/gif".into(),
        "image/webp".into(),
        "image/bmp".into(),
        "image/tiff".into(),
        "application/pdf".into(),
    ]
}

#[derive(Debug, Clone)]
pub struct FileValidationResult {
    pub is_valid: bool,
    pub content_type: String,
    pub detected_type: Option<String>,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

/// Checks an evidence file's declared type, extension and leading bytes.
/// A generic declared type (`application/octet-stream` or empty) is resolved
/// from the file extension first.
pub fn validate_file_upload(
    filename: &str,
    content_type: &str,
    data: &[u8],
    config: &FileValidationConfig,
) -> FileValidationResult {
    let content_type = effective_content_type(filename, content_type);
    let mut result = FileValidationResult {
        is_valid: true,
        content_type: content_type.clone(),
        detected_type: None,
        errors: Vec::new(),
        warnings: Vec::new(),
    };

    if data.is_empty() {
        result.is_valid = false;
        result.errors.push("File is empty".into());
        return result;
    }

    if let Some(ext) = extension_of(filename) {
        if BLOCKED_EXTENSIONS.contains(&ext.as_str()) {
            result.is_valid = false;
            result
                .errors
                .push(format!("File extension .{ext} is blocked for security reasons"));
        }
    }

    if !config.allowed_types.iter().any(|t| t == &content_type) {
        result.is_valid = false;
        result.errors.push(format!(
            "File type '{content_type}' is not accepted; upload an image or PDF"
        ));
    }

    if config.check_magic_bytes {
        if let Some(detected) = detect_file_type(data) {
            result.detected_type = Some(detected.to_string());
            if detected != content_type {
                result.is_valid = false;
                result.errors.push(format!(
                    "File content looks like '{detected}' but was declared as '{content_type}'"
                ));
            }
        } else if content_type == "application/pdf" {
            result.is_valid = false;
            result.errors.push("File does not look like a PDF document".into());
        }
    }

    if config.block_executables && is_potentially_executable(data) {
        result.is_valid = false;
        result.errors.push(
            "File appears to be executable or contains executable code, which is blocked".into(),
        );
    }

    if content_type == "application/pdf" && has_potential_malicious_pdf_content(data) {
        result.warnings.push(
            "PDF file may contain active content (JavaScript, launch actions or embedded files)"
                .into(),
        );
    }

    result
}

fn effective_content_type(filename: &str, declared: &str) -> String {
    let declared = declared
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    if declared.is_empty() || declared == "application/octet-stream" {
        return mime_guess::from_path(filename)
            .first_raw()
            .unwrap_or("application/octet-stream")
            .to_string();
    }
    declared
}

fn extension_of(filename: &str) -> Option<String> {
    let (_, ext) = filename.rsplit_once('.')?;
    Some(ext.to_ascii_lowercase())
}

fn detect_file_type(data: &[u8]) -> Option<&'static str> {
    if data.len() >= 12 && data.starts_with(b"RIFF") && &data[8..12] == b"WEBP" {
        return Some("image/webp");
    }
    MAGIC_BYTES
        .iter()
        .find(|(magic, _)| data.starts_with(magic))
        .map(|(_, mime_type)| *mime_type)
}

fn is_potentially_executable(data: &[u8]) -> bool {
    if data.starts_with(&[0x4D, 0x5A]) || data.starts_with(&[0x7F, 0x45, 0x4C, 0x46]) {
        return true;
    }

    if data.starts_with(&[0xFE, 0xED, 0xFA, 0xCF]) || data.starts_with(&[0xCF, 0xFA, 0xED, 0xFE]) {
        return true;
    }

    let head = String::from_utf8_lossy(&data[..data.len().min(64)]).to_lowercase();
    head.starts_with("#!/bin/") || head.starts_with("#!/usr/bin/")
}

fn has_potential_malicious_pdf_content(data: &[u8]) -> bool {
    let lower = String::from_utf8_lossy(data).to_lowercase();

    lower.contains("/javascript") || lower.contains("/launch") || lower.contains("/embeddedfile")
}

#[cfg(test)]
mod tests {
    use super::*;

    const PNG: &[u8] = &[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 13];

    #[test]
    fn test_accepts_png_and_pdf() {
        let config = FileValidationConfig::default();
        let png = validate_file_upload("photo.png", "image/png", PNG, &config);
        assert!(png.is_valid, "{:?}", png.errors);
        assert_eq!(png.detected_type.as_deref(), Some("image/png"));

        let pdf = validate_file_upload("report.pdf", "application/pdf", b"%PDF-1.7\n...", &config);
        assert!(pdf.is_valid, "{:?}", pdf.errors);
    }

    #[test]
    fn test_rejects_non_evidence_types() {
        let config = FileValidationConfig::default();
        let zip = validate_file_upload("a.zip", "application/zip", b"PK\x03\x04rest", &config);
        assert!(!zip.is_valid);

        let text = validate_file_upload("notes.txt", "text/plain", b"hello", &config);
        assert!(!text.is_valid);
    }

    #[test]
    fn test_rejects_mismatched_magic_bytes() {
        let config = FileValidationConfig::default();
        let result = validate_file_upload("fake.png", "image/png", b"%PDF-1.4", &config);
        assert!(!result.is_valid);
        assert_eq!(result.detected_type.as_deref(), Some("application/pdf"));
    }

    #[test]
    fn test_octet_stream_resolves_from_extension() {
        let config = FileValidationConfig::default();
        let result =
            validate_file_upload("scan.pdf", "application/octet-stream", b"%PDF-1.4", &config);
        assert!(result.is_valid, "{:?}", result.errors);
        assert_eq!(result.content_type, "application/pdf");
    }

    #[test]
    fn test_rejects_empty_and_executable() {
        let config = FileValidationConfig::default();
        assert!(!validate_file_upload("a.png", "image/png", b"", &config).is_valid);
        let exe = validate_file_upload("setup.exe", "image/png", b"MZ\x90\x00", &config);
        assert!(!exe.is_valid);
        assert!(exe.errors.len() >= 2);
    }

    #[test]
    fn test_warns_on_pdf_javascript() {
        let config = FileValidationConfig::default();
        let result = validate_file_upload(
            "form.pdf",
            "application/pdf",
            b"%PDF-1.4 /JavaScript (app.alert)",
            &config,
        );
        assert!(result.is_valid);
        assert_eq!(result.warnings.len(), 1);
    }
}
