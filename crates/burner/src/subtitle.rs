//! Subtitle encoding detection and UTF-8 normalization.
//!
//! The subtitle filter only reads UTF-8, while subtitle files in the wild are
//! frequently saved in legacy 8-bit code pages. This module picks the first
//! encoding from a fixed preference list that decodes the whole file, and writes a
//! UTF-8 copy next to the original when the file was not plain UTF-8 already.
//!
//! Copies are hidden files with a random token in the name and are created
//! exclusively, so an existing file is never overwritten or removed.

use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

/// Bytes that have no mapping in Windows-1252.
const WINDOWS_1252_UNDEFINED: [u8; 5] = [0x81, 0x8D, 0x8F, 0x90, 0x9D];

/// Names tried for a UTF-8 copy before giving up.
const COPY_NAME_ATTEMPTS: usize = 8;

/// Error type for subtitle normalization.
#[derive(Debug, Error)]
pub enum SubtitleError {
    /// The subtitle file does not exist.
    #[error("Subtitle not found: {0}")]
    NotFound(PathBuf),

    /// The subtitle exists but could not be read.
    #[error("Failed to read subtitle {path}: {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The normalized copy could not be written.
    #[error("Failed to write normalized subtitle {path}: {source}")]
    WriteFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Candidate source encodings, in preference order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SourceEncoding {
    /// UTF-8 without a byte order mark.
    Utf8,
    /// UTF-8 with a leading byte order mark.
    Utf8Bom,
    /// Western European code page.
    Windows1252,
    /// ISO-8859-1, the fallback of last resort. Every byte sequence decodes.
    Latin1,
}

impl SourceEncoding {
    /// Encodings tried strictly, in order, before falling back to Latin-1.
    pub const STRICT_CANDIDATES: [SourceEncoding; 3] = [
        SourceEncoding::Utf8,
        SourceEncoding::Utf8Bom,
        SourceEncoding::Windows1252,
    ];

    /// Whether files in this encoding can be handed to the engine as-is.
    pub fn is_canonical(&self) -> bool {
        matches!(self, SourceEncoding::Utf8)
    }

    /// Decode the whole buffer, or `None` if any sequence is invalid.
    pub fn decode_strict(&self, bytes: &[u8]) -> Option<String> {
        match self {
            SourceEncoding::Utf8 => {
                if has_utf8_bom(bytes) {
                    return None;
                }
                encoding_rs::UTF_8
                    .decode_without_bom_handling_and_without_replacement(bytes)
                    .map(|text| text.into_owned())
            }
            SourceEncoding::Utf8Bom => {
                if !has_utf8_bom(bytes) {
                    return None;
                }
                encoding_rs::UTF_8
                    .decode_without_bom_handling_and_without_replacement(&bytes[3..])
                    .map(|text| text.into_owned())
            }
            SourceEncoding::Windows1252 => {
                // encoding_rs maps the undefined bytes to C1 controls; treat them as errors.
                if bytes.iter().any(|b| WINDOWS_1252_UNDEFINED.contains(b)) {
                    return None;
                }
                encoding_rs::WINDOWS_1252
                    .decode_without_bom_handling_and_without_replacement(bytes)
                    .map(|text| text.into_owned())
            }
            SourceEncoding::Latin1 => Some(decode_latin1(bytes)),
        }
    }
}

impl std::fmt::Display for SourceEncoding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceEncoding::Utf8 => write!(f, "utf-8"),
            SourceEncoding::Utf8Bom => write!(f, "utf-8-sig"),
            SourceEncoding::Windows1252 => write!(f, "windows-1252"),
            SourceEncoding::Latin1 => write!(f, "iso-8859-1"),
        }
    }
}

/// A subtitle ready to be referenced by the subtitle filter.
#[derive(Debug, Clone, PartialEq)]
pub struct SubtitleAsset {
    /// The subtitle as found in the job folder.
    pub original: PathBuf,
    /// Encoding the original was decoded with.
    pub encoding: SourceEncoding,
    /// UTF-8 file to hand to the engine.
    pub normalized: PathBuf,
}

impl SubtitleAsset {
    /// Whether `normalized` is a copy written by [`normalize_subtitle`].
    pub fn is_temp_copy(&self) -> bool {
        self.normalized != self.original
    }

    /// Remove the normalized copy. The original is never touched.
    pub fn cleanup(&self) {
        if self.is_temp_copy() {
            let _ = fs::remove_file(&self.normalized);
        }
    }
}

fn has_utf8_bom(bytes: &[u8]) -> bool {
    matches!(encoding_rs::Encoding::for_bom(bytes), Some((enc, 3)) if enc == encoding_rs::UTF_8)
}

fn decode_latin1(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| char::from(b)).collect()
}

/// Detect the encoding of a subtitle buffer and decode it.
///
/// Never fails: when no strict candidate accepts the buffer, Latin-1 is used.
pub fn detect_encoding(bytes: &[u8]) -> (SourceEncoding, String) {
    SourceEncoding::STRICT_CANDIDATES
        .iter()
        .find_map(|enc| enc.decode_strict(bytes).map(|text| (*enc, text)))
        .unwrap_or_else(|| (SourceEncoding::Latin1, decode_latin1(bytes)))
}

/// Path of a UTF-8 copy for a subtitle:
/// `dir/name.srt` -> `dir/.name.<token>.utf8.srt`.
pub fn normalized_path(subtitle: &Path, token: &str) -> PathBuf {
    let stem = subtitle
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = match subtitle.extension() {
        Some(ext) => format!(".{}.{}.utf8.{}", stem, token, ext.to_string_lossy()),
        None => format!(".{}.{}.utf8", stem, token),
    };
    subtitle.with_file_name(name)
}

/// Create a new copy next to `subtitle` holding `text`.
///
/// Fails rather than reuse a name that already exists.
fn write_copy(subtitle: &Path, text: &str) -> Result<PathBuf, SubtitleError> {
    let mut last_err = None;
    for _ in 0..COPY_NAME_ATTEMPTS {
        let token = Uuid::new_v4().simple().to_string();
        let candidate = normalized_path(subtitle, &token[..8]);
        let mut file = match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&candidate)
        {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                last_err = Some(e);
                continue;
            }
            Err(e) => {
                return Err(SubtitleError::WriteFailed {
                    path: candidate,
                    source: e,
                })
            }
        };
        if let Err(e) = file.write_all(text.as_bytes()) {
            drop(file);
            let _ = fs::remove_file(&candidate);
            return Err(SubtitleError::WriteFailed {
                path: candidate,
                source: e,
            });
        }
        return Ok(candidate);
    }

    Err(SubtitleError::WriteFailed {
        path: subtitle.to_path_buf(),
        source: last_err
            .unwrap_or_else(|| io::Error::other("no free name for the UTF-8 copy")),
    })
}

/// Detect a subtitle's encoding and make sure a UTF-8 version exists.
///
/// Returns the original path when the file is already plain UTF-8, otherwise
/// writes a fresh hidden UTF-8 copy alongside it and returns that.
pub fn normalize_subtitle(path: &Path) -> Result<SubtitleAsset, SubtitleError> {
    let bytes = fs::read(path).map_err(|e| {
        if e.kind() == io::ErrorKind::NotFound {
            SubtitleError::NotFound(path.to_path_buf())
        } else {
            SubtitleError::Unreadable {
                path: path.to_path_buf(),
                source: e,
            }
        }
    })?;

    let (encoding, text) = detect_encoding(&bytes);
    debug!(subtitle = %path.display(), %encoding, "Detected subtitle encoding");

    if encoding.is_canonical() {
        return Ok(SubtitleAsset {
            original: path.to_path_buf(),
            encoding,
            normalized: path.to_path_buf(),
        });
    }

    let normalized = write_copy(path, &text)?;
    info!(
        subtitle = %path.display(),
        %encoding,
        "Converted subtitle to UTF-8: {}",
        normalized.display()
    );

    Ok(SubtitleAsset {
        original: path.to_path_buf(),
        encoding,
        normalized,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use tempfile::TempDir;

    const SRT_HEAD: &[u8] = b"1\n00:00:01,000 --> 00:00:02,000\n";

    fn write_subtitle(dir: &TempDir, name: &str, body: &[u8]) -> PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn test_detect_plain_utf8() {
        let text = "Olá, coração!".as_bytes();
        let (enc, decoded) = detect_encoding(text);
        assert_eq!(enc, SourceEncoding::Utf8);
        assert_eq!(decoded, "Olá, coração!");
    }

    #[test]
    fn test_detect_utf8_with_bom_strips_bom() {
        let mut bytes = vec![0xEF, 0xBB, 0xBF];
        bytes.extend_from_slice("Ação".as_bytes());
        let (enc, decoded) = detect_encoding(&bytes);
        assert_eq!(enc, SourceEncoding::Utf8Bom);
        assert_eq!(decoded, "Ação");
    }

    #[test]
    fn test_detect_windows_1252() {
        // "Ação €5" in Windows-1252
        let bytes = [0x41, 0xE7, 0xE3, 0x6F, 0x20, 0x80, 0x35];
        let (enc, decoded) = detect_encoding(&bytes);
        assert_eq!(enc, SourceEncoding::Windows1252);
        assert_eq!(decoded, "Ação €5");
    }

    #[test]
    fn test_undefined_windows_1252_byte_falls_back_to_latin1() {
        let bytes = [0x61, 0x81, 0xE9];
        let (enc, decoded) = detect_encoding(&bytes);
        assert_eq!(enc, SourceEncoding::Latin1);
        assert_eq!(decoded, "a\u{81}é");
    }

    #[test]
    fn test_empty_file_is_utf8() {
        let (enc, decoded) = detect_encoding(&[]);
        assert_eq!(enc, SourceEncoding::Utf8);
        assert!(decoded.is_empty());
    }

    #[test]
    fn test_normalized_path() {
        assert_eq!(
            normalized_path(Path::new("/in/show/ep01.srt"), "1a2b3c4d"),
            PathBuf::from("/in/show/.ep01.1a2b3c4d.utf8.srt")
        );
        assert_eq!(
            normalized_path(Path::new("/in/show/subs"), "1a2b3c4d"),
            PathBuf::from("/in/show/.subs.1a2b3c4d.utf8")
        );
    }

    fn dir_entries(dir: &TempDir) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn test_normalize_utf8_returns_original_without_copy() {
        let dir = TempDir::new().unwrap();
        let path = write_subtitle(&dir, "ep01.srt", "1\nOlá\n".as_bytes());

        let asset = normalize_subtitle(&path).unwrap();

        assert_eq!(asset.encoding, SourceEncoding::Utf8);
        assert_eq!(asset.normalized, path);
        assert!(!asset.is_temp_copy());
        assert_eq!(dir_entries(&dir), vec!["ep01.srt".to_string()]);
    }

    #[test]
    fn test_normalize_legacy_encoding_writes_utf8_copy() {
        let dir = TempDir::new().unwrap();
        let mut body = SRT_HEAD.to_vec();
        body.extend_from_slice(&[0x4E, 0xE3, 0x6F, 0x20, 0x76, 0xE1, 0x21]); // "Não vá!"
        let path = write_subtitle(&dir, "ep01.srt", &body);

        let asset = normalize_subtitle(&path).unwrap();

        assert_eq!(asset.encoding, SourceEncoding::Windows1252);
        assert!(asset.is_temp_copy());
        assert_eq!(asset.normalized.parent(), Some(dir.path()));
        let name = asset.normalized.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with(".ep01.") && name.ends_with(".utf8.srt"), "{}", name);
        let converted = fs::read_to_string(&asset.normalized).unwrap();
        assert!(converted.ends_with("Não vá!"));

        // Original is left untouched
        assert_eq!(fs::read(&path).unwrap(), body);

        asset.cleanup();
        assert!(!asset.normalized.exists());
        assert!(path.exists());
    }

    #[test]
    fn test_existing_utf8_sibling_is_left_alone() {
        let dir = TempDir::new().unwrap();
        let path = write_subtitle(&dir, "ep01.srt", &[0x4E, 0xE3, 0x6F]);
        let users = write_subtitle(&dir, "ep01.utf8.srt", b"user's own file");

        let asset = normalize_subtitle(&path).unwrap();
        assert_ne!(asset.normalized, users);
        asset.cleanup();

        assert_eq!(fs::read(&users).unwrap(), b"user's own file");
        assert_eq!(
            dir_entries(&dir),
            vec!["ep01.srt".to_string(), "ep01.utf8.srt".to_string()]
        );
    }

    #[test]
    fn test_copies_for_the_same_subtitle_do_not_collide() {
        let dir = TempDir::new().unwrap();
        let path = write_subtitle(&dir, "ep01.srt", &[0x4E, 0xE3, 0x6F]);

        let first = normalize_subtitle(&path).unwrap();
        let second = normalize_subtitle(&path).unwrap();

        assert_ne!(first.normalized, second.normalized);
        first.cleanup();
        assert!(second.normalized.exists());
        second.cleanup();
        assert_eq!(dir_entries(&dir), vec!["ep01.srt".to_string()]);
    }

    #[test]
    fn test_cleanup_never_removes_original() {
        let dir = TempDir::new().unwrap();
        let path = write_subtitle(&dir, "ep01.srt", b"plain ascii");

        let asset = normalize_subtitle(&path).unwrap();
        asset.cleanup();

        assert!(path.exists());
    }

    #[test]
    fn test_missing_subtitle_is_not_found() {
        let dir = TempDir::new().unwrap();
        let result = normalize_subtitle(&dir.path().join("missing.srt"));
        assert!(matches!(result, Err(SubtitleError::NotFound(_))));
    }

    #[test]
    fn test_directory_is_unreadable() {
        let dir = TempDir::new().unwrap();
        let result = normalize_subtitle(dir.path());
        assert!(matches!(result, Err(SubtitleError::Unreadable { .. })));
    }

    // Whatever the input bytes, the file handed to the engine is valid UTF-8.
    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn prop_normalized_subtitle_is_valid_utf8(
            body in prop::collection::vec(any::<u8>(), 0..512),
        ) {
            let dir = TempDir::new().unwrap();
            let path = write_subtitle(&dir, "any.srt", &body);

            let asset = normalize_subtitle(&path).expect("normalization never fails on readable files");
            let bytes = fs::read(&asset.normalized).unwrap();

            prop_assert!(std::str::from_utf8(&bytes).is_ok());
            prop_assert!(!bytes.starts_with(&[0xEF, 0xBB, 0xBF]));
        }

        #[test]
        fn prop_legacy_text_roundtrips_through_detection(
            text in "[a-zA-Z0-9 áéíóúãõçÁÉÍÓÚÃÕÇ€.,!?]{0,80}",
        ) {
            let (encoded, _, unmappable) = encoding_rs::WINDOWS_1252.encode(&text);
            prop_assume!(!unmappable);

            let (enc, decoded) = detect_encoding(&encoded);

            prop_assert_eq!(decoded, text.clone());
            if text.is_ascii() {
                prop_assert_eq!(enc, SourceEncoding::Utf8);
            } else {
                prop_assert_eq!(enc, SourceEncoding::Windows1252);
            }
        }
    }
}
