//! Entry and archive naming.
//!
//! Pages are stored as `CCCPPP[.ext]`: the chapter number and page number,
//! each zero-padded to three digits. For numbers up to 999 a plain
//! lexicographic listing is therefore also the reading order. The cover is
//! pseudo-page `000000`.

use kura_archive::ArchiveFormat;
use rslug::slugify;

/// Name of the manifest entry at the archive root.
pub const INDEX_ENTRY: &str = "index.json";
/// Longest extension kept on an entry name.
pub const MAX_EXTENSION_LEN: usize = 4;
/// Prefix of scratch and temporary files placed next to archives.
pub const TEMP_PREFIX: &str = ".kura-";

/// Builds the entry name for page `page` of chapter `chapter_number`.
///
/// ```
/// use kura_local::naming::entry_name;
/// assert_eq!(entry_name(1, 2, Some("png")), "001002.png");
/// assert_eq!(entry_name(12, 345, Some(".jpeg")), "012345.jpeg");
/// assert_eq!(entry_name(3, 4, Some("unknown")), "003004");
/// assert_eq!(entry_name(3, 4, None), "003004");
/// ```
pub fn entry_name(chapter_number: u32, page: u32, ext: Option<&str>) -> String {
    let mut name = format!("{chapter_number:03}{page:03}");
    if let Some(ext) = ext.map(|e| e.trim_start_matches('.'))
        && !ext.is_empty()
        && ext.len() <= MAX_EXTENSION_LEN
        && ext.chars().all(|c| c.is_ascii_alphanumeric())
    {
        name.push('.');
        name.push_str(ext);
    }
    name
}

pub fn cover_entry_name(ext: Option<&str>) -> String {
    entry_name(0, 0, ext)
}

/// Longest archive name stem, in bytes.
const MAX_STEM_LEN: usize = 120;

/// File name for a new archive of the manga called `title`.
///
/// The stem is a slug of the title. Quotation marks are dropped first so
/// that `Journey's End` becomes `journeys-end` rather than `journey-s-end`.
pub fn archive_file_name(title: &str, format: ArchiveFormat) -> String {
    let stripped: String = title.chars().filter(|c| !QUOTATION_MARKS.contains(c)).collect();
    let slug = slugify!(&stripped);
    let stem = slug[..slug.floor_char_boundary(MAX_STEM_LEN)].trim_end_matches('-');
    let stem = match stem.is_empty() {
        true => "manga",
        false => stem,
    };
    match format.extension() {
        Some(ext) => format!("{stem}.{ext}"),
        None => stem.to_string(),
    }
}

const QUOTATION_MARKS: [char; 13] = [
    '\u{0027}', '\u{0022}', '\u{2018}', '\u{2019}', '\u{201C}', '\u{201D}', '\u{201E}', '\u{201B}', '\u{0060}',
    '\u{00AB}', '\u{00BB}', '\u{2039}', '\u{203A}',
];

/// Suffix of the backup a directory archive is moved to during a commit.
const BACKUP_SUFFIX: &str = ".old";

/// Backup name for the directory archive called `file_name`.
pub(crate) fn backup_name(file_name: &str) -> String {
    format!("{TEMP_PREFIX}{file_name}{BACKUP_SUFFIX}")
}

/// Archive name a backup belongs to, if `name` is a backup.
pub(crate) fn backup_target(name: &str) -> Option<&str> {
    name.strip_prefix(TEMP_PREFIX)?.strip_suffix(BACKUP_SUFFIX).filter(|target| !target.is_empty())
}

/// Hidden entries include our own scratch and temp files.
pub(crate) fn is_hidden(name: &str) -> bool {
    name.starts_with('.')
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_lexicographic_order_matches_numeric_order() {
        let mut names = Vec::new();
        for chapter in [0, 1, 2, 9, 10, 11, 99, 100, 101, 998, 999] {
            for page in [0, 1, 2, 9, 10, 99, 100, 999] {
                names.push(((chapter, page), entry_name(chapter, page, Some("png"))));
            }
        }
        let mut by_name = names.clone();
        by_name.sort_by(|a, b| a.1.cmp(&b.1));
        let mut by_number = names;
        by_number.sort_by_key(|(numbers, _)| *numbers);
        assert_eq!(by_name, by_number);
    }

    #[rstest]
    #[case(Some("jpg"), "000000.jpg")]
    #[case(Some("webp"), "000000.webp")]
    #[case(Some("jpeg2"), "000000")]
    #[case(Some(""), "000000")]
    #[case(Some("p/g"), "000000")]
    #[case(None, "000000")]
    fn test_cover_entry_name(#[case] ext: Option<&str>, #[case] expected: &str) {
        assert_eq!(cover_entry_name(ext), expected);
    }

    #[rstest]
    #[case("One Piece", ArchiveFormat::Zip, "one-piece.cbz")]
    #[case("Who/What?", ArchiveFormat::Directory, "who-what")]
    #[case("Frieren: Beyond Journey's End", ArchiveFormat::Zip, "frieren-beyond-journeys-end.cbz")]
    #[case("...", ArchiveFormat::Zip, "manga.cbz")]
    #[case("  Spaced  ", ArchiveFormat::Directory, "spaced")]
    fn test_archive_file_name(#[case] title: &str, #[case] format: ArchiveFormat, #[case] expected: &str) {
        assert_eq!(archive_file_name(title, format), expected);
    }

    #[rstest]
    #[case(".kura-Manga.old", Some("Manga"))]
    #[case(".kura-.old", None)]
    #[case(".kura-abc123", None)]
    #[case(".kura-abc123.tmp", None)]
    #[case("Manga.old", None)]
    fn test_backup_target(#[case] name: &str, #[case] expected: Option<&str>) {
        assert_eq!(backup_target(name), expected);
        if let Some(target) = expected {
            assert_eq!(backup_name(target), name);
        }
    }

    #[test]
    fn test_archive_file_name_is_capped() {
        let name = archive_file_name(&"long title ".repeat(40), ArchiveFormat::Directory);
        assert!(name.len() <= MAX_STEM_LEN);
        assert!(!name.ends_with('-'));
    }
}
