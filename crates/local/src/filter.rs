//! Filtering and ordering of library listings.

use crate::models::LocalManga;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    /// By title, with digit runs compared numerically.
    #[default]
    Alphabetical,
    /// Highest rated first; unrated manga last.
    Rating,
    /// Most recently modified archive first.
    Newest,
}

/// Narrows a library listing down. The default filter keeps everything.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ListFilter {
    /// Case-insensitive substring of the title or alternative title.
    pub query: Option<String>,
    /// Tag keys that must all be present.
    pub tags: Vec<String>,
    /// Tag keys of which none may be present.
    pub tags_exclude: Vec<String>,
    pub sort: Option<SortOrder>,
}

impl ListFilter {
    pub fn matches(&self, local: &LocalManga) -> bool {
        let manga = &local.manga;
        if let Some(query) = self.query.as_deref().map(str::trim).filter(|q| !q.is_empty()) {
            let query = query.to_lowercase();
            let hit = std::iter::once(manga.title.as_str())
                .chain(manga.alt_title.as_deref())
                .any(|title| title.to_lowercase().contains(&query));
            if !hit {
                return false;
            }
        }
        let has_tag = |key: &String| manga.tags.iter().any(|tag| &tag.key == key);
        self.tags.iter().all(has_tag) && !self.tags_exclude.iter().any(has_tag)
    }

    /// Drops non-matching manga and sorts the rest.
    pub fn apply(&self, mut list: Vec<LocalManga>) -> Vec<LocalManga> {
        list.retain(|local| self.matches(local));
        if let Some(sort) = self.sort {
            list.sort_by(|a, b| compare(sort, a, b));
        }
        list
    }
}

fn compare(sort: SortOrder, a: &LocalManga, b: &LocalManga) -> Ordering {
    match sort {
        SortOrder::Alphabetical => natord::compare_ignore_case(&a.manga.title, &b.manga.title),
        SortOrder::Rating => match (a.manga.rating, b.manga.rating) {
            (Some(a), Some(b)) => b.total_cmp(&a),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        },
        SortOrder::Newest => b.modified.cmp(&a.modified),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{LOCAL_SOURCE, MangaRecord, MangaTag};
    use kura_archive::ArchiveFormat;
    use rstest::rstest;
    use std::path::PathBuf;
    use time::OffsetDateTime;

    fn local(title: &str, tags: &[&str], rating: Option<f32>, modified: i64) -> LocalManga {
        LocalManga {
            manga: MangaRecord {
                id: 0,
                title: title.to_string(),
                alt_title: None,
                url: String::new(),
                public_url: String::new(),
                cover_url: None,
                tags: tags.iter().map(|t| MangaTag { key: t.to_string(), title: t.to_uppercase() }).collect(),
                state: None,
                authors: vec![],
                description: None,
                rating,
                source: LOCAL_SOURCE.to_string(),
                chapters: vec![],
            },
            path: PathBuf::from(title),
            format: ArchiveFormat::Directory,
            modified: OffsetDateTime::from_unix_timestamp(modified).unwrap(),
        }
    }

    fn library() -> Vec<LocalManga> {
        vec![
            local("Volume 10", &["action"], Some(0.5), 300),
            local("volume 9", &["action", "comedy"], None, 100),
            local("Another", &["comedy"], Some(0.9), 200),
        ]
    }

    fn titles(list: &[LocalManga]) -> Vec<&str> {
        list.iter().map(|l| l.manga.title.as_str()).collect()
    }

    #[rstest]
    #[case(SortOrder::Alphabetical, &["Another", "volume 9", "Volume 10"])]
    #[case(SortOrder::Rating, &["Another", "Volume 10", "volume 9"])]
    #[case(SortOrder::Newest, &["Volume 10", "Another", "volume 9"])]
    fn test_sort(#[case] sort: SortOrder, #[case] expected: &[&str]) {
        let filter = ListFilter { sort: Some(sort), ..Default::default() };
        assert_eq!(titles(&filter.apply(library())), expected);
    }

    #[rstest]
    #[case(Some("VOLUME"), &[], &[], &["Volume 10", "volume 9"])]
    #[case(Some("  "), &[], &[], &["Volume 10", "volume 9", "Another"])]
    #[case(None, &["action", "comedy"], &[], &["volume 9"])]
    #[case(None, &[], &["comedy"], &["Volume 10"])]
    #[case(Some("nothing"), &[], &[], &[])]
    fn test_filter(
        #[case] query: Option<&str>,
        #[case] tags: &[&str],
        #[case] tags_exclude: &[&str],
        #[case] expected: &[&str],
    ) {
        let filter = ListFilter {
            query: query.map(str::to_string),
            tags: tags.iter().map(|t| t.to_string()).collect(),
            tags_exclude: tags_exclude.iter().map(|t| t.to_string()).collect(),
            sort: None,
        };
        assert_eq!(titles(&filter.apply(library())), expected);
    }

    #[test]
    fn test_alt_title_matches_query() {
        let mut manga = local("Shingeki no Kyojin", &[], None, 0);
        manga.manga.alt_title = Some("Attack on Titan".to_string());
        let filter = ListFilter { query: Some("titan".to_string()), ..Default::default() };
        assert!(filter.matches(&manga));
    }
}
