use crate::error::{ErrorKind, Result};
use kura_local::PageRecord;
use std::collections::vec_deque::Iter;
use std::collections::{HashMap, VecDeque};
use std::ops::Range;

/// A page as shown by the reader.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReaderPage {
    pub id: u64,
    pub url: String,
    pub preview: Option<String>,
    pub chapter_id: i64,
    /// Position within the chapter.
    pub index: usize,
    pub source: String,
}

impl ReaderPage {
    pub fn from_page(page: PageRecord, chapter_id: i64, index: usize) -> Self {
        Self { id: page.id, url: page.url, preview: page.preview, chapter_id, index, source: page.source }
    }
}

/// Whole chapters of pages, in reading order.
///
/// Every chapter occupies one contiguous run of the window. Positions are
/// tracked in a virtual coordinate space that only grows at the ends, so a
/// chapter's run never has to be recomputed when chapters are added or evicted
/// around it.
///
/// ```
/// use kura_local::PageRecord;
/// use kura_reader::ChapterPages;
/// use std::path::Path;
///
/// let pages = |n: usize| (0..n).map(|i| PageRecord::for_entry(Path::new("a.cbz"), &i.to_string(), "local"));
/// let mut window = ChapterPages::new();
/// window.add_last(1, pages(12)).unwrap();
/// window.add_last(2, pages(17)).unwrap();
/// window.add_last(4, pages(2)).unwrap();
/// assert_eq!((window.chapters_size(), window.size()), (3, 31));
/// window.remove_first().unwrap();
/// assert_eq!((window.chapters_size(), window.size()), (2, 19));
/// window.remove_last().unwrap();
/// assert_eq!((window.chapters_size(), window.size()), (1, 17));
/// ```
#[derive(Clone, Debug, Default)]
pub struct ChapterPages {
    pages: VecDeque<ReaderPage>,
    chapters: VecDeque<i64>,
    ranges: HashMap<i64, Range<i64>>,
    // Virtual position of `pages[0]`.
    head: i64,
}

impl ChapterPages {
    pub fn new() -> Self {
        Self::default()
    }

    fn tail(&self) -> i64 {
        self.head + self.pages.len() as i64
    }

    fn check_absent(&self, chapter_id: i64) -> Result<()> {
        if self.ranges.contains_key(&chapter_id) {
            exn::bail!(ErrorKind::DuplicateChapter(chapter_id));
        }
        Ok(())
    }

    /// Prepends `pages` as chapter `chapter_id`.
    ///
    /// An empty page list leaves the window unchanged.
    pub fn add_first(&mut self, chapter_id: i64, pages: impl IntoIterator<Item = PageRecord>) -> Result<()> {
        self.check_absent(chapter_id)?;
        let pages: Vec<ReaderPage> = pages
            .into_iter()
            .enumerate()
            .map(|(index, page)| ReaderPage::from_page(page, chapter_id, index))
            .collect();
        if pages.is_empty() {
            return Ok(());
        }
        let start = self.head - pages.len() as i64;
        self.ranges.insert(chapter_id, start..self.head);
        self.head = start;
        self.chapters.push_front(chapter_id);
        for page in pages.into_iter().rev() {
            self.pages.push_front(page);
        }
        tracing::trace!(chapter_id, size = self.size(), "Prepended chapter");
        Ok(())
    }

    /// Appends `pages` as chapter `chapter_id`.
    ///
    /// An empty page list leaves the window unchanged.
    pub fn add_last(&mut self, chapter_id: i64, pages: impl IntoIterator<Item = PageRecord>) -> Result<()> {
        self.check_absent(chapter_id)?;
        let start = self.tail();
        self.pages.extend(
            pages.into_iter().enumerate().map(|(index, page)| ReaderPage::from_page(page, chapter_id, index)),
        );
        let end = self.tail();
        if start == end {
            return Ok(());
        }
        self.ranges.insert(chapter_id, start..end);
        self.chapters.push_back(chapter_id);
        tracing::trace!(chapter_id, size = self.size(), "Appended chapter");
        Ok(())
    }

    /// Evicts the first chapter, returning its id.
    pub fn remove_first(&mut self) -> Result<i64> {
        let Some(chapter_id) = self.chapters.pop_front() else {
            exn::bail!(ErrorKind::EmptyWindow);
        };
        if let Some(range) = self.ranges.remove(&chapter_id) {
            let len = (range.end - range.start) as usize;
            self.pages.drain(..len);
            self.head = range.end;
        }
        Ok(chapter_id)
    }

    /// Evicts the last chapter, returning its id.
    pub fn remove_last(&mut self) -> Result<i64> {
        let Some(chapter_id) = self.chapters.pop_back() else {
            exn::bail!(ErrorKind::EmptyWindow);
        };
        if let Some(range) = self.ranges.remove(&chapter_id) {
            self.pages.truncate((range.start - self.head) as usize);
        }
        Ok(chapter_id)
    }

    pub fn clear(&mut self) {
        self.pages.clear();
        self.chapters.clear();
        self.ranges.clear();
        self.head = 0;
    }

    /// Total number of pages.
    pub fn size(&self) -> usize {
        self.pages.len()
    }

    /// Number of pages of chapter `chapter_id`, zero if it isn't loaded.
    pub fn size_of(&self, chapter_id: i64) -> usize {
        self.ranges.get(&chapter_id).map_or(0, |range| (range.end - range.start) as usize)
    }

    pub fn chapters_size(&self) -> usize {
        self.chapters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    /// Pages of chapter `chapter_id` in order; empty if it isn't loaded.
    pub fn sub_list(&self, chapter_id: i64) -> Iter<'_, ReaderPage> {
        match self.ranges.get(&chapter_id) {
            Some(range) => self.pages.range((range.start - self.head) as usize..(range.end - self.head) as usize),
            None => self.pages.range(0..0),
        }
    }

    pub fn get(&self, index: usize) -> Option<&ReaderPage> {
        self.pages.get(index)
    }

    pub fn iter(&self) -> Iter<'_, ReaderPage> {
        self.pages.iter()
    }

    /// Loaded chapter ids, front to back.
    pub fn chapters(&self) -> impl Iterator<Item = i64> + '_ {
        self.chapters.iter().copied()
    }

    pub fn first_chapter(&self) -> Option<i64> {
        self.chapters.front().copied()
    }

    pub fn last_chapter(&self) -> Option<i64> {
        self.chapters.back().copied()
    }

    /// Window position of the page with id `page_id`.
    pub fn index_of(&self, page_id: u64) -> Option<usize> {
        self.pages.iter().position(|page| page.id == page_id)
    }
}

impl<'a> IntoIterator for &'a ChapterPages {
    type Item = &'a ReaderPage;
    type IntoIter = Iter<'a, ReaderPage>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rstest::rstest;
    use std::collections::{HashSet, VecDeque};
    use std::path::Path;

    fn pages(chapter_id: i64, n: usize) -> Vec<PageRecord> {
        (0..n)
            .map(|i| PageRecord::for_entry(Path::new("manga.cbz"), &format!("{chapter_id:03}{i:03}.png"), "local"))
            .collect()
    }

    fn assert_consistent(window: &ChapterPages) {
        let ids: Vec<i64> = window.chapters().collect();
        let distinct: HashSet<i64> = window.iter().map(|p| p.chapter_id).collect();
        assert_eq!(ids.len(), distinct.len());
        assert_eq!(window.chapters_size(), distinct.len());
        assert_eq!(window.size(), ids.iter().map(|id| window.size_of(*id)).sum::<usize>());
        // Whole segments, in chapter order.
        let mut position = 0;
        for id in ids {
            let run: Vec<&ReaderPage> = window.sub_list(id).collect();
            assert_eq!(run.len(), window.size_of(id));
            for (index, page) in run.iter().enumerate() {
                assert_eq!(page.chapter_id, id);
                assert_eq!(page.index, index);
                assert_eq!(window.get(position), Some(*page));
                position += 1;
            }
        }
        assert_eq!(position, window.size());
    }

    #[test]
    fn test_remove_from_both_ends() {
        let mut window = ChapterPages::new();
        window.add_last(1, pages(1, 12)).unwrap();
        window.add_last(2, pages(2, 17)).unwrap();
        window.add_last(4, pages(4, 2)).unwrap();
        assert_eq!((window.chapters_size(), window.size()), (3, 31));
        assert_eq!(window.remove_first().unwrap(), 1);
        assert_eq!((window.chapters_size(), window.size()), (2, 19));
        assert_eq!(window.remove_last().unwrap(), 4);
        assert_eq!((window.chapters_size(), window.size()), (1, 17));
        assert_eq!(window.size_of(1), 0);
        assert_consistent(&window);
    }

    #[test]
    fn test_sub_list_after_add_first() {
        let mut window = ChapterPages::new();
        window.add_last(1, pages(1, 12)).unwrap();
        window.add_last(2, pages(2, 17)).unwrap();
        window.add_first(4, pages(4, 2)).unwrap();
        let run: Vec<&ReaderPage> = window.sub_list(2).collect();
        assert_eq!(run.len(), 17);
        assert_eq!(run.first().unwrap().chapter_id, 2);
        assert_eq!(run.last().unwrap().chapter_id, 2);
        assert_eq!(window.first_chapter(), Some(4));
        assert_eq!(window.last_chapter(), Some(2));
        assert_eq!(window.get(0).unwrap().chapter_id, 4);
        assert_eq!(window.sub_list(3).len(), 0);
        assert_consistent(&window);
    }

    #[rstest]
    #[case(true)]
    #[case(false)]
    fn test_duplicate_chapter(#[case] front: bool) {
        let mut window = ChapterPages::new();
        window.add_last(1, pages(1, 3)).unwrap();
        let err = match front {
            true => window.add_first(1, pages(1, 3)),
            false => window.add_last(1, pages(1, 3)),
        }
        .unwrap_err();
        assert!(matches!(&*err, ErrorKind::DuplicateChapter(1)));
        assert_eq!(window.size(), 3);
    }

    #[test]
    fn test_empty_window() {
        let mut window = ChapterPages::new();
        assert!(matches!(&*window.remove_first().unwrap_err(), ErrorKind::EmptyWindow));
        assert!(matches!(&*window.remove_last().unwrap_err(), ErrorKind::EmptyWindow));
        // Chapters without pages are never loaded.
        window.add_last(9, vec![]).unwrap();
        assert!(window.is_empty());
        assert_eq!(window.chapters_size(), 0);
    }

    #[test]
    fn test_clear_and_reuse() {
        let mut window = ChapterPages::new();
        window.add_first(1, pages(1, 4)).unwrap();
        window.add_first(2, pages(2, 4)).unwrap();
        window.clear();
        assert!(window.is_empty());
        assert_eq!((window.size(), window.chapters_size(), window.size_of(1)), (0, 0, 0));
        // Cleared chapters can be loaded again.
        window.add_last(1, pages(1, 4)).unwrap();
        assert_consistent(&window);
    }

    #[test]
    fn test_index_of() {
        let mut window = ChapterPages::new();
        let second = pages(2, 3);
        let wanted = second[1].id;
        window.add_last(1, pages(1, 5)).unwrap();
        window.add_last(2, second).unwrap();
        assert_eq!(window.index_of(wanted), Some(6));
        window.remove_first().unwrap();
        assert_eq!(window.index_of(wanted), Some(1));
        assert_eq!(window.index_of(0), None);
    }

    #[derive(Clone, Debug)]
    enum Op {
        AddFirst(usize),
        AddLast(usize),
        RemoveFirst,
        RemoveLast,
        Clear,
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            4 => (1usize..20).prop_map(Op::AddFirst),
            4 => (1usize..20).prop_map(Op::AddLast),
            3 => Just(Op::RemoveFirst),
            3 => Just(Op::RemoveLast),
            1 => Just(Op::Clear),
        ]
    }

    proptest! {
        #[test]
        fn test_invariants_hold_for_any_sequence(ops in prop::collection::vec(op(), 1..200)) {
            let mut window = ChapterPages::new();
            // Resident chapters and their sizes, front to back.
            let mut model: VecDeque<(i64, usize)> = VecDeque::new();
            let mut next_chapter = 0i64;
            for op in ops {
                match op {
                    Op::AddFirst(n) => {
                        next_chapter += 1;
                        window.add_first(next_chapter, pages(next_chapter, n)).unwrap();
                        model.push_front((next_chapter, n));
                    },
                    Op::AddLast(n) => {
                        next_chapter += 1;
                        window.add_last(next_chapter, pages(next_chapter, n)).unwrap();
                        model.push_back((next_chapter, n));
                    },
                    Op::RemoveFirst => match model.pop_front() {
                        Some((id, _)) => {
                            prop_assert_eq!(window.remove_first().unwrap(), id);
                        },
                        None => {
                            prop_assert!(window.remove_first().is_err());
                        },
                    },
                    Op::RemoveLast => match model.pop_back() {
                        Some((id, _)) => {
                            prop_assert_eq!(window.remove_last().unwrap(), id);
                        },
                        None => {
                            prop_assert!(window.remove_last().is_err());
                        },
                    },
                    Op::Clear => {
                        window.clear();
                        model.clear();
                    },
                }
                if let Some(&(id, _)) = model.front() {
                    let err = window.add_last(id, pages(id, 1)).unwrap_err();
                    prop_assert!(matches!(&*err, ErrorKind::DuplicateChapter(dup) if *dup == id));
                }
                let chapters: Vec<i64> = window.chapters().collect();
                let expected: Vec<i64> = model.iter().map(|(id, _)| *id).collect();
                prop_assert_eq!(chapters, expected);
                prop_assert_eq!(window.size(), model.iter().map(|(_, n)| n).sum::<usize>());
                assert_consistent(&window);
            }
        }
    }
}
