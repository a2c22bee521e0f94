//! Title-based alignment of sections between two document versions.

use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

use super::section::Section;

/// Outcome of aligning two section lists by exact title.
#[derive(Debug, Clone, Default)]
pub struct SectionMatch<'a> {
    pub added: BTreeSet<String>,
    pub removed: BTreeSet<String>,
    pub common: BTreeSet<String>,
    pub old_by_title: BTreeMap<String, &'a Section>,
    pub new_by_title: BTreeMap<String, &'a Section>,
}

/// Index sections by title. When a title repeats, the first occurrence wins
/// and later ones are ignored for matching.
pub fn index_by_title(sections: &[Section]) -> BTreeMap<String, &Section> {
    let mut index = BTreeMap::new();
    for section in sections {
        if index.contains_key(&section.title) {
            debug!("Ignoring duplicate section title '{}'", section.title);
            continue;
        }
        index.insert(section.title.clone(), section);
    }
    index
}

pub fn match_sections<'a>(old_sections: &'a [Section], new_sections: &'a [Section]) -> SectionMatch<'a> {
    let old_by_title = index_by_title(old_sections);
    let new_by_title = index_by_title(new_sections);

    let old_titles: BTreeSet<String> = old_by_title.keys().cloned().collect();
    let new_titles: BTreeSet<String> = new_by_title.keys().cloned().collect();

    SectionMatch {
        added: new_titles.difference(&old_titles).cloned().collect(),
        removed: old_titles.difference(&new_titles).cloned().collect(),
        common: old_titles.intersection(&new_titles).cloned().collect(),
        old_by_title,
        new_by_title,
    }
}
