//! Bookpath collision detection between the packages of a merge.

use std::collections::{BTreeMap, BTreeSet};

use crate::bookpath;

/// Old bookpath → new bookpath, for one source package.
pub type RenameMap = BTreeMap<String, String>;

/// Computes the rename map of every source, in merge order.
///
/// A bookpath conflicts when more than one source owns it. The first
/// source keeps its names; every conflicting bookpath of the source at
/// position `N` (1-based, `N >= 2`) gets its file name prefixed with
/// `vol{N}_`, its directory unchanged.
///
/// Renamed paths are not checked against existing names: a source that
/// already holds `vol2_x.png` next to a conflicting `x.png` ends up with
/// two entries for the same path.
///
/// ```
/// use std::collections::BTreeSet;
/// use epub_splice::conflict::detect_conflicts;
///
/// let a: BTreeSet<String> = ["OEBPS/ch1.xhtml".to_string()].into();
/// let b: BTreeSet<String> = ["OEBPS/ch1.xhtml".to_string(), "OEBPS/b.css".to_string()].into();
/// let maps = detect_conflicts(&[a, b]);
/// assert!(maps[0].is_empty());
/// assert_eq!("OEBPS/vol2_ch1.xhtml", maps[1]["OEBPS/ch1.xhtml"]);
/// assert!(!maps[1].contains_key("OEBPS/b.css"));
/// ```
pub fn detect_conflicts(sources: &[BTreeSet<String>]) -> Vec<RenameMap> {
    let mut seen: BTreeSet<&str> = BTreeSet::new();
    let mut conflicting: BTreeSet<&str> = BTreeSet::new();
    for paths in sources {
        for path in paths {
            if !seen.insert(path.as_str()) {
                conflicting.insert(path.as_str());
            }
        }
    }

    sources
        .iter()
        .enumerate()
        .map(|(index, paths)| {
            if index == 0 {
                return RenameMap::new();
            }
            paths
                .iter()
                .filter(|p| conflicting.contains(p.as_str()))
                .map(|p| (p.clone(), prefixed(p, index + 1)))
                .collect()
        })
        .collect()
}

fn prefixed(path: &str, volume: usize) -> String {
    let dir = bookpath::dirname(path);
    let name = bookpath::basename(path);
    if dir.is_empty() {
        format!("vol{}_{}", volume, name)
    } else {
        format!("{}/vol{}_{}", dir, volume, name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(paths: &[&str]) -> BTreeSet<String> {
        paths.iter().map(|p| p.to_string()).collect()
    }

    #[test]
    fn keys_are_exactly_the_shared_paths() {
        let sources = vec![
            set(&["OEBPS/a.xhtml", "OEBPS/style.css"]),
            set(&["OEBPS/b.xhtml", "OEBPS/shared.png"]),
            set(&["OEBPS/a.xhtml", "OEBPS/shared.png", "OEBPS/c.xhtml", "cover.jpg"]),
        ];
        let maps = detect_conflicts(&sources);

        assert_eq!(3, maps.len());
        assert!(maps[0].is_empty());
        // the second source's png collides with a later source, not an earlier one
        assert_eq!(
            vec![("OEBPS/shared.png", "OEBPS/vol2_shared.png")],
            maps[1].iter().map(|(k, v)| (k.as_str(), v.as_str())).collect::<Vec<_>>()
        );
        assert_eq!(2, maps[2].len());
        assert_eq!("OEBPS/vol3_a.xhtml", maps[2]["OEBPS/a.xhtml"]);
        assert_eq!("OEBPS/vol3_shared.png", maps[2]["OEBPS/shared.png"]);
    }

    #[test]
    fn root_level_files_keep_no_directory() {
        let maps = detect_conflicts(&[set(&["cover.jpg"]), set(&["cover.jpg"])]);
        assert_eq!("vol2_cover.jpg", maps[1]["cover.jpg"]);
    }

    #[test]
    fn disjoint_sources_rename_nothing() {
        let maps = detect_conflicts(&[set(&["a"]), set(&["b"]), set(&["c"])]);
        assert!(maps.iter().all(|m| m.is_empty()));
    }
}
