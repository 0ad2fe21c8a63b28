// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

//! Checks and derived data computed once a script has finished building a library.

use std::collections::{BTreeMap, HashSet};
use std::fmt;

use super::{Instrument, Library, RelativePath, ValueRange};
use crate::error::FloeError;

/// Upper bound (exclusive) of the MIDI key space.
const KEY_SPACE_END: u8 = 128;

/// A referenced file that could not be found. Reported, never fatal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileIssue {
    pub path: RelativePath,
    pub kind: FileIssueKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileIssueKind {
    Missing,
    Unresolvable(String),
}

impl fmt::Display for FileIssueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FileIssueKind::Missing => f.write_str("file does not exist"),
            FileIssueKind::Unresolvable(reason) => f.write_str(reason),
        }
    }
}

/// Runs the post-processing steps in order: uniqueness re-check, waveform
/// defaults, round-robin bounds and automatic key ranges.
pub fn postprocess(library: &mut Library) -> Result<(), FloeError> {
    check_unique_names(library)?;
    for instrument in library.instruments_mut() {
        if instrument.waveform_audio_path.is_none() {
            instrument.waveform_audio_path = instrument.regions.first().map(|r| r.file.path.clone());
        }
        instrument.max_round_robin_index = instrument
            .regions
            .iter()
            .filter_map(|r| r.trigger.round_robin_index)
            .max()
            .unwrap_or(0);
        auto_map_key_ranges(instrument);
    }
    Ok(())
}

fn check_unique_names(library: &Library) -> Result<(), FloeError> {
    let duplicate = |kind: &str, name: &str| FloeError::InvalidFileFormat {
        path: library.script_path.clone(),
        message: format!("duplicate {} name \"{}\"", kind, name),
    };
    let mut seen = HashSet::new();
    for instrument in library.instruments() {
        if !seen.insert(instrument.name.as_str()) {
            return Err(duplicate("instrument", &instrument.name));
        }
    }
    seen.clear();
    for ir in library.irs() {
        if !seen.insert(ir.name.as_str()) {
            return Err(duplicate("impulse response", &ir.name));
        }
    }
    Ok(())
}

/// Gives every region in an auto-map group a key range reaching halfway to its
/// neighbours' root keys, so the group covers the whole keyboard without gaps
/// or overlaps. Of two regions sharing a root key, the earlier one stops just
/// below the root and the later one starts at it.
pub fn auto_map_key_ranges(instrument: &mut Instrument) {
    let mut groups: BTreeMap<&str, Vec<usize>> = BTreeMap::new();
    for (index, region) in instrument.regions.iter().enumerate() {
        if let Some(group) = region.options.auto_map_key_range_group.as_deref() {
            if !group.is_empty() {
                groups.entry(group).or_default().push(index);
            }
        }
    }

    let mut assignments: Vec<(usize, ValueRange)> = Vec::new();
    for mut members in groups.into_values() {
        // Stable, so equal root keys keep declaration order.
        members.sort_by_key(|&index| instrument.regions[index].file.root_key);
        let mut start: u8 = 0;
        for (position, &index) in members.iter().enumerate() {
            let root = instrument.regions[index].file.root_key;
            let end = match members.get(position + 1) {
                Some(&next) => {
                    let next_root = instrument.regions[next].file.root_key;
                    let end = if next_root == root {
                        root as u16
                    } else {
                        root as u16 + (next_root - root) as u16 / 2 + 1
                    };
                    (end.min(KEY_SPACE_END as u16) as u8).max(start + 1)
                }
                None => KEY_SPACE_END,
            };
            let end = end.min(KEY_SPACE_END).max(start.saturating_add(1));
            assignments.push((index, ValueRange::new(start, end)));
            start = end.min(KEY_SPACE_END - 1);
        }
    }

    for (index, range) in assignments {
        instrument.regions[index].trigger.key_range = range;
    }
}

/// Probes every file the library refers to. Missing files are listed, not fatal.
pub fn check_referenced_files(library: &Library) -> Vec<FileIssue> {
    let mut paths: Vec<&RelativePath> = Vec::new();
    paths.extend(library.info.icon_image_path.as_ref());
    paths.extend(library.info.background_image_path.as_ref());
    for instrument in library.instruments() {
        paths.extend(instrument.regions.iter().map(|r| &r.file.path));
    }
    paths.extend(library.irs().iter().map(|ir| &ir.path));

    let mut seen = HashSet::new();
    paths
        .into_iter()
        .filter(|path| seen.insert(path.as_str()))
        .filter_map(|path| match library.file_reader.exists(path) {
            Ok(true) => None,
            Ok(false) => Some(FileIssue {
                path: path.clone(),
                kind: FileIssueKind::Missing,
            }),
            Err(e) => Some(FileIssue {
                path: path.clone(),
                kind: FileIssueKind::Unresolvable(e.to_string()),
            }),
        })
        .collect()
}

#[cfg(test)]
mod test {
    use std::path::Path;

    use super::*;
    use crate::library::{LibraryInfo, Region, RegionFile, RegionOptions};

    fn region(root_key: u8, group: Option<&str>) -> Region {
        Region {
            file: RegionFile {
                path: RelativePath::new(&format!("{}.wav", root_key)).expect("path"),
                root_key,
                sample_loop: None,
            },
            options: RegionOptions {
                auto_map_key_range_group: group.map(str::to_string),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn ranges(instrument: &Instrument) -> Vec<(u8, u8)> {
        instrument
            .regions
            .iter()
            .map(|r| (r.trigger.key_range.start, r.trigger.key_range.end))
            .collect()
    }

    #[test]
    fn test_auto_map_two_regions() {
        let mut instrument = Instrument {
            regions: vec![region(30, Some("g")), region(10, Some("g"))],
            ..Default::default()
        };
        auto_map_key_ranges(&mut instrument);
        assert_eq!(ranges(&instrument), vec![(21, 128), (0, 21)]);
    }

    #[test]
    fn test_auto_map_single_region() {
        let mut instrument = Instrument {
            regions: vec![region(60, Some("g"))],
            ..Default::default()
        };
        auto_map_key_ranges(&mut instrument);
        assert_eq!(ranges(&instrument), vec![(0, 128)]);
    }

    #[test]
    fn test_auto_map_groups_are_independent() {
        let mut instrument = Instrument {
            regions: vec![
                region(40, Some("a")),
                region(60, Some("b")),
                region(80, Some("a")),
                region(50, None),
                region(50, Some("")),
            ],
            ..Default::default()
        };
        auto_map_key_ranges(&mut instrument);
        assert_eq!(
            ranges(&instrument),
            vec![(0, 61), (0, 128), (61, 128), (60, 64), (60, 64)]
        );
    }

    #[test]
    fn test_auto_map_covers_keyboard_without_gaps() {
        let roots = [0u8, 1, 2, 36, 37, 90, 127, 127];
        let mut instrument = Instrument {
            regions: roots.iter().map(|&k| region(k, Some("g"))).collect(),
            ..Default::default()
        };
        auto_map_key_ranges(&mut instrument);
        let mut sorted = ranges(&instrument);
        sorted.sort();
        assert_eq!(sorted.first().map(|r| r.0), Some(0));
        assert_eq!(sorted.last().map(|r| r.1), Some(128));
        for pair in sorted.windows(2) {
            assert_eq!(pair[0].1, pair[1].0, "gap or overlap between {:?}", pair);
        }
        for (start, end) in sorted {
            assert!(end > start);
        }
    }

    #[test]
    fn test_auto_map_shared_root_keys_split_at_root() {
        for (roots, expected) in [
            ([60u8, 60], vec![(0, 60), (60, 128)]),
            ([127, 127], vec![(0, 127), (127, 128)]),
            ([0, 0], vec![(0, 1), (1, 128)]),
        ] {
            let mut instrument = Instrument {
                regions: roots.iter().map(|&k| region(k, Some("g"))).collect(),
                ..Default::default()
            };
            auto_map_key_ranges(&mut instrument);
            assert_eq!(ranges(&instrument), expected, "{:?}", roots);
        }
    }

    #[test]
    fn test_postprocess_defaults() {
        let mut library = Library::new(LibraryInfo::default(), Path::new("/l/floe.lua"));
        let mut first = region(60, None);
        first.trigger.round_robin_index = Some(2);
        library
            .add_instrument(Instrument {
                name: "I".to_string(),
                regions: vec![first, region(62, None)],
                ..Default::default()
            })
            .expect("add");
        library
            .add_instrument(Instrument {
                name: "Empty".to_string(),
                ..Default::default()
            })
            .expect("add");

        postprocess(&mut library).expect("postprocess");
        let instrument = library.instrument("I").expect("instrument");
        assert_eq!(instrument.max_round_robin_index, 2);
        assert_eq!(
            instrument.waveform_audio_path.as_ref().map(|p| p.as_str()),
            Some("60.wav")
        );
        let empty = library.instrument("Empty").expect("instrument");
        assert_eq!(empty.max_round_robin_index, 0);
        assert!(empty.waveform_audio_path.is_none());
    }

    #[test]
    fn test_referenced_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("60.wav"), b"x").expect("write");
        let mut library = Library::new(LibraryInfo::default(), &dir.path().join("floe.lua"));
        library
            .add_instrument(Instrument {
                name: "I".to_string(),
                regions: vec![region(60, None), region(61, None), region(61, None)],
                ..Default::default()
            })
            .expect("add");

        let issues = check_referenced_files(&library);
        assert_eq!(
            issues,
            vec![FileIssue {
                path: RelativePath::new("61.wav").expect("path"),
                kind: FileIssueKind::Missing,
            }]
        );
    }
}
