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

//! Chooses the regions a note event triggers and their crossfade gains.
//!
//! Runs on the audio thread: no allocation, output goes into a fixed-capacity buffer.

use crate::library::{Instrument, TriggerEvent, ValueRange};

/// The most regions a single event can trigger. Matches beyond this are dropped.
pub const MAX_TRIGGERED_REGIONS: usize = 32;

/// A note event in the selector's terms. Velocity and timbre are in [0, 99].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NoteEvent {
    pub kind: TriggerEvent,
    pub key: u8,
    pub velocity: u8,
    pub rr_counter: u32,
    pub timbre: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TriggeredRegion {
    pub region_index: usize,
    pub gain: f32,
}

/// Fixed-capacity output of `select`.
#[derive(Debug, Clone)]
pub struct TriggeredRegions {
    items: [TriggeredRegion; MAX_TRIGGERED_REGIONS],
    len: usize,
}

impl Default for TriggeredRegions {
    fn default() -> Self {
        TriggeredRegions {
            items: [TriggeredRegion::default(); MAX_TRIGGERED_REGIONS],
            len: 0,
        }
    }
}

impl TriggeredRegions {
    pub fn new() -> TriggeredRegions {
        TriggeredRegions::default()
    }

    pub fn clear(&mut self) {
        self.len = 0;
    }

    fn push(&mut self, region: TriggeredRegion) -> bool {
        if self.len == MAX_TRIGGERED_REGIONS {
            return false;
        }
        self.items[self.len] = region;
        self.len += 1;
        true
    }

    pub fn as_slice(&self) -> &[TriggeredRegion] {
        &self.items[..self.len]
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// Maps a MIDI velocity (0..=127) onto the script's 0..=99 scale.
#[inline]
pub fn velocity_to_percent(velocity: u8) -> u8 {
    (velocity.min(127) as u16 * 100 / 128) as u8
}

/// Fills `out` with the regions of `instrument` that `event` triggers.
pub fn select(instrument: &Instrument, event: &NoteEvent, out: &mut TriggeredRegions) {
    out.clear();

    let cycle = instrument.max_round_robin_index as u64 + 1;
    let mut kept = [0usize; MAX_TRIGGERED_REGIONS];
    let mut count = 0;
    for (index, region) in instrument.regions.iter().enumerate() {
        let trigger = &region.trigger;
        if trigger.event != event.kind
            || !trigger.key_range.contains(event.key)
            || !trigger.velocity_range.contains(event.velocity)
        {
            continue;
        }
        if let Some(rr) = trigger.round_robin_index {
            if event.rr_counter as u64 % cycle != rr as u64 {
                continue;
            }
        }
        if let Some(timbre) = region.options.timbre_crossfade_region {
            if !timbre.contains(event.timbre) {
                continue;
            }
        }
        if count == MAX_TRIGGERED_REGIONS {
            break;
        }
        kept[count] = index;
        count += 1;
    }

    let kept = &kept[..count];
    for &index in kept {
        let gain = velocity_weight(instrument, kept, index, event.velocity)
            * timbre_weight(instrument, kept, index, event.timbre);
        out.push(TriggeredRegion {
            region_index: index,
            gain,
        });
    }
}

/// How far `value` sits inside `range`, counting from the nearest edge, plus one
/// so that edge values still contribute.
#[inline]
fn edge_distance(range: ValueRange, value: u8) -> f32 {
    let from_start = value.saturating_sub(range.start);
    let from_end = range.end.saturating_sub(1).saturating_sub(value);
    from_start.min(from_end) as f32 + 1.0
}

/// Velocity layers crossfade only with regions in the same timbre layer, and
/// only when every region involved opts in.
fn velocity_weight(instrument: &Instrument, kept: &[usize], index: usize, velocity: u8) -> f32 {
    let region = &instrument.regions[index];
    let layer = region.options.timbre_crossfade_region;
    let mut all_feather = region.options.feather_overlapping_velocity_regions;
    let mut partners = 0;
    let mut energy = 0.0;
    for &other in kept {
        let other_region = &instrument.regions[other];
        if other_region.options.timbre_crossfade_region != layer {
            continue;
        }
        let distance = edge_distance(other_region.trigger.velocity_range, velocity);
        energy += distance * distance;
        if other != index {
            partners += 1;
            all_feather &= other_region.options.feather_overlapping_velocity_regions;
        }
    }
    if partners == 0 || !all_feather {
        return 1.0;
    }
    edge_distance(region.trigger.velocity_range, velocity) / energy.sqrt()
}

/// Timbre layers crossfade with every kept region of the same velocity layer
/// whose timbre range contains the knob position.
fn timbre_weight(instrument: &Instrument, kept: &[usize], index: usize, timbre: u8) -> f32 {
    let region = &instrument.regions[index];
    let Some(own) = region.options.timbre_crossfade_region else {
        return 1.0;
    };
    let velocity_layer = region.trigger.velocity_range;
    let mut energy = 0.0;
    for &other in kept {
        let other_region = &instrument.regions[other];
        if other_region.trigger.velocity_range != velocity_layer {
            continue;
        }
        if let Some(range) = other_region.options.timbre_crossfade_region {
            let distance = edge_distance(range, timbre);
            energy += distance * distance;
        }
    }
    edge_distance(own, timbre) / energy.sqrt()
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::library::{Region, RegionOptions, RelativePath, TriggerCriteria};

    fn region(velocity: (u8, u8), feather: bool) -> Region {
        Region {
            trigger: TriggerCriteria {
                key_range: ValueRange::new(0, 128),
                velocity_range: ValueRange::new(velocity.0, velocity.1),
                ..Default::default()
            },
            options: RegionOptions {
                feather_overlapping_velocity_regions: feather,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn instrument(regions: Vec<Region>) -> Instrument {
        let max_round_robin_index = regions
            .iter()
            .filter_map(|r| r.trigger.round_robin_index)
            .max()
            .unwrap_or(0);
        Instrument {
            name: "I".to_string(),
            regions,
            max_round_robin_index,
            ..Default::default()
        }
    }

    fn note_on(velocity: u8) -> NoteEvent {
        NoteEvent {
            kind: TriggerEvent::NoteOn,
            key: 60,
            velocity,
            rr_counter: 0,
            timbre: 0,
        }
    }

    fn run(instrument: &Instrument, event: NoteEvent) -> Vec<TriggeredRegion> {
        let mut out = TriggeredRegions::new();
        select(instrument, &event, &mut out);
        out.as_slice().to_vec()
    }

    #[test]
    fn test_single_region_full_gain() {
        let inst = instrument(vec![region((0, 100), false)]);
        assert_eq!(
            run(&inst, note_on(64)),
            vec![TriggeredRegion {
                region_index: 0,
                gain: 1.0
            }]
        );
    }

    #[test]
    fn test_rejections() {
        let mut narrow = region((0, 50), false);
        narrow.trigger.key_range = ValueRange::new(60, 61);
        let inst = instrument(vec![narrow]);
        assert!(run(&inst, note_on(50)).is_empty());
        assert!(run(&inst, NoteEvent { key: 61, ..note_on(10) }).is_empty());
        assert!(run(&inst, NoteEvent { kind: TriggerEvent::NoteOff, ..note_on(10) }).is_empty());
        assert_eq!(run(&inst, note_on(49)).len(), 1);
    }

    #[test]
    fn test_round_robin_cycle() {
        let regions = (0..3)
            .map(|i| {
                let mut r = region((0, 100), false);
                r.trigger.round_robin_index = Some(i);
                r.file.path = RelativePath::new(&format!("rr{}.wav", i)).expect("path");
                r
            })
            .collect();
        let inst = instrument(regions);
        let picked: Vec<usize> = (0..4)
            .map(|counter| {
                let hits = run(&inst, NoteEvent { rr_counter: counter, ..note_on(50) });
                assert_eq!(hits.len(), 1);
                hits[0].region_index
            })
            .collect();
        assert_eq!(picked, vec![0, 1, 2, 0]);
    }

    #[test]
    fn test_feathered_overlap_is_equal_power() {
        let inst = instrument(vec![region((0, 60), true), region((40, 100), true)]);
        let hits = run(&inst, note_on(50));
        assert_eq!(hits.len(), 2);
        let energy: f32 = hits.iter().map(|h| h.gain * h.gain).sum();
        assert!((energy - 1.0).abs() < 1e-5);
        assert!((hits[0].gain - 10.0 / 221f32.sqrt()).abs() < 1e-5);

        // Outside the overlap only one region plays, at full gain.
        let hits = run(&inst, note_on(20));
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].gain, 1.0);
    }

    #[test]
    fn test_equal_ranges_share_energy() {
        let inst = instrument(vec![
            region((0, 100), true),
            region((0, 100), true),
            region((0, 100), true),
        ]);
        for hit in run(&inst, note_on(30)) {
            assert!((hit.gain - 1.0 / 3f32.sqrt()).abs() < 1e-5);
        }
    }

    #[test]
    fn test_feathering_requires_all_regions() {
        let inst = instrument(vec![region((0, 60), true), region((40, 100), false)]);
        let hits = run(&inst, note_on(50));
        assert!(hits.iter().all(|h| h.gain == 1.0));
    }

    #[test]
    fn test_timbre_crossfade() {
        let mut soft = region((0, 100), false);
        soft.options.timbre_crossfade_region = Some(ValueRange::new(0, 60));
        let mut bright = region((0, 100), false);
        bright.options.timbre_crossfade_region = Some(ValueRange::new(40, 100));
        let plain = region((0, 100), false);
        let inst = instrument(vec![soft, bright, plain]);

        let hits = run(&inst, NoteEvent { timbre: 50, ..note_on(50) });
        assert_eq!(hits.len(), 3);
        let energy: f32 = hits[..2].iter().map(|h| h.gain * h.gain).sum();
        assert!((energy - 1.0).abs() < 1e-5);
        assert_eq!(hits[2].gain, 1.0);

        let hits = run(&inst, NoteEvent { timbre: 10, ..note_on(50) });
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0], TriggeredRegion { region_index: 0, gain: 1.0 });
    }

    #[test]
    fn test_gain_bounds() {
        let inst = instrument(vec![
            region((0, 30), true),
            region((10, 70), true),
            region((25, 100), true),
        ]);
        for velocity in 0..100 {
            let hits = run(&inst, note_on(velocity));
            let energy: f32 = hits.iter().map(|h| h.gain * h.gain).sum();
            assert!(energy <= 1.0 + 1e-5, "velocity {}", velocity);
            assert!(hits.iter().all(|h| h.gain > 0.0 && h.gain <= 1.0));
        }
    }

    #[test]
    fn test_velocity_scale() {
        assert_eq!(velocity_to_percent(0), 0);
        assert_eq!(velocity_to_percent(64), 50);
        assert_eq!(velocity_to_percent(127), 99);
    }

    #[test]
    fn test_capacity_is_bounded() {
        let inst = instrument((0..40).map(|_| region((0, 100), false)).collect());
        assert_eq!(run(&inst, note_on(50)).len(), MAX_TRIGGERED_REGIONS);
    }
}
