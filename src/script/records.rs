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

//! Schema descriptors for every table a library script can pass to the host.

use crate::library::{
    ImpulseResponse, Instrument, LibraryInfo, Region, RegionFile, RegionOptions, RelativePath,
    SampleLoop, TriggerCriteria, TriggerEvent, ValueRange,
};

use super::schema::{
    bind_nested, record_doc, BindContext, BindError, Field, FieldInfo, FieldKind, NumericRange,
    Record,
};

const KEY_RANGE: FieldKind = FieldKind::Range {
    start: NumericRange::new(0, 127),
    end: NumericRange::new(1, 128),
};

const PERCENT_RANGE: FieldKind = FieldKind::Range {
    start: NumericRange::new(0, 99),
    end: NumericRange::new(1, 100),
};

const MAX_FRAME_INDEX: i64 = i32::MAX as i64;

fn relative_path(value: String) -> Result<RelativePath, BindError> {
    RelativePath::new(&value).map_err(|e| BindError::invalid(e.to_string()))
}

fn value_range((start, end): (i64, i64)) -> ValueRange {
    // The binder has already range checked both ends against u8-sized bounds.
    ValueRange::new(start as u8, end as u8)
}

impl Record for LibraryInfo {
    const NAME: &'static str = "Library";

    fn fields() -> &'static [Field<Self>] {
        static FIELDS: [Field<LibraryInfo>; 8] = [
            Field {
                info: FieldInfo::new(
                    "name",
                    FieldKind::String,
                    "The name of the library. Together with the author it identifies the library.",
                )
                .required()
                .example("\"Example Library\""),
                set: |l, v, _| {
                    l.name = v.into_string()?;
                    Ok(())
                },
            },
            Field {
                info: FieldInfo::new("tagline", FieldKind::String, "A short description of the library.")
                    .required()
                    .example("\"Sounds recorded in a stairwell\""),
                set: |l, v, _| {
                    l.tagline = v.into_string()?;
                    Ok(())
                },
            },
            Field {
                info: FieldInfo::new(
                    "author",
                    FieldKind::String,
                    "Who made the library. Together with the name it identifies the library.",
                )
                .required()
                .example("\"Example Author\""),
                set: |l, v, _| {
                    l.author = v.into_string()?;
                    Ok(())
                },
            },
            Field {
                info: FieldInfo::new(
                    "minor_version",
                    FieldKind::Integer,
                    "Increase this when you change the library in a backward-compatible way.",
                )
                .range(1, i32::MAX as i64)
                .default_value("1")
                .example("1"),
                set: |l, v, _| {
                    l.minor_version = v.into_integer()? as u32;
                    Ok(())
                },
            },
            Field {
                info: FieldInfo::new("url", FieldKind::String, "A web page for the library.")
                    .example("\"https://example.com/library\""),
                set: |l, v, _| {
                    l.url = Some(v.into_string()?);
                    Ok(())
                },
            },
            Field {
                info: FieldInfo::new("description", FieldKind::String, "A longer description of the library.")
                    .example("\"Long-form text about the recordings.\""),
                set: |l, v, _| {
                    l.description = Some(v.into_string()?);
                    Ok(())
                },
            },
            Field {
                info: FieldInfo::new(
                    "icon_image_path",
                    FieldKind::String,
                    "A square image relative to this script, used as the library's icon.",
                )
                .example("\"images/icon.png\""),
                set: |l, v, _| {
                    l.icon_image_path = Some(relative_path(v.into_string()?)?);
                    Ok(())
                },
            },
            Field {
                info: FieldInfo::new(
                    "background_image_path",
                    FieldKind::String,
                    "A background image relative to this script.",
                )
                .example("\"images/background.jpg\""),
                set: |l, v, _| {
                    l.background_image_path = Some(relative_path(v.into_string()?)?);
                    Ok(())
                },
            },
        ];
        &FIELDS
    }

    fn validate(&mut self, ctx: &BindContext) -> Result<(), BindError> {
        ctx.check_name(&self.name)?;
        if self.author.is_empty() {
            return Err(BindError::field("author", "must not be empty"));
        }
        Ok(())
    }
}

impl Record for Instrument {
    const NAME: &'static str = "Instrument";

    fn fields() -> &'static [Field<Self>] {
        static FIELDS: [Field<Instrument>; 5] = [
            Field {
                info: FieldInfo::new(
                    "name",
                    FieldKind::String,
                    "The name of the instrument. Must be unique within the library.",
                )
                .required()
                .example("\"Grand Piano\""),
                set: |i, v, _| {
                    i.name = v.into_string()?;
                    Ok(())
                },
            },
            Field {
                info: FieldInfo::new(
                    "folders",
                    FieldKind::String,
                    "Slash-separated folders used to group instruments.",
                )
                .example("\"Keys/Acoustic\""),
                set: |i, v, _| {
                    i.folders = Some(v.into_string()?);
                    Ok(())
                },
            },
            Field {
                info: FieldInfo::new("description", FieldKind::String, "A description of the instrument.")
                    .example("\"A felted upright recorded close.\""),
                set: |i, v, _| {
                    i.description = Some(v.into_string()?);
                    Ok(())
                },
            },
            Field {
                info: FieldInfo::new("tags", FieldKind::StringList, "Words that describe the instrument.")
                    .example("{ \"piano\", \"soft\" }"),
                set: |i, v, _| {
                    i.tags = v.into_strings()?.into_iter().collect();
                    Ok(())
                },
            },
            Field {
                info: FieldInfo::new(
                    "waveform_audio_path",
                    FieldKind::String,
                    "Audio used to draw the instrument's waveform, relative to this script.",
                )
                .default_value("the first region's file")
                .example("\"samples/piano_c4.wav\""),
                set: |i, v, _| {
                    i.waveform_audio_path = Some(relative_path(v.into_string()?)?);
                    Ok(())
                },
            },
        ];
        &FIELDS
    }

    fn validate(&mut self, ctx: &BindContext) -> Result<(), BindError> {
        ctx.check_name(&self.name)
    }
}

impl Record for ImpulseResponse {
    const NAME: &'static str = "ImpulseResponse";

    fn fields() -> &'static [Field<Self>] {
        static FIELDS: [Field<ImpulseResponse>; 2] = [
            Field {
                info: FieldInfo::new(
                    "name",
                    FieldKind::String,
                    "The name of the impulse response. Must be unique within the library.",
                )
                .required()
                .example("\"Stairwell\""),
                set: |ir, v, _| {
                    ir.name = v.into_string()?;
                    Ok(())
                },
            },
            Field {
                info: FieldInfo::new(
                    "path",
                    FieldKind::String,
                    "The impulse response audio file, relative to this script.",
                )
                .required()
                .example("\"irs/stairwell.wav\""),
                set: |ir, v, _| {
                    ir.path = relative_path(v.into_string()?)?;
                    Ok(())
                },
            },
        ];
        &FIELDS
    }

    fn validate(&mut self, ctx: &BindContext) -> Result<(), BindError> {
        ctx.check_name(&self.name)
    }
}

impl Record for Region {
    const NAME: &'static str = "Region";

    fn fields() -> &'static [Field<Self>] {
        static FIELDS: [Field<Region>; 3] = [
            Field {
                info: FieldInfo::new(
                    "file",
                    FieldKind::Record(record_doc::<RegionFile>),
                    "The audio file this region plays.",
                )
                .required(),
                set: |r, v, ctx| {
                    r.file = bind_nested(&v.into_table()?, ctx)?;
                    Ok(())
                },
            },
            Field {
                info: FieldInfo::new(
                    "trigger_criteria",
                    FieldKind::Record(record_doc::<TriggerCriteria>),
                    "When the region is triggered.",
                )
                .default_value("note_on over keys {60, 64} at every velocity"),
                set: |r, v, ctx| {
                    r.trigger = bind_nested(&v.into_table()?, ctx)?;
                    Ok(())
                },
            },
            Field {
                info: FieldInfo::new(
                    "options",
                    FieldKind::Record(record_doc::<RegionOptions>),
                    "Additional behaviour of the region.",
                ),
                set: |r, v, ctx| {
                    r.options = bind_nested(&v.into_table()?, ctx)?;
                    Ok(())
                },
            },
        ];
        &FIELDS
    }
}

impl Record for RegionFile {
    const NAME: &'static str = "RegionFile";

    fn fields() -> &'static [Field<Self>] {
        static FIELDS: [Field<RegionFile>; 3] = [
            Field {
                info: FieldInfo::new("path", FieldKind::String, "The audio file, relative to this script.")
                    .required()
                    .example("\"samples/piano_c4.wav\""),
                set: |f, v, _| {
                    f.path = relative_path(v.into_string()?)?;
                    Ok(())
                },
            },
            Field {
                info: FieldInfo::new(
                    "root_key",
                    FieldKind::Integer,
                    "The MIDI note the audio was recorded at. Playback is pitched relative to it.",
                )
                .required()
                .range(0, 127)
                .example("60"),
                set: |f, v, _| {
                    f.root_key = v.into_integer()? as u8;
                    Ok(())
                },
            },
            Field {
                info: FieldInfo::new(
                    "loop",
                    FieldKind::Record(record_doc::<SampleLoop>),
                    "Loop points. Without a loop the file plays once.",
                ),
                set: |f, v, ctx| {
                    f.sample_loop = Some(bind_nested(&v.into_table()?, ctx)?);
                    Ok(())
                },
            },
        ];
        &FIELDS
    }
}

impl Record for SampleLoop {
    const NAME: &'static str = "Loop";

    fn fields() -> &'static [Field<Self>] {
        static FIELDS: [Field<SampleLoop>; 4] = [
            Field {
                info: FieldInfo::new(
                    "start_frame",
                    FieldKind::Integer,
                    "The first frame of the loop. Negative values count from the end: -1 is the frame count.",
                )
                .required()
                .range(-MAX_FRAME_INDEX, MAX_FRAME_INDEX)
                .example("24000"),
                set: |l, v, _| {
                    l.start_frame = v.into_integer()?;
                    Ok(())
                },
            },
            Field {
                info: FieldInfo::new(
                    "end_frame",
                    FieldKind::Integer,
                    "The frame after the last looped frame. Negative values count from the end.",
                )
                .required()
                .range(-MAX_FRAME_INDEX, MAX_FRAME_INDEX)
                .example("-1"),
                set: |l, v, _| {
                    l.end_frame = v.into_integer()?;
                    Ok(())
                },
            },
            Field {
                info: FieldInfo::new(
                    "crossfade_frames",
                    FieldKind::Integer,
                    "Frames over which the loop end is blended into the loop start.",
                )
                .range(0, MAX_FRAME_INDEX)
                .default_value("0")
                .example("100"),
                set: |l, v, _| {
                    l.crossfade_frames = v.into_integer()? as u32;
                    Ok(())
                },
            },
            Field {
                info: FieldInfo::new(
                    "ping_pong",
                    FieldKind::Boolean,
                    "Alternate playback direction at each end of the loop.",
                )
                .default_value("false")
                .example("false"),
                set: |l, v, _| {
                    l.ping_pong = v.into_bool()?;
                    Ok(())
                },
            },
        ];
        &FIELDS
    }

    fn validate(&mut self, _ctx: &BindContext) -> Result<(), BindError> {
        let same_sign = (self.start_frame >= 0) == (self.end_frame >= 0);
        if same_sign && self.end_frame <= self.start_frame {
            return Err(BindError::field(
                "end_frame",
                format!(
                    "end_frame {} must be greater than start_frame {}",
                    self.end_frame, self.start_frame
                ),
            ));
        }
        Ok(())
    }
}

impl Record for TriggerCriteria {
    const NAME: &'static str = "TriggerCriteria";

    fn fields() -> &'static [Field<Self>] {
        static FIELDS: [Field<TriggerCriteria>; 4] = [
            Field {
                info: FieldInfo::new("trigger_event", FieldKind::String, "The event that starts the region.")
                    .one_of(&["note_on", "note_off"])
                    .default_value("\"note_on\"")
                    .example("\"note_on\""),
                set: |t, v, _| {
                    t.event = match v.into_string()?.as_str() {
                        "note_off" => TriggerEvent::NoteOff,
                        _ => TriggerEvent::NoteOn,
                    };
                    Ok(())
                },
            },
            Field {
                info: FieldInfo::new(
                    "key_range",
                    KEY_RANGE,
                    "The keys that trigger the region: {start, end} with an exclusive end.",
                )
                .default_value("{60, 64}")
                .example("{ 60, 64 }"),
                set: |t, v, _| {
                    t.key_range = value_range(v.into_range()?);
                    Ok(())
                },
            },
            Field {
                info: FieldInfo::new(
                    "velocity_range",
                    PERCENT_RANGE,
                    "The velocities that trigger the region, from 0 to 100 with an exclusive end.",
                )
                .default_value("{0, 100}")
                .example("{ 0, 100 }"),
                set: |t, v, _| {
                    t.velocity_range = value_range(v.into_range()?);
                    Ok(())
                },
            },
            Field {
                info: FieldInfo::new(
                    "round_robin_index",
                    FieldKind::Integer,
                    "Only trigger on this step of the round-robin cycle. Counting starts at 0.",
                )
                .range(0, i32::MAX as i64)
                .example("0"),
                set: |t, v, _| {
                    t.round_robin_index = Some(v.into_integer()? as u32);
                    Ok(())
                },
            },
        ];
        &FIELDS
    }
}

impl Record for RegionOptions {
    const NAME: &'static str = "RegionOptions";

    fn fields() -> &'static [Field<Self>] {
        static FIELDS: [Field<RegionOptions>; 3] = [
            Field {
                info: FieldInfo::new(
                    "timbre_crossfade_region",
                    PERCENT_RANGE,
                    "Positions of the timbre knob where this region sounds, crossfading with overlapping regions.",
                )
                .example("{ 0, 100 }"),
                set: |o, v, _| {
                    o.timbre_crossfade_region = Some(value_range(v.into_range()?));
                    Ok(())
                },
            },
            Field {
                info: FieldInfo::new(
                    "auto_map_key_range_group",
                    FieldKind::String,
                    "Regions sharing this group get key ranges computed from their root keys.",
                )
                .example("\"main\""),
                set: |o, v, _| {
                    let group = v.into_string()?;
                    o.auto_map_key_range_group = (!group.is_empty()).then_some(group);
                    Ok(())
                },
            },
            Field {
                info: FieldInfo::new(
                    "feather_overlapping_velocity_regions",
                    FieldKind::Boolean,
                    "Crossfade with other regions whose velocity range overlaps this one.",
                )
                .default_value("false")
                .example("false"),
                set: |o, v, _| {
                    o.feather_overlapping_velocity_regions = v.into_bool()?;
                    Ok(())
                },
            },
        ];
        &FIELDS
    }
}

#[cfg(test)]
mod test {
    use mlua::{Lua, Table};

    use super::*;
    use crate::script::schema::bind;

    fn bind_region(source: &str) -> Result<Region, BindError> {
        let lua = Lua::new();
        let table: Table = lua.load(source).eval().expect("table");
        bind::<Region>(&table, &BindContext::default())
    }

    #[test]
    fn test_region_defaults() {
        let region = bind_region(r#"{ file = { path = "a.wav", root_key = 48 } }"#).expect("bind");
        assert_eq!(region.file.path.as_str(), "a.wav");
        assert_eq!(region.file.root_key, 48);
        assert_eq!(region.trigger, TriggerCriteria::default());
        assert_eq!(region.trigger.key_range, ValueRange::new(60, 64));
        assert_eq!(region.options, RegionOptions::default());
    }

    #[test]
    fn test_region_full() {
        let region = bind_region(
            r#"{
                file = { path = "a.wav", root_key = 60, loop = { start_frame = 10, end_frame = -1, crossfade_frames = 4, ping_pong = true } },
                trigger_criteria = { trigger_event = "note_off", key_range = {0, 128}, velocity_range = {50, 100}, round_robin_index = 2 },
                options = { timbre_crossfade_region = {0, 50}, auto_map_key_range_group = "g", feather_overlapping_velocity_regions = true },
            }"#,
        )
        .expect("bind");
        let sample_loop = region.file.sample_loop.expect("loop");
        assert_eq!(sample_loop.start_frame, 10);
        assert_eq!(sample_loop.end_frame, -1);
        assert!(sample_loop.ping_pong);
        assert_eq!(region.trigger.event, TriggerEvent::NoteOff);
        assert_eq!(region.trigger.round_robin_index, Some(2));
        assert_eq!(region.options.timbre_crossfade_region, Some(ValueRange::new(0, 50)));
        assert!(region.options.feather_overlapping_velocity_regions);
    }

    #[test]
    fn test_nested_errors_name_the_path() {
        let err = bind_region(r#"{ file = { path = "a.wav", root_key = 200 } }"#).unwrap_err();
        assert_eq!(err.record, "Region");
        assert_eq!(err.field, "file.root_key");
        assert!(err.message.contains("200"));

        let err = bind_region(
            r#"{ file = { path = "a.wav", root_key = 60, loop = { start_frame = 100, end_frame = 50 } } }"#,
        )
        .unwrap_err();
        assert_eq!(err.field, "file.loop.end_frame");
    }

    #[test]
    fn test_loop_with_mixed_signs_is_deferred() {
        let region = bind_region(
            r#"{ file = { path = "a.wav", root_key = 60, loop = { start_frame = 100, end_frame = -50 } } }"#,
        )
        .expect("bind");
        assert!(region.file.sample_loop.is_some());
    }

    #[test]
    fn test_path_escape_rejected() {
        let err = bind_region(r#"{ file = { path = "../outside.wav", root_key = 60 } }"#).unwrap_err();
        assert_eq!(err.field, "file.path");
        assert!(err.message.contains("../outside.wav"));
    }

    #[test]
    fn test_velocity_bounds() {
        assert!(bind_region(
            r#"{ file = { path = "a.wav", root_key = 60 }, trigger_criteria = { velocity_range = {0, 100} } }"#
        )
        .is_ok());
        let err = bind_region(
            r#"{ file = { path = "a.wav", root_key = 60 }, trigger_criteria = { velocity_range = {0, 101} } }"#,
        )
        .unwrap_err();
        assert_eq!(err.field, "trigger_criteria.velocity_range");

        let err = bind_region(
            r#"{ file = { path = "a.wav", root_key = 60 }, trigger_criteria = { velocity_range = {-1, 50} } }"#,
        )
        .unwrap_err();
        assert_eq!(err.field, "trigger_criteria.velocity_range");
    }

    #[test]
    fn test_root_key_bounds() {
        for key in [0, 127] {
            let region = bind_region(&format!(r#"{{ file = {{ path = "a.wav", root_key = {} }} }}"#, key))
                .expect("bind");
            assert_eq!(region.file.root_key as i64, key);
        }
        for key in [-1, 128] {
            let err = bind_region(&format!(r#"{{ file = {{ path = "a.wav", root_key = {} }} }}"#, key))
                .unwrap_err();
            assert_eq!(err.field, "file.root_key", "{}", key);
        }
    }

    #[test]
    fn test_key_range_spans_keyboard() {
        let region = bind_region(
            r#"{ file = { path = "a.wav", root_key = 60 }, trigger_criteria = { key_range = {0, 128} } }"#,
        )
        .expect("bind");
        assert_eq!(region.trigger.key_range, ValueRange::new(0, 128));
    }
}
