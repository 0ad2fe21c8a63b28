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

//! Generates a fully commented example `floe.lua` from the record descriptors.

use std::fmt::Write;

use super::schema::{record_doc, FieldInfo, FieldKind, RecordDoc};
use crate::library::{ImpulseResponse, Instrument, LibraryInfo, Region};

const INDENT: &str = "    ";

fn describe(info: &FieldInfo) -> String {
    let mut line = format!("{}. ", capitalize(info.kind.type_name()));
    if info.required {
        line.push_str("Required.");
    } else if info.default.is_empty() {
        line.push_str("Optional.");
    } else {
        let _ = write!(line, "Optional, default: {}.", info.default);
    }
    if let Some(range) = info.range {
        let _ = write!(line, " Range: [{}, {}].", range.min, range.max);
    }
    if let FieldKind::Range { start, end } = info.kind {
        let _ = write!(
            line,
            " Start in [{}, {}], end in [{}, {}], end exclusive.",
            start.min, start.max, end.min, end.max
        );
    }
    if !info.enum_values.is_empty() {
        let options: Vec<String> = info.enum_values.iter().map(|v| format!("\"{}\"", v)).collect();
        let _ = write!(line, " One of: {}.", options.join(", "));
    }
    line
}

fn capitalize(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn emit_fields(out: &mut String, doc: &RecordDoc, depth: usize) {
    let indent = INDENT.repeat(depth);
    for info in &doc.fields {
        let _ = writeln!(out, "{}-- {}", indent, info.description);
        let _ = writeln!(out, "{}-- {}", indent, describe(info));
        match info.kind {
            FieldKind::Record(nested) => {
                let _ = writeln!(out, "{}{} = {{", indent, info.name);
                emit_fields(out, &nested(), depth + 1);
                let _ = writeln!(out, "{}}},", indent);
            }
            _ => {
                let _ = writeln!(out, "{}{} = {},", indent, info.name, info.example);
            }
        }
    }
}

fn emit_call(out: &mut String, prefix: &str, doc: &RecordDoc) {
    let _ = writeln!(out, "{}{{", prefix);
    emit_fields(out, doc, 1);
    out.push_str("})\n\n");
}

/// The example script. Interpreting it succeeds and passes post-processing.
pub fn example_script() -> String {
    let mut out = String::new();
    out.push_str("-- An example floe.lua listing every field the host understands.\n");
    out.push_str("-- Paths are relative to this file. Unknown fields are ignored.\n\n");

    out.push_str("-- floe.new_library(table) creates the library. The script must return it.\n");
    emit_call(&mut out, "local library = floe.new_library(", &record_doc::<LibraryInfo>());

    out.push_str("-- floe.new_instrument(library, table) adds an instrument to the library.\n");
    emit_call(
        &mut out,
        "local instrument = floe.new_instrument(library, ",
        &record_doc::<Instrument>(),
    );

    out.push_str("-- floe.add_region(instrument, table) maps an audio file onto the instrument.\n");
    emit_call(&mut out, "floe.add_region(instrument, ", &record_doc::<Region>());

    out.push_str("-- floe.add_ir(library, table) adds an impulse response for the convolution reverb.\n");
    emit_call(&mut out, "floe.add_ir(library, ", &record_doc::<ImpulseResponse>());

    out.push_str("-- floe.extend_table(base, overrides) returns a deep copy of base with overrides merged in.\n");
    out.push_str("local shared = { file = { root_key = 60 } }\n");
    out.push_str("local merged = floe.extend_table(shared, { file = { path = \"samples/piano_c5.wav\", root_key = 72 } })\n");
    out.push_str("floe.add_region(instrument, merged)\n\n");

    out.push_str("return library\n");
    out
}

#[cfg(test)]
mod test {
    use std::path::Path;

    use super::*;
    use crate::library::postprocess;
    use crate::script::{evaluate, Quotas};

    #[test]
    fn test_example_mentions_every_field() {
        let script = example_script();
        for doc in [
            record_doc::<LibraryInfo>(),
            record_doc::<Instrument>(),
            record_doc::<Region>(),
            record_doc::<ImpulseResponse>(),
        ] {
            for field in doc.fields {
                assert!(script.contains(&format!("{} = ", field.name)), "{}", field.name);
            }
        }
        assert!(script.contains("ping_pong = false"));
        assert!(script.contains("One of: \"note_on\", \"note_off\"."));
    }

    #[test]
    fn test_example_round_trips() {
        let script = example_script();
        let mut library = evaluate(
            script.as_bytes(),
            Path::new("/libs/example/floe.lua"),
            &Quotas::default(),
        )
        .expect("example evaluates");
        postprocess::postprocess(&mut library).expect("example post-processes");

        assert_eq!(library.info.name, "Example Library");
        let instrument = library.instrument("Grand Piano").expect("instrument");
        assert_eq!(instrument.regions.len(), 2);
        assert_eq!(instrument.regions[1].file.root_key, 72);
        assert_eq!(library.irs().len(), 1);
    }
}
