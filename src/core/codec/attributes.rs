// Copyright (c) 2026 Twincall
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//     http://www.apache.org/licenses/LICENSE-2.0
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! Attribute TLV lists: `int count` then per attribute
//! `string name, enum tag, value`. Image ids travel as tag-4 UUIDs.

use crate::core::codec::wire::{WireError, WireReader, WireWriter};
use uuid::Uuid;

/// Hard cap on attribute counts when parsing signature payloads.
pub const MAX_SIGNED_ATTRIBUTES: usize = 64;

/// Nested list depth cap. Lists of lists deeper than this are malformed.
const MAX_LIST_DEPTH: usize = 4;

const TAG_VOID: i32 = 0;
const TAG_BOOL: i32 = 1;
const TAG_LONG: i32 = 2;
const TAG_STRING: i32 = 3;
const TAG_UUID: i32 = 4;
const TAG_LIST: i32 = 5;

/// Attribute payload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AttributeValue {
    /// Presence-only marker.
    Void,
    /// Boolean.
    Bool(bool),
    /// 64-bit integer.
    Long(i64),
    /// UTF-8 string.
    Str(String),
    /// UUID (also used for image ids).
    Uuid(Uuid),
    /// Nested attribute list.
    List(Vec<Attribute>),
}

/// A named attribute.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Attribute {
    /// Attribute name.
    pub name: String,
    /// Attribute value.
    pub value: AttributeValue,
}

impl Attribute {
    /// Convenience constructor.
    pub fn new(name: &str, value: AttributeValue) -> Self {
        Self {
            name: name.to_string(),
            value,
        }
    }
}

fn write_value(w: &mut WireWriter, value: &AttributeValue) {
    match value {
        AttributeValue::Void => w.write_int(TAG_VOID),
        AttributeValue::Bool(b) => {
            w.write_int(TAG_BOOL);
            w.write_bool(*b);
        }
        AttributeValue::Long(v) => {
            w.write_int(TAG_LONG);
            w.write_long(*v);
        }
        AttributeValue::Str(s) => {
            w.write_int(TAG_STRING);
            w.write_string(s);
        }
        AttributeValue::Uuid(u) => {
            w.write_int(TAG_UUID);
            w.write_uuid(u);
        }
        AttributeValue::List(items) => {
            w.write_int(TAG_LIST);
            write_attributes(w, items);
        }
    }
}

/// Emit `int count` then each attribute as `name, tag, value`.
pub fn write_attributes(w: &mut WireWriter, attributes: &[Attribute]) {
    w.write_int(attributes.len() as i32);
    for attribute in attributes {
        w.write_string(&attribute.name);
        write_value(w, &attribute.value);
    }
}

fn read_value(r: &mut WireReader<'_>, max: usize, depth: usize) -> Result<AttributeValue, WireError> {
    match r.read_int()? {
        TAG_VOID => Ok(AttributeValue::Void),
        TAG_BOOL => Ok(AttributeValue::Bool(r.read_bool()?)),
        TAG_LONG => Ok(AttributeValue::Long(r.read_long()?)),
        TAG_STRING => Ok(AttributeValue::Str(r.read_string()?)),
        TAG_UUID => Ok(AttributeValue::Uuid(r.read_uuid()?)),
        TAG_LIST => {
            if depth >= MAX_LIST_DEPTH {
                return Err(WireError::BadFormat);
            }
            Ok(AttributeValue::List(read_attributes_inner(r, max, depth + 1)?))
        }
        _ => Err(WireError::BadFormat),
    }
}

fn read_attributes_inner(
    r: &mut WireReader<'_>,
    max: usize,
    depth: usize,
) -> Result<Vec<Attribute>, WireError> {
    let count = r.read_int()?;
    if count < 0 || count as usize > max {
        return Err(WireError::BadFormat);
    }
    let mut out = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let name = r.read_string()?;
        let value = read_value(r, max, depth)?;
        out.push(Attribute { name, value });
    }
    Ok(out)
}

/// Read an attribute list with a caller-chosen count cap.
pub fn read_attributes(r: &mut WireReader<'_>, max: usize) -> Result<Vec<Attribute>, WireError> {
    read_attributes_inner(r, max, 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::codec::wire::Encoding;

    fn sample() -> Vec<Attribute> {
        vec![
            Attribute::new("name", AttributeValue::Str("alice".into())),
            Attribute::new("flag", AttributeValue::Void),
            Attribute::new("trusted", AttributeValue::Bool(true)),
            Attribute::new("since", AttributeValue::Long(1_700_000_000_000)),
            Attribute::new("avatarId", AttributeValue::Uuid(Uuid::new_v4())),
            Attribute::new(
                "caps",
                AttributeValue::List(vec![Attribute::new("audio", AttributeValue::Void)]),
            ),
        ]
    }

    #[test]
    fn roundtrip_every_tag() {
        for encoding in [Encoding::Verbose, Encoding::Compact] {
            let attributes = sample();
            let mut w = WireWriter::new(encoding);
            write_attributes(&mut w, &attributes);
            let bytes = w.into_bytes();
            let mut r = WireReader::new(encoding, &bytes);
            let decoded = read_attributes(&mut r, MAX_SIGNED_ATTRIBUTES).unwrap();
            r.expect_end().unwrap();
            assert_eq!(decoded, attributes);
        }
    }

    #[test]
    fn count_above_cap_is_rejected() {
        let mut attributes = Vec::new();
        for i in 0..(MAX_SIGNED_ATTRIBUTES + 1) {
            attributes.push(Attribute::new(&format!("a{i}"), AttributeValue::Void));
        }
        let mut w = WireWriter::new(Encoding::Verbose);
        write_attributes(&mut w, &attributes);
        let bytes = w.into_bytes();
        let mut r = WireReader::new(Encoding::Verbose, &bytes);
        assert_eq!(
            read_attributes(&mut r, MAX_SIGNED_ATTRIBUTES),
            Err(WireError::BadFormat)
        );
    }

    #[test]
    fn unknown_tag_is_rejected() {
        let mut w = WireWriter::new(Encoding::Verbose);
        w.write_int(1);
        w.write_string("x");
        w.write_int(9);
        let bytes = w.into_bytes();
        let mut r = WireReader::new(Encoding::Verbose, &bytes);
        assert_eq!(
            read_attributes(&mut r, MAX_SIGNED_ATTRIBUTES),
            Err(WireError::BadFormat)
        );
    }
}
