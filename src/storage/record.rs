//! Field-level encoding of cached subjects.
//!
//! Each subject field is stored under its own name as a [`FieldValue`].
//! The variant tag records whether the field is a scalar or a list, so a
//! one-element list comes back as a list and a scalar as a scalar no matter
//! what the values are.
//!
//! Decoding is strict: unknown names, missing names, unexpected tags and a
//! tensor whose shape disagrees with the other fields all make the record
//! corrupt. A blake3 digest over the content fields and the tensor payload
//! is stored alongside them, so damage inside a value is caught as well.

use std::collections::BTreeMap;

use bincode::Options;
use ndarray::Array4;
use serde::{Deserialize, Serialize};

use crate::config::WindowSpec;
use crate::error::CacheError;
use crate::source::ContainerInfo;
use crate::subject::{SessionRecord, Subject};
use crate::types::{CellId, ContainerId};

use super::schema::{codec, decode_f32, encode_f32};

/// A typed field value.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum FieldValue {
    /// Unsigned scalar.
    UInt(u64),
    /// Text scalar.
    Text(String),
    /// List of unsigned integers.
    UIntList(Vec<u64>),
    /// Session metadata list.
    Sessions(Vec<SessionRecord>),
}

impl FieldValue {
    /// Name of the variant, for error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::UInt(_) => "UInt",
            Self::Text(_) => "Text",
            Self::UIntList(_) => "UIntList",
            Self::Sessions(_) => "Sessions",
        }
    }
}

/// Field names.
pub mod field {
    /// Container id (`UInt`).
    pub const CONTAINER_ID: &str = "container_id";
    /// Targeted area (`Text`).
    pub const TARGETED_STRUCTURE: &str = "targeted_structure";
    /// Imaging depth (`UInt`).
    pub const IMAGING_DEPTH: &str = "imaging_depth";
    /// Specimen name (`Text`).
    pub const SPECIMEN_NAME: &str = "specimen_name";
    /// Aligned stimulus (`Text`).
    pub const STIMULUS: &str = "stimulus";
    /// Repeats per session (`UInt`).
    pub const REPEATS: &str = "repeats";
    /// Window length (`UInt`).
    pub const WINDOW_LENGTH: &str = "window_length";
    /// Cell axis (`UIntList`).
    pub const CELL_IDS: &str = "cell_ids";
    /// Session axis (`Sessions`).
    pub const SESSIONS: &str = "sessions";
    /// Tensor shape (`UIntList`).
    pub const DFF_SHAPE: &str = "dff_shape";
    /// blake3 hex digest of the content fields and tensor payload (`Text`).
    pub const DIGEST: &str = "digest";

    /// Fields covered by the digest, in hashing order.
    pub const CONTENT: [&str; 10] = [
        CONTAINER_ID,
        TARGETED_STRUCTURE,
        IMAGING_DEPTH,
        SPECIMEN_NAME,
        STIMULUS,
        REPEATS,
        WINDOW_LENGTH,
        CELL_IDS,
        SESSIONS,
        DFF_SHAPE,
    ];

    /// Every field a record must contain, and nothing else.
    pub const ALL: [&str; 11] = [
        CONTAINER_ID,
        TARGETED_STRUCTURE,
        IMAGING_DEPTH,
        SPECIMEN_NAME,
        STIMULUS,
        REPEATS,
        WINDOW_LENGTH,
        CELL_IDS,
        SESSIONS,
        DFF_SHAPE,
        DIGEST,
    ];
}

/// Digest of named field values followed by the tensor payload.
///
/// Each value is hashed in its bincode form behind its name and a length
/// prefix, in the order given.
pub fn record_digest<'a>(
    fields: impl IntoIterator<Item = (&'a str, &'a FieldValue)>,
    payload: &[u8],
) -> Result<String, CacheError> {
    let mut hasher = blake3::Hasher::new();
    for (name, value) in fields {
        let bytes = codec().serialize(value)?;
        hasher.update(name.as_bytes());
        hasher.update(&(bytes.len() as u64).to_le_bytes());
        hasher.update(&bytes);
    }
    hasher.update(&(payload.len() as u64).to_le_bytes());
    hasher.update(payload);
    Ok(hasher.finalize().to_hex().to_string())
}

/// Splits a subject into named fields and its tensor payload.
///
/// The last field is the digest of everything before it.
pub fn encode_subject(
    subject: &Subject,
) -> Result<(Vec<(&'static str, FieldValue)>, Vec<u8>), CacheError> {
    let container = subject.container();
    let window = subject.window_spec();
    let mut fields = vec![
        (field::CONTAINER_ID, FieldValue::UInt(container.id.get())),
        (
            field::TARGETED_STRUCTURE,
            FieldValue::Text(container.targeted_structure.clone()),
        ),
        (
            field::IMAGING_DEPTH,
            FieldValue::UInt(u64::from(container.imaging_depth)),
        ),
        (
            field::SPECIMEN_NAME,
            FieldValue::Text(container.specimen_name.clone()),
        ),
        (field::STIMULUS, FieldValue::Text(subject.stimulus().to_string())),
        (field::REPEATS, FieldValue::UInt(window.repeats as u64)),
        (
            field::WINDOW_LENGTH,
            FieldValue::UInt(window.window_length as u64),
        ),
        (
            field::CELL_IDS,
            FieldValue::UIntList(subject.cells().iter().map(CellId::get).collect()),
        ),
        (
            field::SESSIONS,
            FieldValue::Sessions(subject.sessions().to_vec()),
        ),
        (
            field::DFF_SHAPE,
            FieldValue::UIntList(subject.dff().shape().iter().map(|&d| d as u64).collect()),
        ),
    ];
    let payload = encode_f32(subject.dff().iter().copied());
    let digest = record_digest(
        fields.iter().map(|(name, value)| (*name, value)),
        &payload,
    )?;
    fields.push((field::DIGEST, FieldValue::Text(digest)));
    Ok((fields, payload))
}

/// Rebuilds a subject from named fields and its tensor payload.
///
/// # Errors
///
/// Returns [`CacheError::Corrupted`] if any field is unknown, missing or of
/// the wrong kind, if the digest does not match, or if the tensor does not
/// match the recorded shape.
pub fn decode_subject(
    mut fields: BTreeMap<String, FieldValue>,
    payload: &[u8],
) -> Result<Subject, CacheError> {
    if let Some(unknown) = fields.keys().find(|k| !field::ALL.contains(&k.as_str())) {
        return Err(CacheError::corrupted(format!("unknown field '{}'", unknown)));
    }

    if let Some(missing) = field::ALL.iter().find(|name| !fields.contains_key(**name)) {
        return Err(CacheError::corrupted(format!("missing field '{}'", missing)));
    }

    let stored = take_text(&mut fields, field::DIGEST)?;
    let content = field::CONTENT
        .iter()
        .filter_map(|name| fields.get(*name).map(|value| (*name, value)));
    if record_digest(content, payload)? != stored {
        return Err(CacheError::corrupted("record digest mismatch"));
    }

    let container = ContainerInfo {
        id: ContainerId(take_uint(&mut fields, field::CONTAINER_ID)?),
        targeted_structure: take_text(&mut fields, field::TARGETED_STRUCTURE)?,
        imaging_depth: to_u32(
            take_uint(&mut fields, field::IMAGING_DEPTH)?,
            field::IMAGING_DEPTH,
        )?,
        specimen_name: take_text(&mut fields, field::SPECIMEN_NAME)?,
    };
    let stimulus = take_text(&mut fields, field::STIMULUS)?;
    let window = WindowSpec {
        repeats: to_usize(take_uint(&mut fields, field::REPEATS)?, field::REPEATS)?,
        window_length: to_usize(
            take_uint(&mut fields, field::WINDOW_LENGTH)?,
            field::WINDOW_LENGTH,
        )?,
    };
    let cells: Vec<CellId> = take_uint_list(&mut fields, field::CELL_IDS)?
        .into_iter()
        .map(CellId)
        .collect();
    let sessions = match take(&mut fields, field::SESSIONS)? {
        FieldValue::Sessions(sessions) => sessions,
        other => return Err(wrong_kind(field::SESSIONS, &other, "Sessions")),
    };
    let shape = take_uint_list(&mut fields, field::DFF_SHAPE)?;

    if cells.windows(2).any(|pair| pair[0] >= pair[1]) {
        return Err(CacheError::corrupted("cell ids are not strictly ascending"));
    }

    let expected = [cells.len(), sessions.len(), window.repeats, window.window_length];
    let shape: Vec<usize> = shape
        .into_iter()
        .map(|d| to_usize(d, field::DFF_SHAPE))
        .collect::<Result<_, _>>()?;
    if shape.as_slice() != expected.as_slice() {
        return Err(CacheError::corrupted(format!(
            "tensor shape {:?} does not match fields {:?}",
            shape, expected
        )));
    }

    if let Some(bad) = sessions.iter().find(|s| s.trials.len() != window.repeats) {
        return Err(CacheError::corrupted(format!(
            "session {} has {} trials, expected {}",
            bad.id,
            bad.trials.len(),
            window.repeats
        )));
    }

    let values = decode_f32(payload)
        .ok_or_else(|| CacheError::corrupted("tensor payload is not a whole number of f32"))?;
    let element_count = expected
        .iter()
        .try_fold(1usize, |acc, &d| acc.checked_mul(d))
        .ok_or_else(|| CacheError::corrupted("tensor shape overflows"))?;
    if values.len() != element_count {
        return Err(CacheError::corrupted(format!(
            "tensor has {} values, shape needs {}",
            values.len(),
            element_count
        )));
    }
    let dff = Array4::from_shape_vec(
        (expected[0], expected[1], expected[2], expected[3]),
        values,
    )
    .map_err(|e| CacheError::corrupted(e.to_string()))?;

    Ok(Subject::from_parts(
        container, stimulus, window, sessions, cells, dff,
    ))
}

fn take(fields: &mut BTreeMap<String, FieldValue>, name: &str) -> Result<FieldValue, CacheError> {
    fields
        .remove(name)
        .ok_or_else(|| CacheError::corrupted(format!("missing field '{}'", name)))
}

fn take_uint(fields: &mut BTreeMap<String, FieldValue>, name: &str) -> Result<u64, CacheError> {
    match take(fields, name)? {
        FieldValue::UInt(v) => Ok(v),
        other => Err(wrong_kind(name, &other, "UInt")),
    }
}

fn take_text(fields: &mut BTreeMap<String, FieldValue>, name: &str) -> Result<String, CacheError> {
    match take(fields, name)? {
        FieldValue::Text(v) => Ok(v),
        other => Err(wrong_kind(name, &other, "Text")),
    }
}

fn take_uint_list(
    fields: &mut BTreeMap<String, FieldValue>,
    name: &str,
) -> Result<Vec<u64>, CacheError> {
    match take(fields, name)? {
        FieldValue::UIntList(v) => Ok(v),
        other => Err(wrong_kind(name, &other, "UIntList")),
    }
}

fn wrong_kind(name: &str, found: &FieldValue, expected: &str) -> CacheError {
    CacheError::corrupted(format!(
        "field '{}' is {}, expected {}",
        name,
        found.kind(),
        expected
    ))
}

fn to_usize(value: u64, name: &str) -> Result<usize, CacheError> {
    usize::try_from(value)
        .map_err(|_| CacheError::corrupted(format!("field '{}' out of range: {}", name, value)))
}

fn to_u32(value: u64, name: &str) -> Result<u32, CacheError> {
    u32::try_from(value)
        .map_err(|_| CacheError::corrupted(format!("field '{}' out of range: {}", name, value)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::align::TrialWindow;
    use crate::types::SessionId;

    fn subject(cells: &[u64]) -> Subject {
        let window = WindowSpec {
            repeats: 1,
            window_length: 2,
        };
        let dff = Array4::from_shape_fn((cells.len(), 1, 1, 2), |(c, _, _, t)| {
            c as f32 + t as f32 * 0.25
        });
        Subject::from_parts(
            ContainerInfo {
                id: ContainerId(3),
                targeted_structure: "VISam".into(),
                imaging_depth: 275,
                specimen_name: "Cux2-CreERT2;Camk2a-tTA;Ai93-1".into(),
            },
            "natural_movie_one".into(),
            window,
            vec![SessionRecord {
                id: SessionId(30),
                acquisition_age_days: 101,
                session_type: "three_session_C".into(),
                stimuli: vec!["natural_movie_one".into()],
                trials: vec![TrialWindow {
                    repeat: 1,
                    start: 0,
                    epoch_end: 1,
                }],
            }],
            cells.iter().copied().map(CellId).collect(),
            dff,
        )
    }

    fn fields_of(subject: &Subject) -> (BTreeMap<String, FieldValue>, Vec<u8>) {
        let (fields, payload) = encode_subject(subject).unwrap();
        (
            fields.into_iter().map(|(k, v)| (k.to_string(), v)).collect(),
            payload,
        )
    }

    /// Replaces the digest so a deliberately altered record passes the
    /// integrity check and reaches the field checks.
    fn reseal(fields: &mut BTreeMap<String, FieldValue>, payload: &[u8]) {
        let digest = record_digest(
            field::CONTENT
                .iter()
                .filter_map(|name| fields.get(*name).map(|value| (*name, value))),
            payload,
        )
        .unwrap();
        fields.insert(field::DIGEST.into(), FieldValue::Text(digest));
    }

    #[test]
    fn test_encode_decode() {
        let original = subject(&[4, 9]);
        let (fields, payload) = fields_of(&original);
        let restored = decode_subject(fields, &payload).unwrap();
        assert_eq!(original, restored);
    }

    #[test]
    fn test_single_cell_stays_a_list() {
        let (fields, _) = fields_of(&subject(&[4]));
        assert_eq!(fields[field::CELL_IDS], FieldValue::UIntList(vec![4]));
        assert_eq!(fields[field::IMAGING_DEPTH], FieldValue::UInt(275));
    }

    #[test]
    fn test_every_field_is_encoded() {
        let (fields, _) = fields_of(&subject(&[1]));
        let names: Vec<&str> = fields.keys().map(String::as_str).collect();
        let mut expected = field::ALL.to_vec();
        expected.sort_unstable();
        assert_eq!(names, expected);
    }

    #[test]
    fn test_unknown_field_rejected() {
        let (mut fields, payload) = fields_of(&subject(&[1]));
        fields.insert("name".into(), FieldValue::Text("Mouse_3".into()));
        let err = decode_subject(fields, &payload).unwrap_err();
        assert!(err.to_string().contains("unknown field 'name'"));
    }

    #[test]
    fn test_missing_field_rejected() {
        let (mut fields, payload) = fields_of(&subject(&[1]));
        fields.remove(field::STIMULUS);
        let err = decode_subject(fields, &payload).unwrap_err();
        assert!(err.to_string().contains("missing field 'stimulus'"));
    }

    #[test]
    fn test_wrong_kind_rejected() {
        let (mut fields, payload) = fields_of(&subject(&[1]));
        fields.insert(field::CELL_IDS.into(), FieldValue::UInt(1));
        reseal(&mut fields, &payload);
        let err = decode_subject(fields, &payload).unwrap_err();
        assert!(err
            .to_string()
            .contains("field 'cell_ids' is UInt, expected UIntList"));
    }

    #[test]
    fn test_truncated_payload_rejected() {
        let (mut fields, mut payload) = fields_of(&subject(&[1, 2]));
        payload.truncate(payload.len() - 4);
        reseal(&mut fields, &payload);
        let err = decode_subject(fields, &payload).unwrap_err();
        assert!(err.is_corrupt());
    }

    #[test]
    fn test_shape_disagreeing_with_cells_rejected() {
        let (mut fields, payload) = fields_of(&subject(&[1, 2]));
        fields.insert(field::CELL_IDS.into(), FieldValue::UIntList(vec![1]));
        reseal(&mut fields, &payload);
        let err = decode_subject(fields, &payload).unwrap_err();
        assert!(err.to_string().contains("does not match"));
    }

    #[test]
    fn test_flipped_payload_byte_rejected() {
        let (fields, mut payload) = fields_of(&subject(&[1, 2]));
        let middle = payload.len() / 2;
        payload[middle] ^= 0x01;
        let err = decode_subject(fields, &payload).unwrap_err();
        assert!(err.to_string().contains("digest mismatch"));
        assert!(err.is_corrupt());
    }

    #[test]
    fn test_altered_field_value_rejected() {
        let (mut fields, payload) = fields_of(&subject(&[1, 2]));
        fields.insert(field::CELL_IDS.into(), FieldValue::UIntList(vec![1, 3]));
        let err = decode_subject(fields, &payload).unwrap_err();
        assert!(err.to_string().contains("digest mismatch"));
    }

    #[test]
    fn test_missing_digest_rejected() {
        let (mut fields, payload) = fields_of(&subject(&[1]));
        fields.remove(field::DIGEST);
        let err = decode_subject(fields, &payload).unwrap_err();
        assert!(err.to_string().contains("missing field 'digest'"));
    }

    #[test]
    fn test_digest_is_last_field() {
        let (fields, payload) = encode_subject(&subject(&[1])).unwrap();
        let (name, value) = fields.last().unwrap();
        assert_eq!(*name, field::DIGEST);
        let content = fields[..fields.len() - 1].iter().map(|(n, v)| (*n, v));
        let expected = record_digest(content, &payload).unwrap();
        assert_eq!(value, &FieldValue::Text(expected));
    }
}
