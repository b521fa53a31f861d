use std::collections::BTreeMap;

/// Ordered field map for one config section. Keys are raw field names.
pub type FieldMap = BTreeMap<String, String>;

/// `(sequence, shot)` identifier used by the range index and editors.
pub type ShotKey = (String, String);
