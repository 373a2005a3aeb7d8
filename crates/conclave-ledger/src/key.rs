//! Composite secondary-index keys.
//!
//! A composite key concatenates an index name and its field values with a
//! NUL delimiter: `\0{index}\0{field}\0{field}\0…`. Because the delimiter
//! sorts below every other character, all keys of one index form a
//! contiguous, ordered span, and any prefix of fields bounds a range scan.

use crate::LedgerError;

const DELIMITER: char = '\u{0}';

/// Build the composite key for `index` with the given field values.
///
/// Fields may be empty but must not contain the NUL delimiter. Passing fewer
/// fields than the index carries yields a scan prefix rather than a full key.
pub fn composite_key(index: &str, parts: &[&str]) -> Result<String, LedgerError> {
  if index.is_empty() {
    return Err(LedgerError::EmptyIndex);
  }
  if index.contains(DELIMITER) {
    return Err(LedgerError::ReservedDelimiter(index.to_string()));
  }

  let mut key = String::new();
  key.push(DELIMITER);
  key.push_str(index);
  key.push(DELIMITER);
  for part in parts {
    if part.contains(DELIMITER) {
      return Err(LedgerError::ReservedDelimiter((*part).to_string()));
    }
    key.push_str(part);
    key.push(DELIMITER);
  }

  Ok(key)
}

/// Split a composite key back into its index name and field values.
pub fn split_composite_key(key: &str) -> Result<(String, Vec<String>), LedgerError> {
  let rest = key
    .strip_prefix(DELIMITER)
    .ok_or_else(|| LedgerError::MalformedKey(key.to_string()))?;
  let rest = rest
    .strip_suffix(DELIMITER)
    .ok_or_else(|| LedgerError::MalformedKey(key.to_string()))?;

  let mut fields = rest.split(DELIMITER);
  let index = fields
    .next()
    .filter(|index| !index.is_empty())
    .ok_or_else(|| LedgerError::MalformedKey(key.to_string()))?;

  Ok((index.to_string(), fields.map(str::to_string).collect()))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_composite_key_round_trip() {
    let key = composite_key("owner~status~did~id", &["alice", "1", "d1", "n1"]).unwrap();
    let (index, parts) = split_composite_key(&key).unwrap();
    assert_eq!(index, "owner~status~did~id");
    assert_eq!(parts, vec!["alice", "1", "d1", "n1"]);
  }

  #[test]
  fn test_partial_key_is_prefix_of_full_key() {
    let full = composite_key("owner~id", &["alice", "record-1"]).unwrap();
    let partial = composite_key("owner~id", &["alice"]).unwrap();
    assert!(full.starts_with(&partial));
  }

  #[test]
  fn test_empty_index_rejected() {
    assert!(matches!(composite_key("", &[]), Err(LedgerError::EmptyIndex)));
  }

  #[test]
  fn test_reserved_delimiter_rejected() {
    let err = composite_key("idx", &["bad\u{0}part"]);
    assert!(matches!(err, Err(LedgerError::ReservedDelimiter(_))));
  }

  #[test]
  fn test_split_rejects_plain_key() {
    assert!(split_composite_key("plain-key").is_err());
  }
}
