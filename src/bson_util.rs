use std::io::{Read, Write};

use crate::{
    bson::{Bson, Document},
    error::{Error, Result},
};

/// Coerce numeric types into an `i64` if it would be lossless to do so. If this Bson is not numeric
/// or the conversion would be lossy (e.g. 1.5 -> 1), this returns `None`.
#[allow(clippy::cast_possible_truncation)]
pub(crate) fn get_int(val: &Bson) -> Option<i64> {
    match *val {
        Bson::Int32(i) => Some(i64::from(i)),
        Bson::Int64(i) => Some(i),
        Bson::Double(f) if (f - (f as i64 as f64)).abs() <= f64::EPSILON => Some(f as i64),
        _ => None,
    }
}

pub(crate) fn first_key(document: &Document) -> Option<&str> {
    document.keys().next().map(String::as_str)
}

pub(crate) fn update_document_check(update: &Document) -> Result<()> {
    match first_key(update) {
        Some(s) if s.starts_with('$') => Ok(()),
        _ => Err(Error::invalid_argument(
            "update document must have first key starting with '$'",
        )),
    }
}

/// Serializes `document` to its BSON bytes.
pub(crate) fn document_bytes(document: &Document) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    document.to_writer(&mut bytes)?;
    Ok(bytes)
}

/// The size in bytes of the provided document's entry in a BSON array at the given index.
pub(crate) fn array_entry_size_bytes(index: usize, doc_len: usize) -> usize {
    //   * type (1 byte)
    //   * number of decimal digits in key
    //   * null terminator for the key (1 byte)
    //   * size of value
    1 + num_decimal_digits(index) + 1 + doc_len
}

/// The number of digits in `n` in base 10.
/// Useful for calculating the size of an array entry in BSON.
fn num_decimal_digits(mut n: usize) -> usize {
    let mut digits = 0;

    loop {
        n /= 10;
        digits += 1;

        if n == 0 {
            return digits;
        }
    }
}

/// Read a document's raw BSON bytes from the provided reader.
pub(crate) fn read_document_bytes<R: Read>(mut reader: R) -> Result<Vec<u8>> {
    let mut length_bytes = [0u8; 4];
    reader.read_exact(&mut length_bytes)?;
    let length = i32::from_le_bytes(length_bytes);
    if length < 5 {
        return Err(Error::invalid_response(format!(
            "document length {length} is too small"
        )));
    }

    let mut bytes = Vec::with_capacity(length as usize);
    bytes.write_all(&length_bytes)?;

    reader.take(length as u64 - 4).read_to_end(&mut bytes)?;
    if bytes.len() != length as usize {
        return Err(Error::invalid_response(format!(
            "expected a document of {} bytes but only {} were available",
            length,
            bytes.len()
        )));
    }

    Ok(bytes)
}
