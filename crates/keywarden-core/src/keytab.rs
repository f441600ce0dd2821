// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! In-memory codec for the MIT keytab FILE byte format.
//!
//! The first byte of a keytab always has the value 5; the second byte holds
//! the format version (1 or 2). Version 1 uses native byte order, version 2
//! is always big-endian. After the two-byte header the container is a
//! sequence of signed 32-bit record lengths followed by key records or
//! holes: a positive length is a valid entry, a negative length is a
//! zero-filled hole of that size, and zero marks the end of the file.
//!
//! Serialization always emits version 2 with the 32-bit kvno extension and
//! never emits holes.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};

use crate::error::KeytabError;

const KEYTAB_FIRST_BYTE: u8 = 5;
const KRB5_NT_PRINCIPAL: i32 = 1;

/// One key entry in a keytab container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeytabEntry {
	/// Principal name in `comp1/comp2@REALM` form.
	pub principal: String,
	pub kvno: u32,
	pub timestamp: DateTime<Utc>,
	pub enctype: i32,
	pub key: Vec<u8>,
}

/// An ordered keytab container.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Keytab {
	pub entries: Vec<KeytabEntry>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Endian {
	Big,
	Native,
}

struct Cursor<'a> {
	bytes: &'a [u8],
	pos: usize,
}

impl<'a> Cursor<'a> {
	fn new(bytes: &'a [u8]) -> Self {
		Self { bytes, pos: 0 }
	}

	fn remaining(&self) -> usize {
		self.bytes.len() - self.pos
	}

	fn take(&mut self, n: usize) -> Result<&'a [u8], KeytabError> {
		if self.remaining() < n {
			return Err(KeytabError::Truncated);
		}
		let slice = &self.bytes[self.pos..self.pos + n];
		self.pos += n;
		Ok(slice)
	}

	fn read_u8(&mut self) -> Result<u8, KeytabError> {
		Ok(self.take(1)?[0])
	}

	fn read_u16(&mut self, endian: Endian) -> Result<u16, KeytabError> {
		let raw: [u8; 2] = self.take(2)?.try_into().expect("sized slice");
		Ok(match endian {
			Endian::Big => u16::from_be_bytes(raw),
			Endian::Native => u16::from_ne_bytes(raw),
		})
	}

	fn read_i16(&mut self, endian: Endian) -> Result<i16, KeytabError> {
		Ok(self.read_u16(endian)? as i16)
	}

	fn read_u32(&mut self, endian: Endian) -> Result<u32, KeytabError> {
		let raw: [u8; 4] = self.take(4)?.try_into().expect("sized slice");
		Ok(match endian {
			Endian::Big => u32::from_be_bytes(raw),
			Endian::Native => u32::from_ne_bytes(raw),
		})
	}

	fn read_i32(&mut self, endian: Endian) -> Result<i32, KeytabError> {
		Ok(self.read_u32(endian)? as i32)
	}

	fn read_data(&mut self, endian: Endian) -> Result<Vec<u8>, KeytabError> {
		let len = self.read_u16(endian)? as usize;
		Ok(self.take(len)?.to_vec())
	}
}

impl Keytab {
	/// Parse a keytab container from bytes.
	pub fn parse(bytes: &[u8]) -> Result<Self, KeytabError> {
		let mut cursor = Cursor::new(bytes);

		let magic = cursor.read_u8()?;
		if magic != KEYTAB_FIRST_BYTE {
			return Err(KeytabError::BadMagic { found: magic });
		}
		let version = cursor.read_u8()?;
		let endian = match version {
			1 => Endian::Native,
			2 => Endian::Big,
			found => return Err(KeytabError::BadVersion { found }),
		};

		let mut entries = Vec::new();
		while cursor.remaining() >= 4 {
			let size = cursor.read_i32(endian)?;
			if size == 0 {
				break;
			}
			if size < 0 {
				if size == i32::MIN {
					return Err(KeytabError::BadRecord {
						message: "hole length overflows".to_string(),
					});
				}
				// Zero-filled hole left by an entry removal; skip it.
				cursor.take(-size as usize)?;
				continue;
			}
			let record = cursor.take(size as usize)?;
			entries.push(Self::parse_entry(record, version, endian)?);
		}

		Ok(Self { entries })
	}

	fn parse_entry(record: &[u8], version: u8, endian: Endian) -> Result<KeytabEntry, KeytabError> {
		let mut cursor = Cursor::new(record);

		// Version 1 counts the realm as a component.
		let raw_count = cursor.read_u16(endian)?;
		let component_count = match version {
			1 if raw_count > 1 => raw_count - 1,
			1 => {
				return Err(KeytabError::BadRecord {
					message: "empty principal".to_string(),
				})
			}
			_ if raw_count > 0 => raw_count,
			_ => {
				return Err(KeytabError::BadRecord {
					message: "empty principal".to_string(),
				})
			}
		};

		let realm = string_data(cursor.read_data(endian)?)?;
		let mut components = Vec::with_capacity(component_count as usize);
		for _ in 0..component_count {
			components.push(string_data(cursor.read_data(endian)?)?);
		}
		if version != 1 {
			// Name type; not preserved in the entry model.
			cursor.read_i32(endian)?;
		}

		let timestamp = cursor.read_u32(endian)?;
		let mut kvno = cursor.read_u8()? as u32;
		let enctype = cursor.read_i16(endian)? as i32;
		let key = cursor.read_data(endian)?;

		// The 32-bit key version overrides the 8-bit one when at least four
		// bytes remain in the record and the value is non-zero.
		if cursor.remaining() >= 4 {
			let kvno32 = cursor.read_u32(endian)?;
			if kvno32 != 0 {
				kvno = kvno32;
			}
		}

		let timestamp = DateTime::<Utc>::from_timestamp(timestamp as i64, 0)
			.ok_or_else(|| KeytabError::BadRecord {
				message: "timestamp out of range".to_string(),
			})?;

		Ok(KeytabEntry {
			principal: format!("{}@{}", components.join("/"), realm),
			kvno,
			timestamp,
			enctype,
			key,
		})
	}

	/// Serialize to format version 2.
	pub fn to_bytes(&self) -> Result<Vec<u8>, KeytabError> {
		let mut out = vec![KEYTAB_FIRST_BYTE, 2];
		for entry in &self.entries {
			let record = Self::entry_bytes(entry)?;
			out.extend_from_slice(&(record.len() as i32).to_be_bytes());
			out.extend_from_slice(&record);
		}
		Ok(out)
	}

	fn entry_bytes(entry: &KeytabEntry) -> Result<Vec<u8>, KeytabError> {
		let (components, realm) = split_principal(&entry.principal)?;

		let mut record = Vec::new();
		record.extend_from_slice(&(components.len() as u16).to_be_bytes());
		write_data(&mut record, realm.as_bytes());
		for component in &components {
			write_data(&mut record, component.as_bytes());
		}
		record.extend_from_slice(&KRB5_NT_PRINCIPAL.to_be_bytes());
		record.extend_from_slice(&(entry.timestamp.timestamp() as u32).to_be_bytes());
		record.push((entry.kvno & 0xff) as u8);
		record.extend_from_slice(&(entry.enctype as i16).to_be_bytes());
		write_data(&mut record, &entry.key);
		record.extend_from_slice(&entry.kvno.to_be_bytes());
		Ok(record)
	}

	/// Keep only the entries the predicate accepts.
	pub fn retain<F>(&mut self, keep: F)
	where
		F: FnMut(&KeytabEntry) -> bool,
	{
		self.entries.retain(keep);
	}

	/// Distinct principal names present in the container.
	pub fn principals(&self) -> BTreeSet<&str> {
		self.entries.iter().map(|e| e.principal.as_str()).collect()
	}

	pub fn is_empty(&self) -> bool {
		self.entries.is_empty()
	}
}

fn string_data(bytes: Vec<u8>) -> Result<String, KeytabError> {
	String::from_utf8(bytes).map_err(|_| KeytabError::BadRecord {
		message: "non-UTF-8 principal data".to_string(),
	})
}

fn write_data(out: &mut Vec<u8>, bytes: &[u8]) {
	out.extend_from_slice(&(bytes.len() as u16).to_be_bytes());
	out.extend_from_slice(bytes);
}

fn split_principal(principal: &str) -> Result<(Vec<&str>, &str), KeytabError> {
	let bad = || KeytabError::BadPrincipal {
		name: principal.to_string(),
	};
	let (name, realm) = principal.rsplit_once('@').ok_or_else(bad)?;
	if name.is_empty() || realm.is_empty() {
		return Err(bad());
	}
	let components: Vec<&str> = name.split('/').collect();
	if components.iter().any(|c| c.is_empty()) {
		return Err(bad());
	}
	Ok((components, realm))
}
