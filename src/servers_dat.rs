//! Minimal big-endian NBT reader for `.minecraft/servers.dat`, just enough
//! to pull the `servers` list's `name`, `ip`, and optional `icon`.

use beacon_core::{LauncherError, Result, ServerListEntry};
use std::io::{Cursor, Read};
use std::path::Path;

const TAG_END: u8 = 0;
const TAG_BYTE: u8 = 1;
const TAG_SHORT: u8 = 2;
const TAG_INT: u8 = 3;
const TAG_LONG: u8 = 4;
const TAG_FLOAT: u8 = 5;
const TAG_DOUBLE: u8 = 6;
const TAG_BYTE_ARRAY: u8 = 7;
const TAG_STRING: u8 = 8;
const TAG_LIST: u8 = 9;
const TAG_COMPOUND: u8 = 10;
const TAG_INT_ARRAY: u8 = 11;
const TAG_LONG_ARRAY: u8 = 12;

pub async fn list_servers(servers_dat_path: &Path) -> Result<Vec<ServerListEntry>> {
    let raw = tokio::fs::read(servers_dat_path).await?;
    tokio::task::spawn_blocking(move || parse(&raw)).await?
}

fn parse(raw: &[u8]) -> Result<Vec<ServerListEntry>> {
    let bytes = if raw.len() >= 2 && raw[0] == 0x1f && raw[1] == 0x8b {
        use std::io::Read as _;
        let mut decoder = flate2::read::GzDecoder::new(raw);
        let mut out = Vec::new();
        decoder.read_to_end(&mut out).map_err(|e| LauncherError::Filesystem(e.to_string()))?;
        out
    } else {
        raw.to_vec()
    };

    let mut cursor = Cursor::new(bytes.as_slice());
    let root = read_named_tag(&mut cursor)?;
    let Nbt::Compound(fields) = root.1 else {
        return Err(LauncherError::SchemaInvalid("servers.dat root is not a compound".into()));
    };

    let Some(Nbt::List(entries)) = fields.get("servers") else {
        return Ok(Vec::new());
    };

    let mut out = Vec::new();
    for entry in entries {
        let Nbt::Compound(fields) = entry else { continue };
        let name = match fields.get("name") {
            Some(Nbt::String(s)) => s.clone(),
            _ => continue,
        };
        let ip = match fields.get("ip") {
            Some(Nbt::String(s)) => s.clone(),
            _ => continue,
        };
        let icon = match fields.get("icon") {
            Some(Nbt::String(s)) => Some(s.clone()),
            _ => None,
        };
        out.push(ServerListEntry { name, ip, icon });
    }
    Ok(out)
}

#[derive(Debug, Clone)]
enum Nbt {
    Byte(i8),
    Short(i16),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    ByteArray(Vec<i8>),
    String(String),
    List(Vec<Nbt>),
    Compound(std::collections::HashMap<String, Nbt>),
    IntArray(Vec<i32>),
    LongArray(Vec<i64>),
}

fn read_named_tag(cursor: &mut Cursor<&[u8]>) -> Result<(String, Nbt)> {
    let tag_type = read_u8(cursor)?;
    if tag_type == TAG_END {
        return Ok((String::new(), Nbt::Compound(Default::default())));
    }
    let name = read_modified_utf8(cursor)?;
    let value = read_payload(cursor, tag_type)?;
    Ok((name, value))
}

fn read_payload(cursor: &mut Cursor<&[u8]>, tag_type: u8) -> Result<Nbt> {
    Ok(match tag_type {
        TAG_BYTE => Nbt::Byte(read_u8(cursor)? as i8),
        TAG_SHORT => Nbt::Short(read_i16(cursor)?),
        TAG_INT => Nbt::Int(read_i32(cursor)?),
        TAG_LONG => Nbt::Long(read_i64(cursor)?),
        TAG_FLOAT => Nbt::Float(f32::from_bits(read_i32(cursor)? as u32)),
        TAG_DOUBLE => Nbt::Double(f64::from_bits(read_i64(cursor)? as u64)),
        TAG_BYTE_ARRAY => {
            let len = read_i32(cursor)?.max(0) as usize;
            let mut buf = vec![0u8; len];
            cursor.read_exact(&mut buf).map_err(|e| LauncherError::SchemaInvalid(e.to_string()))?;
            Nbt::ByteArray(buf.into_iter().map(|b| b as i8).collect())
        }
        TAG_STRING => Nbt::String(read_modified_utf8(cursor)?),
        TAG_LIST => {
            let element_type = read_u8(cursor)?;
            let len = read_i32(cursor)?.max(0);
            let mut items = Vec::with_capacity(len as usize);
            for _ in 0..len {
                items.push(read_payload(cursor, element_type)?);
            }
            Nbt::List(items)
        }
        TAG_COMPOUND => {
            let mut fields = std::collections::HashMap::new();
            loop {
                let field_type = read_u8(cursor)?;
                if field_type == TAG_END {
                    break;
                }
                let name = read_modified_utf8(cursor)?;
                let value = read_payload(cursor, field_type)?;
                fields.insert(name, value);
            }
            Nbt::Compound(fields)
        }
        TAG_INT_ARRAY => {
            let len = read_i32(cursor)?.max(0);
            let mut items = Vec::with_capacity(len as usize);
            for _ in 0..len {
                items.push(read_i32(cursor)?);
            }
            Nbt::IntArray(items)
        }
        TAG_LONG_ARRAY => {
            let len = read_i32(cursor)?.max(0);
            let mut items = Vec::with_capacity(len as usize);
            for _ in 0..len {
                items.push(read_i64(cursor)?);
            }
            Nbt::LongArray(items)
        }
        other => return Err(LauncherError::SchemaInvalid(format!("unknown NBT tag {other}"))),
    })
}

fn read_u8(cursor: &mut Cursor<&[u8]>) -> Result<u8> {
    let mut buf = [0u8; 1];
    cursor.read_exact(&mut buf).map_err(|e| LauncherError::SchemaInvalid(e.to_string()))?;
    Ok(buf[0])
}

fn read_i16(cursor: &mut Cursor<&[u8]>) -> Result<i16> {
    let mut buf = [0u8; 2];
    cursor.read_exact(&mut buf).map_err(|e| LauncherError::SchemaInvalid(e.to_string()))?;
    Ok(i16::from_be_bytes(buf))
}

fn read_i32(cursor: &mut Cursor<&[u8]>) -> Result<i32> {
    let mut buf = [0u8; 4];
    cursor.read_exact(&mut buf).map_err(|e| LauncherError::SchemaInvalid(e.to_string()))?;
    Ok(i32::from_be_bytes(buf))
}

fn read_i64(cursor: &mut Cursor<&[u8]>) -> Result<i64> {
    let mut buf = [0u8; 8];
    cursor.read_exact(&mut buf).map_err(|e| LauncherError::SchemaInvalid(e.to_string()))?;
    Ok(i64::from_be_bytes(buf))
}

fn read_modified_utf8(cursor: &mut Cursor<&[u8]>) -> Result<String> {
    let len = {
        let mut buf = [0u8; 2];
        cursor.read_exact(&mut buf).map_err(|e| LauncherError::SchemaInvalid(e.to_string()))?;
        u16::from_be_bytes(buf) as usize
    };
    let mut buf = vec![0u8; len];
    cursor.read_exact(&mut buf).map_err(|e| LauncherError::SchemaInvalid(e.to_string()))?;
    // Real NBT uses CESU-8; every server name/IP in practice is plain ASCII,
    // so lossy UTF-8 decoding is accurate for this reader's purpose.
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_string(out: &mut Vec<u8>, s: &str) {
        out.extend_from_slice(&(s.len() as u16).to_be_bytes());
        out.extend_from_slice(s.as_bytes());
    }

    /// Hand-builds an uncompressed `servers.dat` with one entry.
    fn build_sample() -> Vec<u8> {
        let mut out = Vec::new();
        out.push(TAG_COMPOUND);
        write_string(&mut out, "");

        out.push(TAG_LIST);
        write_string(&mut out, "servers");
        out.push(TAG_COMPOUND);
        out.extend_from_slice(&1i32.to_be_bytes());

        out.push(TAG_STRING);
        write_string(&mut out, "name");
        write_string(&mut out, "Hypixel");

        out.push(TAG_STRING);
        write_string(&mut out, "ip");
        write_string(&mut out, "mc.hypixel.net");

        out.push(TAG_END);

        out.push(TAG_END);
        out
    }

    #[test]
    fn parses_uncompressed_server_entry() {
        let bytes = build_sample();
        let servers = parse(&bytes).unwrap();
        assert_eq!(servers.len(), 1);
        assert_eq!(servers[0].name, "Hypixel");
        assert_eq!(servers[0].ip, "mc.hypixel.net");
        assert!(servers[0].icon.is_none());
    }
}
