//! Append-only record journal backing the persistent stores.
//!
//! Layout: `MAGIC || VERSION` followed by frames of
//! `uvarint(len) || cbor(record) || blake3(cbor)[..8]`.
//! A frame that is cut short or fails its checksum marks the end of the
//! journal; it and everything after it is truncated on open.

use std::fs::{File, OpenOptions};
use std::io::{BufReader, Read, Seek, SeekFrom, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::error::{ExitError, Result};

const MAGIC: &[u8; 8] = b"GEXLOG\0\0";
const VERSION: u8 = 1;
const HEADER_LEN: u64 = MAGIC.len() as u64 + 1;
const TAG_LEN: usize = 8;
const MAX_RECORD_LEN: u64 = 64 << 20;

pub struct Journal<R> {
    f: File,
    path: PathBuf,
    records: u64,
    _rec: PhantomData<fn() -> R>,
}

enum Varint {
    Value(u64, usize),
    Eof,
    Torn,
}

enum Frame {
    Record(Vec<u8>, u64),
    End,
    Torn(&'static str),
}

fn put_uvarint(out: &mut Vec<u8>, mut x: u64) {
    while x >= 0x80 {
        out.push((x as u8) | 0x80);
        x >>= 7;
    }
    out.push(x as u8);
}

fn get_uvarint<R: Read>(r: &mut R) -> Result<Varint> {
    let mut x: u64 = 0;
    let mut s: u32 = 0;
    for i in 0..10 {
        let mut b = [0u8; 1];
        match r.read(&mut b) {
            Ok(0) if i == 0 => return Ok(Varint::Eof),
            Ok(0) => return Ok(Varint::Torn),
            Ok(_) => {
                let byte = b[0];
                if byte < 0x80 {
                    x |= (byte as u64) << s;
                    return Ok(Varint::Value(x, i + 1));
                }
                x |= ((byte & 0x7f) as u64) << s;
                s += 7;
            }
            Err(e) => return Err(e.into()),
        }
    }
    Ok(Varint::Torn)
}

fn encode_frame(payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + 10 + TAG_LEN);
    put_uvarint(&mut out, payload.len() as u64);
    out.extend_from_slice(payload);
    out.extend_from_slice(&blake3::hash(payload).as_bytes()[..TAG_LEN]);
    out
}

fn read_frame<R: Read>(r: &mut R) -> Result<Frame> {
    let (len, varint_len) = match get_uvarint(r)? {
        Varint::Value(n, l) => (n, l),
        Varint::Eof => return Ok(Frame::End),
        Varint::Torn => return Ok(Frame::Torn("length prefix")),
    };
    if len > MAX_RECORD_LEN {
        return Ok(Frame::Torn("oversized length"));
    }
    let mut buf = vec![0u8; len as usize + TAG_LEN];
    if let Err(e) = r.read_exact(&mut buf) {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            return Ok(Frame::Torn("payload"));
        }
        return Err(e.into());
    }
    let intact = {
        let (payload, tag) = buf.split_at(len as usize);
        &blake3::hash(payload).as_bytes()[..TAG_LEN] == tag
    };
    if !intact {
        return Ok(Frame::Torn("checksum"));
    }
    buf.truncate(len as usize);
    Ok(Frame::Record(buf, (varint_len + len as usize + TAG_LEN) as u64))
}

fn encode_record<R: Serialize>(rec: &R) -> Result<Vec<u8>> {
    serde_cbor::to_vec(rec).map_err(|e| ExitError::Format(format!("encode journal record: {e}")))
}

impl<R: Serialize + DeserializeOwned> Journal<R> {
    /// Open (or create) the journal at `path` and replay every intact record.
    pub fn open(path: &Path) -> Result<(Self, Vec<R>)> {
        let mut f = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        if f.metadata()?.len() == 0 {
            f.write_all(MAGIC)?;
            f.write_all(&[VERSION])?;
            f.sync_data()?;
        } else {
            let mut header = [0u8; HEADER_LEN as usize];
            f.read_exact(&mut header).map_err(|_| {
                ExitError::Format(format!("{}: truncated journal header", path.display()))
            })?;
            if &header[..MAGIC.len()] != MAGIC {
                return Err(ExitError::Format(format!(
                    "{} is not a journal",
                    path.display()
                )));
            }
            if header[MAGIC.len()] != VERSION {
                return Err(ExitError::Format(format!(
                    "{}: unsupported journal version {}",
                    path.display(),
                    header[MAGIC.len()]
                )));
            }
        }

        let mut records = Vec::new();
        let mut good_end = HEADER_LEN;
        f.seek(SeekFrom::Start(HEADER_LEN))?;
        {
            let mut rd = BufReader::new(&f);
            loop {
                match read_frame(&mut rd)? {
                    Frame::Record(payload, frame_len) => {
                        let rec: R = serde_cbor::from_slice(&payload).map_err(|e| {
                            ExitError::Format(format!(
                                "{}: record at offset {good_end}: {e}",
                                path.display()
                            ))
                        })?;
                        records.push(rec);
                        good_end += frame_len;
                    }
                    Frame::End => break,
                    Frame::Torn(what) => {
                        warn!(journal = %path.display(), offset = good_end, what, "dropping torn journal tail");
                        break;
                    }
                }
            }
        }

        if good_end < f.metadata()?.len() {
            f.set_len(good_end)?;
            f.sync_data()?;
        }
        f.seek(SeekFrom::End(0))?;
        debug!(journal = %path.display(), records = records.len(), "journal replayed");

        let journal = Self {
            f,
            path: path.to_path_buf(),
            records: records.len() as u64,
            _rec: PhantomData,
        };
        Ok((journal, records))
    }

    /// Append one record and sync it. A failed write is rolled back so the
    /// next append does not land behind a partial frame.
    pub fn append(&mut self, rec: &R) -> Result<()> {
        let frame = encode_frame(&encode_record(rec)?);
        let end = self.f.stream_position()?;
        let written = self
            .f
            .write_all(&frame)
            .and_then(|_| self.f.sync_data());
        if let Err(e) = written {
            let _ = self.f.set_len(end);
            let _ = self.f.seek(SeekFrom::Start(end));
            return Err(e.into());
        }
        self.records += 1;
        Ok(())
    }

    /// Replace the whole journal with `recs`; the swap is atomic.
    pub fn rewrite<'a, I>(&mut self, recs: I) -> Result<()>
    where
        I: IntoIterator<Item = &'a R>,
        R: 'a,
    {
        let dir = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(Path::new("."));
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        tmp.write_all(MAGIC)?;
        tmp.write_all(&[VERSION])?;
        let mut n = 0u64;
        for rec in recs {
            tmp.write_all(&encode_frame(&encode_record(rec)?))?;
            n += 1;
        }
        tmp.as_file().sync_all()?;
        let mut f = tmp.persist(&self.path).map_err(|e| ExitError::Io(e.error))?;
        f.seek(SeekFrom::End(0))?;

        debug!(journal = %self.path.display(), before = self.records, after = n, "journal compacted");
        self.f = f;
        self.records = n;
        Ok(())
    }

    pub fn record_count(&self) -> u64 {
        self.records
    }
}
