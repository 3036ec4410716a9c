use std::{
    fs, io,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};

use super::files::{read_json, write_atomic, write_json_atomic};

const ZARR_FORMAT: u8 = 2;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum DType {
    F32,
    F64,
    Bool,
}

impl DType {
    fn zarr_name(self) -> &'static str {
        match self {
            Self::F32 => "<f4",
            Self::F64 => "<f8",
            Self::Bool => "|b1",
        }
    }

    fn item_size(self) -> usize {
        match self {
            Self::F32 => 4,
            Self::F64 => 8,
            Self::Bool => 1,
        }
    }

    fn fill_value(self) -> serde_json::Value {
        match self {
            Self::F32 | Self::F64 => serde_json::json!(0.0),
            Self::Bool => serde_json::json!(false),
        }
    }
}

/// `.zarray` document, Zarr v2.
#[derive(Debug, Serialize, Deserialize)]
struct ArrayMeta {
    zarr_format: u8,
    shape: Vec<usize>,
    chunks: Vec<usize>,
    dtype: String,
    compressor: Option<serde_json::Value>,
    fill_value: serde_json::Value,
    order: String,
    filters: Option<serde_json::Value>,
    #[serde(default = "default_separator")]
    dimension_separator: String,
}

fn default_separator() -> String {
    ".".to_string()
}

/// One uncompressed array chunked along its first (frame) axis only.
///
/// Chunk files always hold `chunk_frames` rows; rows past the array length
/// are fill. `.zarray` is rewritten after chunk data, so a crash mid-write
/// leaves the previous shape in place.
#[derive(Debug)]
pub(crate) struct ChunkedArray {
    dir: PathBuf,
    dtype: DType,
    row_shape: Vec<usize>,
    chunk_frames: usize,
    len: usize,
}

impl ChunkedArray {
    pub(crate) fn open_or_create(
        dir: &Path,
        dtype: DType,
        row_shape: &[usize],
        chunk_frames: usize,
    ) -> Result<Self, String> {
        let meta_path = dir.join(".zarray");
        if meta_path.exists() {
            let meta: ArrayMeta = read_json(&meta_path)?;
            return Self::from_meta(dir, dtype, row_shape, meta);
        }

        if chunk_frames == 0 {
            return Err("chunk length must be positive".to_string());
        }
        fs::create_dir_all(dir)
            .map_err(|e| format!("failed to create array dir {}: {e}", dir.display()))?;
        let array = Self {
            dir: dir.to_path_buf(),
            dtype,
            row_shape: row_shape.to_vec(),
            chunk_frames,
            len: 0,
        };
        array.write_meta()?;
        Ok(array)
    }

    fn from_meta(
        dir: &Path,
        dtype: DType,
        row_shape: &[usize],
        meta: ArrayMeta,
    ) -> Result<Self, String> {
        let name = dir.display();
        if meta.zarr_format != ZARR_FORMAT {
            return Err(format!("{name}: unsupported zarr_format {}", meta.zarr_format));
        }
        if meta.dtype != dtype.zarr_name() {
            return Err(format!(
                "{name}: dtype {} does not match expected {}",
                meta.dtype,
                dtype.zarr_name()
            ));
        }
        if meta.compressor.is_some() || meta.filters.is_some() {
            return Err(format!("{name}: compressed arrays are not supported"));
        }
        let Some((&len, persisted_rows)) = meta.shape.split_first() else {
            return Err(format!("{name}: empty shape"));
        };
        if persisted_rows != row_shape {
            return Err(format!(
                "{name}: row shape {persisted_rows:?} does not match expected {row_shape:?}"
            ));
        }
        let chunk_frames = meta.chunks.first().copied().unwrap_or(0);
        if chunk_frames == 0 || meta.chunks[1..] != *row_shape {
            return Err(format!("{name}: unsupported chunk layout {:?}", meta.chunks));
        }

        Ok(Self {
            dir: dir.to_path_buf(),
            dtype,
            row_shape: row_shape.to_vec(),
            chunk_frames,
            len,
        })
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    pub(crate) fn row_bytes(&self) -> usize {
        self.dtype.item_size() * self.row_shape.iter().product::<usize>()
    }

    fn chunk_path(&self, chunk: usize) -> PathBuf {
        let mut key = chunk.to_string();
        for _ in &self.row_shape {
            key.push_str(".0");
        }
        self.dir.join(key)
    }

    fn write_meta(&self) -> Result<(), String> {
        let mut shape = Vec::with_capacity(self.row_shape.len() + 1);
        shape.push(self.len);
        shape.extend_from_slice(&self.row_shape);
        let mut chunks = Vec::with_capacity(self.row_shape.len() + 1);
        chunks.push(self.chunk_frames);
        chunks.extend_from_slice(&self.row_shape);

        let meta = ArrayMeta {
            zarr_format: ZARR_FORMAT,
            shape,
            chunks,
            dtype: self.dtype.zarr_name().to_string(),
            compressor: None,
            fill_value: self.dtype.fill_value(),
            order: "C".to_string(),
            filters: None,
            dimension_separator: default_separator(),
        };
        write_json_atomic(&self.dir.join(".zarray"), &meta)
    }

    /// Write little-endian rows starting at frame `start`; the array length
    /// becomes `start + rows`. Rows at or past `start` are overwritten.
    pub(crate) fn write_rows(&mut self, start: usize, rows: &[u8]) -> Result<(), String> {
        let row_bytes = self.row_bytes();
        if rows.len() % row_bytes != 0 {
            return Err(format!(
                "{}: {} bytes is not a whole number of {row_bytes}-byte rows",
                self.dir.display(),
                rows.len()
            ));
        }
        let count = rows.len() / row_bytes;
        let chunk_bytes = row_bytes * self.chunk_frames;

        let mut done = 0usize;
        while done < count {
            let frame = start + done;
            let chunk = frame / self.chunk_frames;
            let offset = frame % self.chunk_frames;
            let take = (self.chunk_frames - offset).min(count - done);

            let path = self.chunk_path(chunk);
            let mut data = self.read_chunk(&path, chunk_bytes)?;
            data[offset * row_bytes..(offset + take) * row_bytes]
                .copy_from_slice(&rows[done * row_bytes..(done + take) * row_bytes]);
            write_atomic(&path, &data)?;

            done += take;
        }

        self.len = start + count;
        self.write_meta()
    }

    fn read_chunk(&self, path: &Path, chunk_bytes: usize) -> Result<Vec<u8>, String> {
        match fs::read(path) {
            Ok(bytes) if bytes.len() == chunk_bytes => Ok(bytes),
            Ok(bytes) => Err(format!(
                "chunk {} has {} bytes, expected {chunk_bytes}",
                path.display(),
                bytes.len()
            )),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(vec![0u8; chunk_bytes]),
            Err(e) => Err(format!("failed to read chunk {}: {e}", path.display())),
        }
    }

    #[cfg(test)]
    pub(crate) fn read_rows(&self, start: usize, count: usize) -> Result<Vec<u8>, String> {
        let row_bytes = self.row_bytes();
        let chunk_bytes = row_bytes * self.chunk_frames;
        let mut out = Vec::with_capacity(count * row_bytes);
        for frame in start..start + count {
            let chunk = self.read_chunk(&self.chunk_path(frame / self.chunk_frames), chunk_bytes)?;
            let offset = frame % self.chunk_frames;
            out.extend_from_slice(&chunk[offset * row_bytes..(offset + 1) * row_bytes]);
        }
        Ok(out)
    }
}
